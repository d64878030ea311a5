// Error codes shared by every heatspace error enum. The numbering follows the
// gRPC status codes so hosts that expose the index over RPC can forward them
// unchanged. https://grpc.github.io/grpc/core/md_doc_statuscodes.html
use std::error::Error;

mod validator;
pub use validator::*;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // UNKNOWN indicates an unknown error.
    Unknown = 2,
    // INVALID_ARGUMENT indicates the caller passed a malformed argument or configuration.
    InvalidArgument = 3,
    // NOT_FOUND means an identifier (cloud type, cloud ID) does not exist in the index.
    NotFound = 5,
    // FAILED_PRECONDITION indicates the index is not in a state required for the operation.
    FailedPrecondition = 9,
    // OUT_OF_RANGE means a position or value lies past the representable range.
    OutOfRange = 11,
    // INTERNAL errors are internal errors.
    Internal = 13,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::Success => "Success",
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::FailedPrecondition => "FailedPreconditionError",
            ErrorCodes::OutOfRange => "OutOfRangeError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::Unknown => "HeatspaceError",
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ErrorCodes::InvalidArgument | ErrorCodes::NotFound | ErrorCodes::OutOfRange
        )
    }
}

impl std::fmt::Display for ErrorCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait HeatspaceError: Error + Send + Sync {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn HeatspaceError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
    fn should_trace_error(&self) -> bool {
        true
    }
}

impl Error for Box<dyn HeatspaceError> {}

impl HeatspaceError for Box<dyn HeatspaceError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }

    fn should_trace_error(&self) -> bool {
        self.as_ref().should_trace_error()
    }
}
