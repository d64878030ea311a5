use crate::{ErrorCodes, HeatspaceError};
use thiserror::Error;

/// A configuration field that failed validation.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Validation error: `{field}` {reason}")]
pub struct HeatspaceValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl HeatspaceValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl HeatspaceError for HeatspaceValidationError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}
