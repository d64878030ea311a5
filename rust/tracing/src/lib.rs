pub mod init_tracer;

pub use init_tracer::{
    init_global_filter_layer, init_panic_tracing_hook, init_stdout_layer, init_stdout_tracing,
    init_tracing, FilterLevel, TracingFilter,
};
