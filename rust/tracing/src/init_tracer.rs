use serde::{Deserialize, Serialize};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

// These need to have underscores because the Rust compiler automatically
// converts all hyphens in crate names to underscores to make them valid
// Rust identifiers
const WORKSPACE_CRATE_NAMES: [&str; 4] = [
    "heatspace_distance",
    "heatspace_error",
    "heatspace_index",
    "heatspace_tracing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for FilterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterLevel::Trace => f.write_str("trace"),
            FilterLevel::Debug => f.write_str("debug"),
            FilterLevel::Info => f.write_str("info"),
            FilterLevel::Warn => f.write_str("warn"),
            FilterLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingFilter {
    pub crate_name: String,
    pub filter_level: FilterLevel,
}

fn global_filter_directives(custom_filters: &[TracingFilter]) -> String {
    let mut directives = vec!["error".to_string()];
    directives.extend(WORKSPACE_CRATE_NAMES.iter().map(|s| format!("{s}=trace")));
    directives.extend(
        custom_filters
            .iter()
            .map(|filter| format!("{}={}", filter.crate_name, filter.filter_level)),
    );
    directives.join(",")
}

/// `RUST_LOG` wins over the built-in directives when set.
pub fn init_global_filter_layer(
    custom_filters: &[TracingFilter],
) -> Box<dyn Layer<Registry> + Send + Sync> {
    let global_filter = global_filter_directives(custom_filters);
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or(global_filter)).boxed()
}

pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer().pretty().with_target(false).boxed()
}

/// Installs `layers` as the process-wide subscriber. Fails if one is already set.
pub fn init_tracing(
    layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>,
) -> Result<(), SetGlobalDefaultError> {
    let layer = layers
        .into_iter()
        .reduce(|a, b| Box::new(a.and_then(b)));
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing::info!("Global tracing subscriber set");
    Ok(())
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

pub fn init_stdout_tracing(custom_filters: &[TracingFilter]) -> Result<(), SetGlobalDefaultError> {
    let layers = vec![
        // The global filter applies to all subsequent layers
        init_global_filter_layer(custom_filters),
        init_stdout_layer(),
    ];
    init_tracing(layers)?;
    init_panic_tracing_hook();
    Ok(())
}
