use crate::error::{Result, RgError};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber for the given filter directive.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| RgError::InvalidInput(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| RgError::InvalidInput("logging already initialized".into()))
}
