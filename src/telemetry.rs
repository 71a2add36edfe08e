use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging for the process.
///
/// Diagnostics are opt-in via `RUST_LOG`; user-facing progress text goes
/// through the output sink, never the logger.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    Ok(())
}
