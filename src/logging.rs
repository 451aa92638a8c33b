//! Logging setup
//!
//! Structured JSON logs on stderr, so command output on stdout stays
//! machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the log filter from `RUST_LOG`, falling back to `log_level`
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Initialize the global tracing subscriber.
///
/// Returns an error if a subscriber was already installed.
pub fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let console_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry().with(console_layer).try_init()?;

    Ok(())
}
