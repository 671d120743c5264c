/*!
 * Logging setup for Halcyon.
 *
 * Installs a `tracing` subscriber and provides the spans used by handlers
 * and adapters so their log lines can be correlated.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
pub fn init_with_filter(filter: &str) -> Result<()> {
    init_with_config(&LoggingConfig {
        level: filter.to_string(),
        ..LoggingConfig::default()
    })
}

/// Initialize the logging system from the logging section of the configuration
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(config.with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Span covering everything a device handler does
///
/// # Arguments
///
/// * `handler` - The handler name
/// * `subsystem` - The subsystem the handler is scoped to
pub fn handler_span(handler: &str, subsystem: &str) -> Span {
    tracing::info_span!("handler", name = %handler, subsystem = %subsystem)
}

/// Span covering the task of a running adapter
///
/// # Arguments
///
/// * `adapter` - The adapter kind name
/// * `id` - The adapter instance id
pub fn adapter_span(adapter: &str, id: &str) -> Span {
    tracing::info_span!("adapter", kind = %adapter, id = %id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_fails_second_time() {
        // Only the first global subscriber can be installed.
        let first = init_with_filter("debug");
        let second = init();
        assert!(first.is_err() || second.is_err());
    }
}
