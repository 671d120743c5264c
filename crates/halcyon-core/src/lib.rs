/*!
 * Halcyon Core
 *
 * This crate provides the ambient functionality shared by the Halcyon crates:
 * identifiers and values, configuration, logging and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use bytes;
    pub use chrono;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// Halcyon core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization: installs logging from the given configuration
pub fn init(config: &config::Config) -> Result<(), error::Error> {
    logging::init_with_config(&config.logging)?;
    tracing::info!("Halcyon Core {} initialized", VERSION);
    Ok(())
}
