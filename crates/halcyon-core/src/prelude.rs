/*!
 * Prelude module for Halcyon Core.
 *
 * Re-exports the types most crates in the workspace import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Metadata, Value};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, DataDisconnectPolicy, HandlerConfig};

// Re-export utility functions
pub use crate::utils::{millis_to_duration, with_timeout};

// Re-export logging
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
