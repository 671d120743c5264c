/*!
 * Halcyon Handler
 *
 * This crate drives user-supplied device handlers through discovery,
 * connection, data exchange and disconnection. Each handler runs as its own
 * actor, owns at most one bus adapter and recovers when that adapter dies.
 */

#![warn(missing_docs)]

// Re-export core types
pub use halcyon_core::prelude;

pub mod actor;
pub mod callbacks;
pub mod error;
pub mod lifecycle;
pub mod machine;
pub mod options;
pub mod record;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use actor::{spawn_handler, HandlerRef, RunningHandler};
pub use callbacks::{CallOutcome, DataOutcome, DeviceHandler, Discovery, TerminateReason};
pub use error::{HandlerError, Result};
pub use lifecycle::AdapterLifecycle;
pub use machine::HandlerMachine;
pub use options::HandlerOptions;
pub use record::{HandlerRecord, HandlerSnapshot, HandlerStatus};

/// Halcyon handler crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the handler system
pub fn init() -> Result<()> {
    tracing::info!("Halcyon Handler {} initialized", VERSION);
    Ok(())
}
