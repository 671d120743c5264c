/*!
 * Halcyon Devices
 *
 * This crate provides the device model, the device directory and the
 * adapter contract used by Halcyon device handlers.
 */

#![warn(missing_docs)]

// Re-export core types
pub use halcyon_core::prelude;

pub mod adapter;
pub mod device;
pub mod directory;
pub mod process;

// Re-export the device model and adapter plumbing
pub use adapter::{Adapter, AdapterConfig, AdapterKind, AdapterOptions};
pub use device::{Device, DeviceError, SubsystemId};
pub use directory::{DeviceDirectory, DirectoryEvent, InMemoryDirectory, Subscription};
pub use process::{AdapterHandle, AdapterLink, AdapterNotice, ExitReason, NoticeReceiver, NoticeSender};

/// Halcyon devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), halcyon_core::error::Error> {
    tracing::info!("Halcyon Devices {} initialized", VERSION);
    Ok(())
}
