/*!
 * Error types for the Halcyon handler crate.
 */
use thiserror::Error;

use halcyon_core::error::Error as CoreError;
use halcyon_devices::DeviceError;

/// Error type for device handler operations
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Starting, connecting or talking to the adapter failed
    #[error("Adapter error: {0}")]
    Adapter(#[from] DeviceError),

    /// A handler callback returned an error
    #[error("Callback failed: {0}")]
    Callback(anyhow::Error),

    /// The handler chose not to reply to a call
    #[error("Handler did not reply")]
    NoReply,

    /// A deadline passed before the handler answered
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The handler is not running
    #[error("Handler is not running")]
    Stopped,

    /// The handler task panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// The handler state was consumed by a callback that failed
    #[error("Handler state is no longer available")]
    StateLost,

    /// Core error
    #[error("Core error: {0}")]
    Core(CoreError),
}

/// Result type for device handler operations
pub type Result<T> = std::result::Result<T, HandlerError>;

impl HandlerError {
    /// Wrap a callback failure
    pub fn callback(err: anyhow::Error) -> Self {
        HandlerError::Callback(err)
    }

    /// Whether the error ends the handler
    ///
    /// Adapter failures are absorbed into lifecycle transitions; everything
    /// raised by user callbacks is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HandlerError::Adapter(_))
    }

    /// Whether the error is an expired deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            HandlerError::Timeout(_) => true,
            HandlerError::Adapter(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout(msg) => HandlerError::Timeout(msg),
            other => HandlerError::Core(other),
        }
    }
}
