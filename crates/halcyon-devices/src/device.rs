/*!
 * Device model and device errors.
 *
 * A [`Device`] is what the directory reports when hardware appears on a
 * subsystem: an identifier, the subsystem it belongs to and whatever metadata
 * the enumerating driver attached. Devices are immutable once observed.
 */
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use halcyon_core::{
    error::Error as CoreError,
    types::{Id, Metadata, Value},
};

/// Error type for device, directory and adapter operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The adapter could not be started
    #[error("Adapter start failed: {0}")]
    AdapterStart(String),

    /// The adapter could not connect to the device
    #[error("Adapter connect failed: {0}")]
    AdapterConnect(String),

    /// The adapter rejected or failed an outbound payload
    #[error("Adapter send failed: {0}")]
    AdapterSend(String),

    /// The adapter task is no longer running
    #[error("Adapter {0} is not running")]
    AdapterDown(Id),

    /// A device with this id is already known to the directory
    #[error("Device {0} already registered")]
    AlreadyRegistered(Id),

    /// The device is not known to the directory
    #[error("Device {0} not found")]
    NotFound(Id),

    /// The directory could not serve the request
    #[error("Directory error: {0}")]
    Directory(String),

    /// Core error (timeouts, configuration)
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl DeviceError {
    /// Whether the error is an expired adapter deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Core(e) if e.is_timeout())
    }
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// A named category of devices, such as a bus type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubsystemId(String);

impl SubsystemId {
    /// Create a new subsystem id
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Get the subsystem name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubsystemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubsystemId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A piece of hardware observed on a subsystem
///
/// Equality and hashing consider the identifier only, so a device reported
/// again with refreshed metadata still compares equal to the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    id: Id,
    subsystem: SubsystemId,
    metadata: Metadata,
    observed_at: DateTime<Utc>,
}

impl Device {
    /// Create a device with no metadata
    pub fn new<I: Into<Id>, S: Into<SubsystemId>>(id: I, subsystem: S) -> Self {
        Self {
            id: id.into(),
            subsystem: subsystem.into(),
            metadata: Metadata::new(),
            observed_at: Utc::now(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The device identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The subsystem the device was observed on
    pub fn subsystem(&self) -> &SubsystemId {
        &self.subsystem
    }

    /// Driver-supplied metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Look up a single metadata entry
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// When the device was first observed
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subsystem, self.id)
    }
}
