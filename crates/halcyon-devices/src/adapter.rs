/*!
 * Adapter contract for Halcyon.
 *
 * An adapter is the bus-specific driver that performs I/O with a connected
 * device. Implementations provide an [`AdapterKind`] (the factory, which also
 * names the subsystem it serves) and the [`Adapter`] it starts. Handlers never
 * look adapters up by name: the kind is carried explicitly in an
 * [`AdapterConfig`].
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use halcyon_core::types::Value;

use crate::device::{Device, Result, SubsystemId};
use crate::process::AdapterLink;

/// Options handed to an adapter when it starts
#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    /// Adapter-specific operation timeout
    pub timeout: Option<Duration>,
    /// Adapter-specific options
    pub options: HashMap<String, Value>,
}

impl AdapterOptions {
    /// Creates an empty set of options
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the adapter-specific operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an adapter-specific option
    pub fn with_option<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Gets an option converted to `T`; conversion failures are logged and yield `None`
    pub fn get_option<T>(&self, key: &str) -> Option<T>
    where
        T: TryFrom<Value>,
        T::Error: std::fmt::Display,
    {
        self.options.get(key).and_then(|v| {
            T::try_from(v.clone())
                .map_err(|e| tracing::warn!("Failed to convert adapter option {}: {}", key, e))
                .ok()
        })
    }

    /// Gets a string option
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_option::<String>(key)
    }

    /// Gets an integer option
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get_option::<i64>(key)
    }

    /// Gets a boolean option
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_option::<bool>(key)
    }

    /// Gets the timeout or a default value
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// A running bus adapter
///
/// Each method is called from the adapter's own task, one at a time.
/// Inbound data is pushed through the [`AdapterLink`] given at start.
#[async_trait]
pub trait Adapter: Send + Debug {
    /// Open the connection to a device
    async fn connect(&mut self, device: &Device) -> Result<()>;

    /// Write a payload to the connected device
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Release the device and any bus resources
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory for one kind of adapter
#[async_trait]
pub trait AdapterKind: Send + Sync + Debug {
    /// Adapter kind name, used in logs
    fn name(&self) -> &str;

    /// The subsystem whose devices this adapter can drive
    fn subsystem(&self) -> SubsystemId;

    /// Start a new adapter instance
    async fn start(&self, options: &AdapterOptions, link: AdapterLink) -> Result<Box<dyn Adapter>>;
}

/// Immutable (adapter kind, options) pair fixed when a handler is built
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    kind: Arc<dyn AdapterKind>,
    options: AdapterOptions,
}

impl AdapterConfig {
    /// Create an adapter configuration
    pub fn new(kind: Arc<dyn AdapterKind>, options: AdapterOptions) -> Self {
        Self { kind, options }
    }

    /// The adapter kind
    pub fn kind(&self) -> &Arc<dyn AdapterKind> {
        &self.kind
    }

    /// The options passed to every started instance
    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    /// The subsystem reported by the adapter kind
    pub fn subsystem(&self) -> SubsystemId {
        self.kind.subsystem()
    }
}
