/*!
 * Runtime options of a handler.
 */
use std::time::Duration;

use halcyon_core::config::{DataDisconnectPolicy, HandlerConfig};

/// Options fixed when a handler is spawned
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Name used in logs
    pub name: String,
    /// Bound on every adapter start, connect, send and stop
    pub adapter_timeout: Duration,
    /// Default bound on calls made through a handler reference
    pub call_timeout: Duration,
    /// Capacity of the request mailbox
    pub mailbox_capacity: usize,
    /// What a `Disconnect` from the data callback does
    pub data_disconnect: DataDisconnectPolicy,
}

impl HandlerOptions {
    /// Default options under the given name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::from_config(name, &HandlerConfig::default())
    }

    /// Options taken from the `handler` configuration section
    pub fn from_config<S: Into<String>>(name: S, config: &HandlerConfig) -> Self {
        Self {
            name: name.into(),
            adapter_timeout: config.adapter_timeout(),
            call_timeout: config.call_timeout(),
            mailbox_capacity: config.mailbox_capacity.max(1),
            data_disconnect: config.data_disconnect,
        }
    }

    /// Set the adapter timeout
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Set the default call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the data disconnect policy
    pub fn with_data_disconnect(mut self, policy: DataDisconnectPolicy) -> Self {
        self.data_disconnect = policy;
        self
    }
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self::new("handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_config() {
        let config = HandlerConfig {
            adapter_timeout_ms: 250,
            call_timeout_ms: 750,
            mailbox_capacity: 8,
            data_disconnect: DataDisconnectPolicy::Ignore,
            ..HandlerConfig::default()
        };

        let options = HandlerOptions::from_config("thermo", &config);
        assert_eq!(options.name, "thermo");
        assert_eq!(options.adapter_timeout, Duration::from_millis(250));
        assert_eq!(options.call_timeout, Duration::from_millis(750));
        assert_eq!(options.mailbox_capacity, 8);
        assert_eq!(options.data_disconnect, DataDisconnectPolicy::Ignore);
    }

    #[test]
    fn test_default_options() {
        let options = HandlerOptions::default();
        assert_eq!(options.adapter_timeout, Duration::from_secs(5));
        assert_eq!(options.data_disconnect, DataDisconnectPolicy::Honor);
    }
}
