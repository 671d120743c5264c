/*!
 * Adapter ownership for a single handler.
 *
 * At most one adapter is associated with a handler. The connect protocol
 * starts one on demand (or reuses the one already held) and asks it to
 * connect; the disconnect protocol stops it and forgets the handle.
 */
use std::time::Duration;

use tracing::{debug, info, warn};

use halcyon_core::types::Id;
use halcyon_devices::{AdapterConfig, AdapterHandle, Device, DeviceError, NoticeSender};

/// The adapter configuration and the handle currently held, if any
#[derive(Debug)]
pub struct AdapterLifecycle {
    config: AdapterConfig,
    handle: Option<AdapterHandle>,
    notices: NoticeSender,
    timeout: Duration,
}

impl AdapterLifecycle {
    /// Create a lifecycle with no adapter running
    ///
    /// Adapters started later report to `notices`; every adapter request is
    /// bounded by `timeout`.
    pub fn new(config: AdapterConfig, notices: NoticeSender, timeout: Duration) -> Self {
        Self {
            config,
            handle: None,
            notices,
            timeout,
        }
    }

    /// The configuration adapters are started with
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The held adapter handle
    pub fn handle(&self) -> Option<&AdapterHandle> {
        self.handle.as_ref()
    }

    /// Whether `adapter` is the held adapter
    pub fn owns(&self, adapter: &Id) -> bool {
        self.handle.as_ref().map_or(false, |handle| handle.id() == adapter)
    }

    /// Run the connect protocol
    ///
    /// Failures are not retried. An adapter started by a failed attempt is
    /// released before the error is returned.
    pub async fn connect(&mut self, device: &Device) -> Result<AdapterHandle, DeviceError> {
        let (handle, started) = match &self.handle {
            Some(handle) => {
                debug!("Reusing adapter {} for {}", handle.id(), device);
                (handle.clone(), false)
            }
            None => {
                let handle = AdapterHandle::start(&self.config, self.notices.clone(), self.timeout).await?;
                self.handle = Some(handle.clone());
                (handle, true)
            }
        };

        if let Err(e) = handle.connect(device).await {
            warn!("Adapter {} could not connect to {}: {}", handle.id(), device, e);
            if started {
                self.disconnect().await;
            }
            return Err(e);
        }

        info!("Adapter {} connected to {}", handle.id(), device);
        Ok(handle)
    }

    /// Run the disconnect protocol
    ///
    /// Stops the held adapter if it is still running and clears the handle.
    /// Calling it with no handle held does nothing.
    pub async fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if !handle.is_alive() {
            debug!("Adapter {} already gone", handle.id());
            return;
        }

        match handle.stop().await {
            Ok(()) => debug!("Adapter {} stopped", handle.id()),
            Err(e) => {
                warn!("Adapter {} did not stop cleanly, aborting: {}", handle.id(), e);
                handle.kill();
            }
        }
    }
}
