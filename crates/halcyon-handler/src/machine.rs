/*!
 * The handler state machine.
 *
 * A handler is either `Disconnected` or `Connected` to exactly one device.
 * Directory events, adapter notices and external requests are folded into the
 * [`HandlerRecord`] one at a time; the actor in [`crate::actor`] feeds them in
 * arrival order.
 *
 * Adapter failures leave the record disconnected and are returned as
 * [`HandlerError::Adapter`]; the actor logs them and keeps going. Callback
 * failures are returned too and end the handler.
 */
use bytes::Bytes;
use tracing::{debug, info, warn};

use halcyon_core::{config::DataDisconnectPolicy, types::Id};
use halcyon_devices::{
    AdapterConfig, Device, DeviceDirectory, DirectoryEvent, ExitReason, NoticeSender, Subscription,
};

use crate::callbacks::{CallOutcome, DataOutcome, DeviceHandler, Discovery, TerminateReason};
use crate::error::{HandlerError, Result};
use crate::lifecycle::AdapterLifecycle;
use crate::options::HandlerOptions;
use crate::record::{HandlerRecord, HandlerSnapshot};

/// Callbacks plus the record they operate on
pub struct HandlerMachine<H: DeviceHandler> {
    callbacks: H,
    record: HandlerRecord<H::State>,
    data_disconnect: DataDisconnectPolicy,
}

impl<H: DeviceHandler> HandlerMachine<H> {
    /// Create a machine and bootstrap it from the directory
    ///
    /// Subscribes to the subsystem reported by the adapter kind, then folds
    /// every device already known through `on_event` as a synthetic `Add`,
    /// in directory order. A device whose connect fails is skipped. The
    /// returned subscription carries only events published after the snapshot.
    pub async fn init(
        callbacks: H,
        adapter: AdapterConfig,
        state: H::State,
        directory: &dyn DeviceDirectory,
        options: &HandlerOptions,
        notices: NoticeSender,
    ) -> Result<(Self, Subscription)> {
        let subsystem = adapter.subsystem();
        let mut subscription = directory.subscribe(&subsystem).await?;

        let lifecycle = AdapterLifecycle::new(adapter, notices, options.adapter_timeout);
        let mut machine = Self {
            callbacks,
            record: HandlerRecord::new(subsystem.clone(), lifecycle, state),
            data_disconnect: options.data_disconnect,
        };

        let known = subscription.take_known();
        debug!("Bootstrapping {} known devices on {}", known.len(), subsystem);
        for device in known {
            match machine.on_event(DirectoryEvent::Add(subsystem.clone(), device)).await {
                Err(e) if !e.is_fatal() => warn!("Bootstrap connect failed, staying disconnected: {}", e),
                other => other?,
            }
        }

        Ok((machine, subscription))
    }

    /// The record
    pub fn record(&self) -> &HandlerRecord<H::State> {
        &self.record
    }

    /// The callbacks
    pub fn callbacks(&self) -> &H {
        &self.callbacks
    }

    /// Status view of the record
    pub fn snapshot(&self) -> HandlerSnapshot {
        self.record.snapshot()
    }

    /// Fold a directory event
    ///
    /// `Add` is considered only while disconnected and `Remove` only for the
    /// connected device; everything else is dropped. A failed adapter start
    /// or connect leaves the handler disconnected, keeps the state returned
    /// by `on_discover` and is returned as [`HandlerError::Adapter`].
    pub async fn on_event(&mut self, event: DirectoryEvent) -> Result<()> {
        let own_subsystem = event.subsystem() == self.record.subsystem();

        match event {
            DirectoryEvent::Add(_, device) if own_subsystem && !self.record.is_connected() => {
                self.discover(device).await
            }
            DirectoryEvent::Remove(_, device) if own_subsystem && self.record.is_connected_to(&device) => {
                self.remove(device).await
            }
            other => {
                debug!("Ignoring {:?} in status {}", other, self.record.status());
                Ok(())
            }
        }
    }

    async fn discover(&mut self, device: Device) -> Result<()> {
        let state = self.record.take_state()?;
        let discovery = self
            .callbacks
            .on_discover(&device, state)
            .await
            .map_err(HandlerError::callback)?;

        match discovery {
            Discovery::Continue(state) => {
                debug!("Passed on {}", device);
                self.record.put_state(state);
                Ok(())
            }
            Discovery::Connect(state) => {
                self.record.put_state(state);
                self.connect(device).await
            }
        }
    }

    async fn connect(&mut self, device: Device) -> Result<()> {
        let handle = self.record.adapter_mut().connect(&device).await?;

        let state = self.record.take_state()?;
        let state = match self.callbacks.on_connect(&device, &handle, state).await {
            Ok(state) => state,
            Err(e) => {
                self.record.adapter_mut().disconnect().await;
                return Err(HandlerError::callback(e));
            }
        };
        self.record.put_state(state);

        info!("Connected to {}", device);
        self.record.mark_connected(device);
        Ok(())
    }

    async fn remove(&mut self, device: Device) -> Result<()> {
        let state = self.record.take_state()?;
        let state = self
            .callbacks
            .on_disconnect(&device, state)
            .await
            .map_err(HandlerError::callback)?;
        self.record.put_state(state);

        self.disconnect().await;
        info!("Disconnected from {}", device);
        Ok(())
    }

    /// Run the disconnect protocol and return to `Disconnected`
    ///
    /// Does not invoke any callback. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.record.adapter_mut().disconnect().await;
        self.record.mark_disconnected();
    }

    /// Relay data delivered by an adapter
    ///
    /// Data from any adapter other than the held one, or arriving while
    /// disconnected, is dropped.
    pub async fn on_inbound_data(&mut self, adapter: &Id, payload: Bytes) -> Result<()> {
        if !self.record.is_connected() || !self.record.adapter().owns(adapter) {
            debug!("Dropping {} bytes from adapter {}", payload.len(), adapter);
            return Ok(());
        }
        let (Some(device), Some(handle)) = (
            self.record.device().cloned(),
            self.record.adapter().handle().cloned(),
        ) else {
            return Ok(());
        };

        let state = self.record.take_state()?;
        let outcome = self
            .callbacks
            .on_data(&device, &handle, payload, state)
            .await
            .map_err(HandlerError::callback)?;

        match outcome {
            DataOutcome::Continue(state) => self.record.put_state(state),
            DataOutcome::Disconnect(state) => {
                self.record.put_state(state);
                match self.data_disconnect {
                    DataDisconnectPolicy::Honor => {
                        self.disconnect().await;
                        info!("Disconnected from {} on request of the data callback", device);
                    }
                    DataDisconnectPolicy::Ignore => {
                        debug!("Data callback asked to disconnect from {}, ignored", device);
                    }
                }
            }
        }

        Ok(())
    }

    /// React to the exit of an adapter
    ///
    /// When the held adapter dies while connected, `on_disconnect` runs first
    /// and the disconnect is forced regardless of its result; a callback error
    /// is returned only once the record is back to `Disconnected`. Exits of
    /// adapters the handler no longer holds are ignored.
    pub async fn on_adapter_exit(&mut self, adapter: &Id, reason: ExitReason) -> Result<()> {
        if !self.record.adapter().owns(adapter) {
            debug!("Ignoring exit of adapter {} ({})", adapter, reason);
            return Ok(());
        }

        warn!("Adapter {} exited: {}", adapter, reason);

        let device = match self.record.device() {
            Some(device) if self.record.is_connected() => device.clone(),
            _ => {
                self.disconnect().await;
                return Ok(());
            }
        };

        let notified = match self.record.take_state() {
            Ok(state) => self.callbacks.on_disconnect(&device, state).await,
            Err(e) => Err(anyhow::Error::new(e)),
        };
        self.disconnect().await;
        info!("Lost {} after adapter exit", device);

        let state = notified.map_err(HandlerError::callback)?;
        self.record.put_state(state);
        Ok(())
    }

    /// Pass a synchronous request to `on_call`
    ///
    /// Returns `None` when the handler declined to reply.
    pub async fn on_call(&mut self, request: H::Call) -> Result<Option<H::Reply>> {
        let state = self.record.take_state()?;
        match self
            .callbacks
            .on_call(request, state)
            .await
            .map_err(HandlerError::callback)?
        {
            CallOutcome::Reply(reply, state) => {
                self.record.put_state(state);
                Ok(Some(reply))
            }
            CallOutcome::NoReply(state) => {
                self.record.put_state(state);
                Ok(None)
            }
        }
    }

    /// Pass an asynchronous request to `on_cast`
    pub async fn on_cast(&mut self, request: H::Cast) -> Result<()> {
        let state = self.record.take_state()?;
        let state = self
            .callbacks
            .on_cast(request, state)
            .await
            .map_err(HandlerError::callback)?;
        self.record.put_state(state);
        Ok(())
    }

    /// Forward termination to `on_terminate`
    ///
    /// The adapter is left alone; see [`HandlerMachine::shutdown`].
    pub async fn on_terminate(&mut self, reason: &TerminateReason) {
        match self.record.take_state() {
            Ok(state) => self.callbacks.on_terminate(reason, state).await,
            Err(_) => debug!("No state left to hand to on_terminate ({})", reason),
        }
    }

    /// Terminate and release the held adapter
    pub async fn shutdown(mut self, reason: &TerminateReason) {
        self.on_terminate(reason).await;
        self.record.adapter_mut().disconnect().await;
        info!("Handler terminated ({})", reason);
    }
}
