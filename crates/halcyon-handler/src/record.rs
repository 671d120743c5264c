/*!
 * The mutable record a handler state machine works on.
 */
use std::fmt;

use serde::Serialize;

use halcyon_core::types::Id;
use halcyon_devices::{Device, SubsystemId};

use crate::error::{HandlerError, Result};
use crate::lifecycle::AdapterLifecycle;

/// Connection status of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    /// No device connected
    Disconnected,
    /// Connected to exactly one device through the held adapter
    Connected,
}

impl fmt::Display for HandlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerStatus::Disconnected => write!(f, "disconnected"),
            HandlerStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Point-in-time view of a handler, as returned by a status request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerSnapshot {
    /// Connection status
    pub status: HandlerStatus,
    /// Subsystem the handler is scoped to
    pub subsystem: SubsystemId,
    /// The connected device
    pub device: Option<Device>,
    /// The held adapter instance
    pub adapter: Option<Id>,
}

/// Handler state: status, connected device, adapter and user state
///
/// `status` is `Connected` exactly when both a device and an adapter handle
/// are held. The subsystem is fixed at construction.
#[derive(Debug)]
pub struct HandlerRecord<S> {
    status: HandlerStatus,
    subsystem: SubsystemId,
    device: Option<Device>,
    adapter: AdapterLifecycle,
    state: Option<S>,
}

impl<S> HandlerRecord<S> {
    /// Create a disconnected record
    pub fn new(subsystem: SubsystemId, adapter: AdapterLifecycle, state: S) -> Self {
        Self {
            status: HandlerStatus::Disconnected,
            subsystem,
            device: None,
            adapter,
            state: Some(state),
        }
    }

    /// Connection status
    pub fn status(&self) -> HandlerStatus {
        self.status
    }

    /// Subsystem the handler is scoped to
    pub fn subsystem(&self) -> &SubsystemId {
        &self.subsystem
    }

    /// The connected device
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// The adapter lifecycle
    pub fn adapter(&self) -> &AdapterLifecycle {
        &self.adapter
    }

    /// The user state, absent only after a callback failed with it
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// Whether a device is connected
    pub fn is_connected(&self) -> bool {
        self.status == HandlerStatus::Connected
    }

    /// Whether `device` is the connected device
    pub fn is_connected_to(&self, device: &Device) -> bool {
        self.is_connected() && self.device.as_ref() == Some(device)
    }

    /// Whether status, device and adapter handle agree
    pub fn is_consistent(&self) -> bool {
        self.is_connected() == (self.device.is_some() && self.adapter.handle().is_some())
    }

    /// Status view for callers outside the handler
    pub fn snapshot(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            status: self.status,
            subsystem: self.subsystem.clone(),
            device: self.device.clone(),
            adapter: self.adapter.handle().map(|handle| handle.id().clone()),
        }
    }

    pub(crate) fn adapter_mut(&mut self) -> &mut AdapterLifecycle {
        &mut self.adapter
    }

    pub(crate) fn take_state(&mut self) -> Result<S> {
        self.state.take().ok_or(HandlerError::StateLost)
    }

    pub(crate) fn put_state(&mut self, state: S) {
        self.state = Some(state);
    }

    pub(crate) fn mark_connected(&mut self, device: Device) {
        self.status = HandlerStatus::Connected;
        self.device = Some(device);
    }

    pub(crate) fn mark_disconnected(&mut self) -> Option<Device> {
        self.status = HandlerStatus::Disconnected;
        self.device.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::test_support::{bus, usb_device, USB};

    fn record() -> HandlerRecord<u8> {
        let (config, _) = bus();
        let (tx, _rx) = mpsc::unbounded_channel();
        let lifecycle = AdapterLifecycle::new(config, tx, Duration::from_secs(1));
        HandlerRecord::new(SubsystemId::new(USB), lifecycle, 7)
    }

    #[test]
    fn test_new_record_is_disconnected() {
        let record = record();
        assert_eq!(record.status(), HandlerStatus::Disconnected);
        assert!(record.device().is_none());
        assert!(record.is_consistent());
        assert_eq!(record.state(), Some(&7));

        let snapshot = record.snapshot();
        assert_eq!(snapshot.subsystem, SubsystemId::new(USB));
        assert!(snapshot.adapter.is_none());
    }

    #[test]
    fn test_state_can_be_taken_once() {
        let mut record = record();
        assert_eq!(record.take_state().unwrap(), 7);
        assert!(matches!(record.take_state(), Err(HandlerError::StateLost)));
        record.put_state(8);
        assert_eq!(record.state(), Some(&8));
    }

    #[test]
    fn test_connected_without_adapter_is_inconsistent() {
        let mut record = record();
        record.mark_connected(usb_device("d1"));
        assert!(record.is_connected_to(&usb_device("d1")));
        assert!(!record.is_connected_to(&usb_device("d2")));
        assert!(!record.is_consistent());

        assert_eq!(record.mark_disconnected(), Some(usb_device("d1")));
        assert!(record.is_consistent());
    }

    #[test]
    fn test_status_serializes_in_snake_case() {
        let json = serde_json::to_string(&HandlerStatus::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }
}
