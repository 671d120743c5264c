/*!
 * Device directory for Halcyon.
 *
 * The directory tracks which devices are present on each subsystem and
 * publishes `Add`/`Remove` events to subscribers. Subscribing returns the
 * devices already known together with the live event stream, taken
 * atomically so that nothing between the two is lost or reported twice.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use halcyon_core::types::Id;

use crate::device::{Device, DeviceError, Result, SubsystemId};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Presence event emitted by a directory
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    /// A device appeared on a subsystem
    Add(SubsystemId, Device),
    /// A device disappeared from a subsystem
    Remove(SubsystemId, Device),
}

impl DirectoryEvent {
    /// The subsystem the event was published on
    pub fn subsystem(&self) -> &SubsystemId {
        match self {
            DirectoryEvent::Add(subsystem, _) | DirectoryEvent::Remove(subsystem, _) => subsystem,
        }
    }

    /// The device the event is about
    pub fn device(&self) -> &Device {
        match self {
            DirectoryEvent::Add(_, device) | DirectoryEvent::Remove(_, device) => device,
        }
    }
}

/// A live subscription to one subsystem
#[derive(Debug)]
pub struct Subscription {
    known: Vec<Device>,
    events: broadcast::Receiver<DirectoryEvent>,
}

impl Subscription {
    /// Create a subscription from a snapshot and the receiver opened with it
    pub fn new(known: Vec<Device>, events: broadcast::Receiver<DirectoryEvent>) -> Self {
        Self { known, events }
    }

    /// Take the devices that were present when the subscription was opened,
    /// in directory order. Subsequent calls return an empty list.
    pub fn take_known(&mut self) -> Vec<Device> {
        std::mem::take(&mut self.known)
    }

    /// Wait for the next live event
    ///
    /// Returns `None` once the directory has gone away. A subscriber that
    /// falls behind loses the overflowed events and keeps receiving.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<DirectoryEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Directory subscriber lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Source of device presence events
#[async_trait]
pub trait DeviceDirectory: Send + Sync + Debug {
    /// Subscribe to a subsystem, returning the devices already known on it
    async fn subscribe(&self, subsystem: &SubsystemId) -> Result<Subscription>;
}

#[derive(Debug)]
struct SubsystemEntry {
    devices: Vec<Device>,
    sender: broadcast::Sender<DirectoryEvent>,
}

impl SubsystemEntry {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            devices: Vec::new(),
            sender,
        }
    }
}

/// Directory kept in process memory
///
/// Hardware enumeration (or a test) feeds it through [`add_device`] and
/// [`remove_device`].
///
/// [`add_device`]: InMemoryDirectory::add_device
/// [`remove_device`]: InMemoryDirectory::remove_device
#[derive(Debug)]
pub struct InMemoryDirectory {
    subsystems: RwLock<HashMap<SubsystemId, SubsystemEntry>>,
    capacity: usize,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty directory whose per-subsystem channels hold `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subsystems: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a device arrival and notify subscribers of its subsystem
    pub fn add_device(&self, device: Device) -> Result<()> {
        let mut subsystems = self.subsystems.write().map_err(|_| {
            DeviceError::Directory("Failed to acquire write lock on directory".to_string())
        })?;

        let entry = subsystems
            .entry(device.subsystem().clone())
            .or_insert_with(|| SubsystemEntry::new(self.capacity));

        if entry.devices.contains(&device) {
            return Err(DeviceError::AlreadyRegistered(device.id().clone()));
        }

        entry.devices.push(device.clone());
        let subsystem = device.subsystem().clone();
        debug!("Device {} added", device);
        let _ = entry.sender.send(DirectoryEvent::Add(subsystem, device));

        Ok(())
    }

    /// Record a device removal and notify subscribers of its subsystem
    pub fn remove_device(&self, subsystem: &SubsystemId, id: &Id) -> Result<Device> {
        let mut subsystems = self.subsystems.write().map_err(|_| {
            DeviceError::Directory("Failed to acquire write lock on directory".to_string())
        })?;

        let entry = subsystems
            .get_mut(subsystem)
            .ok_or_else(|| DeviceError::NotFound(id.clone()))?;
        let index = entry
            .devices
            .iter()
            .position(|device| device.id() == id)
            .ok_or_else(|| DeviceError::NotFound(id.clone()))?;

        let device = entry.devices.remove(index);
        debug!("Device {} removed", device);
        let _ = entry
            .sender
            .send(DirectoryEvent::Remove(subsystem.clone(), device.clone()));

        Ok(device)
    }

    /// Devices currently present on a subsystem, in arrival order
    pub fn devices(&self, subsystem: &SubsystemId) -> Result<Vec<Device>> {
        let subsystems = self.subsystems.read().map_err(|_| {
            DeviceError::Directory("Failed to acquire read lock on directory".to_string())
        })?;

        Ok(subsystems
            .get(subsystem)
            .map(|entry| entry.devices.clone())
            .unwrap_or_default())
    }

    /// Number of live subscribers on a subsystem
    pub fn subscriber_count(&self, subsystem: &SubsystemId) -> usize {
        self.subsystems
            .read()
            .ok()
            .and_then(|subsystems| subsystems.get(subsystem).map(|e| e.sender.receiver_count()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn subscribe(&self, subsystem: &SubsystemId) -> Result<Subscription> {
        // Snapshot and receiver are taken under the same write lock.
        let mut subsystems = self.subsystems.write().map_err(|_| {
            DeviceError::Directory("Failed to acquire write lock on directory".to_string())
        })?;

        let entry = subsystems
            .entry(subsystem.clone())
            .or_insert_with(|| SubsystemEntry::new(self.capacity));

        debug!(
            "New subscriber on {} ({} devices known)",
            subsystem,
            entry.devices.len()
        );
        Ok(Subscription::new(entry.devices.clone(), entry.sender.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb() -> SubsystemId {
        SubsystemId::new("usb")
    }

    #[tokio::test]
    async fn test_subscribe_returns_known_devices_in_order() {
        let directory = InMemoryDirectory::new();
        directory.add_device(Device::new("d1", "usb")).unwrap();
        directory.add_device(Device::new("d2", "usb")).unwrap();
        directory.add_device(Device::new("t1", "tty")).unwrap();

        let mut subscription = directory.subscribe(&usb()).await.unwrap();
        let known: Vec<String> = subscription
            .take_known()
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(known, vec!["d1", "d2"]);
        assert!(subscription.take_known().is_empty());
    }

    #[tokio::test]
    async fn test_live_events_are_scoped_to_subsystem() {
        let directory = InMemoryDirectory::new();
        let mut subscription = directory.subscribe(&usb()).await.unwrap();

        directory.add_device(Device::new("t1", "tty")).unwrap();
        directory.add_device(Device::new("d1", "usb")).unwrap();
        directory.remove_device(&usb(), &Id::from("d1")).unwrap();

        let first = subscription.recv().await.unwrap();
        assert_eq!(first, DirectoryEvent::Add(usb(), Device::new("d1", "usb")));
        let second = subscription.recv().await.unwrap();
        assert!(matches!(second, DirectoryEvent::Remove(_, ref d) if d.id().as_str() == "d1"));
    }

    #[tokio::test]
    async fn test_snapshot_and_stream_do_not_overlap() {
        let directory = InMemoryDirectory::new();
        directory.add_device(Device::new("d1", "usb")).unwrap();

        let mut subscription = directory.subscribe(&usb()).await.unwrap();
        directory.add_device(Device::new("d2", "usb")).unwrap();

        assert_eq!(subscription.take_known(), vec![Device::new("d1", "usb")]);
        let event = subscription.recv().await.unwrap();
        assert_eq!(event.device().id().as_str(), "d2");
    }

    #[test]
    fn test_duplicate_and_unknown_devices_are_rejected() {
        let directory = InMemoryDirectory::new();
        directory.add_device(Device::new("d1", "usb")).unwrap();

        assert!(matches!(
            directory.add_device(Device::new("d1", "usb")),
            Err(DeviceError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            directory.remove_device(&usb(), &Id::from("nope")),
            Err(DeviceError::NotFound(_))
        ));
        assert!(matches!(
            directory.remove_device(&SubsystemId::new("gpio"), &Id::from("d1")),
            Err(DeviceError::NotFound(_))
        ));
        assert_eq!(directory.devices(&usb()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let directory = InMemoryDirectory::with_capacity(2);
        let mut subscription = directory.subscribe(&usb()).await.unwrap();

        for i in 0..5 {
            directory.add_device(Device::new(format!("d{}", i), "usb")).unwrap();
        }

        // The oldest events overflowed; the newest two are still delivered.
        let event = subscription.recv().await.unwrap();
        assert_eq!(event.device().id().as_str(), "d3");
        let event = subscription.recv().await.unwrap();
        assert_eq!(event.device().id().as_str(), "d4");
    }

    #[tokio::test]
    async fn test_closed_directory_ends_stream() {
        let directory = InMemoryDirectory::new();
        let mut subscription = directory.subscribe(&usb()).await.unwrap();
        assert_eq!(directory.subscriber_count(&usb()), 1);
        drop(directory);
        assert!(subscription.recv().await.is_none());
    }
}
