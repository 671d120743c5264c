//! Scripted adapters and handlers shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;

use halcyon_devices::{
    Adapter, AdapterConfig, AdapterHandle, AdapterKind, AdapterLink, AdapterOptions, Device, DeviceError,
    SubsystemId,
};

use crate::callbacks::{CallOutcome, DataOutcome, DeviceHandler, Discovery, TerminateReason};

pub(crate) const USB: &str = "usb";

pub(crate) fn usb_device(id: &str) -> Device {
    Device::new(id, USB)
}

/// Knobs and counters shared by every adapter a [`MockKind`] starts
#[derive(Debug, Default)]
pub(crate) struct BusControl {
    pub starts: AtomicUsize,
    pub connects: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_connect: AtomicBool,
    pub hang_on_stop: AtomicBool,
    links: Mutex<Vec<AdapterLink>>,
    sent: Mutex<Vec<Bytes>>,
}

impl BusControl {
    /// Link of the most recently started adapter
    pub fn last_link(&self) -> AdapterLink {
        self.links.lock().unwrap().last().cloned().expect("no adapter started")
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub(crate) struct MockKind {
    control: Arc<BusControl>,
}

#[derive(Debug)]
struct MockAdapter {
    control: Arc<BusControl>,
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn connect(&mut self, _device: &Device) -> halcyon_devices::device::Result<()> {
        self.control.connects.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::AdapterConnect("device not responding".into()));
        }
        Ok(())
    }

    async fn send(&mut self, payload: Bytes) -> halcyon_devices::device::Result<()> {
        if &payload[..] == b"crash" {
            panic!("adapter crashed");
        }
        self.control.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn stop(&mut self) -> halcyon_devices::device::Result<()> {
        if self.control.hang_on_stop.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.control.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AdapterKind for MockKind {
    fn name(&self) -> &str {
        "mock"
    }

    fn subsystem(&self) -> SubsystemId {
        SubsystemId::new(USB)
    }

    async fn start(
        &self,
        _options: &AdapterOptions,
        link: AdapterLink,
    ) -> halcyon_devices::device::Result<Box<dyn Adapter>> {
        self.control.starts.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::AdapterStart("bus unavailable".into()));
        }
        self.control.links.lock().unwrap().push(link);
        Ok(Box::new(MockAdapter {
            control: self.control.clone(),
        }))
    }
}

/// An adapter configuration for the `usb` subsystem and its control block
pub(crate) fn bus() -> (AdapterConfig, Arc<BusControl>) {
    let control = Arc::new(BusControl::default());
    let kind = MockKind {
        control: control.clone(),
    };
    (AdapterConfig::new(Arc::new(kind), AdapterOptions::new()), control)
}

/// Ordered record of the callbacks a [`Recorder`] saw
#[derive(Debug, Default)]
pub(crate) struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn push<S: Into<String>>(&self, entry: S) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Wait until an entry equal to `entry` shows up
    pub async fn wait_for(&self, entry: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !self.entries().iter().any(|e| e == entry) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {:?}, journal: {:?}",
                entry,
                self.entries()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Requests understood by [`Recorder::on_call`]
#[derive(Debug)]
pub(crate) enum Probe {
    /// Reply with the callback count
    Count,
    /// Reply with the given text
    Echo(String),
    /// Decline to reply
    Silent,
    /// Fail the callback
    Boom,
}

/// Handler that journals every callback and counts them in its state
#[derive(Debug)]
pub(crate) struct Recorder {
    pub journal: Arc<Journal>,
    /// Devices to connect to; `None` connects to everything
    pub accept: Option<Vec<String>>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
}

impl Recorder {
    pub fn new() -> (Self, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let recorder = Self {
            journal: journal.clone(),
            accept: None,
            fail_connect: false,
            fail_disconnect: false,
        };
        (recorder, journal)
    }

    pub fn accepting(mut self, ids: &[&str]) -> Self {
        self.accept = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }
}

#[async_trait]
impl DeviceHandler for Recorder {
    type State = usize;
    type Call = Probe;
    type Reply = String;
    type Cast = String;

    async fn on_discover(&self, device: &Device, state: usize) -> anyhow::Result<Discovery<usize>> {
        self.journal.push(format!("discover {}", device.id()));
        let wanted = self
            .accept
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == device.id().as_str()));
        if wanted {
            Ok(Discovery::Connect(state + 1))
        } else {
            Ok(Discovery::Continue(state + 1))
        }
    }

    async fn on_connect(&self, device: &Device, adapter: &AdapterHandle, state: usize) -> anyhow::Result<usize> {
        self.journal.push(format!("connect {} via {}", device.id(), adapter.kind()));
        if self.fail_connect {
            return Err(anyhow!("connect setup failed"));
        }
        adapter.send(&b"hello"[..]).await?;
        Ok(state + 1)
    }

    async fn on_data(
        &self,
        device: &Device,
        _adapter: &AdapterHandle,
        payload: Bytes,
        state: usize,
    ) -> anyhow::Result<DataOutcome<usize>> {
        let text = String::from_utf8_lossy(&payload).to_string();
        self.journal.push(format!("data {} {}", device.id(), text));
        match text.as_str() {
            "explode" => Err(anyhow!("payload exploded")),
            "bye" => Ok(DataOutcome::Disconnect(state + 1)),
            _ => Ok(DataOutcome::Continue(state + 1)),
        }
    }

    async fn on_disconnect(&self, device: &Device, state: usize) -> anyhow::Result<usize> {
        self.journal.push(format!("disconnect {}", device.id()));
        if self.fail_disconnect {
            return Err(anyhow!("disconnect cleanup failed"));
        }
        Ok(state + 1)
    }

    async fn on_call(&self, request: Probe, state: usize) -> anyhow::Result<CallOutcome<String, usize>> {
        match request {
            Probe::Count => Ok(CallOutcome::Reply(state.to_string(), state)),
            Probe::Echo(text) => Ok(CallOutcome::Reply(text, state)),
            Probe::Silent => Ok(CallOutcome::NoReply(state)),
            Probe::Boom => Err(anyhow!("call exploded")),
        }
    }

    async fn on_cast(&self, request: String, state: usize) -> anyhow::Result<usize> {
        self.journal.push(format!("cast {}", request));
        Ok(state + 1)
    }

    async fn on_terminate(&self, reason: &TerminateReason, _state: usize) {
        self.journal.push(format!("terminate {}", reason));
    }
}
