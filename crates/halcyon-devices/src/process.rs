/*!
 * Adapter tasks and their handles.
 *
 * Every started adapter runs in its own tokio task that serializes the
 * requests sent through its [`AdapterHandle`]. A monitor task awaits the
 * adapter task and reports how it ended to the owner as an
 * [`AdapterNotice::Exited`], so a crashed or killed adapter is observed as an
 * explicit message rather than through shared state.
 */
use std::any::Any;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn, Instrument};

use halcyon_core::{logging::adapter_span, types::Id, utils::with_timeout};

use crate::adapter::{Adapter, AdapterConfig};
use crate::device::{Device, DeviceError, Result};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// How an adapter task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Stopped on request or after every handle was dropped
    Normal,
    /// The adapter reported a fatal condition through its link
    Failed(String),
    /// The adapter panicked
    Panicked(String),
    /// The task was aborted
    Killed,
}

impl ExitReason {
    /// Whether the adapter ended on purpose
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Failed(reason) => write!(f, "failed: {}", reason),
            ExitReason::Panicked(message) => write!(f, "panicked: {}", message),
            ExitReason::Killed => write!(f, "killed"),
        }
    }
}

/// Notification from an adapter to its owner
#[derive(Debug, Clone)]
pub enum AdapterNotice {
    /// The adapter received data from its device
    Inbound {
        /// The adapter that produced the data
        adapter: Id,
        /// The payload
        payload: Bytes,
    },
    /// The adapter task ended
    Exited {
        /// The adapter that ended
        adapter: Id,
        /// How it ended
        reason: ExitReason,
    },
}

/// Sender half an owner hands to every adapter it starts
pub type NoticeSender = mpsc::UnboundedSender<AdapterNotice>;

/// Receiver half on which an owner observes its adapters
pub type NoticeReceiver = mpsc::UnboundedReceiver<AdapterNotice>;

/// An adapter's channel back to its owner
#[derive(Debug, Clone)]
pub struct AdapterLink {
    adapter: Id,
    notices: NoticeSender,
    faults: mpsc::UnboundedSender<String>,
}

impl AdapterLink {
    /// The id of the adapter this link belongs to
    pub fn adapter_id(&self) -> &Id {
        &self.adapter
    }

    /// Deliver inbound data to the owner
    ///
    /// Returns `false` once the owner is gone.
    pub fn deliver<B: Into<Bytes>>(&self, payload: B) -> bool {
        self.notices
            .send(AdapterNotice::Inbound {
                adapter: self.adapter.clone(),
                payload: payload.into(),
            })
            .is_ok()
    }

    /// Terminate the adapter with a [`ExitReason::Failed`] exit
    pub fn fail<S: Into<String>>(&self, reason: S) {
        let _ = self.faults.send(reason.into());
    }
}

#[derive(Debug)]
enum Command {
    Connect(Device, oneshot::Sender<Result<()>>),
    Send(Bytes, oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
}

/// Reference to a running adapter
///
/// Clones address the same adapter task. Two handles are equal when they
/// refer to the same adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterHandle {
    id: Id,
    kind: String,
    commands: mpsc::Sender<Command>,
    abort: AbortHandle,
    timeout: Duration,
}

impl PartialEq for AdapterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AdapterHandle {}

impl AdapterHandle {
    /// Start an adapter from its configuration
    ///
    /// The adapter reports inbound data and its eventual exit on `notices`.
    /// Starting, and every later request on the handle, is bounded by `timeout`.
    pub async fn start(config: &AdapterConfig, notices: NoticeSender, timeout: Duration) -> Result<Self> {
        let id = Id::new();
        let kind = config.kind().clone();
        let options = config.options().clone();
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let link = AdapterLink {
            adapter: id.clone(),
            notices: notices.clone(),
            faults: faults_tx,
        };

        // Started in a task of its own so a panicking factory cannot take the owner down.
        let starting = tokio::spawn(async move { kind.start(&options, link).await });
        let abort_start = starting.abort_handle();
        let started = with_timeout(timeout, "adapter start", async move {
            starting
                .await
                .map_err(|e| DeviceError::AdapterStart(describe_join_error(e)))?
        })
        .await;

        let adapter = match started {
            Ok(adapter) => adapter,
            Err(e) => {
                abort_start.abort();
                return Err(match e {
                    DeviceError::AdapterStart(_) => e,
                    e if e.is_timeout() => e,
                    other => DeviceError::AdapterStart(other.to_string()),
                });
            }
        };

        let kind_name = config.kind().name().to_string();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let span = adapter_span(&kind_name, id.as_str());
        let task = tokio::spawn(run_adapter(adapter, commands_rx, faults_rx).instrument(span));
        let abort = task.abort_handle();
        tokio::spawn(monitor(id.clone(), task, notices));

        info!("Started {} adapter {}", kind_name, id);

        Ok(Self {
            id,
            kind: kind_name,
            commands: commands_tx,
            abort,
            timeout,
        })
    }

    /// The adapter instance id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The adapter kind name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the adapter task is still running
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed() && !self.abort.is_finished()
    }

    /// Ask the adapter to connect to a device
    pub async fn connect(&self, device: &Device) -> Result<()> {
        let device = device.clone();
        self.request("adapter connect", |reply| Command::Connect(device, reply))
            .await
            .map_err(|e| match e {
                DeviceError::Core(_) | DeviceError::AdapterConnect(_) | DeviceError::AdapterDown(_) => e,
                other => DeviceError::AdapterConnect(other.to_string()),
            })
    }

    /// Send a payload to the connected device
    pub async fn send<B: Into<Bytes>>(&self, payload: B) -> Result<()> {
        let payload = payload.into();
        self.request("adapter send", |reply| Command::Send(payload, reply))
            .await
            .map_err(|e| match e {
                DeviceError::Core(_) | DeviceError::AdapterSend(_) | DeviceError::AdapterDown(_) => e,
                other => DeviceError::AdapterSend(other.to_string()),
            })
    }

    /// Ask the adapter to stop; the task ends with [`ExitReason::Normal`]
    pub async fn stop(&self) -> Result<()> {
        self.request("adapter stop", Command::Stop).await
    }

    /// Abort the adapter task; the task ends with [`ExitReason::Killed`]
    pub fn kill(&self) {
        self.abort.abort();
    }

    async fn request<F>(&self, what: &str, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        with_timeout(self.timeout, what, async {
            self.commands
                .send(make(reply_tx))
                .await
                .map_err(|_| DeviceError::AdapterDown(self.id.clone()))?;
            reply_rx
                .await
                .map_err(|_| DeviceError::AdapterDown(self.id.clone()))?
        })
        .await
    }
}

async fn run_adapter(
    mut adapter: Box<dyn Adapter>,
    mut commands: mpsc::Receiver<Command>,
    mut faults: mpsc::UnboundedReceiver<String>,
) -> ExitReason {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect(device, reply)) => {
                    debug!("Connecting to {}", device);
                    let _ = reply.send(adapter.connect(&device).await);
                }
                Some(Command::Send(payload, reply)) => {
                    let _ = reply.send(adapter.send(payload).await);
                }
                Some(Command::Stop(reply)) => {
                    let result = adapter.stop().await;
                    if let Err(e) = &result {
                        warn!("Adapter stop reported an error: {}", e);
                    }
                    let _ = reply.send(result);
                    return ExitReason::Normal;
                }
                None => {
                    debug!("All handles dropped, stopping adapter");
                    if let Err(e) = adapter.stop().await {
                        warn!("Adapter stop reported an error: {}", e);
                    }
                    return ExitReason::Normal;
                }
            },
            Some(reason) = faults.recv() => {
                warn!("Adapter failed: {}", reason);
                let _ = adapter.stop().await;
                return ExitReason::Failed(reason);
            }
        }
    }
}

async fn monitor(id: Id, task: JoinHandle<ExitReason>, notices: NoticeSender) {
    let reason = match task.await {
        Ok(reason) => reason,
        Err(e) if e.is_panic() => ExitReason::Panicked(panic_message(e.into_panic())),
        Err(_) => ExitReason::Killed,
    };

    debug!("Adapter {} exited ({})", id, reason);
    let _ = notices.send(AdapterNotice::Exited { adapter: id, reason });
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        format!("adapter panicked while starting: {}", panic_message(error.into_panic()))
    } else {
        "adapter start was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::adapter::{AdapterKind, AdapterOptions};
    use crate::device::SubsystemId;

    #[derive(Debug, Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Debug)]
    struct EchoKind {
        journal: Arc<Journal>,
        fail_start: bool,
    }

    #[derive(Debug)]
    struct EchoAdapter {
        journal: Arc<Journal>,
        link: AdapterLink,
    }

    #[async_trait]
    impl Adapter for EchoAdapter {
        async fn connect(&mut self, device: &Device) -> Result<()> {
            if device.id().as_str() == "unplugged" {
                return Err(DeviceError::AdapterConnect("no such port".into()));
            }
            self.journal.push(format!("connect {}", device.id()));
            Ok(())
        }

        async fn send(&mut self, payload: Bytes) -> Result<()> {
            match &payload[..] {
                b"panic" => panic!("wire fault"),
                b"fail" => {
                    self.link.fail("bus reset");
                    Ok(())
                }
                _ => {
                    self.link.deliver(payload);
                    Ok(())
                }
            }
        }

        async fn stop(&mut self) -> Result<()> {
            self.journal.push("stop".to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl AdapterKind for EchoKind {
        fn name(&self) -> &str {
            "echo"
        }

        fn subsystem(&self) -> SubsystemId {
            SubsystemId::new("loop")
        }

        async fn start(&self, _options: &AdapterOptions, link: AdapterLink) -> Result<Box<dyn Adapter>> {
            if self.fail_start {
                return Err(DeviceError::AdapterStart("port busy".into()));
            }
            Ok(Box::new(EchoAdapter {
                journal: self.journal.clone(),
                link,
            }))
        }
    }

    fn config(fail_start: bool) -> (AdapterConfig, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let kind = EchoKind {
            journal: journal.clone(),
            fail_start,
        };
        (AdapterConfig::new(Arc::new(kind), AdapterOptions::new()), journal)
    }

    async fn next_exit(notices: &mut NoticeReceiver) -> (Id, ExitReason) {
        loop {
            match notices.recv().await.expect("notice channel closed") {
                AdapterNotice::Exited { adapter, reason } => return (adapter, reason),
                AdapterNotice::Inbound { .. } => continue,
            }
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_connect_send_and_stop() {
        let (config, journal) = config(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = AdapterHandle::start(&config, tx, Duration::from_secs(1)).await.unwrap();
        assert!(handle.is_alive());
        assert_eq!(handle.kind(), "echo");

        tokio_test::assert_ok!(handle.connect(&Device::new("d1", "loop")).await);
        tokio_test::assert_ok!(handle.send(&b"ping"[..]).await);

        match rx.recv().await.unwrap() {
            AdapterNotice::Inbound { adapter, payload } => {
                assert_eq!(&adapter, handle.id());
                assert_eq!(&payload[..], b"ping");
            }
            other => panic!("unexpected notice {:?}", other),
        }

        handle.stop().await.unwrap();
        let (adapter, reason) = next_exit(&mut rx).await;
        assert_eq!(&adapter, handle.id());
        assert_eq!(reason, ExitReason::Normal);
        assert!(!handle.is_alive());
        assert_eq!(journal.entries(), vec!["connect d1", "stop"]);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let (config, _) = config(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = tokio_test::assert_err!(AdapterHandle::start(&config, tx, Duration::from_secs(1)).await);
        assert!(matches!(err, DeviceError::AdapterStart(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (config, _) = config(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = AdapterHandle::start(&config, tx, Duration::from_secs(1)).await.unwrap();
        let err = handle.connect(&Device::new("unplugged", "loop")).await.unwrap_err();
        assert!(matches!(err, DeviceError::AdapterConnect(_)));
        assert!(handle.is_alive());
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_exit() {
        let (config, _) = config(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = AdapterHandle::start(&config, tx, Duration::from_secs(1)).await.unwrap();

        let err = handle.send(&b"panic"[..]).await.unwrap_err();
        assert!(matches!(err, DeviceError::AdapterDown(_)));

        let (_, reason) = next_exit(&mut rx).await;
        assert_eq!(reason, ExitReason::Panicked("wire fault".to_string()));
        assert!(handle.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_fault_and_kill_are_reported() {
        let (config, journal) = config(false);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let faulty = AdapterHandle::start(&config, tx.clone(), Duration::from_secs(1)).await.unwrap();
        faulty.send(&b"fail"[..]).await.unwrap();
        let (adapter, reason) = next_exit(&mut rx).await;
        assert_eq!(&adapter, faulty.id());
        assert_eq!(reason, ExitReason::Failed("bus reset".to_string()));
        assert_eq!(journal.entries(), vec!["stop"]);

        let doomed = AdapterHandle::start(&config, tx, Duration::from_secs(1)).await.unwrap();
        doomed.kill();
        let (adapter, reason) = next_exit(&mut rx).await;
        assert_eq!(&adapter, doomed.id());
        assert_eq!(reason, ExitReason::Killed);
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_adapter() {
        let (config, journal) = config(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = AdapterHandle::start(&config, tx, Duration::from_secs(1)).await.unwrap();
        let copy = handle.clone();
        assert_eq!(handle, copy);
        drop(handle);
        drop(copy);

        let (_, reason) = next_exit(&mut rx).await;
        assert!(reason.is_normal());
        assert_eq!(journal.entries(), vec!["stop"]);
    }
}
