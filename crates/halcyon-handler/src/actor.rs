/*!
 * The handler actor.
 *
 * Every handler runs as one tokio task that owns its [`HandlerMachine`]. The
 * task multiplexes directory events, adapter notices and requests from
 * [`HandlerRef`]s through a single `select!` loop, so the record is only ever
 * touched from that task and callbacks never overlap.
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};

use halcyon_core::{logging::handler_span, utils::with_timeout};
use halcyon_devices::{AdapterConfig, AdapterNotice, DeviceDirectory, NoticeReceiver};

use crate::callbacks::{DeviceHandler, TerminateReason};
use crate::error::{HandlerError, Result};
use crate::machine::HandlerMachine;
use crate::options::HandlerOptions;
use crate::record::HandlerSnapshot;

enum Request<H: DeviceHandler> {
    Call(H::Call, oneshot::Sender<Option<H::Reply>>),
    Cast(H::Cast),
    Status(oneshot::Sender<HandlerSnapshot>),
    Stop(TerminateReason, oneshot::Sender<()>),
}

/// Address of a running handler
///
/// Cheap to clone. The handler terminates with [`TerminateReason::Normal`]
/// once every reference is dropped.
pub struct HandlerRef<H: DeviceHandler> {
    name: Arc<str>,
    requests: mpsc::Sender<Request<H>>,
    call_timeout: Duration,
}

impl<H: DeviceHandler> Clone for HandlerRef<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            requests: self.requests.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

impl<H: DeviceHandler> fmt::Debug for HandlerRef<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("name", &self.name)
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}

impl<H: DeviceHandler> HandlerRef<H> {
    /// The handler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the handler task has ended
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Send a synchronous request and wait for the reply
    ///
    /// Waits at most `timeout`, or the configured call timeout when `None`.
    pub async fn call(&self, request: H::Call, timeout: Option<Duration>) -> Result<H::Reply> {
        let timeout = timeout.unwrap_or(self.call_timeout);
        let (reply_tx, reply_rx) = oneshot::channel();

        with_timeout(timeout, "handler call", async {
            self.requests
                .send(Request::Call(request, reply_tx))
                .await
                .map_err(|_| HandlerError::Stopped)?;
            match reply_rx.await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(HandlerError::NoReply),
                Err(_) => Err(HandlerError::Stopped),
            }
        })
        .await
    }

    /// Send an asynchronous request
    pub async fn cast(&self, request: H::Cast) -> Result<()> {
        self.requests
            .send(Request::Cast(request))
            .await
            .map_err(|_| HandlerError::Stopped)
    }

    /// Current status, device and adapter of the handler
    pub async fn status(&self) -> Result<HandlerSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        with_timeout(self.call_timeout, "handler status", async {
            self.requests
                .send(Request::Status(reply_tx))
                .await
                .map_err(|_| HandlerError::Stopped)?;
            reply_rx.await.map_err(|_| HandlerError::Stopped)
        })
        .await
    }

    /// Ask the handler to terminate and wait until it has
    pub async fn stop<S: Into<String>>(&self, reason: S) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.requests
            .send(Request::Stop(TerminateReason::Shutdown(reason.into()), done_tx))
            .await
            .map_err(|_| HandlerError::Stopped)?;
        done_rx.await.map_err(|_| HandlerError::Stopped)
    }
}

/// A spawned handler: its address and its task
#[derive(Debug)]
pub struct RunningHandler<H: DeviceHandler> {
    handle: HandlerRef<H>,
    task: JoinHandle<Result<TerminateReason>>,
}

impl<H: DeviceHandler> RunningHandler<H> {
    /// Address of the handler
    pub fn handle(&self) -> &HandlerRef<H> {
        &self.handle
    }

    /// Wait for the handler task to end
    ///
    /// Resolves to the termination reason, or to the error that ended the
    /// handler.
    pub async fn join(self) -> Result<TerminateReason> {
        let Self { handle, task } = self;
        drop(handle);
        task.await.map_err(join_error)?
    }

    /// Split into the address and the raw task
    pub fn into_parts(self) -> (HandlerRef<H>, JoinHandle<Result<TerminateReason>>) {
        (self.handle, self.task)
    }
}

/// Spawn a handler
///
/// The handler subscribes to the subsystem served by `adapter` and folds the
/// devices already known before this returns. If that bootstrap fails, the
/// error is returned and no handler is left running.
pub async fn spawn_handler<H: DeviceHandler>(
    callbacks: H,
    adapter: AdapterConfig,
    state: H::State,
    directory: Arc<dyn DeviceDirectory>,
    options: HandlerOptions,
) -> Result<RunningHandler<H>> {
    let (requests_tx, requests_rx) = mpsc::channel(options.mailbox_capacity.max(1));
    let (ready_tx, ready_rx) = oneshot::channel();

    let span = handler_span(&options.name, adapter.subsystem().as_str());
    let handle = HandlerRef {
        name: Arc::from(options.name.as_str()),
        requests: requests_tx,
        call_timeout: options.call_timeout,
    };

    let task = tokio::spawn(
        run(callbacks, adapter, state, directory, options, requests_rx, ready_tx).instrument(span),
    );

    match ready_rx.await {
        Ok(()) => Ok(RunningHandler { handle, task }),
        Err(_) => match task.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) => Err(HandlerError::Stopped),
            Err(e) => Err(join_error(e)),
        },
    }
}

async fn run<H: DeviceHandler>(
    callbacks: H,
    adapter: AdapterConfig,
    state: H::State,
    directory: Arc<dyn DeviceDirectory>,
    options: HandlerOptions,
    mut requests: mpsc::Receiver<Request<H>>,
    ready: oneshot::Sender<()>,
) -> Result<TerminateReason> {
    let (notices_tx, mut notices): (_, NoticeReceiver) = mpsc::unbounded_channel();
    let (mut machine, mut subscription) =
        HandlerMachine::init(callbacks, adapter, state, directory.as_ref(), &options, notices_tx).await?;
    drop(directory);

    info!("Handler started ({})", machine.snapshot().status);
    let _ = ready.send(());

    let mut stop_ack = None;
    let reason = loop {
        let step = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => dispatch(&mut machine, request).await,
                None => break TerminateReason::Normal,
            },
            Some(notice) = notices.recv() => {
                let result = match notice {
                    AdapterNotice::Inbound { adapter, payload } => machine.on_inbound_data(&adapter, payload).await,
                    AdapterNotice::Exited { adapter, reason } => machine.on_adapter_exit(&adapter, reason).await,
                };
                result.map(|()| Control::Continue)
            }
            event = subscription.recv() => match event {
                Some(event) => machine.on_event(event).await.map(|()| Control::Continue),
                None => break TerminateReason::DirectoryClosed,
            },
        };

        match step {
            Ok(Control::Continue) => {}
            Err(e) if !e.is_fatal() => warn!("Staying {}: {}", machine.snapshot().status, e),
            Ok(Control::Stop(reason, done)) => {
                stop_ack = Some(done);
                break reason;
            }
            Err(e) => {
                error!("Handler failed: {}", e);
                machine.shutdown(&TerminateReason::Failed(e.to_string())).await;
                return Err(e);
            }
        }
    };

    machine.shutdown(&reason).await;
    if let Some(done) = stop_ack {
        let _ = done.send(());
    }
    Ok(reason)
}

enum Control {
    Continue,
    Stop(TerminateReason, oneshot::Sender<()>),
}

async fn dispatch<H: DeviceHandler>(machine: &mut HandlerMachine<H>, request: Request<H>) -> Result<Control> {
    match request {
        Request::Call(call, reply) => {
            let outcome = machine.on_call(call).await?;
            if outcome.is_none() {
                debug!("Call left without a reply");
            }
            let _ = reply.send(outcome);
        }
        Request::Cast(cast) => machine.on_cast(cast).await?,
        Request::Status(reply) => {
            let _ = reply.send(machine.snapshot());
        }
        Request::Stop(reason, done) => return Ok(Control::Stop(reason, done)),
    }
    Ok(Control::Continue)
}

fn join_error(error: JoinError) -> HandlerError {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        HandlerError::Panicked(message)
    } else {
        HandlerError::Stopped
    }
}
