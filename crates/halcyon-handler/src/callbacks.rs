/*!
 * The capability set a device handler implements.
 *
 * The state machine owns the handler's state and threads it through every
 * callback by value: each callback receives the current state and returns the
 * next one. Callbacks never run concurrently for the same handler.
 */
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use halcyon_devices::{AdapterHandle, Device};

/// Result of `on_discover`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery<S> {
    /// Ignore the device and stay disconnected
    Continue(S),
    /// Start (or reuse) the adapter and connect to the device
    Connect(S),
}

/// Result of `on_data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOutcome<S> {
    /// Keep the connection
    Continue(S),
    /// Ask the handler to drop the connection
    Disconnect(S),
}

/// Result of `on_call`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<R, S> {
    /// Answer the caller
    Reply(R, S),
    /// Leave the caller without an answer
    NoReply(S),
}

/// Why a handler is terminating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    /// Every reference to the handler was dropped
    Normal,
    /// A caller asked the handler to stop
    Shutdown(String),
    /// The device directory went away
    DirectoryClosed,
    /// A callback failed
    Failed(String),
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminateReason::Normal => write!(f, "normal"),
            TerminateReason::Shutdown(reason) => write!(f, "shutdown: {}", reason),
            TerminateReason::DirectoryClosed => write!(f, "directory closed"),
            TerminateReason::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// User logic for one class of devices
///
/// `on_discover`, `on_connect`, `on_data` and `on_disconnect` drive the device
/// lifecycle. `on_call`, `on_cast` and `on_terminate` have defaults and only
/// need overriding when the handler is queried from outside.
///
/// Returning an error from any callback terminates the handler.
#[async_trait]
pub trait DeviceHandler: Send + Sync + 'static {
    /// State threaded through every callback
    type State: Send + 'static;
    /// Synchronous request type
    type Call: Send + 'static;
    /// Reply to a synchronous request
    type Reply: Send + 'static;
    /// Asynchronous request type
    type Cast: Send + 'static;

    /// A device appeared on the handler's subsystem while disconnected
    async fn on_discover(&self, device: &Device, state: Self::State) -> anyhow::Result<Discovery<Self::State>>;

    /// The adapter is connected to the device
    async fn on_connect(
        &self,
        device: &Device,
        adapter: &AdapterHandle,
        state: Self::State,
    ) -> anyhow::Result<Self::State>;

    /// The adapter delivered data from the connected device
    async fn on_data(
        &self,
        device: &Device,
        adapter: &AdapterHandle,
        payload: Bytes,
        state: Self::State,
    ) -> anyhow::Result<DataOutcome<Self::State>>;

    /// The connected device went away, either removed or through an adapter crash
    async fn on_disconnect(&self, device: &Device, state: Self::State) -> anyhow::Result<Self::State>;

    /// Synchronous request from outside the device lifecycle
    async fn on_call(
        &self,
        _request: Self::Call,
        state: Self::State,
    ) -> anyhow::Result<CallOutcome<Self::Reply, Self::State>> {
        Ok(CallOutcome::NoReply(state))
    }

    /// Asynchronous request from outside the device lifecycle
    async fn on_cast(&self, _request: Self::Cast, state: Self::State) -> anyhow::Result<Self::State> {
        Ok(state)
    }

    /// The handler is terminating
    async fn on_terminate(&self, _reason: &TerminateReason, _state: Self::State) {}
}
