//! Controller Handle - access to a running input loop from other tasks.
//!
//! The loop owns its state and listener registry. The handle never touches them
//! directly: subscriptions are queued and applied at the start of the next tick, state
//! is read through the snapshot watch channel, and shutdown is a cancellation request.

use super::diagnostic::Diagnostic;
use super::error::ControllerError;
use super::event_processor::{InputLoop, LoopReport};
use super::listener::{ChangeListener, ListenerId, ListenerIds};
use super::state::StateSnapshot;
use crate::config::ControllerConfig;
use crate::platform::Platform;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Requests applied by the loop at the start of a tick.
pub enum ControlMessage {
    Subscribe(ListenerId, Box<dyn ChangeListener>),
    Unsubscribe(ListenerId),
}

impl fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Subscribe(id, _) => f.debug_tuple("Subscribe").field(id).finish(),
            ControlMessage::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
        }
    }
}

/// Cloneable handle to an input loop.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    ids: ListenerIds,
    cancel: CancellationToken,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    diagnostics_tx: broadcast::Sender<Diagnostic>,
    // Subscribed before the loop task starts so diagnostics raised while opening sources
    // reach the first caller of `diagnostics`.
    early_diagnostics: Arc<Mutex<Option<broadcast::Receiver<Diagnostic>>>>,
}

impl ControllerHandle {
    pub(crate) fn new(
        control_tx: mpsc::UnboundedSender<ControlMessage>,
        ids: ListenerIds,
        cancel: CancellationToken,
        snapshot_rx: watch::Receiver<StateSnapshot>,
        diagnostics_tx: broadcast::Sender<Diagnostic>,
    ) -> Self {
        Self {
            control_tx,
            ids,
            cancel,
            snapshot_rx,
            diagnostics_tx,
            early_diagnostics: Arc::new(Mutex::new(None)),
        }
    }

    /// Create the loop and run it on a tokio task.
    ///
    /// Returns the handle together with the task's join handle; the task resolves to the
    /// loop's report, or to `DeviceUnavailable` if initialization failed.
    pub fn spawn(
        config: ControllerConfig,
        platform: Box<dyn Platform>,
    ) -> Result<(Self, JoinHandle<Result<LoopReport, ControllerError>>), ControllerError> {
        info!("Spawning input loop");
        let input_loop = InputLoop::create(config, platform)?;
        let handle = input_loop.handle();
        if let Ok(mut early) = handle.early_diagnostics.lock() {
            *early = Some(handle.diagnostics_tx.subscribe());
        }

        let task = tokio::spawn(async move {
            let result = input_loop.start().await;
            match &result {
                Ok(report) => info!("Input loop task finished after {} ticks", report.ticks),
                Err(e) => error!("Input loop task terminated with error: {}", e),
            }
            result
        });

        Ok((handle, task))
    }

    /// Subscribe a listener; it receives changes from the next tick on.
    pub fn add_listener(
        &self,
        listener: impl ChangeListener + 'static,
    ) -> Result<ListenerId, ControllerError> {
        let id = self.ids.next();
        self.control_tx
            .send(ControlMessage::Subscribe(id, Box::new(listener)))
            .map_err(|_| ControllerError::ChannelError("input loop has stopped".to_string()))?;
        debug!("Queued subscription for {}", id);
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), ControllerError> {
        self.control_tx
            .send(ControlMessage::Unsubscribe(id))
            .map_err(|_| ControllerError::ChannelError("input loop has stopped".to_string()))
    }

    /// Latest published state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified after every tick that changed the state.
    pub fn watch_state(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to diagnostics. For a handle from [`spawn`](Self::spawn) the first call,
    /// across all clones, also receives everything raised since the task was spawned,
    /// including `SourceDegraded` from initialization.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.early_diagnostics
            .lock()
            .ok()
            .and_then(|mut early| early.take())
            .unwrap_or_else(|| self.diagnostics_tx.subscribe())
    }

    /// Ask the loop to stop. It reaches `Stopped` within one tick interval.
    pub fn cancel(&self) {
        debug!("Cancellation requested through handle");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
