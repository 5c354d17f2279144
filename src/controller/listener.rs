//! Listener registry and synchronous dispatch.
//!
//! Listeners run on the ingestion loop itself, in registration order. A slow listener
//! delays the next tick. A listener that returns an error or panics is reported and
//! skipped for that change only; the remaining listeners still receive it.

use super::error::ListenerError;
use super::field::{Field, FieldValue};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A significant change delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: Field,
    pub value: FieldValue,
    pub at: DateTime<Local>,
}

impl FieldChange {
    pub fn new(field: Field, value: FieldValue) -> Self {
        Self {
            field,
            value,
            at: Local::now(),
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' changed to {} at {}",
            self.field,
            self.value,
            self.at.format("%H:%M:%S.%3f")
        )
    }
}

/// Receives `(field, value)` changes.
pub trait ChangeListener: Send {
    fn on_change(&mut self, change: &FieldChange) -> Result<(), ListenerError>;
}

impl<F> ChangeListener for F
where
    F: FnMut(&FieldChange) -> Result<(), ListenerError> + Send,
{
    fn on_change(&mut self, change: &FieldChange) -> Result<(), ListenerError> {
        self(change)
    }
}

/// Forwards changes into a bounded channel. A full or closed channel counts as a failed
/// delivery.
pub struct ChannelListener {
    sender: mpsc::Sender<FieldChange>,
}

impl ChannelListener {
    pub fn new(sender: mpsc::Sender<FieldChange>) -> Self {
        Self { sender }
    }
}

impl ChangeListener for ChannelListener {
    fn on_change(&mut self, change: &FieldChange) -> Result<(), ListenerError> {
        self.sender
            .try_send(change.clone())
            .map_err(|e| ListenerError::new(format!("channel send failed: {}", e)))
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Shared id source so handles can hand out ids before the loop sees the listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerIds(Arc<AtomicU64>);

impl ListenerIds {
    pub fn next(&self) -> ListenerId {
        ListenerId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub listener: ListenerId,
    pub field: Field,
    pub message: String,
}

#[derive(Default)]
pub struct ListenerRegistry {
    ids: ListenerIds,
    listeners: Vec<(ListenerId, Box<dyn ChangeListener>)>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|(id, _)| id))
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: ListenerIds) -> Self {
        Self {
            ids,
            listeners: Vec::new(),
        }
    }

    pub fn ids(&self) -> ListenerIds {
        self.ids.clone()
    }

    pub fn subscribe(&mut self, listener: impl ChangeListener + 'static) -> ListenerId {
        let id = self.ids.next();
        self.insert(id, Box::new(listener));
        id
    }

    /// Register under an id allocated elsewhere from the same [`ListenerIds`].
    pub fn insert(&mut self, id: ListenerId, listener: Box<dyn ChangeListener>) {
        debug!("Registered {}", id);
        self.listeners.push((id, listener));
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        let removed = self.listeners.len() != before;
        if removed {
            debug!("Unregistered {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `change` to every listener in registration order.
    pub fn dispatch(&mut self, change: &FieldChange) -> Vec<CallbackFailure> {
        let mut failures = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(change)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            warn!("{} failed on {}: {}", id, change.field, message);
            failures.push(CallbackFailure {
                listener: *id,
                field: change.field,
                message,
            });
        }

        failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
