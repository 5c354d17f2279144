//! Non-fatal conditions surfaced to the caller while the loop keeps running.

use super::error::ReportError;
use super::field::Field;
use super::listener::ListenerId;
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An optional source could not be opened; the loop runs without it.
    SourceDegraded { path: String, reason: String },
    /// A report was rejected whole.
    MalformedReport { path: String, error: ReportError },
    /// A listener failed while handling a change.
    CallbackFailure {
        listener: ListenerId,
        field: Field,
        message: String,
    },
    /// A read failed; it is retried on the next tick.
    SourceReadError {
        path: String,
        message: String,
        consecutive: u32,
    },
    /// A source exceeded its failure budget (or vanished) and was dropped.
    SourceDisconnected { path: String, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SourceDegraded { path, reason } => {
                write!(f, "optional source {} unavailable: {}", path, reason)
            }
            Diagnostic::MalformedReport { path, error } => {
                write!(f, "malformed report from {}: {}", path, error)
            }
            Diagnostic::CallbackFailure {
                listener,
                field,
                message,
            } => write!(f, "{} failed on {}: {}", listener, field, message),
            Diagnostic::SourceReadError {
                path,
                message,
                consecutive,
            } => write!(
                f,
                "read error on {} ({} in a row): {}",
                path, consecutive, message
            ),
            Diagnostic::SourceDisconnected { path, reason } => {
                write!(f, "source {} disconnected: {}", path, reason)
            }
        }
    }
}

/// Feed every diagnostic from `rx` to `handle` until the loop drops its sender.
///
/// A slow consumer that falls behind the channel keeps going from the oldest retained
/// diagnostic. Returns how many were skipped that way.
pub async fn forward_diagnostics(
    mut rx: broadcast::Receiver<Diagnostic>,
    mut handle: impl FnMut(Diagnostic),
) -> u64 {
    let mut skipped = 0;
    loop {
        match rx.recv().await {
            Ok(diagnostic) => handle(diagnostic),
            Err(RecvError::Lagged(n)) => {
                warn!("Diagnostics consumer fell behind, {} diagnostics skipped", n);
                skipped += n;
            }
            Err(RecvError::Closed) => return skipped,
        }
    }
}
