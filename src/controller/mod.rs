//! Controller subsystem: decode, merge, diff and dispatch.
//!
//! ```text
//! event devices ─┐                      ┌─► ChangeFilter ─► ListenerRegistry ─► listeners
//!                ├─► SourceSet ─► state ┤
//! raw-HID ───────┘   (collect)          └─► snapshot watch
//! ```
//!
//! 1. [`event_collector`] - opens, drains and releases sources
//! 2. [`report`] / [`translate`] - turn raw reports and key events into field updates
//! 3. [`state`] - canonical state merged from both paths
//! 4. [`filter`] - noise filter for axis jitter
//! 5. [`listener`] - ordered, failure-isolated dispatch
//! 6. [`event_processor`] - the ingestion loop state machine
//! 7. [`controller_handle`] - access from other tasks

pub mod controller_handle;
pub mod diagnostic;
pub mod error;
pub mod event_collector;
pub mod event_processor;
pub mod field;
pub mod filter;
pub mod listener;
pub mod report;
pub mod state;
pub mod translate;

pub use controller_handle::{ControlMessage, ControllerHandle};
pub use diagnostic::Diagnostic;
pub use error::{ControllerError, ListenerError, ReportError, SourceError};
pub use event_processor::{InputLoop, Initializing, LoopReport, Polling, ShuttingDown, Stopped};
pub use field::{Field, FieldKind, FieldValue};
pub use filter::{ChangeFilter, Thresholds};
pub use listener::{ChangeListener, ChannelListener, FieldChange, ListenerId, ListenerRegistry};
pub use state::{ControllerState, StateSnapshot};

/// Decode one raw-HID report into `state`, outside of any loop.
pub fn decode_report(report: &[u8], state: &mut ControllerState) -> Result<Vec<Field>, ReportError> {
    report::decode(report, state)
}
