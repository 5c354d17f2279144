//! The ingestion loop.
//!
//! A single cooperative loop drives the whole pipeline:
//!
//! ```text
//! Initializing ──► Polling ──► ShuttingDown ──► Stopped
//!   open/grab       tick, sleep     release in
//!   sources         until cancel    reverse order
//! ```
//!
//! Each tick drains every source without blocking, routes raw-HID reports through the
//! decoder and event-device keys through translation, runs every touched field through
//! the [`ChangeFilter`] and dispatches the significant ones in the order they were
//! produced. Cancellation is checked at the start of every tick and raced against the
//! inter-tick sleep, so the loop stops within one tick interval.

use super::controller_handle::{ControlMessage, ControllerHandle};
use super::diagnostic::Diagnostic;
use super::error::ControllerError;
use super::event_collector::{CollectedMessage, SourceSet};
use super::field::{Field, FieldValue};
use super::filter::ChangeFilter;
use super::listener::{ChangeListener, FieldChange, ListenerId, ListenerIds, ListenerRegistry};
use super::report;
use super::state::{ControllerState, StateSnapshot};
use super::translate;
use crate::config::ControllerConfig;
use crate::platform::{Platform, SourceMessage};
use statum::{machine, state};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DIAGNOSTICS_CAPACITY: usize = 256;
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Counters and source bookkeeping returned when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    pub messages: u64,
    pub dispatched: u64,
    pub malformed_reports: u64,
    pub callback_failures: u64,
    pub read_errors: u64,
    pub opened_sources: Vec<String>,
    pub degraded_sources: Vec<String>,
    pub disconnected_sources: Vec<String>,
    /// Sources released during shutdown.
    pub released_sources: usize,
}

#[state]
#[derive(Debug, Clone)]
pub enum LoopState {
    Initializing,
    Polling,
    ShuttingDown,
    Stopped,
}

#[machine]
#[derive(Debug)]
pub struct InputLoop<S: LoopState> {
    platform: Box<dyn Platform>,
    config: ControllerConfig,
    sources: SourceSet,

    // Canonical state and the last value handed to listeners per field.
    state: ControllerState,
    reported: HashMap<Field, FieldValue>,
    filter: ChangeFilter,
    registry: ListenerRegistry,

    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<StateSnapshot>,
    diagnostics_tx: broadcast::Sender<Diagnostic>,

    stats: LoopReport,
}

// Available in every state
impl<S: LoopState> InputLoop<S> {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn stats(&self) -> &LoopReport {
        &self.stats
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Handle for other tasks: live subscription, snapshots, diagnostics, cancellation.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(
            self.control_tx.clone(),
            self.registry.ids(),
            self.cancel.clone(),
            self.snapshot_tx.subscribe(),
            self.diagnostics_tx.clone(),
        )
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn report_diagnostic(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::MalformedReport { .. } => self.stats.malformed_reports += 1,
            Diagnostic::CallbackFailure { .. } => self.stats.callback_failures += 1,
            Diagnostic::SourceReadError { .. } => self.stats.read_errors += 1,
            Diagnostic::SourceDisconnected { path, .. } => {
                self.stats.read_errors += 1;
                self.stats.disconnected_sources.push(path.clone());
            }
            Diagnostic::SourceDegraded { path, .. } => {
                self.stats.degraded_sources.push(path.clone())
            }
        }
        // No receivers is fine; the condition is already logged where it happened.
        let _ = self.diagnostics_tx.send(diagnostic);
    }
}

impl InputLoop<Initializing> {
    pub fn create(
        config: ControllerConfig,
        platform: Box<dyn Platform>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        debug!("Creating input loop with config: {:?}", config);

        let filter = ChangeFilter::new(config.thresholds);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(StateSnapshot::default());
        let (diagnostics_tx, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);

        Ok(Self::new(
            platform,
            config,
            SourceSet::default(),
            ControllerState::new(),
            HashMap::new(),
            filter,
            ListenerRegistry::with_ids(ListenerIds::default()),
            control_tx,
            control_rx,
            CancellationToken::new(),
            snapshot_tx,
            diagnostics_tx,
            LoopReport::default(),
        ))
    }

    /// Use an externally owned cancellation token instead of the loop's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn add_listener(&mut self, listener: impl ChangeListener + 'static) -> ListenerId {
        self.registry.subscribe(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Open all configured sources. Fails with `DeviceUnavailable` if a required one
    /// cannot be opened; nothing stays open in that case.
    pub fn initialize(mut self) -> Result<InputLoop<Polling>, ControllerError> {
        info!("Initializing input loop");

        let (sources, opened) = SourceSet::open(self.platform.as_ref(), &self.config)?;
        self.sources = sources;
        self.stats.opened_sources = opened.opened;
        for diagnostic in opened.degraded {
            self.report_diagnostic(diagnostic);
        }

        if self.stats.degraded_sources.is_empty() {
            info!("All {} sources opened", self.sources.len());
        } else {
            warn!(
                "Running degraded: {} of {} configured sources unavailable",
                self.stats.degraded_sources.len(),
                self.stats.degraded_sources.len() + self.sources.len()
            );
        }

        info!("Input loop initialized, transitioning to Polling state");
        Ok(self.transition())
    }

    /// Run the loop to completion: initialize, poll until cancelled, release.
    pub async fn start(self) -> Result<LoopReport, ControllerError> {
        let polling = self.initialize()?;
        let stopped = polling.run().await.shutdown();
        Ok(stopped.into_report())
    }
}

impl InputLoop<Polling> {
    /// Sources still being drained each tick.
    pub fn active_sources(&self) -> usize {
        self.sources.active()
    }

    /// Poll until the cancellation token fires.
    pub async fn run(mut self) -> InputLoop<ShuttingDown> {
        let tick_interval = self.config.tick_interval();
        info!("Starting input loop with {:?} tick interval", tick_interval);

        let mut last_stats_time = Instant::now();
        let mut last_stats = (0u64, 0u64, 0u64);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.tick();

            if last_stats_time.elapsed() >= STATS_INTERVAL {
                let (ticks, messages, dispatched) = last_stats;
                info!(
                    "Input loop stats: {} ticks, {} messages, {} changes dispatched in last {} seconds",
                    self.stats.ticks - ticks,
                    self.stats.messages - messages,
                    self.stats.dispatched - dispatched,
                    STATS_INTERVAL.as_secs()
                );
                last_stats = (self.stats.ticks, self.stats.messages, self.stats.dispatched);
                last_stats_time = Instant::now();
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(tick_interval) => {}
            }
        }

        info!("Cancellation requested, transitioning to ShuttingDown state");
        self.transition()
    }

    /// One ingestion cycle. Returns the number of changes dispatched.
    pub fn tick(&mut self) -> usize {
        self.apply_control_messages();

        let mut messages = Vec::new();
        let diagnostics = self.sources.collect(
            self.config.max_messages_per_tick,
            self.config.max_consecutive_read_failures,
            &mut messages,
        );
        let lost = diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::SourceDisconnected { .. }));
        for diagnostic in diagnostics {
            self.report_diagnostic(diagnostic);
        }
        if lost && self.sources.active() == 0 {
            warn!("All sources lost, idling until cancelled");
        }

        self.stats.ticks += 1;
        self.stats.messages += messages.len() as u64;

        let mut state_changed = false;
        let mut dispatched = 0;
        for collected in messages {
            let changed = self.apply_message(collected);
            state_changed |= !changed.is_empty();
            for field in changed {
                if self.dispatch_if_significant(field) {
                    dispatched += 1;
                }
            }
        }

        if state_changed {
            self.snapshot_tx.send_replace(self.state.snapshot());
        }
        dispatched
    }

    fn apply_control_messages(&mut self) {
        while let Ok(message) = self.control_rx.try_recv() {
            match message {
                ControlMessage::Subscribe(id, listener) => self.registry.insert(id, listener),
                ControlMessage::Unsubscribe(id) => {
                    if !self.registry.unsubscribe(id) {
                        debug!("Unsubscribe for unknown {}", id);
                    }
                }
            }
        }
    }

    /// Write one message into the canonical state; returns the fields it changed.
    fn apply_message(&mut self, collected: CollectedMessage) -> Vec<Field> {
        match collected.message {
            SourceMessage::Event(event) => match translate::translate(&event) {
                Some((field, value)) if self.state.update(field, value) => {
                    debug!("{}: {} = {}", collected.path, field, value);
                    vec![field]
                }
                _ => Vec::new(),
            },
            SourceMessage::Report(bytes) => match report::decode(&bytes, &mut self.state) {
                Ok(changed) => changed,
                Err(e) => {
                    warn!("Malformed report from {}: {}", collected.path, e);
                    self.report_diagnostic(Diagnostic::MalformedReport {
                        path: collected.path,
                        error: e,
                    });
                    Vec::new()
                }
            },
        }
    }

    fn dispatch_if_significant(&mut self, field: Field) -> bool {
        let new = self.state.get(field);
        let old = self.reported.get(&field).copied();
        if !self.filter.is_significant(field, old, new) {
            return false;
        }
        self.reported.insert(field, new);

        let change = FieldChange::new(field, new);
        debug!("Event: {}", change);
        self.stats.dispatched += 1;

        for failure in self.registry.dispatch(&change) {
            self.report_diagnostic(Diagnostic::CallbackFailure {
                listener: failure.listener,
                field: failure.field,
                message: failure.message,
            });
        }
        true
    }
}

impl InputLoop<ShuttingDown> {
    /// Release all sources in reverse open order.
    pub fn shutdown(mut self) -> InputLoop<Stopped> {
        info!("Releasing {} sources", self.sources.len());
        self.stats.released_sources = self.sources.release_all();
        if self.stats.callback_failures > 0 || self.stats.malformed_reports > 0 {
            warn!(
                "Input loop finished with {} callback failures and {} malformed reports",
                self.stats.callback_failures, self.stats.malformed_reports
            );
        }
        info!("Input loop stopped after {} ticks", self.stats.ticks);
        self.transition()
    }
}

impl InputLoop<Stopped> {
    pub fn into_report(self) -> LoopReport {
        self.stats.clone()
    }
}
