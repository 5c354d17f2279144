//! Source ownership and per-tick draining.
//!
//! [`SourceSet`] opens every configured source in order, drains them without blocking,
//! tracks consecutive read failures and releases everything in reverse open order. The
//! release runs at most once per source, also from `Drop`, so every exit path of the
//! loop gives the devices back.

use super::diagnostic::Diagnostic;
use super::error::{ControllerError, SourceError};
use crate::config::ControllerConfig;
use crate::platform::{DeviceClass, InputSource, Platform, SourceMessage};
use std::fmt;
use tracing::{debug, error, info, warn};

struct OpenSource {
    source: Box<dyn InputSource>,
    translate_keys: bool,
    consecutive_failures: u32,
    disconnected: bool,
    released: bool,
}

impl OpenSource {
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if let Err(e) = self.source.release() {
            error!("Error releasing {}: {}", self.source.path(), e);
        } else {
            debug!("Released {}", self.source.path());
        }
        true
    }
}

/// A message tagged with the path of the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedMessage {
    pub path: String,
    pub message: SourceMessage,
}

/// What happened while opening the configured sources.
#[derive(Debug, Default)]
pub struct OpenReport {
    pub opened: Vec<String>,
    pub degraded: Vec<Diagnostic>,
}

#[derive(Default)]
pub struct SourceSet {
    sources: Vec<OpenSource>,
}

impl fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.source.path()))
            .finish()
    }
}

impl SourceSet {
    /// Open every configured source: event devices first, in order, then the raw report
    /// device. A required source that fails releases whatever was already opened.
    pub fn open(
        platform: &dyn Platform,
        config: &ControllerConfig,
    ) -> Result<(Self, OpenReport), ControllerError> {
        let mut set = SourceSet::default();
        let mut report = OpenReport::default();

        let requests = config
            .event_devices
            .iter()
            .map(|d| {
                let class = DeviceClass::EventDevice;
                (d.path.as_str(), class, d.grab, d.translate_keys, d.optional)
            })
            .chain(config.raw_report.iter().map(|r| {
                (r.path.as_str(), DeviceClass::RawReport, false, false, r.optional)
            }));

        for (path, class, grab, translate_keys, optional) in requests {
            let opened = match class {
                DeviceClass::EventDevice => platform.open_event_device(path, grab),
                DeviceClass::RawReport => platform.open_raw_report_device(path),
            };

            match opened {
                Ok(source) => {
                    info!("Connected to {} ({:?})", path, class);
                    report.opened.push(path.to_string());
                    set.sources.push(OpenSource {
                        source,
                        translate_keys,
                        consecutive_failures: 0,
                        disconnected: false,
                        released: false,
                    });
                }
                Err(e) if optional => {
                    warn!(
                        "Optional source {} unavailable, continuing without it: {}",
                        path, e
                    );
                    report.degraded.push(Diagnostic::SourceDegraded {
                        path: path.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("Required source {} unavailable: {}", path, e);
                    set.release_all();
                    return Err(ControllerError::DeviceUnavailable {
                        path: path.to_string(),
                        source: e,
                    });
                }
            }
        }

        Ok((set, report))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources still being polled.
    pub fn active(&self) -> usize {
        self.sources.iter().filter(|s| !s.disconnected).count()
    }

    /// Drain every connected source once, in open order.
    ///
    /// Events from devices that are only grabbed (not translated) are discarded here. A
    /// failing source is retried next tick until `max_failures` consecutive failures, then
    /// it is released and skipped for the rest of the run.
    pub fn collect(
        &mut self,
        max_per_source: usize,
        max_failures: u32,
        out: &mut Vec<CollectedMessage>,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut batch = Vec::new();

        for open in self.sources.iter_mut().filter(|s| !s.disconnected) {
            batch.clear();
            match open.source.drain(&mut batch, max_per_source) {
                Ok(()) => {
                    open.consecutive_failures = 0;
                    let path = open.source.path();
                    let keep_events = open.translate_keys;
                    out.extend(
                        batch
                            .drain(..)
                            .filter(|m| keep_events || !matches!(m, SourceMessage::Event(_)))
                            .map(|message| CollectedMessage {
                                path: path.to_string(),
                                message,
                            }),
                    );
                }
                Err(e) => {
                    let path = open.source.path().to_string();
                    open.consecutive_failures += 1;

                    let gone = matches!(e, SourceError::Disconnected(_));
                    if gone || open.consecutive_failures >= max_failures {
                        error!(
                            "Source {} disconnected after {} consecutive failures: {}",
                            path, open.consecutive_failures, e
                        );
                        open.disconnected = true;
                        open.release();
                        diagnostics.push(Diagnostic::SourceDisconnected {
                            path,
                            reason: e.to_string(),
                        });
                    } else {
                        warn!(
                            "Error reading {} ({}/{}): {}",
                            path, open.consecutive_failures, max_failures, e
                        );
                        diagnostics.push(Diagnostic::SourceReadError {
                            path,
                            message: e.to_string(),
                            consecutive: open.consecutive_failures,
                        });
                    }
                }
            }
        }

        diagnostics
    }

    /// Release every source in reverse open order. Returns how many were released by
    /// this call.
    pub fn release_all(&mut self) -> usize {
        self.sources
            .iter_mut()
            .rev()
            .map(|s| s.release())
            .filter(|released| *released)
            .count()
    }
}

impl Drop for SourceSet {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!("Released {} sources on drop", released);
        }
    }
}
