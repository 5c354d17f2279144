#![allow(dead_code)]

use deckinput::controller::report::REPORT_LEN;
use deckinput::controller::translate::{EV_KEY, KEY_POWER, KEY_VOLUMEUP};
use deckinput::{
    ChangeListener, ControllerConfig, DeviceDescriptor, EventDeviceConfig,
    FieldChange, InputSource, ListenerError, Platform, RawInputEvent, RawReportConfig,
    SourceError, SourceMessage,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const KEYS: &str = "/dev/input/event5";
pub const GRAB_ONLY: &str = "/dev/input/event2";
pub const HIDRAW: &str = "/dev/hidraw2";

/// One scripted drain result.
#[derive(Debug, Clone)]
pub enum Step {
    Messages(Vec<SourceMessage>),
    Fail,
    Gone,
}

/// Ordered record of opens and releases across all sources.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("release:").map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    unavailable: HashSet<String>,
    pub journal: Journal,
    /// Cancelled once every opened source has run out of script.
    cancel_when_exhausted: Option<CancellationToken>,
    exhausted: Arc<Mutex<HashSet<String>>>,
    opened: Arc<Mutex<usize>>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, path: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), steps.into());
        self
    }

    pub fn unavailable(mut self, path: &str) -> Self {
        self.unavailable.insert(path.to_string());
        self
    }

    pub fn cancel_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.cancel_when_exhausted = Some(token);
        self
    }

    fn open(&self, path: &str) -> Result<Box<dyn InputSource>, SourceError> {
        if self.unavailable.contains(path) {
            return Err(SourceError::Io(io::Error::from(io::ErrorKind::NotFound)));
        }
        self.journal.push(format!("open:{}", path));
        *self.opened.lock().unwrap() += 1;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(path)
            .unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            path: path.to_string(),
            script,
            journal: self.journal.clone(),
            released: false,
            cancel: self.cancel_when_exhausted.clone(),
            exhausted: self.exhausted.clone(),
            opened: self.opened.clone(),
        }))
    }
}

impl Platform for ScriptedPlatform {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, SourceError> {
        Ok(Vec::new())
    }

    fn open_event_device(
        &self,
        path: &str,
        _grab: bool,
    ) -> Result<Box<dyn InputSource>, SourceError> {
        self.open(path)
    }

    fn open_raw_report_device(&self, path: &str) -> Result<Box<dyn InputSource>, SourceError> {
        self.open(path)
    }
}

pub struct ScriptedSource {
    path: String,
    script: VecDeque<Step>,
    journal: Journal,
    released: bool,
    cancel: Option<CancellationToken>,
    exhausted: Arc<Mutex<HashSet<String>>>,
    opened: Arc<Mutex<usize>>,
}

impl InputSource for ScriptedSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn drain(&mut self, out: &mut Vec<SourceMessage>, max: usize) -> Result<(), SourceError> {
        match self.script.pop_front() {
            Some(Step::Messages(mut messages)) => {
                if messages.len() > max {
                    let rest = messages.split_off(max);
                    self.script.push_front(Step::Messages(rest));
                }
                out.extend(messages);
                Ok(())
            }
            Some(Step::Fail) => Err(SourceError::Io(io::Error::from(io::ErrorKind::Other))),
            Some(Step::Gone) => Err(SourceError::Disconnected(self.path.clone())),
            None => {
                if let Some(token) = &self.cancel {
                    let mut exhausted = self.exhausted.lock().unwrap();
                    exhausted.insert(self.path.clone());
                    if exhausted.len() == *self.opened.lock().unwrap() {
                        token.cancel();
                    }
                }
                Ok(())
            }
        }
    }

    fn release(&mut self) -> Result<(), SourceError> {
        self.journal.push(format!("release:{}", self.path));
        self.released = true;
        Ok(())
    }
}

/// Listener that records every change it sees.
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<FieldChange>>>);

impl Recorder {
    pub fn changes(&self) -> Vec<FieldChange> {
        self.0.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<(String, String)> {
        self.changes()
            .iter()
            .map(|c| (c.field.name().to_string(), c.value.to_string()))
            .collect()
    }

    pub fn count(&self, name: &str, value: &str) -> usize {
        self.values()
            .iter()
            .filter(|(f, v)| f == name && v == value)
            .count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl ChangeListener for Recorder {
    fn on_change(&mut self, change: &FieldChange) -> Result<(), ListenerError> {
        self.0.lock().unwrap().push(change.clone());
        Ok(())
    }
}

pub fn blank_report() -> Vec<u8> {
    let mut report = vec![0u8; REPORT_LEN];
    report[0] = 0x01;
    report[2] = 0x09;
    report
}

pub fn report_with(edit: impl FnOnce(&mut Vec<u8>)) -> SourceMessage {
    let mut report = blank_report();
    edit(&mut report);
    SourceMessage::Report(report)
}

pub fn set_axis(report: &mut [u8], offset: usize, value: i16) {
    report[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn key(code: u16, pressed: bool) -> SourceMessage {
    SourceMessage::Event(RawInputEvent {
        event_type: EV_KEY,
        code,
        value: i32::from(pressed),
    })
}

pub fn power(pressed: bool) -> SourceMessage {
    key(KEY_POWER, pressed)
}

pub fn volume_up(pressed: bool) -> SourceMessage {
    key(KEY_VOLUMEUP, pressed)
}

/// Keys device, one grab-only device, and the raw report device.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        event_devices: vec![
            EventDeviceConfig {
                translate_keys: true,
                ..EventDeviceConfig::new(KEYS)
            },
            EventDeviceConfig {
                optional: true,
                ..EventDeviceConfig::new(GRAB_ONLY)
            },
        ],
        raw_report: Some(RawReportConfig {
            path: HIDRAW.to_string(),
            optional: false,
        }),
        tick_interval_ms: 1,
        max_consecutive_read_failures: 3,
        ..ControllerConfig::default()
    }
}
