//! Platform input-access layer.
//!
//! The pipeline never touches device nodes directly. It asks a [`Platform`] to list and
//! open devices and then drains the returned [`InputSource`]s once per tick. Sources must
//! never block: "nothing pending" is an empty drain, not an error.
//!
//! [`linux::LinuxPlatform`] is the production implementation (evdev + hidraw).

#[cfg(target_os = "linux")]
pub mod linux;

use crate::controller::error::SourceError;
use serde::Serialize;
use std::fmt;

/// Capability class used to route a device's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceClass {
    /// Input-event device delivering discrete key/axis events.
    EventDevice,
    /// Raw-HID device delivering fixed-layout reports.
    RawReport,
}

/// Identity of a device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub path: String,
    pub class: DeviceClass,
    pub name: Option<String>,
    pub physical_path: Option<String>,
    /// Whether the device advertises the power/volume keys the pipeline translates.
    pub has_translated_keys: bool,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?}] {}",
            self.path,
            self.class,
            self.name.as_deref().unwrap_or("Unknown")
        )?;
        if let Some(phys) = &self.physical_path {
            write!(f, " ({})", phys)?;
        }
        Ok(())
    }
}

/// One low-level input event as delivered by an event device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

/// A unit of data drained from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMessage {
    Event(RawInputEvent),
    Report(Vec<u8>),
}

/// An open, non-blocking input source.
pub trait InputSource: Send {
    fn path(&self) -> &str;

    /// Append up to `max` pending messages to `out` without waiting.
    fn drain(&mut self, out: &mut Vec<SourceMessage>, max: usize) -> Result<(), SourceError>;

    /// Give up exclusive access and close. Must be safe to call more than once.
    fn release(&mut self) -> Result<(), SourceError>;
}

/// Device enumeration and opening.
pub trait Platform: Send + fmt::Debug {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, SourceError>;

    fn open_event_device(&self, path: &str, grab: bool)
        -> Result<Box<dyn InputSource>, SourceError>;

    fn open_raw_report_device(&self, path: &str) -> Result<Box<dyn InputSource>, SourceError>;
}

/// Enumerate devices on the current platform.
#[cfg(target_os = "linux")]
pub fn list_available_devices() -> Result<Vec<DeviceDescriptor>, SourceError> {
    linux::LinuxPlatform::new().list_devices()
}
