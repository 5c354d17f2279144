//! deckinput - change-driven controller state from event devices and raw-HID reports.
//!
//! The pipeline merges two independently sourced partial states (power/volume keys from
//! input-event devices, everything else from the deck-state HID report) into one
//! canonical state and tells listeners about significant changes.
//!
//! ```no_run
//! use deckinput::{ControllerConfig, FieldChange, InputLoop, ListenerError};
//! use deckinput::platform::linux::LinuxPlatform;
//!
//! # async fn run() -> Result<(), deckinput::ControllerError> {
//! let mut input = InputLoop::create(ControllerConfig::default(), Box::new(LinuxPlatform::new()))?;
//! input.add_listener(|change: &FieldChange| -> Result<(), ListenerError> {
//!     println!("{} -> {}", change.field, change.value);
//!     Ok(())
//! });
//! let report = input.start().await?;
//! println!("stopped after {} ticks", report.ticks);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod platform;

pub use config::{ConfigError, ControllerConfig, EventDeviceConfig, RawReportConfig};
pub use controller::*;
pub use platform::{DeviceClass, DeviceDescriptor, InputSource, Platform, RawInputEvent, SourceMessage};

#[cfg(target_os = "linux")]
pub use platform::list_available_devices;
