//! Linux platform: evdev event devices and `/dev/hidraw*` report devices.
//!
//! Both kinds of node are opened with `O_NONBLOCK` so a drain returns as soon as the
//! kernel has nothing queued.

use super::{DeviceClass, DeviceDescriptor, InputSource, Platform, RawInputEvent, SourceMessage};
use crate::controller::error::SourceError;
use crate::controller::report::REPORT_LEN;
use evdev::KeyCode as Key;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, info, warn};

const HIDRAW_DEV_DIR: &str = "/dev";
const HIDRAW_SYSFS_DIR: &str = "/sys/class/hidraw";

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self
    }
}

fn open_nonblocking(path: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

fn map_read_error(path: &str, err: io::Error) -> SourceError {
    match err.raw_os_error() {
        Some(libc::ENODEV) | Some(libc::ENXIO) => SourceError::Disconnected(path.to_string()),
        _ => SourceError::Io(err),
    }
}

impl Platform for LinuxPlatform {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, SourceError> {
        let mut devices: Vec<DeviceDescriptor> = evdev::enumerate()
            .map(|(path, device)| DeviceDescriptor {
                path: path.to_string_lossy().to_string(),
                class: DeviceClass::EventDevice,
                name: device.name().map(str::to_string),
                physical_path: device.physical_path().map(str::to_string),
                has_translated_keys: device.supported_keys().is_some_and(|keys| {
                    keys.contains(Key::KEY_POWER)
                        || keys.contains(Key::KEY_VOLUMEUP)
                        || keys.contains(Key::KEY_VOLUMEDOWN)
                }),
            })
            .collect();
        devices.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hidraw = Vec::new();
        for entry in std::fs::read_dir(HIDRAW_DEV_DIR)? {
            let entry = entry?;
            let node = entry.file_name().to_string_lossy().to_string();
            if !node.starts_with("hidraw") {
                continue;
            }
            let (name, physical_path) = read_hidraw_uevent(&node);
            hidraw.push(DeviceDescriptor {
                path: entry.path().to_string_lossy().to_string(),
                class: DeviceClass::RawReport,
                name,
                physical_path,
                has_translated_keys: false,
            });
        }
        hidraw.sort_by(|a, b| a.path.cmp(&b.path));
        devices.extend(hidraw);

        debug!("Enumerated {} input devices", devices.len());
        Ok(devices)
    }

    fn open_event_device(
        &self,
        path: &str,
        grab: bool,
    ) -> Result<Box<dyn InputSource>, SourceError> {
        let mut device = evdev::Device::from_fd(OwnedFd::from(open_nonblocking(path)?))?;
        if grab {
            device.grab()?;
        }
        info!(
            "Opened event device {} ({}){}",
            path,
            device.name().unwrap_or("Unknown"),
            if grab { ", grabbed" } else { "" }
        );
        Ok(Box::new(EvdevSource {
            path: path.to_string(),
            device: Some(device),
            grabbed: grab,
            pending: VecDeque::new(),
        }))
    }

    fn open_raw_report_device(&self, path: &str) -> Result<Box<dyn InputSource>, SourceError> {
        let file = open_nonblocking(path)?;
        info!("Opened raw report device {}", path);
        Ok(Box::new(HidrawSource {
            path: path.to_string(),
            file: Some(file),
            buf: [0u8; REPORT_LEN],
        }))
    }
}

/// Reads `HID_NAME` / `HID_PHYS` from sysfs. Missing files just yield `None`.
fn read_hidraw_uevent(node: &str) -> (Option<String>, Option<String>) {
    let uevent = Path::new(HIDRAW_SYSFS_DIR)
        .join(node)
        .join("device")
        .join("uevent");
    let Ok(content) = std::fs::read_to_string(&uevent) else {
        return (None, None);
    };

    let mut name = None;
    let mut phys = None;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("HID_NAME=") {
            name = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("HID_PHYS=") {
            phys = Some(value.to_string());
        }
    }
    (name, phys)
}

pub struct EvdevSource {
    path: String,
    device: Option<evdev::Device>,
    grabbed: bool,
    // Kernel batches are fetched whole and handed out `max` at a time.
    pending: VecDeque<RawInputEvent>,
}

impl InputSource for EvdevSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn drain(&mut self, out: &mut Vec<SourceMessage>, max: usize) -> Result<(), SourceError> {
        let Some(device) = self.device.as_mut() else {
            return Err(SourceError::Disconnected(self.path.clone()));
        };

        if self.pending.is_empty() {
            match device.fetch_events() {
                Ok(events) => {
                    self.pending.extend(events.map(|event| RawInputEvent {
                        event_type: event.event_type().0,
                        code: event.code(),
                        value: event.value(),
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_read_error(&self.path, e)),
            }
        }

        let take = max.min(self.pending.len());
        out.extend(self.pending.drain(..take).map(SourceMessage::Event));
        Ok(())
    }

    fn release(&mut self) -> Result<(), SourceError> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };
        self.pending.clear();
        if self.grabbed {
            self.grabbed = false;
            device.ungrab()?;
            info!("Released {}", self.path);
        }
        Ok(())
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Error releasing {}: {}", self.path, e);
        }
    }
}

pub struct HidrawSource {
    path: String,
    file: Option<File>,
    buf: [u8; REPORT_LEN],
}

impl InputSource for HidrawSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn drain(&mut self, out: &mut Vec<SourceMessage>, max: usize) -> Result<(), SourceError> {
        let Some(file) = self.file.as_mut() else {
            return Err(SourceError::Disconnected(self.path.clone()));
        };

        for _ in 0..max {
            match file.read(&mut self.buf) {
                Ok(0) => break,
                Ok(size) => out.push(SourceMessage::Report(self.buf[..size].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_read_error(&self.path, e)),
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), SourceError> {
        if self.file.take().is_some() {
            info!("Closed {}", self.path);
        }
        Ok(())
    }
}
