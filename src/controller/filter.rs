//! Noise filter deciding which changes are worth dispatching.

use super::field::{Field, FieldKind, FieldValue};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STICK_THRESHOLD: u32 = 200;
pub const DEFAULT_PAD_THRESHOLD: u32 = 100;

/// Per-kind axis hysteresis. A change must move strictly more than the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub stick: u32,
    pub pad: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            stick: DEFAULT_STICK_THRESHOLD,
            pad: DEFAULT_PAD_THRESHOLD,
        }
    }
}

/// Stateless significance test. The caller keeps the last reported value per field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeFilter {
    thresholds: Thresholds,
}

impl ChangeFilter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// `old` is the last reported value; `None` means the field has no baseline yet and
    /// the change is always significant.
    pub fn is_significant(&self, field: Field, old: Option<FieldValue>, new: FieldValue) -> bool {
        let Some(old) = old else {
            return true;
        };

        let threshold = match field.kind() {
            FieldKind::Button => return old != new,
            FieldKind::StickAxis => self.thresholds.stick,
            FieldKind::PadAxis => self.thresholds.pad,
        };

        match (old.as_axis(), new.as_axis()) {
            (Some(old), Some(new)) => {
                (i64::from(new) - i64::from(old)).unsigned_abs() > u64::from(threshold)
            }
            _ => old != new,
        }
    }
}
