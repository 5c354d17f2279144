//! Raw-HID deck-state report decoder.
//!
//! The report is a fixed 64-byte buffer:
//!
//! ```text
//! 0..3    header: 0x01 0x00 0x09 (version, reserved, deck-state type)
//! 8..15   button bitfields
//! 16..24  trackpad axes, i16 LE (left x/y, right x/y)
//! 48..56  thumbstick axes, i16 LE (left x/y, right x/y)
//! ```
//!
//! Everything else in the buffer is ignored. Changing any offset below is a protocol
//! version bump.

use super::error::ReportError;
use super::field::{Field, FieldValue};
use super::state::ControllerState;

pub const REPORT_LEN: usize = 64;

const HEADER: [(usize, u8); 3] = [(0, 0x01), (1, 0x00), (2, 0x09)];

/// Where a field lives inside the report.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Bit { byte: usize, bit: u8 },
    I16Le { offset: usize },
}

const LAYOUT: &[(Field, Slot)] = &[
    (Field::R2, Slot::Bit { byte: 8, bit: 0 }),
    (Field::L2, Slot::Bit { byte: 8, bit: 1 }),
    (Field::R1, Slot::Bit { byte: 8, bit: 2 }),
    (Field::L1, Slot::Bit { byte: 8, bit: 3 }),
    (Field::Y, Slot::Bit { byte: 8, bit: 4 }),
    (Field::B, Slot::Bit { byte: 8, bit: 5 }),
    (Field::X, Slot::Bit { byte: 8, bit: 6 }),
    (Field::A, Slot::Bit { byte: 8, bit: 7 }),
    (Field::Up, Slot::Bit { byte: 9, bit: 0 }),
    (Field::Right, Slot::Bit { byte: 9, bit: 1 }),
    (Field::Left, Slot::Bit { byte: 9, bit: 2 }),
    (Field::Down, Slot::Bit { byte: 9, bit: 3 }),
    (Field::Window, Slot::Bit { byte: 9, bit: 4 }),
    (Field::Steam, Slot::Bit { byte: 9, bit: 5 }),
    (Field::Menu, Slot::Bit { byte: 9, bit: 6 }),
    (Field::L5, Slot::Bit { byte: 9, bit: 7 }),
    (Field::R5, Slot::Bit { byte: 10, bit: 0 }),
    (Field::LeftPadPress, Slot::Bit { byte: 10, bit: 1 }),
    (Field::RightPadPress, Slot::Bit { byte: 10, bit: 2 }),
    (Field::LeftPadTouch, Slot::Bit { byte: 10, bit: 3 }),
    (Field::RightPadTouch, Slot::Bit { byte: 10, bit: 4 }),
    (Field::LeftStickPress, Slot::Bit { byte: 10, bit: 6 }),
    (Field::RightStickPress, Slot::Bit { byte: 11, bit: 2 }),
    (Field::L4, Slot::Bit { byte: 13, bit: 1 }),
    (Field::R4, Slot::Bit { byte: 13, bit: 2 }),
    (Field::LeftStickTouch, Slot::Bit { byte: 13, bit: 6 }),
    (Field::RightStickTouch, Slot::Bit { byte: 13, bit: 7 }),
    (Field::More, Slot::Bit { byte: 14, bit: 2 }),
    (Field::LeftStickX, Slot::I16Le { offset: 48 }),
    (Field::LeftStickY, Slot::I16Le { offset: 50 }),
    (Field::RightStickX, Slot::I16Le { offset: 52 }),
    (Field::RightStickY, Slot::I16Le { offset: 54 }),
    (Field::LeftPadX, Slot::I16Le { offset: 16 }),
    (Field::LeftPadY, Slot::I16Le { offset: 18 }),
    (Field::RightPadX, Slot::I16Le { offset: 20 }),
    (Field::RightPadY, Slot::I16Le { offset: 22 }),
];

impl Slot {
    fn extract(self, report: &[u8]) -> FieldValue {
        match self {
            Slot::Bit { byte, bit } => FieldValue::Button(report[byte] & (1 << bit) != 0),
            Slot::I16Le { offset } => {
                let raw = i16::from_le_bytes([report[offset], report[offset + 1]]);
                FieldValue::Axis(i32::from(raw))
            }
        }
    }
}

/// Check length and header without touching any state.
pub fn validate(report: &[u8]) -> Result<(), ReportError> {
    if report.len() < REPORT_LEN {
        return Err(ReportError::TooShort {
            len: report.len(),
            expected: REPORT_LEN,
        });
    }
    for (offset, expected) in HEADER {
        let found = report[offset];
        if found != expected {
            return Err(ReportError::BadHeader {
                offset,
                expected,
                found,
            });
        }
    }
    Ok(())
}

/// Decode one report into `state`.
///
/// Returns the fields whose stored value changed, in layout order. A malformed report
/// leaves `state` untouched.
pub fn decode(report: &[u8], state: &mut ControllerState) -> Result<Vec<Field>, ReportError> {
    validate(report)?;

    let mut changed = Vec::new();
    for (field, slot) in LAYOUT {
        if state.update(*field, slot.extract(report)) {
            changed.push(*field);
        }
    }
    Ok(changed)
}

/// Fields this decoder can produce.
pub fn decoded_fields() -> impl Iterator<Item = Field> {
    LAYOUT.iter().map(|(field, _)| *field)
}
