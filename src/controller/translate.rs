//! Event-device translation.
//!
//! Event devices already deliver discrete changes, so translation is a 1:1 lookup from
//! `(type, code)` to a field. Only the power/volume keys are translated; the kernel does
//! not expose the remaining controls through the event API in a usable form.

use super::field::{Field, FieldValue};
use crate::platform::RawInputEvent;

pub const EV_KEY: u16 = 0x01;

pub const KEY_VOLUMEDOWN: u16 = 114;
pub const KEY_VOLUMEUP: u16 = 115;
pub const KEY_POWER: u16 = 116;

fn key_field(code: u16) -> Option<Field> {
    match code {
        KEY_VOLUMEDOWN => Some(Field::VolumeDown),
        KEY_VOLUMEUP => Some(Field::VolumeUp),
        KEY_POWER => Some(Field::Power),
        _ => None,
    }
}

/// Map one raw event to a field update. Value 0 is release; press and autorepeat are
/// both "pressed".
pub fn translate(event: &RawInputEvent) -> Option<(Field, FieldValue)> {
    if event.event_type != EV_KEY {
        return None;
    }
    key_field(event.code).map(|field| (field, FieldValue::Button(event.value != 0)))
}
