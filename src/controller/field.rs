//! Logical field vocabulary.
//!
//! Every value the pipeline reports is keyed by a [`Field`]. The set is closed: decoders
//! and translators only ever produce fields from this list, and the names returned by
//! [`Field::name`] are the ones handed to listeners.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a field's value is interpreted and filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Pressed / released.
    Button,
    /// Thumbstick axis, native 16-bit signed range.
    StickAxis,
    /// Trackpad axis, native 16-bit signed range with a lower noise floor.
    PadAxis,
}

impl FieldKind {
    pub fn is_axis(self) -> bool {
        !matches!(self, FieldKind::Button)
    }
}

macro_rules! fields {
    ($( $variant:ident => ($name:literal, $kind:ident) ),+ $(,)?) => {
        /// A named logical input signal.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Field {
            $( $variant, )+
        }

        impl Field {
            /// Every field, in vocabulary order.
            pub const ALL: &'static [Field] = &[ $( Field::$variant, )+ ];

            /// Name exposed to consumers.
            pub fn name(self) -> &'static str {
                match self {
                    $( Field::$variant => $name, )+
                }
            }

            pub fn kind(self) -> FieldKind {
                match self {
                    $( Field::$variant => FieldKind::$kind, )+
                }
            }
        }

        impl FromStr for Field {
            type Err = UnknownField;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(Field::$variant), )+
                    other => Err(UnknownField(other.to_string())),
                }
            }
        }
    };
}

fields! {
    A => ("A", Button),
    B => ("B", Button),
    X => ("X", Button),
    Y => ("Y", Button),
    Up => ("UP", Button),
    Down => ("DOWN", Button),
    Left => ("LEFT", Button),
    Right => ("RIGHT", Button),
    L1 => ("L1", Button),
    R1 => ("R1", Button),
    L2 => ("L2", Button),
    R2 => ("R2", Button),
    L4 => ("L4", Button),
    L5 => ("L5", Button),
    R4 => ("R4", Button),
    R5 => ("R5", Button),
    Steam => ("STEAM", Button),
    Menu => ("MENU", Button),
    Window => ("WINDOW", Button),
    More => ("MORE", Button),
    Power => ("POWER", Button),
    VolumeUp => ("VOLUME_UP", Button),
    VolumeDown => ("VOLUME_DOWN", Button),
    LeftPadPress => ("LEFT_PAD_PRESS", Button),
    RightPadPress => ("RIGHT_PAD_PRESS", Button),
    LeftPadTouch => ("LEFT_PAD_TOUCH", Button),
    RightPadTouch => ("RIGHT_PAD_TOUCH", Button),
    LeftStickPress => ("LEFT_STICK_PRESS", Button),
    RightStickPress => ("RIGHT_STICK_PRESS", Button),
    LeftStickTouch => ("LEFT_STICK_TOUCH", Button),
    RightStickTouch => ("RIGHT_STICK_TOUCH", Button),
    LeftStickX => ("LEFT_STICK_X", StickAxis),
    LeftStickY => ("LEFT_STICK_Y", StickAxis),
    RightStickX => ("RIGHT_STICK_X", StickAxis),
    RightStickY => ("RIGHT_STICK_Y", StickAxis),
    LeftPadX => ("LEFT_PAD_X", PadAxis),
    LeftPadY => ("LEFT_PAD_Y", PadAxis),
    RightPadX => ("RIGHT_PAD_X", PadAxis),
    RightPadY => ("RIGHT_PAD_Y", PadAxis),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Field {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Returned when parsing a name outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown field name: {0}")]
pub struct UnknownField(pub String);

/// Value carried by a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Button(bool),
    Axis(i32),
}

impl FieldValue {
    /// Resting value for a field of the given kind.
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Button => FieldValue::Button(false),
            FieldKind::StickAxis | FieldKind::PadAxis => FieldValue::Axis(0),
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            FieldValue::Button(pressed) => Some(pressed),
            FieldValue::Axis(_) => None,
        }
    }

    pub fn as_axis(self) -> Option<i32> {
        match self {
            FieldValue::Axis(value) => Some(value),
            FieldValue::Button(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Button(pressed) => write!(f, "{}", pressed),
            FieldValue::Axis(value) => write!(f, "{}", value),
        }
    }
}
