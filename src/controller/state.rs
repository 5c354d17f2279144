//! Canonical controller state.
//!
//! [`ControllerState`] is the single source of truth both input paths write into. It is
//! owned by the ingestion loop; everyone else reads immutable [`StateSnapshot`]s.
//!
//! A field that was never written reads as its resting value (`false` / `0`), but the
//! store still remembers that it has not been observed, so the first real value can be
//! told apart from a change.

use super::field::{Field, FieldValue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    values: HashMap<Field, FieldValue>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, or the field's resting value if it has never been written.
    pub fn get(&self, field: Field) -> FieldValue {
        self.observed(field)
            .unwrap_or_else(|| FieldValue::zero(field.kind()))
    }

    /// Current value, `None` if the field has never been written.
    pub fn observed(&self, field: Field) -> Option<FieldValue> {
        self.values.get(&field).copied()
    }

    /// Store `value` and return what was there before.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(field, value)
    }

    /// Store `value` only if it differs from the stored one (or nothing is stored yet).
    ///
    /// Returns `true` when the store changed.
    pub fn update(&mut self, field: Field, value: FieldValue) -> bool {
        if self.observed(field) == Some(value) {
            return false;
        }
        self.set(field, value);
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: self.values.iter().map(|(f, v)| (*f, *v)).collect(),
        }
    }
}

/// Immutable copy of the canonical state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    values: BTreeMap<Field, FieldValue>,
}

impl StateSnapshot {
    #[inline]
    pub fn get(&self, field: Field) -> FieldValue {
        self.values
            .get(&field)
            .copied()
            .unwrap_or_else(|| FieldValue::zero(field.kind()))
    }

    #[inline]
    pub fn observed(&self, field: Field) -> Option<FieldValue> {
        self.values.get(&field).copied()
    }

    /// Observed fields in vocabulary order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, FieldValue)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    /// Names of the buttons currently held.
    pub fn pressed(&self) -> Vec<&'static str> {
        self.iter()
            .filter(|(_, value)| value.as_bool() == Some(true))
            .map(|(field, _)| field.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
