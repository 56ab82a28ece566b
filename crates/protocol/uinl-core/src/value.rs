//! Property values, messages and type families.
//!
//! Every property value is a `serde_json::Value`. Cloning one is a deep copy,
//! so composite values handed to a node are never shared with the sender or
//! with siblings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::keys;

/// One protocol message: an ordered key/value map.
pub type Message = Map<String, JsonValue>;

/// Type family of a node's value slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Ordered children (containers).
    Sequence,
    Text,
    Number,
    Bool,
}

impl Family {
    /// Family a value belongs to. Lists, objects and null count as sequences.
    pub fn of(value: &JsonValue) -> Family {
        match value {
            JsonValue::String(_) => Family::Text,
            JsonValue::Number(_) => Family::Number,
            JsonValue::Bool(_) => Family::Bool,
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => Family::Sequence,
        }
    }

    /// Value a fresh node of this family holds before its first `v`.
    pub fn zero(self) -> JsonValue {
        match self {
            Family::Sequence => JsonValue::Null,
            Family::Text => JsonValue::String(String::new()),
            Family::Number => JsonValue::from(0),
            Family::Bool => JsonValue::Bool(false),
        }
    }

    pub fn is_sequence(self) -> bool {
        matches!(self, Family::Sequence)
    }
}

/// Normalize an inbound value into a message: non-objects become `{v: x}`.
pub fn into_message(value: JsonValue) -> Message {
    match value {
        JsonValue::Object(map) => map,
        other => {
            let mut msg = Message::new();
            msg.insert(keys::VALUE.to_string(), other);
            msg
        }
    }
}

/// Numeric view of a value; non-numbers yield `None`.
pub fn as_number(value: &JsonValue) -> Option<f64> {
    value.as_f64()
}

/// JSON number for `x`, written as an integer when it is one exactly.
/// Non-finite input becomes `null`.
pub fn number(x: f64) -> JsonValue {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if x.fract() == 0.0 && x.abs() < EXACT {
        JsonValue::from(x as i64)
    } else {
        Number::from_f64(x).map_or(JsonValue::Null, JsonValue::Number)
    }
}

/// Text used when echoing a value inside an error message.
pub fn describe(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
