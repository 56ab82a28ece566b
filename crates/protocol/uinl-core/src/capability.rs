//! Capability table and `require` checking.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::class::ClassTable;
use crate::error::RequireError;
use crate::keys;

/// Entry covering every velocity and animation-options property.
pub const ANY_VELOCITY: &str = "+";

/// Supported values for one name.
#[derive(Clone, Debug, PartialEq)]
pub enum Capability {
    /// Every value is accepted.
    Any,
    /// Only the listed values are accepted.
    Values(Vec<JsonValue>),
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Capability::Any => serializer.serialize_bool(true),
            Capability::Values(values) => values.serialize(serializer),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CapabilityTable {
    entries: IndexMap<String, Capability>,
}

const CORE_NAMES: &[&str] = &[
    keys::VALUE,
    keys::ID,
    keys::ADDRESS,
    keys::MATCH_CHILDREN,
    keys::MATCH_DESCENDANTS,
    keys::DEFAULTS,
    keys::REQUEST,
    keys::QUEUE,
    keys::INDEX,
    keys::CAPTURE,
    keys::REQUIRE,
    keys::NAME,
    keys::DELAY,
    keys::DELAY_UNTIL,
    keys::INTERVAL,
    keys::TRIGGER,
    keys::CANCEL,
    ANY_VELOCITY,
];

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core commands plus the class names known to `classes`.
    pub fn standard(classes: &ClassTable) -> Self {
        let mut table = Self::new();
        table.insert(
            keys::CLASS,
            Capability::Values(classes.names().map(JsonValue::from).collect()),
        );
        for name in CORE_NAMES {
            table.insert(name, Capability::Any);
        }
        table
    }

    pub fn insert(&mut self, name: &str, capability: Capability) {
        self.entries.insert(name.to_string(), capability);
    }

    /// Add a wildcard entry unless the name is already listed.
    pub fn allow(&mut self, name: &str) {
        self.entries
            .entry(name.to_string())
            .or_insert(Capability::Any);
    }

    /// Append `value` to a restricted entry, creating it if needed.
    pub fn allow_value(&mut self, name: &str, value: JsonValue) {
        match self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Capability::Values(Vec::new()))
        {
            Capability::Values(values) if !values.contains(&value) => values.push(value),
            _ => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name).or_else(|| {
            (keys::velocity_target(name).is_some() || keys::options_target(name).is_some())
                .then(|| self.entries.get(ANY_VELOCITY))
                .flatten()
        })
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Check a `require` request: an object of `name → value(s)` or a list of
    /// names. Returns every problem found.
    pub fn check(&self, require: &JsonValue) -> Vec<RequireError> {
        let requested: Vec<(&str, Option<&JsonValue>)> = match require {
            JsonValue::Object(map) => map.iter().map(|(k, v)| (k.as_str(), Some(v))).collect(),
            JsonValue::Array(names) => names.iter().filter_map(|n| n.as_str()).map(|n| (n, None)).collect(),
            JsonValue::String(name) => vec![(name.as_str(), None)],
            _ => Vec::new(),
        };
        let mut errors = Vec::new();
        for (name, wanted) in requested {
            let Some(capability) = self.get(name) else {
                errors.push(RequireError::Unsupported {
                    name: name.to_string(),
                });
                continue;
            };
            let (Capability::Values(supported), Some(wanted)) = (capability, wanted) else {
                continue;
            };
            let wanted: Vec<&JsonValue> = match wanted {
                JsonValue::Array(values) => values.iter().collect(),
                single => vec![single],
            };
            if wanted.is_empty() {
                errors.push(RequireError::AllValues {
                    name: name.to_string(),
                });
            }
            for value in wanted {
                if !supported.contains(value) {
                    errors.push(RequireError::UnsupportedValue {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }
        errors
    }
}

/// `{}`, `[]` and `null` ask for the table instead of checking it.
pub fn is_table_request(require: &JsonValue) -> bool {
    match require {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}
