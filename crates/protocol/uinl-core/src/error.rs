//! Error types surfaced as `!` events.

use thiserror::Error;

/// Failures while applying an inbound update. None of these abort the
/// message; the dispatcher reports them and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UpdateError {
    #[error("Problem setting {property} to {value} :: {reason}")]
    Reaction {
        property: String,
        value: String,
        reason: String,
    },
    #[error("array-valued default for '{property}' is not allowed")]
    ArrayDefault { property: String },
    #[error("defaults can only be set on a container, not on '{class}'")]
    DefaultsOnScalar { class: String },
    #[error("the root's '{key}' cannot be changed")]
    RootImmutable { key: String },
    #[error("no node at address {address}")]
    Unresolved { address: String },
}

impl UpdateError {
    /// Stable category label used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            UpdateError::Reaction { .. } => "reaction",
            UpdateError::ArrayDefault { .. }
            | UpdateError::DefaultsOnScalar { .. }
            | UpdateError::RootImmutable { .. } => "structure",
            UpdateError::Unresolved { .. } => "address",
        }
    }
}

/// A `require` entry the engine cannot honour.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequireError {
    #[error("Sorry, I cannot handle required option: {name}")]
    Unsupported { name: String },
    #[error("Sorry, I cannot handle required all possible values for {{{name}}}")]
    AllValues { name: String },
    #[error("Sorry, I cannot handle required option-value: {{{name}:{value}}}")]
    UnsupportedValue { name: String, value: String },
}

impl RequireError {
    /// Heading of the diagnostic group this error is listed under.
    pub fn heading(&self) -> &'static str {
        match self {
            RequireError::Unsupported { .. } | RequireError::UnsupportedValue { .. } => {
                "Cannot handle required property option(s)"
            }
            RequireError::AllValues { .. } => "Cannot handle all values for required property",
        }
    }

    /// Short text shown in the diagnostic screen.
    pub fn subject(&self) -> String {
        match self {
            RequireError::Unsupported { name } | RequireError::AllValues { name } => name.clone(),
            RequireError::UnsupportedValue { name, value } => format!("{{{name}:{value}}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_message_format() {
        let err = UpdateError::Reaction {
            property: "x".into(),
            value: "3".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "Problem setting x to 3 :: boom");
        assert_eq!(err.category(), "reaction");
    }

    #[test]
    fn require_messages() {
        let e = RequireError::UnsupportedValue {
            name: "C".into(),
            value: "\"grid\"".into(),
        };
        assert_eq!(
            e.to_string(),
            "Sorry, I cannot handle required option-value: {C:\"grid\"}"
        );
        let e = RequireError::AllValues { name: "C".into() };
        assert_eq!(
            e.to_string(),
            "Sorry, I cannot handle required all possible values for {C}"
        );
    }
}
