//! Chained property defaults.
//!
//! Every container owns a [`DefaultsScope`] linked to its parent container's
//! scope. Lookups walk the chain live, so an ancestor change made before a
//! child is built is visible to it. Values are copied into the child's message
//! at construction; later changes never reach existing nodes.

use serde_json::Value as JsonValue;

use crate::error::UpdateError;
use crate::keys;
use crate::tree::{NodeId, Tree};
use crate::value::{Family, Message};

/// Per-container default overrides.
#[derive(Clone, Debug, Default)]
pub struct DefaultsScope {
    overrides: Message,
    /// Container whose scope this one falls back to.
    pub(crate) parent: Option<NodeId>,
}

impl DefaultsScope {
    pub fn chained(parent: Option<NodeId>) -> Self {
        Self {
            overrides: Message::new(),
            parent,
        }
    }

    /// Overrides held by this scope alone.
    pub fn overrides(&self) -> &Message {
        &self.overrides
    }

    /// Set one default. `null` clears the override; an object merges one level
    /// onto an existing object override; arrays are refused.
    pub(crate) fn set(&mut self, name: &str, value: JsonValue) -> Result<(), UpdateError> {
        match value {
            JsonValue::Null => {
                self.overrides.shift_remove(name);
            }
            JsonValue::Array(_) => {
                return Err(UpdateError::ArrayDefault {
                    property: name.to_string(),
                });
            }
            JsonValue::Object(update) => match self.overrides.get_mut(name) {
                Some(JsonValue::Object(existing)) => {
                    for (key, sub) in update {
                        if sub.is_null() {
                            existing.shift_remove(&key);
                        } else {
                            existing.insert(key, sub);
                        }
                    }
                }
                _ => {
                    self.overrides.insert(name.to_string(), JsonValue::Object(update));
                }
            },
            scalar => {
                self.overrides.insert(name.to_string(), scalar);
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.overrides.clear();
    }
}

/// Effective defaults visible from `container`, nearest scope winning per key.
pub fn resolve_chain(tree: &Tree, container: NodeId) -> Message {
    let mut scopes = Vec::new();
    let mut cursor = Some(container);
    while let Some(id) = cursor {
        let Some(scope) = tree.get(id).and_then(|n| n.scope()) else {
            break;
        };
        scopes.push(scope);
        cursor = scope.parent;
    }
    let mut effective = Message::new();
    for scope in scopes.into_iter().rev() {
        for (name, value) in scope.overrides() {
            effective.insert(name.clone(), value.clone());
        }
    }
    effective
}

/// Fill a construction message from resolved defaults.
///
/// `C` and dispatcher directives are never filled. A `v` default is only used
/// when its family matches the class being built.
pub fn fill(message: &mut Message, defaults: &Message, family: Family) {
    for (name, default) in defaults {
        if keys::is_directive(name) {
            continue;
        }
        if name == keys::VALUE && (family.is_sequence() || Family::of(default) != family) {
            continue;
        }
        if !message.contains_key(name) {
            message.insert(name.clone(), default.clone());
            continue;
        }
        if let (Some(JsonValue::Object(given)), JsonValue::Object(fallback)) =
            (message.get_mut(name), default)
        {
            for (key, sub) in fallback {
                if !given.contains_key(key) {
                    given.insert(key.clone(), sub.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;
    use serde_json::json;

    fn obj(value: JsonValue) -> Message {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn nearest_scope_shadows_and_null_reverts() {
        let mut tree = Tree::default();
        let root = tree.root();
        let inner = tree
            .insert_child(root, None, Node::new("bin", Family::Sequence, None))
            .expect("insert");
        tree.get_mut(root)
            .and_then(|n| n.scope.as_mut())
            .expect("scope")
            .set("color", json!("red"))
            .expect("set");
        assert_eq!(resolve_chain(&tree, inner)["color"], json!("red"));

        let scope = tree.get_mut(inner).and_then(|n| n.scope.as_mut()).expect("scope");
        scope.set("color", json!("blue")).expect("set");
        assert_eq!(resolve_chain(&tree, inner)["color"], json!("blue"));

        let scope = tree.get_mut(inner).and_then(|n| n.scope.as_mut()).expect("scope");
        scope.set("color", JsonValue::Null).expect("set");
        assert_eq!(resolve_chain(&tree, inner)["color"], json!("red"));
    }

    #[test]
    fn array_defaults_are_refused() {
        let mut scope = DefaultsScope::default();
        let err = scope.set("items", json!([1, 2])).expect_err("array");
        assert_eq!(err.category(), "structure");
        assert!(scope.overrides().is_empty());
    }

    #[test]
    fn object_defaults_merge_one_level() {
        let mut scope = DefaultsScope::default();
        scope.set("style", json!({"a": 1, "b": 2})).expect("set");
        scope.set("style", json!({"b": null, "c": 3})).expect("set");
        assert_eq!(scope.overrides()["style"], json!({"a": 1, "c": 3}));
    }

    #[test]
    fn fill_copies_missing_names_and_subkeys() {
        let defaults = obj(json!({
            "C": "num",
            "w": 5,
            "style": {"a": 1, "b": 2},
            "v": "text default",
            "Td": 3
        }));
        let mut msg = obj(json!({"w": 9, "style": {"a": 7}}));
        fill(&mut msg, &defaults, Family::Number);
        assert_eq!(msg["w"], json!(9));
        assert_eq!(msg["style"], json!({"a": 7, "b": 2}));
        assert!(!msg.contains_key("C"));
        assert!(!msg.contains_key("v"));
        assert!(!msg.contains_key("Td"));

        let mut msg = Message::new();
        fill(&mut msg, &defaults, Family::Text);
        assert_eq!(msg["v"], json!("text default"));
    }
}
