//! Node addresses: derivation from tree shape and resolution back to nodes.
//!
//! An address is either a single step (an id or an index) or a root-to-leaf
//! path of steps. Resolution at a container first looks at its own children,
//! then searches container children depth-first with the same address, which
//! lets short addresses skip anonymous intermediate containers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::keys;
use crate::tree::{Node, NodeId, Tree};
use crate::value::Message;

/// One address component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// Position among the container's children; negative counts from the end.
    Index(i64),
    /// Id looked up in the container's child index.
    Name(String),
}

impl Step {
    pub fn from_json(value: &JsonValue) -> Option<Step> {
        match value {
            JsonValue::String(s) => Some(Step::Name(s.clone())),
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Step::Index),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Step::Index(i) => JsonValue::from(*i),
            Step::Name(s) => JsonValue::String(s.clone()),
        }
    }
}

/// A node address as carried by the `_` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Step(Step),
    Path(Vec<Step>),
}

impl Address {
    pub fn from_json(value: &JsonValue) -> Option<Address> {
        match value {
            JsonValue::Array(items) if !items.is_empty() => items
                .iter()
                .map(Step::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Address::Path),
            other => Step::from_json(other).map(Address::Step),
        }
    }

    pub fn steps(&self) -> &[Step] {
        match self {
            Address::Step(step) => std::slice::from_ref(step),
            Address::Path(path) => path,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Address::Step(step) => step.to_json(),
            Address::Path(path) => JsonValue::Array(path.iter().map(Step::to_json).collect()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn child_at(tree: &Tree, container: NodeId, step: &Step) -> Option<NodeId> {
    let node = tree.get(container)?;
    match step {
        Step::Index(i) => {
            let len = node.children.len() as i64;
            let at = if *i < 0 { len + i } else { *i };
            (0..len).contains(&at).then(|| node.children[at as usize])
        }
        Step::Name(name) => node.child_named(name),
    }
}

/// Resolve `steps` relative to `container`.
///
/// The first step is matched against the container's own children; on a hit
/// the remaining steps continue from that child. On a miss every container
/// child is searched depth-first with the full address and the first match
/// wins.
pub fn resolve(tree: &Tree, container: NodeId, steps: &[Step]) -> Option<NodeId> {
    let (first, rest) = steps.split_first()?;
    if !tree.is_container(container) {
        return None;
    }
    if let Some(child) = child_at(tree, container, first) {
        return if rest.is_empty() {
            Some(child)
        } else {
            resolve(tree, child, rest)
        };
    }
    tree.children(container)
        .iter()
        .filter(|c| tree.is_container(**c))
        .find_map(|c| resolve(tree, *c, steps))
}

/// Path element for `node`: its id when no sibling shares it, else its index.
fn step_for(tree: &Tree, node: NodeId) -> Step {
    let this = tree.get(node);
    if let (Some(id), Some(parent)) = (this.and_then(Node::id), this.and_then(Node::parent)) {
        let sharing = tree
            .children(parent)
            .iter()
            .filter(|c| tree.get(**c).and_then(Node::id) == Some(id))
            .count();
        if sharing == 1 {
            return Step::Name(id.to_string());
        }
    }
    Step::Index(tree.index_of(node).unwrap_or(0) as i64)
}

fn has_unique_id(tree: &mut Tree, node: NodeId) -> bool {
    match tree.get(node).and_then(|n| n.id.clone()) {
        Some(id) => tree.is_unique_id(&id),
        None => false,
    }
}

/// Address of `node` as currently placed in the tree. The root has none.
pub fn address_of(tree: &mut Tree, node: NodeId) -> Option<Address> {
    let parent = tree.get(node)?.parent?;
    let root = tree.root();
    if has_unique_id(tree, node) {
        let id = tree.get(node)?.id.clone()?;
        return Some(Address::Step(Step::Name(id)));
    }
    if parent == root {
        return Some(Address::Step(step_for(tree, node)));
    }
    let mut path = vec![step_for(tree, node), step_for(tree, parent)];
    let mut cursor = parent;
    loop {
        let up = tree.get(cursor)?.parent?;
        if up == root || has_unique_id(tree, cursor) {
            break;
        }
        cursor = up;
        path.push(step_for(tree, cursor));
    }
    path.reverse();
    Some(Address::Path(path))
}

/// Whether `node` satisfies a `*`/`**` query object.
pub fn matches(node: &Node, query: &Message) -> bool {
    query.iter().all(|(field, wanted)| match field.as_str() {
        keys::CLASS => wanted.as_str() == Some(node.class()),
        keys::ID => match wanted {
            JsonValue::String(s) => node.id() == Some(s.as_str()),
            JsonValue::Null => node.id().is_none(),
            _ => false,
        },
        keys::VALUE if !node.is_container() => node.value() == wanted,
        _ => {
            let held = node.property(field);
            match (held, wanted) {
                (Some(JsonValue::Array(items)), JsonValue::Array(required)) => {
                    required.iter().all(|r| items.contains(r))
                }
                (Some(JsonValue::Object(map)), JsonValue::Array(required)) => required
                    .iter()
                    .all(|r| r.as_str().is_some_and(|k| map.contains_key(k))),
                (Some(_), JsonValue::Array(_)) => false,
                (held, wanted) => held.unwrap_or(&JsonValue::Null) == wanted,
            }
        }
    })
}
