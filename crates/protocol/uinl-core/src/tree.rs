//! Component tree: a generational arena of nodes.
//!
//! Nodes refer to each other by [`NodeId`]. Removing a node frees its slot and
//! bumps the slot generation, so any id still held by a timer, an animation or
//! a caller is detectably dead rather than silently pointing at a newcomer.

use hashbrown::HashMap;
use serde_json::Value as JsonValue;

use crate::defaults::DefaultsScope;
use crate::value::{Family, Message};

/// Handle to a node slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// One element of the component tree.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) class: String,
    pub(crate) family: Family,
    pub(crate) id: Option<String>,
    /// Scalar value; always `Null` for containers.
    pub(crate) value: JsonValue,
    pub(crate) props: Message,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Id → child, last occurrence wins.
    pub(crate) child_index: HashMap<String, NodeId>,
    pub(crate) scope: Option<DefaultsScope>,
}

impl Node {
    pub(crate) fn new(class: &str, family: Family, parent: Option<NodeId>) -> Self {
        let scope = family
            .is_sequence()
            .then(|| DefaultsScope::chained(parent));
        Self {
            class: class.to_string(),
            family,
            id: None,
            value: family.zero(),
            props: Message::new(),
            parent,
            children: Vec::new(),
            child_index: HashMap::new(),
            scope,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Scalar value (`Null` for containers).
    pub fn value(&self) -> &JsonValue {
        &self.value
    }

    pub fn property(&self, name: &str) -> Option<&JsonValue> {
        self.props.get(name)
    }

    pub fn properties(&self) -> &Message {
        &self.props
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_container(&self) -> bool {
        self.family.is_sequence()
    }

    pub fn scope(&self) -> Option<&DefaultsScope> {
        self.scope.as_ref()
    }

    /// Child registered under `name` in this container's index.
    pub fn child_named(&self, name: &str) -> Option<NodeId> {
        self.child_index.get(name).copied()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena owning every live node plus the document-wide id registry.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    /// Id → nodes that carried it at some point. Pruned lazily.
    ids: HashMap<String, Vec<NodeId>>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new(crate::class::BIN)
    }
}

impl Tree {
    /// Create a tree holding only a root container of class `root_class`.
    pub fn new(root_class: &str) -> Self {
        let root = NodeId {
            index: 0,
            generation: 0,
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::new(root_class, Family::Sequence, None)),
            }],
            free: Vec::new(),
            root,
            ids: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_container(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_container)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Position of `id` among its parent's children.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.get(id)?.parent?;
        self.get(parent)?.children.iter().position(|c| *c == id)
    }

    /// Children of `id`, empty for scalars and dead ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Depth-first pre-order walk below `id` (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    /// Attach `node` under `parent` at `index` (appended when `None` or past the end).
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        mut node: Node,
    ) -> Option<NodeId> {
        if !self.is_container(parent) {
            return None;
        }
        node.parent = Some(parent);
        if let Some(scope) = node.scope.as_mut() {
            scope.parent = Some(parent);
        }
        let name = node.id.clone();
        let id = self.alloc(node);
        let container = self.get_mut(parent)?;
        let at = index.unwrap_or(container.children.len()).min(container.children.len());
        container.children.insert(at, id);
        if let Some(name) = name {
            self.register_id(&name, id);
            self.reindex_child(parent, &name);
        }
        Some(id)
    }

    /// Detach `id` from its parent and free its whole subtree. The root cannot
    /// be removed this way.
    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };
        let Some(parent) = node.parent else {
            return false;
        };
        let name = node.id.clone();
        if let Some(container) = self.get_mut(parent) {
            container.children.retain(|c| *c != id);
        }
        if let Some(name) = name {
            self.reindex_child(parent, &name);
        }
        self.free_subtree(id);
        true
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let slot = &mut self.slots[next.index as usize];
            if slot.generation != next.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.index);
            }
        }
    }

    /// Remove every child of `container`.
    pub(crate) fn clear_children(&mut self, container: NodeId) {
        let children = self.children(container).to_vec();
        for child in children {
            self.remove(child);
        }
    }

    /// Drop every node but the root and reinitialize the root in place.
    pub(crate) fn clear(&mut self) {
        let root = self.root;
        self.clear_children(root);
        if let Some(node) = self.get_mut(root) {
            let class = node.class.clone();
            *node = Node::new(&class, Family::Sequence, None);
        }
        self.ids.clear();
    }

    /// Move `id` to position `index` within its parent (clamped to the end).
    pub(crate) fn move_to(&mut self, id: NodeId, index: usize) {
        let Some(parent) = self.get(id).and_then(|n| n.parent) else {
            return;
        };
        let name = self.get(id).and_then(|n| n.id.clone());
        if let Some(container) = self.get_mut(parent) {
            container.children.retain(|c| *c != id);
            let at = index.min(container.children.len());
            container.children.insert(at, id);
        }
        if let Some(name) = name {
            self.reindex_child(parent, &name);
        }
    }

    /// Assign or clear a node's id, keeping both indexes consistent.
    pub(crate) fn set_id(&mut self, id: NodeId, name: Option<String>) {
        let Some(node) = self.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut node.id, name.clone());
        let parent = node.parent;
        if let Some(name) = &name {
            self.register_id(name, id);
        }
        if let Some(parent) = parent {
            if let Some(old) = old {
                self.reindex_child(parent, &old);
            }
            if let Some(name) = name {
                self.reindex_child(parent, &name);
            }
        }
    }

    fn register_id(&mut self, name: &str, id: NodeId) {
        let entry = self.ids.entry(name.to_string()).or_default();
        if !entry.contains(&id) {
            entry.push(id);
        }
    }

    /// Recompute which child of `parent` answers to `name`.
    fn reindex_child(&mut self, parent: NodeId, name: &str) {
        let Some(container) = self.get(parent) else {
            return;
        };
        let winner = container
            .children
            .iter()
            .rev()
            .copied()
            .find(|c| self.get(*c).and_then(|n| n.id.as_deref()) == Some(name));
        if let Some(container) = self.get_mut(parent) {
            match winner {
                Some(child) => {
                    container.child_index.insert(name.to_string(), child);
                }
                None => {
                    container.child_index.remove(name);
                }
            }
        }
    }

    /// Prune the registry entry for `name` and return the nodes that still
    /// carry it.
    pub fn nodes_with_id(&mut self, name: &str) -> Vec<NodeId> {
        let Some(candidates) = self.ids.remove(name) else {
            return Vec::new();
        };
        let live: Vec<NodeId> = candidates
            .into_iter()
            .filter(|c| self.get(*c).and_then(|n| n.id.as_deref()) == Some(name))
            .collect();
        if !live.is_empty() {
            self.ids.insert(name.to_string(), live.clone());
        }
        live
    }

    /// True when exactly one live node carries `name`.
    pub fn is_unique_id(&mut self, name: &str) -> bool {
        self.nodes_with_id(name).len() == 1
    }
}
