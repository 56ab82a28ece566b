//! Component classes and per-property reaction hooks.
//!
//! A class fixes the family of a node's value slot and may carry type
//! defaults. Renderers attach behaviour by registering reactions keyed by
//! class and property name; the wildcard class `*` covers every class.

use std::fmt;

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};

use crate::tree::Node;
use crate::value::{Family, Message};

pub const BIN: &str = "bin";
pub const TXT: &str = "txt";
pub const NUM: &str = "num";
pub const BTN: &str = "btn";
/// Reaction key matching every class.
pub const ANY_CLASS: &str = "*";

/// Hook invoked after a property is stored. An `Err` becomes a `!` event.
pub type Reaction = Box<dyn FnMut(&Node, &JsonValue) -> Result<(), String>>;

#[derive(Clone, Debug, PartialEq)]
pub struct ClassSpec {
    pub name: String,
    pub family: Family,
    /// Lowest-priority fill applied at construction.
    pub type_defaults: Message,
}

impl ClassSpec {
    pub fn new(name: &str, family: Family) -> Self {
        Self {
            name: name.to_string(),
            family,
            type_defaults: Message::new(),
        }
    }

    pub fn with_default(mut self, name: &str, value: JsonValue) -> Self {
        self.type_defaults.insert(name.to_string(), value);
        self
    }
}

pub struct ClassTable {
    classes: IndexMap<String, ClassSpec>,
    reactions: HashMap<String, HashMap<String, Reaction>>,
}

impl fmt::Debug for ClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reactions: Vec<(&String, Vec<&String>)> = self
            .reactions
            .iter()
            .map(|(class, props)| (class, props.keys().collect()))
            .collect();
        f.debug_struct("ClassTable")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("reactions", &reactions)
            .finish()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl ClassTable {
    /// An empty table with only the container class `bin`.
    pub fn empty() -> Self {
        let mut table = Self {
            classes: IndexMap::new(),
            reactions: HashMap::new(),
        };
        table.register(ClassSpec::new(BIN, Family::Sequence));
        table
    }

    /// The four core classes, one per family.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(ClassSpec::new(TXT, Family::Text));
        table.register(ClassSpec::new(NUM, Family::Number));
        table.register(ClassSpec::new(BTN, Family::Bool).with_default("in", json!(1)));
        table
    }

    /// Add or replace a class.
    pub fn register(&mut self, spec: ClassSpec) {
        self.classes.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ClassSpec> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn family(&self, name: &str) -> Option<Family> {
        self.classes.get(name).map(|c| c.family)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Class chosen when only a value family is known: the first registered
    /// class of that family.
    pub fn for_family(&self, family: Family) -> &str {
        self.classes
            .values()
            .find(|c| c.family == family)
            .map_or(BIN, |c| c.name.as_str())
    }

    pub fn register_reaction(&mut self, class: &str, property: &str, reaction: Reaction) {
        self.reactions
            .entry(class.to_string())
            .or_default()
            .insert(property.to_string(), reaction);
    }

    /// Run the reaction for `property` on `node`, class-specific first, else
    /// the wildcard one. Properties without a reaction are inert.
    pub fn react(&mut self, node: &Node, property: &str, value: &JsonValue) -> Result<(), String> {
        let class = if self
            .reactions
            .get(node.class())
            .is_some_and(|r| r.contains_key(property))
        {
            node.class()
        } else {
            ANY_CLASS
        };
        match self
            .reactions
            .get_mut(class)
            .and_then(|r| r.get_mut(property))
        {
            Some(reaction) => reaction(node, value),
            None => Ok(()),
        }
    }
}
