//! Engine: owns the document and drives every other component.
//!
//! Entry points:
//! - `receive` applies one inbound message,
//! - `tick` advances virtual time (animations first, then due timers),
//! - `user_event` reports a normalized input event from the renderer.
//!
//! Everything outbound goes through one path that stamps `u`, sends, and then
//! drains any triggers the message matched.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, warn};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::address::{self, Address};
use crate::animation::{Animator, StepOutcome};
use crate::capability::{self, CapabilityTable};
use crate::class::{ClassSpec, ClassTable};
use crate::config::Config;
use crate::keys;
use crate::scheduler::{Firing, Scheduler};
use crate::transport::Transport;
use crate::tree::{Node, NodeId, Tree};
use crate::value::{self, Family, Message};

pub struct Engine<T: Transport> {
    pub(crate) cfg: Config,
    pub(crate) tree: Tree,
    pub(crate) classes: ClassTable,
    pub(crate) capabilities: CapabilityTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) animator: Animator,
    pub(crate) transport: T,
    session: Uuid,
    pending_triggers: VecDeque<Firing>,
    draining_triggers: bool,
}

impl<T: Transport> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("session", &self.session)
            .field("clock_ms", &self.scheduler.now_ms())
            .field("nodes", &self.tree.node_count())
            .field("schedules", &self.scheduler.len())
            .field("animations", &self.animator.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Engine<T> {
    /// Engine with the standard classes.
    pub fn new(cfg: Config, transport: T) -> Self {
        Self::with_classes(cfg, ClassTable::standard(), transport)
    }

    pub fn with_classes(cfg: Config, classes: ClassTable, transport: T) -> Self {
        let capabilities = CapabilityTable::standard(&classes);
        Self {
            cfg,
            tree: Tree::default(),
            classes,
            capabilities,
            scheduler: Scheduler::new(),
            animator: Animator::new(),
            transport,
            session: Uuid::new_v4(),
            pending_triggers: VecDeque::new(),
            draining_triggers: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.tree.get(id)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn animator(&self) -> &Animator {
        &self.animator
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn capabilities_mut(&mut self) -> &mut CapabilityTable {
        &mut self.capabilities
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Virtual milliseconds since the session started.
    pub fn now_ms(&self) -> f64 {
        self.scheduler.now_ms()
    }

    /// Add a renderer-provided class and advertise it.
    pub fn register_class(&mut self, spec: ClassSpec) {
        self.capabilities
            .allow_value(keys::CLASS, JsonValue::from(spec.name.as_str()));
        self.classes.register(spec);
    }

    /// Attach a reaction to `property` on `class` (`*` for every class).
    pub fn register_reaction<F>(&mut self, class: &str, property: &str, reaction: F)
    where
        F: FnMut(&Node, &JsonValue) -> Result<(), String> + 'static,
    {
        self.classes
            .register_reaction(class, property, Box::new(reaction));
        self.capabilities.allow(property);
    }

    /// Find a node from a wire address, searching from the root.
    pub fn find(&self, address: &JsonValue) -> Option<NodeId> {
        let address = Address::from_json(address)?;
        address::resolve(&self.tree, self.tree.root(), address.steps())
    }

    pub fn address_of(&mut self, node: NodeId) -> Option<Address> {
        address::address_of(&mut self.tree, node)
    }

    /// Apply one inbound message. `null` resets the document; anything that
    /// is not an object is shorthand for `{v: x}` on the root.
    pub fn receive(&mut self, message: JsonValue) {
        debug!("receive {message}");
        match message {
            JsonValue::Null => self.reset_document(),
            other => {
                let root = self.tree.root();
                self.apply(root, value::into_message(other));
            }
        }
    }

    /// Advance virtual time by `dt_ms`: step animations, then fire due timers.
    pub fn tick(&mut self, dt_ms: f64) {
        self.scheduler.advance(dt_ms);
        self.step_animations(dt_ms);
        self.run_due_timers();
    }

    /// Drop every node, schedule and animation. The clock and session stay.
    pub fn reset_document(&mut self) {
        debug!("document reset");
        self.tree.clear();
        self.scheduler.reset();
        self.animator.clear();
        self.pending_triggers.clear();
    }

    /// Report an input event on `node`. `v` updates the scalar value without
    /// running reactions and is always sent; any other name is sent only
    /// when the node's `on` captures it.
    pub fn user_event(&mut self, node: NodeId, name: &str, value: JsonValue) {
        let Some(n) = self.tree.get_mut(node) else {
            warn!("user event '{name}' on a removed node dropped");
            return;
        };
        if name == keys::VALUE {
            if !n.is_container() {
                if Family::of(&value) != n.family {
                    warn!("user event value {value} does not fit class '{}'", n.class);
                    return;
                }
                n.value = value.clone();
            }
        } else if !self.captures(node, name, &value) {
            return;
        }
        let mut body = Message::new();
        body.insert(name.to_string(), value);
        self.emit(Some(node), body);
    }

    /// Whether `on` on `node` asks for `name` events carrying `value`.
    pub(crate) fn captures(&self, node: NodeId, name: &str, value: &JsonValue) -> bool {
        let Some(on) = self.tree.get(node).and_then(|n| n.property(keys::CAPTURE)) else {
            return false;
        };
        match on {
            JsonValue::Object(filters) => match filters.get(name) {
                None | Some(JsonValue::Null) | Some(JsonValue::Bool(false)) => false,
                Some(JsonValue::Array(allowed)) => allowed.is_empty() || allowed.contains(value),
                Some(JsonValue::Number(n)) => n.as_f64() != Some(0.0),
                Some(_) => true,
            },
            JsonValue::Array(names) => names.iter().any(|n| n.as_str() == Some(name)),
            JsonValue::String(single) => single == name,
            _ => false,
        }
    }

    /// Send `body` addressed at `node` (unaddressed when `None`).
    pub(crate) fn emit(&mut self, node: Option<NodeId>, body: Message) {
        let address = node.and_then(|n| address::address_of(&mut self.tree, n));
        self.emit_at(address, body);
    }

    pub(crate) fn emit_at(&mut self, address: Option<Address>, body: Message) {
        let mut msg = Message::new();
        if let Some(address) = address {
            msg.insert(keys::ADDRESS.to_string(), address.to_json());
        }
        for (name, value) in body {
            if name != keys::ADDRESS {
                msg.insert(name, value);
            }
        }
        msg.insert(
            keys::TIMESTAMP.to_string(),
            value::number(self.scheduler.now_ms()),
        );
        self.dispatch(msg);
    }

    fn dispatch(&mut self, msg: Message) {
        let fired = self
            .scheduler
            .matching_triggers(&msg, self.cfg.trigger_mode);
        self.transport.send(JsonValue::Object(msg));
        self.pending_triggers.extend(fired);
        if self.draining_triggers {
            return;
        }
        self.draining_triggers = true;
        let mut steps = 0;
        while let Some(firing) = self.pending_triggers.pop_front() {
            steps += 1;
            if steps > self.cfg.trigger_step_limit {
                warn!(
                    "trigger step limit ({}) reached; {} firings dropped",
                    self.cfg.trigger_step_limit,
                    self.pending_triggers.len() + 1
                );
                self.pending_triggers.clear();
                break;
            }
            if self.tree.contains(firing.target) {
                debug!("trigger '{}' fired", firing.name);
                self.apply(firing.target, firing.message);
            }
        }
        self.draining_triggers = false;
    }

    /// Values for the `R` names on `node`.
    pub(crate) fn gather(&self, node: NodeId, names: &[String], schedule: Option<&JsonValue>) -> Message {
        let mut out = Message::new();
        let Some(n) = self.tree.get(node) else {
            return out;
        };
        for name in names {
            let value = match name.as_str() {
                keys::TIMESTAMP => value::number(self.scheduler.now_ms()),
                keys::INDEX => self
                    .tree
                    .index_of(node)
                    .map_or(JsonValue::Null, JsonValue::from),
                keys::CLASS => JsonValue::from(n.class()),
                keys::ID => n.id().map_or(JsonValue::Null, JsonValue::from),
                keys::VALUE => self.snapshot_value(node),
                keys::DEFAULTS => n
                    .scope()
                    .map_or(JsonValue::Null, |s| JsonValue::Object(s.overrides().clone())),
                keys::NAME => schedule.cloned().unwrap_or(JsonValue::Null),
                keys::SESSION => JsonValue::from(self.session.to_string()),
                other => n.property(other).cloned().unwrap_or(JsonValue::Null),
            };
            out.insert(name.clone(), value);
        }
        out
    }

    /// Scalar value, or for containers a list of child property maps with
    /// nested `v`.
    pub fn snapshot_value(&self, node: NodeId) -> JsonValue {
        let Some(n) = self.tree.get(node) else {
            return JsonValue::Null;
        };
        if !n.is_container() {
            return n.value.clone();
        }
        let children = n
            .children
            .iter()
            .filter_map(|c| {
                let child = self.tree.get(*c)?;
                let mut entry = Message::new();
                entry.insert(keys::CLASS.to_string(), JsonValue::from(child.class()));
                if let Some(id) = child.id() {
                    entry.insert(keys::ID.to_string(), JsonValue::from(id));
                }
                for (name, value) in &child.props {
                    entry.insert(name.clone(), value.clone());
                }
                entry.insert(keys::VALUE.to_string(), self.snapshot_value(*c));
                Some(JsonValue::Object(entry))
            })
            .collect();
        JsonValue::Array(children)
    }

    /// Answer a `require` directive. Returns `false` when the session was
    /// torn down.
    pub(crate) fn require(&mut self, wanted: &JsonValue) -> bool {
        if capability::is_table_request(wanted) {
            let mut body = Message::new();
            body.insert(keys::REQUIRE.to_string(), self.capabilities.to_json());
            self.emit_at(None, body);
            return true;
        }
        let errors = self.capabilities.check(wanted);
        if errors.is_empty() {
            debug!("requirements satisfied: {wanted}");
            return true;
        }
        for err in &errors {
            warn!("{err}");
            let mut body = Message::new();
            body.insert(keys::ERROR.to_string(), JsonValue::from(err.to_string()));
            self.emit_at(None, body);
        }
        self.reset_document();
        let screen: Vec<JsonValue> = errors
            .iter()
            .map(|e| json!({"id": e.heading(), "v": [e.subject()]}))
            .collect();
        self.receive(json!([{"id": "Error", "v": screen}]));
        self.transport.close();
        false
    }

    /// Commit an animated number to `property` and run its reaction.
    pub(crate) fn commit_number(&mut self, node: NodeId, property: &str, x: f64) -> JsonValue {
        let committed = value::number(x);
        if let Some(n) = self.tree.get_mut(node) {
            if property == keys::VALUE {
                n.value = committed.clone();
            } else {
                n.props.insert(property.to_string(), committed.clone());
            }
        }
        self.react(node, property, &committed);
        committed
    }

    fn step_animations(&mut self, dt_ms: f64) {
        let tree = &self.tree;
        self.animator.retain_live(|node| tree.contains(node));
        let reports = self.animator.step_all(dt_ms, self.cfg.bound_epsilon);
        for report in reports {
            let node = report.node;
            if !self.tree.contains(node) {
                continue;
            }
            match report.outcome {
                StepOutcome::Idle => {}
                StepOutcome::Propagate { value } => {
                    let committed = self.commit_number(node, &report.property, value);
                    if self.captures(node, &report.property, &committed) {
                        let mut body = Message::new();
                        body.insert(report.property.clone(), committed);
                        self.emit(Some(node), body);
                    }
                }
                StepOutcome::Finished { value } => {
                    debug!("animation of '{}' reached {value}", report.property);
                    let committed = self.commit_number(node, &report.property, value);
                    let velocity = format!("{}{}", keys::VELOCITY_PREFIX, report.property);
                    self.set_property(node, &velocity, JsonValue::from(0));
                    let body = match report.request {
                        Some(names) => self.gather(node, &names, None),
                        None => {
                            let mut body = Message::new();
                            body.insert(report.property.clone(), committed);
                            body.insert(velocity, JsonValue::from(0));
                            body
                        }
                    };
                    self.emit(Some(node), body);
                }
            }
        }
    }

    fn run_due_timers(&mut self) {
        let mut steps = 0;
        while let Some(firing) = self.scheduler.pop_due() {
            steps += 1;
            if steps > self.cfg.timer_step_limit {
                warn!(
                    "timer step limit ({}) reached at {}ms",
                    self.cfg.timer_step_limit,
                    self.scheduler.now_ms()
                );
                break;
            }
            if !self.tree.contains(firing.target) {
                debug!("schedule '{}' dropped: target removed", firing.name);
                self.scheduler.cancel_for(&firing.name, firing.target);
                continue;
            }
            self.apply(firing.target, firing.message);
        }
    }
}
