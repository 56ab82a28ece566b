//! Update dispatcher: applies one message to one node.
//!
//! Order of handling for a message:
//! 1. `Tc` cancels first.
//! 2. `Td`/`Tu`, `Ti` and `Tr` defer the rest of the message and stop here.
//! 3. `_`, `*` and `**` route the rest of the message to other nodes.
//! 4. `v: null` removes the node.
//! 5. A class or value-family change recreates the node in place.
//! 6. Otherwise `df`, `v`, ordinary properties, `+P~`, `+P`, then `R` and `Q`.

use log::{debug, error, warn};
use serde_json::Value as JsonValue;

use crate::address::{self, Address};
use crate::animation::{AnimationOptions, AnimationState};
use crate::class::BIN;
use crate::defaults;
use crate::engine::Engine;
use crate::error::UpdateError;
use crate::keys;
use crate::scheduler::generate_name;
use crate::transport::Transport;
use crate::tree::{Node, NodeId};
use crate::value::{self, Family, Message};

/// Keys that make a container item schedule its own addition.
const SCHEDULING: &[&str] = &[keys::DELAY, keys::DELAY_UNTIL, keys::INTERVAL, keys::TRIGGER];

fn request_names(request: &JsonValue) -> Vec<String> {
    match request {
        JsonValue::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect(),
        JsonValue::String(name) => vec![name.clone()],
        _ => Vec::new(),
    }
}

/// Name for a schedule entry, written back into the message when generated.
fn schedule_name(msg: &mut Message) -> String {
    let given = match msg.get(keys::NAME) {
        Some(JsonValue::String(name)) => Some(name.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    given.unwrap_or_else(|| {
        let name = generate_name();
        msg.insert(keys::NAME.to_string(), JsonValue::from(name.as_str()));
        name
    })
}

impl<T: Transport> Engine<T> {
    pub(crate) fn apply(&mut self, node: NodeId, mut msg: Message) {
        if !self.tree.contains(node) {
            warn!("update for a removed node dropped");
            return;
        }
        if let Some(cancel) = msg.shift_remove(keys::CANCEL) {
            self.cancel_schedules(&cancel);
        }
        if self.defer(node, &mut msg) {
            return;
        }
        if let Some(address) = msg.shift_remove(keys::ADDRESS) {
            self.apply_at(node, &address, msg);
            return;
        }
        let children = msg.shift_remove(keys::MATCH_CHILDREN);
        let descendants = msg.shift_remove(keys::MATCH_DESCENDANTS);
        if children.is_some() || descendants.is_some() {
            if let Some(query) = children {
                self.apply_matching(node, &query, &msg, false);
            }
            if let Some(query) = descendants {
                self.apply_matching(node, &query, &msg, true);
            }
            return;
        }
        if msg.get(keys::VALUE).is_some_and(JsonValue::is_null) {
            self.remove_node(node, msg);
            return;
        }
        if self.recreate_if_incoherent(node, &mut msg) {
            return;
        }
        self.update_node(node, msg);
    }

    fn cancel_schedules(&mut self, cancel: &JsonValue) {
        match cancel {
            JsonValue::Object(_) => {
                let n = self.scheduler.cancel_all();
                debug!("cancelled {n} schedules");
            }
            JsonValue::String(name) if name.is_empty() || name == "*" => {
                let n = self.scheduler.cancel_all();
                debug!("cancelled {n} schedules");
            }
            JsonValue::String(name) => {
                self.scheduler.cancel(name);
            }
            JsonValue::Number(n) => {
                self.scheduler.cancel(&n.to_string());
            }
            JsonValue::Array(names) => {
                for name in names {
                    self.cancel_schedules(name);
                }
            }
            _ => {}
        }
    }

    fn take_delay(&self, msg: &mut Message) -> Option<f64> {
        if let Some(delay) = msg.shift_remove(keys::DELAY) {
            match delay.as_f64() {
                Some(secs) => return Some(secs * 1000.0),
                None => warn!("ignoring non-numeric {}: {delay}", keys::DELAY),
            }
        }
        if let Some(until) = msg.shift_remove(keys::DELAY_UNTIL) {
            match until.as_f64() {
                Some(at) => return Some(at - self.scheduler.now_ms()),
                None => warn!("ignoring non-numeric {}: {until}", keys::DELAY_UNTIL),
            }
        }
        None
    }

    /// Register a delay, interval or trigger for the rest of `msg`. Returns
    /// `true` when the message was consumed.
    fn defer(&mut self, node: NodeId, msg: &mut Message) -> bool {
        if let Some(delay_ms) = self.take_delay(msg) {
            let name = schedule_name(msg);
            self.scheduler
                .schedule_delay(name, node, std::mem::take(msg), delay_ms);
            return true;
        }
        if let Some(period) = msg.shift_remove(keys::INTERVAL) {
            let name = schedule_name(msg);
            let template = std::mem::take(msg);
            match period.as_f64().filter(|p| *p > 0.0 && p.is_finite()) {
                Some(secs) => {
                    self.apply(node, template.clone());
                    self.scheduler
                        .schedule_interval(name, node, template, secs * 1000.0);
                }
                None => {
                    warn!("interval '{name}' has no usable period ({period}); applied once");
                    self.apply(node, template);
                }
            }
            return true;
        }
        if let Some(trigger) = msg.shift_remove(keys::TRIGGER) {
            let name = schedule_name(msg);
            let predicate = match trigger {
                JsonValue::Object(predicate) => predicate,
                _ => Message::new(),
            };
            self.scheduler
                .register_trigger(name, node, predicate, std::mem::take(msg));
            return true;
        }
        false
    }

    fn apply_at(&mut self, container: NodeId, address: &JsonValue, msg: Message) {
        let target = Address::from_json(address)
            .and_then(|a| address::resolve(&self.tree, container, a.steps()));
        match target {
            Some(target) => self.apply(target, msg),
            None => {
                let err = UpdateError::Unresolved {
                    address: address.to_string(),
                };
                warn!("{err}; update dropped");
            }
        }
    }

    fn apply_matching(&mut self, container: NodeId, query: &JsonValue, msg: &Message, recursive: bool) {
        match query.as_object() {
            Some(query) => self.apply_query(container, query, msg, recursive),
            None => warn!("search query must be an object, got {query}"),
        }
    }

    fn apply_query(&mut self, container: NodeId, query: &Message, msg: &Message, recursive: bool) {
        let children = self.tree.children(container).to_vec();
        for child in children {
            let Some(node) = self.tree.get(child) else {
                continue;
            };
            let is_container = node.is_container();
            if address::matches(node, query) {
                self.apply(child, msg.clone());
            }
            if recursive && is_container && self.tree.contains(child) {
                self.apply_query(child, query, msg, true);
            }
        }
    }

    fn remove_node(&mut self, node: NodeId, mut msg: Message) {
        let schedule = msg.get(keys::NAME).cloned();
        let response = msg.shift_remove(keys::REQUEST).map(|request| {
            let mut values = self.gather(node, &request_names(&request), schedule.as_ref());
            if let Some(v) = values.get_mut(keys::VALUE) {
                *v = JsonValue::Null;
            }
            values
        });
        let address = match response {
            Some(_) => self.address_of(node),
            None => None,
        };
        self.react(node, keys::VALUE, &JsonValue::Null);
        if node == self.tree.root() {
            self.reset_document();
        } else {
            debug!("removing node {node:?}");
            self.tree.remove(node);
        }
        if let Some(body) = response {
            self.emit_at(address, body);
        }
    }

    /// Recreate `node` when the message changes its class or value family.
    /// Returns `true` when the node was replaced.
    fn recreate_if_incoherent(&mut self, node: NodeId, msg: &mut Message) -> bool {
        let declared = match msg.shift_remove(keys::CLASS) {
            Some(JsonValue::String(class)) if self.classes.contains(&class) => Some(class),
            Some(other) => {
                warn!("unknown class {other} ignored");
                None
            }
            None => None,
        };
        let value_family = msg.get(keys::VALUE).map(Family::of);
        let Some(n) = self.tree.get(node) else {
            return true;
        };

        if node == self.tree.root() {
            let mut errors = Vec::new();
            if declared.as_deref().is_some_and(|c| c != n.class) {
                errors.push(UpdateError::RootImmutable {
                    key: keys::CLASS.to_string(),
                });
            }
            if value_family.is_some_and(|f| !f.is_sequence()) {
                msg.shift_remove(keys::VALUE);
                errors.push(UpdateError::RootImmutable {
                    key: keys::VALUE.to_string(),
                });
            }
            for err in errors {
                self.report(node, &err);
            }
            return false;
        }

        let target = match declared {
            Some(class) if class != n.class => Some(match value_family {
                Some(f) if self.classes.family(&class) != Some(f) => {
                    warn!("class '{class}' does not fit value family {f:?}");
                    self.classes.for_family(f).to_string()
                }
                _ => class,
            }),
            _ => value_family
                .filter(|f| *f != n.family)
                .map(|f| self.classes.for_family(f).to_string()),
        };
        let Some(class) = target else {
            return false;
        };

        let Some(parent) = n.parent else {
            return false;
        };
        let index = self.tree.index_of(node);
        let new_family = self.classes.family(&class).unwrap_or(Family::Sequence);
        let mut carried = Message::new();
        if let Some(id) = n.id() {
            carried.insert(keys::ID.to_string(), JsonValue::from(id));
        }
        for (name, value) in &n.props {
            carried.insert(name.clone(), value.clone());
        }
        if !n.is_container() && n.family == new_family {
            carried.insert(keys::VALUE.to_string(), n.value.clone());
        }
        if let Some(scope) = n.scope().filter(|s| new_family.is_sequence() && !s.overrides().is_empty()) {
            carried.insert(
                keys::DEFAULTS.to_string(),
                JsonValue::Object(scope.overrides().clone()),
            );
        }
        debug!("recreating '{}' as '{class}'", n.class);
        for (name, value) in std::mem::take(msg) {
            if name == keys::DEFAULTS {
                if let (Some(JsonValue::Object(kept)), JsonValue::Object(update)) =
                    (carried.get_mut(keys::DEFAULTS), &value)
                {
                    kept.extend(update.clone());
                    continue;
                }
            }
            carried.insert(name, value);
        }
        self.react(node, keys::VALUE, &JsonValue::Null);
        self.tree.remove(node);
        self.construct_child(parent, index, Some(class), carried);
        true
    }

    fn infer_class(&self, msg: &Message, chain: &Message) -> String {
        let known = |c: Option<&JsonValue>| {
            c.and_then(JsonValue::as_str)
                .filter(|c| self.classes.contains(c))
                .map(str::to_string)
        };
        let declared = known(msg.get(keys::CLASS));
        let value_family = msg
            .get(keys::VALUE)
            .filter(|v| !v.is_null())
            .map(Family::of);
        if let Some(class) = declared {
            if value_family.map_or(true, |f| self.classes.family(&class) == Some(f)) {
                return class;
            }
        }
        let inherited = known(chain.get(keys::CLASS));
        if let Some(family) = value_family {
            return match inherited {
                Some(class) if self.classes.family(&class) == Some(family) => class,
                _ => self.classes.for_family(family).to_string(),
            };
        }
        if let Some(class) = inherited {
            return class;
        }
        match chain.get(keys::VALUE) {
            Some(v) => self.classes.for_family(Family::of(v)).to_string(),
            None => BIN.to_string(),
        }
    }

    /// Build a child of `container` at `index` (appended when `None`) and
    /// apply `msg` to it.
    pub(crate) fn construct_child(
        &mut self,
        container: NodeId,
        index: Option<usize>,
        class: Option<String>,
        mut msg: Message,
    ) -> Option<NodeId> {
        let chain = defaults::resolve_chain(&self.tree, container);
        let class = class.unwrap_or_else(|| self.infer_class(&msg, &chain));
        msg.shift_remove(keys::CLASS);
        let spec = self.classes.get(&class)?.clone();
        defaults::fill(&mut msg, &chain, spec.family);
        for (name, value) in &spec.type_defaults {
            if !msg.contains_key(name) {
                msg.insert(name.clone(), value.clone());
            }
        }
        let id = self
            .tree
            .insert_child(container, index, Node::new(&class, spec.family, Some(container)))?;
        self.apply(id, msg);
        Some(id)
    }

    fn update_node(&mut self, node: NodeId, mut msg: Message) {
        let schedule = msg.shift_remove(keys::NAME);
        if let Some(df) = msg.shift_remove(keys::DEFAULTS) {
            self.update_defaults(node, df);
        }
        if let Some(v) = msg.shift_remove(keys::VALUE) {
            self.apply_value(node, v);
        }
        let request = msg.shift_remove(keys::REQUEST);
        let queue = msg.shift_remove(keys::QUEUE);

        let root = self.tree.root();
        let mut options = Vec::new();
        let mut velocities = Vec::new();
        for (name, value) in msg {
            if !self.tree.contains(node) {
                return;
            }
            if keys::options_target(&name).is_some() {
                options.push((name, value));
            } else if keys::velocity_target(&name).is_some() {
                velocities.push((name, value));
            } else if name == keys::REQUIRE && node == root {
                if !self.require(&value) {
                    return;
                }
            } else {
                self.apply_property(node, &name, value);
            }
        }
        for (name, value) in options {
            self.set_options(node, &name, value);
        }
        for (name, value) in velocities {
            self.set_velocity(node, &name, value);
        }

        if !self.tree.contains(node) {
            return;
        }
        if let Some(request) = request {
            let body = self.gather(node, &request_names(&request), schedule.as_ref());
            self.emit(Some(node), body);
        }
        if let Some(queue) = queue {
            let items = match queue {
                JsonValue::Array(items) => items,
                single => vec![single],
            };
            for item in items {
                if !self.tree.contains(node) {
                    break;
                }
                self.apply(node, value::into_message(item));
            }
        }
    }

    fn update_defaults(&mut self, node: NodeId, df: JsonValue) {
        let errors = match self.tree.get_mut(node) {
            None => return,
            Some(n) => match n.scope.as_mut() {
                None => vec![UpdateError::DefaultsOnScalar {
                    class: n.class.clone(),
                }],
                Some(scope) => match &df {
                    JsonValue::Null => {
                        scope.clear();
                        Vec::new()
                    }
                    JsonValue::Object(map) => map
                        .iter()
                        .filter_map(|(name, value)| scope.set(name, value.clone()).err())
                        .collect(),
                    other => {
                        warn!("defaults must be an object, got {other}");
                        Vec::new()
                    }
                },
            },
        };
        let failed = !errors.is_empty();
        for err in errors {
            self.report(node, &err);
        }
        if !failed {
            self.react(node, keys::DEFAULTS, &df);
        }
    }

    fn apply_value(&mut self, node: NodeId, v: JsonValue) {
        if self.tree.is_container(node) {
            self.update_children(node, v);
            return;
        }
        if let Some(n) = self.tree.get_mut(node) {
            n.value = v.clone();
        }
        self.react(node, keys::VALUE, &v);
    }

    fn update_children(&mut self, container: NodeId, v: JsonValue) {
        let observed = v.clone();
        let items = match v {
            JsonValue::Array(items) => items,
            single => vec![single],
        };
        let mut items = items.into_iter().peekable();
        if items.peek().is_some_and(JsonValue::is_null) {
            items.next();
            for child in self.tree.children(container).to_vec() {
                self.react(child, keys::VALUE, &JsonValue::Null);
            }
            self.tree.clear_children(container);
        }
        for item in items {
            if item.is_null() || !self.tree.contains(container) {
                continue;
            }
            let mut item = value::into_message(item);
            if let Some(cancel) = item.shift_remove(keys::CANCEL) {
                self.cancel_schedules(&cancel);
            }
            if SCHEDULING.iter().any(|k| item.contains_key(*k)) {
                let mut deferred = Message::new();
                for key in [keys::NAME, keys::DELAY, keys::DELAY_UNTIL, keys::INTERVAL, keys::TRIGGER] {
                    if let Some(value) = item.shift_remove(key) {
                        deferred.insert(key.to_string(), value);
                    }
                }
                deferred.insert(
                    keys::VALUE.to_string(),
                    JsonValue::Array(vec![JsonValue::Object(item)]),
                );
                self.apply(container, deferred);
            } else if [keys::ADDRESS, keys::MATCH_CHILDREN, keys::MATCH_DESCENDANTS]
                .iter()
                .any(|k| item.contains_key(*k))
            {
                self.apply(container, item);
            } else if item.get(keys::VALUE).is_some_and(JsonValue::is_null) {
                debug!("unaddressed removal ignored");
            } else {
                self.construct_child(container, None, None, item);
            }
        }
        self.react(container, keys::VALUE, &observed);
    }

    fn apply_property(&mut self, node: NodeId, name: &str, value: JsonValue) {
        match name {
            keys::ID => {
                let id = match &value {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                self.tree.set_id(node, id);
                self.react(node, keys::ID, &value);
            }
            keys::INDEX => {
                match value.as_f64() {
                    Some(i) => {
                        let siblings = self
                            .tree
                            .get(node)
                            .and_then(Node::parent)
                            .map_or(0, |p| self.tree.children(p).len()) as f64;
                        let at = if i < 0.0 { (siblings + i).max(0.0) } else { i };
                        self.tree.move_to(node, at as usize);
                    }
                    None => warn!("ignoring non-numeric index {value}"),
                }
                self.react(node, keys::INDEX, &value);
            }
            keys::ERROR => error!("application reported: {}", value::describe(&value)),
            _ => self.set_property(node, name, value),
        }
    }

    /// Store a property with merge semantics and run its reaction.
    pub(crate) fn set_property(&mut self, node: NodeId, name: &str, value: JsonValue) {
        let Some(n) = self.tree.get_mut(node) else {
            return;
        };
        let observed = match value {
            JsonValue::Null => match n.props.shift_remove(name) {
                Some(JsonValue::Object(old)) => JsonValue::Object(
                    old.into_iter()
                        .map(|(key, _)| (key, JsonValue::Null))
                        .collect(),
                ),
                _ => JsonValue::Null,
            },
            JsonValue::Object(update) => match n.props.get_mut(name) {
                Some(JsonValue::Object(existing)) => {
                    for (key, sub) in &update {
                        if sub.is_null() {
                            existing.shift_remove(key);
                        } else {
                            existing.insert(key.clone(), sub.clone());
                        }
                    }
                    JsonValue::Object(update)
                }
                _ => {
                    let update = JsonValue::Object(update);
                    n.props.insert(name.to_string(), update.clone());
                    update
                }
            },
            other => {
                n.props.insert(name.to_string(), other.clone());
                other
            }
        };
        self.react(node, name, &observed);
    }

    /// Run the reaction for `name`, reporting a failure as a `!` event.
    pub(crate) fn react(&mut self, node: NodeId, name: &str, value: &JsonValue) {
        let Some(n) = self.tree.get(node) else {
            return;
        };
        if let Err(reason) = self.classes.react(n, name, value) {
            let err = UpdateError::Reaction {
                property: name.to_string(),
                value: value::describe(value),
                reason,
            };
            self.report(node, &err);
        }
    }

    pub(crate) fn report(&mut self, node: NodeId, err: &UpdateError) {
        match err {
            UpdateError::Reaction { .. } => error!("{err}"),
            _ => warn!("{} error: {err}", err.category()),
        }
        let mut body = Message::new();
        body.insert(keys::ERROR.to_string(), JsonValue::from(err.to_string()));
        self.emit(Some(node), body);
    }

    /// Options and fallback bounds for animating `property` on `node`.
    fn animation_options(&self, node: NodeId, property: &str) -> (AnimationOptions, Option<f64>, Option<f64>) {
        let n = self.tree.get(node);
        let options_name = format!("{}{property}{}", keys::VELOCITY_PREFIX, keys::OPTIONS_SUFFIX);
        let options = AnimationOptions::from_json(n.and_then(|n| n.property(&options_name)));
        let own_bound = |name: &str| {
            if property == keys::VALUE {
                n.and_then(|n| n.property(name)).and_then(JsonValue::as_f64)
            } else {
                None
            }
        };
        (options, own_bound("min"), own_bound("max"))
    }

    fn set_options(&mut self, node: NodeId, name: &str, value: JsonValue) {
        self.set_property(node, name, value);
        let Some(property) = keys::options_target(name) else {
            return;
        };
        let (options, min, max) = self.animation_options(node, property);
        if let Some(state) = self.animator.get_mut(node, property) {
            state.reconfigure(options, min, max);
        }
    }

    fn set_velocity(&mut self, node: NodeId, name: &str, value: JsonValue) {
        let velocity = value.as_f64().filter(|v| *v != 0.0 && v.is_finite());
        self.set_property(node, name, value);
        let Some(property) = keys::velocity_target(name) else {
            return;
        };
        let Some(velocity) = velocity else {
            if self.animator.stop(node, property) {
                debug!("animation of '{property}' stopped");
            }
            return;
        };
        let Some(n) = self.tree.get(node) else {
            return;
        };
        let committed = if property == keys::VALUE {
            if n.family != Family::Number {
                warn!("cannot animate the value of a '{}' node", n.class);
                return;
            }
            n.value.as_f64()
        } else {
            n.property(property).and_then(JsonValue::as_f64)
        };
        let start = match committed {
            Some(x) => x,
            None => {
                self.commit_number(node, property, 0.0);
                0.0
            }
        };
        let (options, min, max) = self.animation_options(node, property);
        let state = AnimationState::new(property, start, velocity, options).with_fallback_bounds(min, max);
        self.animator.start(node, state);
    }
}
