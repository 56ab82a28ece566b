//! Virtual clock plus named delay, interval and trigger entries.
//!
//! Time only moves in [`Scheduler::advance`]. Due timers are handed out one at
//! a time in `(due, registration order)` order so the engine can apply each
//! firing before looking for the next one.

use indexmap::IndexMap;
use log::debug;
use serde_json::Value as JsonValue;

use crate::config::TriggerMode;
use crate::tree::NodeId;
use crate::value::Message;

#[derive(Clone, Debug, PartialEq)]
pub enum ScheduleKind {
    Delay,
    Interval { period_ms: f64 },
    Trigger { predicate: Message },
}

/// A named pending delay, interval or trigger.
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub name: String,
    pub target: NodeId,
    /// Message applied on firing. Intervals keep it as a template.
    pub message: Message,
    pub kind: ScheduleKind,
    due_at: f64,
    order: u64,
}

impl ScheduleEntry {
    /// Virtual time at which a timer entry fires; triggers have none.
    pub fn due_at(&self) -> Option<f64> {
        match self.kind {
            ScheduleKind::Trigger { .. } => None,
            _ => Some(self.due_at),
        }
    }
}

/// A fired entry, ready to apply.
#[derive(Clone, Debug)]
pub struct Firing {
    pub name: String,
    pub target: NodeId,
    pub message: Message,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    clock_ms: f64,
    entries: IndexMap<String, ScheduleEntry>,
    next_order: u64,
}

/// Fresh name for an entry registered without `T`.
pub fn generate_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether an outbound message satisfies a trigger predicate.
///
/// Every predicate field must equal the message field; an object-valued
/// predicate field only requires the field to be present.
pub fn predicate_matches(predicate: &Message, message: &Message) -> bool {
    predicate.iter().all(|(field, wanted)| match wanted {
        JsonValue::Object(_) => message.contains_key(field),
        other => message.get(field) == Some(other),
    })
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds of virtual time since the session started.
    pub fn now_ms(&self) -> f64 {
        self.clock_ms
    }

    pub fn advance(&mut self, dt_ms: f64) {
        if dt_ms.is_finite() && dt_ms > 0.0 {
            self.clock_ms += dt_ms;
        }
    }

    fn insert(&mut self, name: String, target: NodeId, message: Message, kind: ScheduleKind, due_at: f64) {
        let order = self.next_order;
        self.next_order += 1;
        if self.entries.shift_remove(&name).is_some() {
            debug!("schedule '{name}' replaced");
        }
        self.entries.insert(
            name.clone(),
            ScheduleEntry {
                name,
                target,
                message,
                kind,
                due_at,
                order,
            },
        );
    }

    pub fn schedule_delay(&mut self, name: String, target: NodeId, message: Message, delay_ms: f64) {
        let due = self.clock_ms + delay_ms.max(0.0);
        debug!("schedule '{name}' delayed until {due}ms");
        self.insert(name, target, message, ScheduleKind::Delay, due);
    }

    /// Register an interval whose first repeat is one period from now.
    pub fn schedule_interval(&mut self, name: String, target: NodeId, template: Message, period_ms: f64) {
        let due = self.clock_ms + period_ms;
        debug!("schedule '{name}' repeats every {period_ms}ms");
        self.insert(name, target, template, ScheduleKind::Interval { period_ms }, due);
    }

    pub fn register_trigger(&mut self, name: String, target: NodeId, predicate: Message, message: Message) {
        debug!("trigger '{name}' armed");
        let now = self.clock_ms;
        self.insert(name, target, message, ScheduleKind::Trigger { predicate }, now);
    }

    /// Cancel one entry. Unknown names are ignored.
    pub fn cancel(&mut self, name: &str) -> bool {
        let found = self.entries.shift_remove(name).is_some();
        if found {
            debug!("schedule '{name}' cancelled");
        }
        found
    }

    /// Cancel `name` only if it still targets `target`.
    pub(crate) fn cancel_for(&mut self, name: &str, target: NodeId) {
        if self.entries.get(name).is_some_and(|e| e.target == target) {
            self.entries.shift_remove(name);
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Drop every entry but keep the clock running.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether a delay or interval is still waiting to fire. Triggers are not
    /// counted since they only fire on outbound traffic.
    pub fn has_timers(&self) -> bool {
        self.entries
            .values()
            .any(|e| !matches!(e.kind, ScheduleKind::Trigger { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next timer due at or before the clock. Delays are consumed; intervals
    /// are re-armed one period later and yield a fresh copy of the template.
    pub(crate) fn pop_due(&mut self) -> Option<Firing> {
        let now = self.clock_ms;
        let (index, _) = self
            .entries
            .values()
            .enumerate()
            .filter(|(_, e)| !matches!(e.kind, ScheduleKind::Trigger { .. }) && e.due_at <= now)
            .min_by(|(_, a), (_, b)| {
                a.due_at
                    .total_cmp(&b.due_at)
                    .then(a.order.cmp(&b.order))
            })?;
        let next_order = self.next_order;
        let entry = self.entries.get_index_mut(index)?.1;
        match entry.kind {
            ScheduleKind::Interval { period_ms } => {
                entry.due_at += period_ms;
                entry.order = next_order;
                self.next_order += 1;
                Some(Firing {
                    name: entry.name.clone(),
                    target: entry.target,
                    message: entry.message.clone(),
                })
            }
            _ => {
                let (_, entry) = self.entries.shift_remove_index(index)?;
                Some(Firing {
                    name: entry.name,
                    target: entry.target,
                    message: entry.message,
                })
            }
        }
    }

    /// Triggers whose predicate matches `outbound`, in registration order.
    /// In [`TriggerMode::Once`] the matched entries are dropped.
    pub(crate) fn matching_triggers(&mut self, outbound: &Message, mode: TriggerMode) -> Vec<Firing> {
        let mut fired = Vec::new();
        for entry in self.entries.values() {
            if let ScheduleKind::Trigger { predicate } = &entry.kind {
                if predicate_matches(predicate, outbound) {
                    fired.push(Firing {
                        name: entry.name.clone(),
                        target: entry.target,
                        message: entry.message.clone(),
                    });
                }
            }
        }
        if mode == TriggerMode::Once {
            for firing in &fired {
                self.entries.shift_remove(&firing.name);
            }
        }
        fired
    }
}
