//! Velocity-driven property animation.
//!
//! Each [`AnimationState`] integrates one numeric property per tick. The
//! continuous value is kept apart from the committed one so quantized
//! properties can move in whole steps while the motion underneath stays smooth.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::tree::NodeId;

/// Magnitude at or beyond which a bound is treated as absent.
pub const UNBOUNDED: f64 = 9e99;

/// Options carried by the `+P~` property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationOptions {
    /// Acceleration in units/s².
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Quantization step for committed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Names reported back instead of the default completion message.
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Vec<String>>,
}

fn bound(value: Option<&JsonValue>) -> Option<f64> {
    value
        .and_then(JsonValue::as_f64)
        .filter(|b| b.abs() < UNBOUNDED)
}

impl AnimationOptions {
    /// Lenient parse: malformed fields are ignored rather than rejected.
    pub fn from_json(value: Option<&JsonValue>) -> Self {
        let Some(JsonValue::Object(map)) = value else {
            return Self::default();
        };
        let request = match map.get("R") {
            Some(JsonValue::Array(names)) => Some(
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(JsonValue::String(name)) => Some(vec![name.clone()]),
            _ => None,
        };
        Self {
            acceleration: map.get("a").and_then(JsonValue::as_f64),
            min: bound(map.get("min")),
            max: bound(map.get("max")),
            step: map.get("step").and_then(JsonValue::as_f64).filter(|s| *s > 0.0),
            request,
        }
    }
}

/// What a single step produced.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Moved, but the displayed value did not change by a whole step.
    Idle,
    /// Commit and propagate this value.
    Propagate { value: f64 },
    /// A bound was reached; commit the bound and stop.
    Finished { value: f64 },
}

#[derive(Clone, Debug)]
pub struct AnimationState {
    pub property: String,
    /// Continuous position, independent of the committed value.
    pub current: f64,
    pub velocity: f64,
    pub options: AnimationOptions,
    pub min: Option<f64>,
    pub max: Option<f64>,
    last_propagated: f64,
}

impl AnimationState {
    pub fn new(property: &str, start: f64, velocity: f64, options: AnimationOptions) -> Self {
        Self {
            property: property.to_string(),
            current: start,
            velocity,
            min: options.min,
            max: options.max,
            options,
            last_propagated: start,
        }
    }

    /// Fallback bounds used when the options leave them open.
    pub fn with_fallback_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = self.min.or(min.filter(|b| b.abs() < UNBOUNDED));
        self.max = self.max.or(max.filter(|b| b.abs() < UNBOUNDED));
        self
    }

    /// Swap in new options while running; the position and velocity are kept.
    pub fn reconfigure(&mut self, options: AnimationOptions, min: Option<f64>, max: Option<f64>) {
        self.min = options.min.or(min.filter(|b| b.abs() < UNBOUNDED));
        self.max = options.max.or(max.filter(|b| b.abs() < UNBOUNDED));
        self.options = options;
    }

    /// Advance by `dt_ms` of virtual time.
    pub fn step(&mut self, dt_ms: f64, epsilon: f64) -> StepOutcome {
        let dt = dt_ms / 1000.0;
        let next = self.current + self.velocity * dt;
        if let Some(max) = self.max {
            if self.velocity > 0.0 && next >= max - epsilon {
                return self.finish(max);
            }
        }
        if let Some(min) = self.min {
            if self.velocity < 0.0 && next <= min + epsilon {
                return self.finish(min);
            }
        }
        self.current = next;
        if let Some(a) = self.options.acceleration {
            self.velocity += a * dt;
        }
        match self.options.step {
            Some(step) => {
                let diff = (self.current - self.last_propagated) / step;
                let whole = if diff >= 0.0 {
                    (diff + epsilon).floor()
                } else {
                    (diff - epsilon).ceil()
                };
                if whole == 0.0 {
                    StepOutcome::Idle
                } else {
                    self.last_propagated += whole * step;
                    StepOutcome::Propagate {
                        value: self.last_propagated,
                    }
                }
            }
            None => {
                self.last_propagated = self.current;
                StepOutcome::Propagate {
                    value: self.current,
                }
            }
        }
    }

    fn finish(&mut self, bound: f64) -> StepOutcome {
        self.current = bound;
        self.velocity = 0.0;
        self.last_propagated = bound;
        StepOutcome::Finished { value: bound }
    }
}

/// One animation's result for a tick.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub node: NodeId,
    pub property: String,
    pub request: Option<Vec<String>>,
    pub outcome: StepOutcome,
}

/// All running animations, keyed by node and property.
#[derive(Debug, Default)]
pub struct Animator {
    states: IndexMap<(NodeId, String), AnimationState>,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or restart the animation of `state.property` on `node`.
    pub fn start(&mut self, node: NodeId, state: AnimationState) {
        debug!(
            "animating '{}' from {} at {}/s",
            state.property, state.current, state.velocity
        );
        self.states.insert((node, state.property.clone()), state);
    }

    pub fn stop(&mut self, node: NodeId, property: &str) -> bool {
        self.states
            .shift_remove(&(node, property.to_string()))
            .is_some()
    }

    pub(crate) fn get_mut(&mut self, node: NodeId, property: &str) -> Option<&mut AnimationState> {
        self.states.get_mut(&(node, property.to_string()))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Drop every state whose node no longer passes `alive`.
    pub fn retain_live(&mut self, mut alive: impl FnMut(NodeId) -> bool) {
        self.states.retain(|(node, _), _| alive(*node));
    }

    /// Step every animation; finished ones are removed.
    pub fn step_all(&mut self, dt_ms: f64, epsilon: f64) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(self.states.len());
        self.states.retain(|(node, property), state| {
            let outcome = state.step(dt_ms, epsilon);
            let finished = matches!(outcome, StepOutcome::Finished { .. });
            if outcome != StepOutcome::Idle {
                reports.push(StepReport {
                    node: *node,
                    property: property.clone(),
                    request: state.options.request.clone(),
                    outcome,
                });
            }
            !finished
        });
        reports
    }
}
