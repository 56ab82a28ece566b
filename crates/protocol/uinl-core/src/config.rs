//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Whether a trigger entry survives its first firing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Fire on every matching outbound message until cancelled.
    #[default]
    Repeat,
    /// Fire once, then drop the entry.
    Once,
}

/// Configuration for the interpreter engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trigger_mode: TriggerMode,
    /// Upper bound on trigger firings drained from one outbound message.
    pub trigger_step_limit: usize,
    /// Upper bound on timer firings processed in one tick (interval catch-up included).
    pub timer_step_limit: usize,
    /// Tolerance used when checking animation bounds and quantization steps.
    pub bound_epsilon: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Repeat,
            trigger_step_limit: 256,
            timer_step_limit: 10_000,
            bound_epsilon: 1e-9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"trigger_mode":"once"}"#).expect("parse");
        assert_eq!(cfg.trigger_mode, TriggerMode::Once);
        assert_eq!(cfg.trigger_step_limit, 256);
        assert!(cfg.bound_epsilon > 0.0);
    }
}
