//! Fail-safe controller: hard override on critical justice/harm scores.
//!
//! Evaluated on the selected action's J and H (worst-over-grid values are
//! telemetry, and the trigger basis only when no candidate was selectable).
//! An override substitutes the safe action, forces level 2 and forbids a
//! subsequent soft clamp.

use crate::actions::Action;
use crate::config::Config;

pub const TRIGGER_J: &str = "J_critical";
pub const TRIGGER_H: &str = "H_critical";
pub const TRIGGER_JH: &str = "J_critical+H_critical";

#[derive(Debug, Clone, PartialEq)]
pub struct FailSafeResult {
    pub triggered: bool,
    pub safe_action: Option<Action>,
    pub human_escalation: bool,
    /// Which threshold fired; `None` without an override.
    pub trigger: Option<&'static str>,
}

impl FailSafeResult {
    pub fn pass() -> Self {
        Self { triggered: false, safe_action: None, human_escalation: false, trigger: None }
    }
}

pub fn fail_safe(j: f64, h: f64, cfg: &Config) -> FailSafeResult {
    let trigger = if j < cfg.j_critical && h > cfg.h_critical {
        Some(TRIGGER_JH)
    } else if j < cfg.j_critical {
        Some(TRIGGER_J)
    } else if h > cfg.h_critical {
        Some(TRIGGER_H)
    } else {
        None
    };
    match trigger {
        Some(t) => FailSafeResult {
            triggered: true,
            safe_action: Some(cfg.safe_action),
            human_escalation: true,
            trigger: Some(t),
        },
        None => FailSafeResult::pass(),
    }
}
