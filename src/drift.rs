//! Temporal drift over the combined uncertainty score.
//!
//! A bounded FIFO of recent CUS values drives two triggers: a jump in the
//! last step (`delta`) and a window mean above threshold (`mean`). Until
//! the history reaches `drift_min_history` the tracker reports `warmup`
//! and never escalates. Drift is computed on every decision, escalated or
//! not: quiet periods still need watching.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::Config;

pub const DRIVER_WARMUP: &str = "warmup";
pub const DRIVER_DELTA: &str = "delta";
pub const DRIVER_MEAN: &str = "mean";
pub const DRIVER_DELTA_MEAN: &str = "delta+mean";
pub const DRIVER_NONE: &str = "none";

/// Drift report for one decision, serialized into trace and packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalDrift {
    /// CUS change since the previous sample; `None` on the first.
    pub delta_cus: Option<f64>,
    /// Mean over the current window.
    pub cus_mean: f64,
    /// A trigger fired (before the warmup gate).
    pub preemptive_escalation: bool,
    pub history_len: usize,
    pub min_history: usize,
    /// `warmup | delta | mean | delta+mean | none`.
    pub driver: String,
    /// Trigger fired and warmup passed: level is raised to at least 1.
    pub applied: bool,
}

/// Push the new sample, evicting from the front beyond the window.
pub fn update_cus_history(history: &mut VecDeque<f64>, cus: f64, window: usize) {
    history.push_back(cus);
    while history.len() > window.max(1) {
        history.pop_front();
    }
}

/// Evaluate drift for the sample most recently pushed onto `history`.
pub fn compute_temporal_drift(history: &VecDeque<f64>, cfg: &Config) -> TemporalDrift {
    let len = history.len();
    let delta_cus = if len >= 2 {
        Some(history[len - 1] - history[len - 2])
    } else {
        None
    };
    let cus_mean = if len == 0 {
        0.0
    } else {
        history.iter().sum::<f64>() / len as f64
    };

    let delta_trigger = delta_cus.is_some_and(|d| d > cfg.delta_cus_threshold);
    let mean_trigger = cus_mean > cfg.cus_mean_threshold;
    let warm = len >= cfg.drift_min_history;

    let driver = if !warm {
        DRIVER_WARMUP
    } else if delta_trigger && mean_trigger {
        DRIVER_DELTA_MEAN
    } else if delta_trigger {
        DRIVER_DELTA
    } else if mean_trigger {
        DRIVER_MEAN
    } else {
        DRIVER_NONE
    };

    TemporalDrift {
        delta_cus,
        cus_mean,
        preemptive_escalation: delta_trigger || mean_trigger,
        history_len: len,
        min_history: cfg.drift_min_history,
        driver: driver.to_string(),
        applied: warm && (delta_trigger || mean_trigger),
    }
}
