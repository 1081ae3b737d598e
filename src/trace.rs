//! The decision trace: an in-memory ordered sequence of step records built
//! during the pipeline call, serialized afterwards. Step 0 (`raw_state`)
//! alone is sufficient to replay the decision.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::hash_value;

pub const TRACE_VERSION: &str = "1.1";
pub const SCHEMA_VERSION: &str = "2.0";

/// Step event kinds in pipeline order. `constraint` is logged once per
/// scored action, so step indices repeat within a trace.
pub mod step {
    pub const RAW_STATE: &str = "raw_state";
    pub const STATE_ENCODED: &str = "state_encoded";
    pub const ACTIONS_GENERATED: &str = "actions_generated";
    pub const MORAL_SCORES: &str = "moral_scores";
    pub const CONSTRAINT: &str = "constraint";
    pub const FAIL_SAFE: &str = "fail_safe";
    pub const SELECTION: &str = "selection";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub version: String,
    pub steps: Vec<TraceStep>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self { version: TRACE_VERSION.to_string(), steps: Vec::new() }
    }

    pub fn log(&mut self, step: u32, event_type: &str, data: Value) {
        self.steps.push(TraceStep { step, event_type: event_type.to_string(), data });
    }

    fn find(&self, step: u32, event_type: &str) -> Option<&Value> {
        self.steps
            .iter()
            .find(|s| s.step == step && s.event_type == event_type)
            .map(|s| &s.data)
    }

    /// Step-0 raw state, the replay input.
    pub fn raw_state(&self) -> Option<&Value> {
        self.find(0, step::RAW_STATE)
    }

    /// Originally chosen action from the selection step.
    pub fn action(&self) -> Option<Vec<f64>> {
        self.selection_data()?
            .get("action")?
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
    }

    /// Full selection record (action, reason, scores, override, ...).
    pub fn selection_data(&self) -> Option<&Value> {
        self.find(6, step::SELECTION)
    }

    /// Fail-safe record (override, human_escalation).
    pub fn fail_safe_data(&self) -> Option<&Value> {
        self.find(5, step::FAIL_SAFE)
    }
}

/// Deterministic SHA-256 over the canonical form of the full trace.
pub fn compute_trace_hash(trace: &Trace) -> String {
    let value = serde_json::to_value(trace).unwrap_or(Value::Null);
    hash_value(&value)
}
