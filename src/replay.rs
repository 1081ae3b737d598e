//! Replay: rerun a recorded trace's raw state through the engine and
//! verify the outcome against the original record.
//!
//! Three verification modes: chosen-action equality, canonical trace-hash
//! equality, and ethics equality (scores, override flag, confidence,
//! margin, uncertainty and level, all within 1e-9).

use serde_json::Value;

use crate::config::Config;
use crate::engine::{decide, DecideOptions, Decision};
use crate::errors::MdmError;
use crate::trace::{compute_trace_hash, Trace};

const ETHICS_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Chosen action must equal the trace's original.
    pub validate_action: bool,
    /// New trace hash must equal the original trace's hash.
    pub verify_hash: bool,
    /// Selection scores, override, confidence, margin, uncertainty and
    /// level must match within 1e-9.
    pub validate_ethics: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self { validate_action: true, verify_hash: false, validate_ethics: false }
    }
}

fn mismatch(what: &str) -> MdmError {
    MdmError::Replay(what.to_string())
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ETHICS_TOLERANCE
}

fn field_close(a: &Value, b: &Value, key: &str) -> bool {
    match (a.get(key), b.get(key)) {
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => close(x, y),
            _ => x == y,
        },
        // A side missing the field is skipped, as with older traces.
        _ => true,
    }
}

/// Rerun the engine from the trace's step-0 raw state. The effective
/// config must be the one the trace was recorded under; the config hash in
/// the enclosing packet identifies it.
pub fn replay(trace: &Trace, cfg: &Config, opts: &ReplayOptions) -> Result<Decision, MdmError> {
    let raw_state = trace
        .raw_state()
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| mismatch("trace has no raw_state (step 0) to replay from"))?;

    let result = decide(
        &raw_state,
        cfg,
        None,
        &DecideOptions { deterministic: true, ..Default::default() },
    )?;

    if opts.validate_action {
        if let Some(original) = trace.action() {
            let new: Vec<f64> = result.action.to_vec();
            if new != original {
                return Err(mismatch(&format!(
                    "chosen action diverged: original {original:?}, replayed {new:?}"
                )));
            }
        }
    }

    if opts.verify_hash {
        let original_hash = compute_trace_hash(trace);
        if result.trace_hash != original_hash {
            return Err(mismatch(&format!(
                "trace hash diverged: original {original_hash}, replayed {}",
                result.trace_hash
            )));
        }
    }

    if opts.validate_ethics {
        let orig_sel = trace.selection_data();
        let new_sel = result.trace.selection_data();
        if let (Some(orig), Some(new)) = (orig_sel, new_sel) {
            if orig.get("action") != new.get("action") {
                return Err(mismatch("selection action diverged"));
            }
            if orig.get("override") != new.get("override") {
                return Err(mismatch("fail-safe override flag diverged"));
            }
            if let (Some(os), Some(ns)) = (orig.get("scores"), new.get("scores")) {
                for key in ["W", "J", "H", "C"] {
                    if !field_close(os, ns, key) {
                        return Err(mismatch(&format!("selection score {key} diverged")));
                    }
                }
            }
            for key in ["confidence", "constraint_margin", "confidence_gradient"] {
                if !field_close(orig, new, key) {
                    return Err(mismatch(&format!("{key} diverged")));
                }
            }
            if let (Some(ou), Some(nu)) = (orig.get("uncertainty"), new.get("uncertainty")) {
                for key in
                    ["hi", "de", "de_norm", "action_spread_raw", "as_norm", "cus", "divergence"]
                {
                    if !field_close(ou, nu, key) {
                        return Err(mismatch(&format!("uncertainty {key} diverged")));
                    }
                }
            }
            if orig.get("escalation") != new.get("escalation") {
                return Err(mismatch("escalation level diverged"));
            }
            if orig.get("soft_safe_applied") != new.get("soft_safe_applied") {
                return Err(mismatch("soft_safe_applied diverged"));
            }
        }
        if let (Some(orig), Some(new)) =
            (trace.fail_safe_data(), result.trace.fail_safe_data())
        {
            if orig.get("override") != new.get("override") {
                return Err(mismatch("fail-safe trace record diverged"));
            }
        }
    }

    Ok(result)
}
