//! Pipeline orchestrator: encode -> generate -> score -> filter -> select
//! -> fail-safe -> confidence -> drift -> escalate -> clamp, with the full
//! trace recorded and hashed along the way.
//!
//! The pipeline is synchronous, lock-free and a pure function of
//! `(raw_state, config, context)`; the context carries the only mutable
//! state (CUS history, driver history, optional external confidence).

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::actions::{action_key, generate_actions, refine_actions_around, Action, REFINE_STEP};
use crate::canonical::{hash_serializable, hash_value};
use crate::clamp::soft_clamp_action;
use crate::config::Config;
use crate::confidence::{compute_confidence, compute_uncertainty, UncertaintyReport};
use crate::constraints::{count_violations, validate_constraints};
use crate::drift::{compute_temporal_drift, update_cus_history, TemporalDrift};
use crate::encoder::{compute_input_quality, encode_state, missing_fields, RawEvent, STATE_KEYS};
use crate::errors::MdmError;
use crate::escalation::{
    compute_escalation_decision, sort_drivers, EscalationSignals, DRIVER_CONSTRAINT,
    DRIVER_FAIL_SAFE, DRIVER_NONE, DRIVER_NO_VALID,
};
use crate::fail_safe::fail_safe;
use crate::invariants;
use crate::moral::{evaluate_with_hook, MoralModel, MoralScores};
use crate::selector::{objective, select_action, SelectionResult, REASON_FAIL_SAFE, REASON_NO_VALID, REASON_PARETO};
use crate::trace::{compute_trace_hash, step, Trace};

/// Primary drivers retained for the histogram alarm.
const DRIVER_HISTORY_CAP: usize = 50;

/// Mutable per-stream state, owned by the caller. One context per
/// concurrent stream; the engine is the single writer during a call.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub cus_history: VecDeque<f64>,
    pub driver_history: Vec<String>,
    /// Caller-supplied confidence (e.g. classifier distance-to-threshold);
    /// replaces the internal value for escalation when present.
    pub external_confidence: Option<f64>,
    /// Strict mode: a packet-invariant violation aborts the call.
    pub assert_invariants: bool,
}

#[derive(Default, Clone, Copy)]
pub struct DecideOptions<'a> {
    /// Per-axis grid step override.
    pub resolution: Option<[f64; 4]>,
    /// Reserved: seeds stochastic components. The reference pipeline has
    /// none, so decisions are deterministic either way.
    pub deterministic: bool,
    /// Private scorer hook; the reference runs on absence or error.
    pub model: Option<&'a dyn MoralModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationBase {
    pub level: u8,
    pub driver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelfRegulation {
    /// Confidence change produced by the soft clamp (new - old).
    pub delta_confidence: f64,
}

/// Complete engine output for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Chosen action before any soft clamp.
    pub raw_action: Action,
    pub trace: Trace,
    pub trace_hash: String,
    pub state_hash: String,
    pub config_hash: String,
    /// Escalation level: 0 auto-apply, 1 clamped apply, 2 human review.
    pub level: u8,
    pub human_escalation: bool,
    pub reason: String,
    pub selection_reason: String,
    pub escalation_driver: String,
    pub escalation_drivers: Vec<String>,
    pub escalation_base: EscalationBase,
    pub confidence: f64,
    pub confidence_internal: f64,
    pub confidence_external: Option<f64>,
    pub confidence_used: f64,
    pub confidence_source: String,
    pub constraint_margin: f64,
    pub confidence_gradient: f64,
    /// Scores of the final (possibly clamped) action.
    pub scores: MoralScores,
    #[serde(rename = "worst_J")]
    pub worst_j: f64,
    #[serde(rename = "worst_H")]
    pub worst_h: f64,
    pub fail_safe_reason: Option<String>,
    pub uncertainty: UncertaintyReport,
    pub temporal_drift: Option<TemporalDrift>,
    pub self_regulation: Option<SelfRegulation>,
    pub soft_safe_applied: bool,
    pub input_quality: f64,
    pub evidence_consistency: f64,
    pub frontier_size: usize,
    pub pareto_gap: Option<f64>,
    pub driver_history_len: usize,
    pub drift_driver_alarm: bool,
    pub missing_fields: Vec<String>,
    pub valid_candidate_count: usize,
    pub invalid_reason_counts: BTreeMap<String, u32>,
}

impl Decision {
    /// Final action verb derived from the level.
    pub fn final_action(&self) -> &'static str {
        final_action_for_level(self.level)
    }
}

pub fn final_action_for_level(level: u8) -> &'static str {
    match level {
        0 => "APPLY",
        1 => "APPLY_CLAMPED",
        _ => "HOLD_REVIEW",
    }
}

fn action_value(a: &Action) -> Value {
    json!(a.to_vec())
}

/// Run the full decision pipeline for one event.
pub fn decide(
    raw_state: &RawEvent,
    cfg: &Config,
    mut ctx: Option<&mut DecisionContext>,
    opts: &DecideOptions,
) -> Result<Decision, MdmError> {
    let mut trace = Trace::new();
    trace.log(0, step::RAW_STATE, Value::Object(raw_state.clone()));

    let x = encode_state(raw_state);
    trace.log(1, step::STATE_ENCODED, json!({"x_ext": x.x_ext, "x_moral": x.x_moral}));

    let quality = compute_input_quality(raw_state);

    // Coarse grid, then refinement around the five best coarse actions.
    let mut scored: Vec<(Action, MoralScores)> = generate_actions(opts.resolution)
        .into_iter()
        .map(|a| (a, evaluate_with_hook(opts.model, &x, &a)))
        .collect();
    let mut ranked: Vec<usize> = (0..scored.len()).collect();
    ranked.sort_by(|&i, &j| {
        objective(&scored[j].1, cfg).total_cmp(&objective(&scored[i].1, cfg))
    });
    let top: Vec<Action> = ranked.iter().take(5).map(|&i| scored[i].0).collect();
    for a in refine_actions_around(&top, REFINE_STEP) {
        let s = evaluate_with_hook(opts.model, &x, &a);
        scored.push((a, s));
    }
    let mut seen = HashSet::new();
    scored.retain(|(a, _)| seen.insert(action_key(a)));
    trace.log(
        2,
        step::ACTIONS_GENERATED,
        json!({"count": scored.len(), "coarse_plus_refined": true}),
    );
    trace.log(
        3,
        step::MORAL_SCORES,
        Value::Array(
            scored
                .iter()
                .map(|(a, s)| {
                    json!({"a": action_value(a), "W": s.w, "J": s.j, "H": s.h, "C": s.c})
                })
                .collect(),
        ),
    );

    let mut candidates: Vec<(Action, MoralScores)> = Vec::new();
    let mut rejected = Vec::new();
    for (a, s) in &scored {
        let verdict = validate_constraints(s, cfg);
        trace.log(
            4,
            step::CONSTRAINT,
            json!({"a": action_value(a), "valid": verdict.valid, "violations": verdict.violations}),
        );
        if verdict.valid {
            candidates.push((*a, *s));
        } else {
            rejected.push(verdict);
        }
    }
    let invalid_reason_counts = count_violations(&rejected);

    let worst_j = scored.iter().map(|(_, s)| s.j).fold(f64::INFINITY, f64::min);
    let worst_h = scored.iter().map(|(_, s)| s.h).fold(f64::NEG_INFINITY, f64::max);

    // Tentative selection, then the fail-safe on the chosen action's
    // scores (worst-over-grid when nothing was selectable).
    let mut sel = select_action(&candidates, cfg);
    let chosen_scores = sel.chosen_idx.map(|i| candidates[i].1);
    let fs = match chosen_scores {
        Some(s) => fail_safe(s.j, s.h, cfg),
        None => fail_safe(worst_j, worst_h, cfg),
    };
    trace.log(
        5,
        step::FAIL_SAFE,
        json!({"override": fs.triggered, "human_escalation": fs.human_escalation}),
    );

    if let Some(safe) = fs.safe_action.filter(|_| fs.triggered) {
        sel = SelectionResult {
            action: safe,
            chosen_idx: None,
            score: None,
            reason: REASON_FAIL_SAFE,
            frontier_size: sel.frontier_size,
            pareto_gap: sel.pareto_gap,
        };
    }

    let candidate_scores: Vec<f64> = candidates.iter().map(|(_, s)| objective(s, cfg)).collect();

    let mut selected_scores = match chosen_scores {
        Some(s) if sel.reason != REASON_FAIL_SAFE && sel.reason != REASON_NO_VALID => s,
        _ => evaluate_with_hook(opts.model, &x, &sel.action),
    };

    let mut conf = compute_confidence(&selected_scores, cfg);
    let mut uncertainty =
        compute_uncertainty(conf.confidence, conf.constraint_margin, &candidate_scores, cfg);
    let mut human_escalation = fs.human_escalation || conf.force_escalation;

    // External confidence (when supplied) replaces the internal value;
    // both are discounted by input quality before driving escalation.
    let external_confidence = ctx.as_ref().and_then(|c| c.external_confidence);
    let effective_confidence = (external_confidence.unwrap_or(conf.confidence).clamp(0.0, 1.0)
        * quality.input_quality)
        .clamp(0.0, 1.0);

    let signals = EscalationSignals {
        effective_confidence,
        constraint_margin: conf.constraint_margin,
        h_selected: selected_scores.h,
        as_norm: uncertainty.as_norm,
        divergence: uncertainty.divergence,
    };
    let (base_level, base_driver) = compute_escalation_decision(&signals, cfg);
    let mut escalation = base_level;
    let mut drivers: Vec<String> = Vec::new();
    if base_driver != DRIVER_NONE {
        drivers.push(base_driver.to_string());
    }
    if conf.constraint_margin < 0.0 && base_driver != DRIVER_CONSTRAINT {
        drivers.push(DRIVER_CONSTRAINT.to_string());
    }
    if sel.reason == REASON_NO_VALID {
        escalation = 2;
        drivers = vec![DRIVER_NO_VALID.to_string()];
    }
    // Hard invariant: a fail-safe override always wins the driver chain.
    if fs.triggered {
        escalation = 2;
        drivers = vec![DRIVER_FAIL_SAFE.to_string()];
    }

    let mut temporal_drift: Option<TemporalDrift> = None;
    if let Some(ctx) = ctx.as_deref_mut() {
        update_cus_history(&mut ctx.cus_history, uncertainty.cus, cfg.cus_mean_window);
        let drift = compute_temporal_drift(&ctx.cus_history, cfg);
        if drift.applied {
            escalation = escalation.max(1);
            drivers.push(format!("temporal_drift:{}", drift.driver));
        }
        temporal_drift = Some(drift);
    }

    sort_drivers(&mut drivers);
    let primary_driver =
        drivers.first().cloned().unwrap_or_else(|| DRIVER_NONE.to_string());

    let mut driver_history_len = 0;
    let mut drift_driver_alarm = false;
    if let Some(ctx) = ctx.as_deref_mut() {
        ctx.driver_history.push(primary_driver.clone());
        let overflow = ctx.driver_history.len().saturating_sub(DRIVER_HISTORY_CAP);
        ctx.driver_history.drain(0..overflow);
        let hist = &ctx.driver_history;
        driver_history_len = hist.len();
        // A sudden constraint-violation burst in the last 10 decisions
        // after a quiet stretch is a drift alarm in its own right.
        if hist.len() >= 10 {
            let recent = &hist[hist.len() - 10..];
            let prev = if hist.len() >= 30 {
                &hist[hist.len() - 30..hist.len() - 10]
            } else {
                &hist[..hist.len() - 10]
            };
            let count_recent =
                recent.iter().filter(|d| d.contains(DRIVER_CONSTRAINT)).count();
            let count_prev = prev.iter().filter(|d| d.contains(DRIVER_CONSTRAINT)).count();
            if count_recent >= 5 && (prev.len() < 5 || count_prev <= 1) {
                drift_driver_alarm = true;
            }
        }
    }

    // Soft clamp: only a final level of 1, and never over a fail-safe.
    let raw_action = sel.action;
    let mut final_action = sel.action;
    let mut soft_safe_applied = false;
    let mut self_regulation = None;
    if escalation == 1 && !fs.triggered {
        let confidence_before = conf.confidence;
        final_action = soft_clamp_action(&sel.action, uncertainty.cus, cfg);
        selected_scores = evaluate_with_hook(opts.model, &x, &final_action);
        conf = compute_confidence(&selected_scores, cfg);
        uncertainty =
            compute_uncertainty(conf.confidence, conf.constraint_margin, &candidate_scores, cfg);
        human_escalation = false;
        self_regulation =
            Some(SelfRegulation { delta_confidence: conf.confidence - confidence_before });
        soft_safe_applied = true;
    }

    let mut selection_data = json!({
        "action": action_value(&final_action),
        "reason": sel.reason,
        "score": sel.score,
        "override": fs.triggered,
        "frontier_size": sel.frontier_size,
        "pareto_gap": sel.pareto_gap,
        "scores": serde_json::to_value(selected_scores)?,
        "confidence": conf.confidence,
        "constraint_margin": conf.constraint_margin,
        "base_confidence": conf.base_confidence,
        "margin_factor": conf.margin_factor,
        "confidence_gradient": conf.confidence_gradient,
        "suggest_escalation": conf.suggest_escalation,
        "force_escalation": conf.force_escalation,
        "uncertainty": serde_json::to_value(&uncertainty)?,
        "escalation": escalation,
        "soft_safe_applied": soft_safe_applied,
    });
    if let Some(sr) = &self_regulation {
        selection_data["self_regulation"] = serde_json::to_value(sr)?;
    }
    // Drift enters the trace only when it changed the outcome; unapplied
    // drift is packet telemetry, and keeping it out of the trace lets a
    // context-free replay reproduce the hash exactly.
    if let Some(drift) = temporal_drift.as_ref().filter(|d| d.applied) {
        selection_data["temporal_drift"] = serde_json::to_value(drift)?;
    }
    trace.log(6, step::SELECTION, selection_data);

    let trace_hash = compute_trace_hash(&trace);
    let state_hash = hash_value(&Value::Object(raw_state.clone()));
    let config_hash = hash_serializable(cfg);

    let selection_reason = if sel.reason == REASON_PARETO {
        "pareto_tiebreak:margin>H>J>W>C".to_string()
    } else {
        sel.reason.to_string()
    };
    let escalation_driver =
        if drivers.is_empty() { DRIVER_NONE.to_string() } else { drivers.join("|") };

    let decision = Decision {
        action: final_action,
        raw_action,
        trace,
        trace_hash,
        state_hash,
        config_hash,
        level: escalation,
        human_escalation,
        reason: sel.reason.to_string(),
        selection_reason,
        escalation_driver,
        escalation_drivers: drivers,
        escalation_base: EscalationBase { level: base_level, driver: base_driver.to_string() },
        confidence: effective_confidence,
        confidence_internal: conf.confidence,
        confidence_external: external_confidence,
        confidence_used: effective_confidence,
        confidence_source: if external_confidence.is_some() { "external" } else { "internal" }
            .to_string(),
        constraint_margin: conf.constraint_margin,
        confidence_gradient: conf.confidence_gradient,
        scores: selected_scores,
        worst_j,
        worst_h,
        fail_safe_reason: fs.trigger.map(str::to_string).filter(|_| fs.triggered),
        uncertainty,
        temporal_drift,
        self_regulation,
        soft_safe_applied,
        input_quality: quality.input_quality,
        evidence_consistency: quality.evidence_consistency,
        frontier_size: sel.frontier_size,
        pareto_gap: sel.pareto_gap,
        driver_history_len,
        drift_driver_alarm,
        missing_fields: missing_fields(&quality),
        valid_candidate_count: candidates.len(),
        invalid_reason_counts,
    };

    let strict = ctx.as_ref().map(|c| c.assert_invariants).unwrap_or(false)
        || std::env::var("MDM_ASSERT_INVARIANTS")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
    if strict {
        invariants::assert_decision_invariants(&decision)?;
    }

    Ok(decision)
}

/// Perturbation diagnostic: nudge each supported state key by ±epsilon and
/// count decision/level flips. `stable` iff the chosen action never moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub stable: bool,
    pub flip_count: u32,
    pub level_flip_count: u32,
}

pub fn run_sensitivity_check(
    raw_state: &RawEvent,
    cfg: &Config,
    epsilon: f64,
    state_keys: Option<&[&str]>,
) -> Result<SensitivityReport, MdmError> {
    let keys: Vec<&str> = state_keys.map(<[&str]>::to_vec).unwrap_or_else(|| STATE_KEYS.to_vec());
    let opts = DecideOptions { deterministic: true, ..Default::default() };
    let base = decide(raw_state, cfg, None, &opts)?;
    let base_key = action_key(&base.action);
    let base_level = base.level;

    let mut flip_count = 0;
    let mut level_flip_count = 0;
    for key in keys {
        let Some(value) = raw_state.get(key).and_then(Value::as_f64) else {
            continue;
        };
        for delta in [epsilon, -epsilon] {
            let mut perturbed = raw_state.clone();
            perturbed.insert(key.to_string(), json!((value + delta).clamp(0.0, 1.0)));
            let out = decide(&perturbed, cfg, None, &opts)?;
            if action_key(&out.action) != base_key {
                flip_count += 1;
            }
            if out.level != base_level {
                level_flip_count += 1;
            }
        }
    }
    Ok(SensitivityReport { stable: flip_count == 0, flip_count, level_flip_count })
}
