//! Confidence and uncertainty over the selected action.
//!
//! Confidence combines a sigmoid over the selected scores with a factor
//! monotonic in the constraint margin. Uncertainty aggregates hesitation,
//! decision entropy over softmaxed candidate objectives and the normalized
//! action spread into the combined uncertainty score (CUS).

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::constraints::constraint_margin;
use crate::moral::MoralScores;

/// Softmax temperature for decision entropy. Sharp enough that one clear
/// winner yields low entropy over a few hundred grid candidates.
const DE_TEMPERATURE: f64 = 0.05;

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub confidence: f64,
    pub constraint_margin: f64,
    pub base_confidence: f64,
    pub margin_factor: f64,
    pub confidence_gradient: f64,
    pub suggest_escalation: bool,
    pub force_escalation: bool,
}

/// Confidence of the selected scores against the constraint box.
pub fn compute_confidence(scores: &MoralScores, cfg: &Config) -> ConfidenceResult {
    let margin = constraint_margin(scores, cfg);
    let base_confidence = sigmoid(6.0 * (0.5 * (scores.j + (1.0 - scores.h)) - 0.5));
    let margin_factor = clamp01(0.5 + cfg.confidence_gradient * margin);
    let confidence = clamp01(base_confidence * margin_factor);
    ConfidenceResult {
        confidence,
        constraint_margin: margin,
        base_confidence,
        margin_factor,
        confidence_gradient: cfg.confidence_gradient,
        suggest_escalation: confidence < cfg.confidence_suggest_threshold,
        force_escalation: confidence < cfg.confidence_escalation_force,
    }
}

/// Full uncertainty record, serialized verbatim into trace and packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyReport {
    /// Hesitation index.
    pub hi: f64,
    /// Decision entropy over softmaxed candidate objectives.
    pub de: f64,
    /// `de / ln(max(n, 2))`.
    pub de_norm: f64,
    /// Raw action spread: best minus second-best objective.
    pub action_spread_raw: f64,
    /// Spread normalized by `max(|best|, 1e-9)`; `None` with < 2 candidates.
    pub as_norm: Option<f64>,
    pub as_norm_missing: bool,
    /// Combined uncertainty score.
    pub cus: f64,
    /// `|confidence - (1 - de_norm)|`.
    pub divergence: f64,
    pub n_candidates: usize,
    pub score_best: Option<f64>,
    pub score_second: Option<f64>,
}

pub fn compute_uncertainty(
    confidence: f64,
    margin: f64,
    candidate_scores: &[f64],
    cfg: &Config,
) -> UncertaintyReport {
    let n = candidate_scores.len();

    let hi = clamp01((1.0 - confidence) * (1.0 - clamp01(margin)));

    let (de, de_norm) = if n == 0 {
        (0.0, 0.0)
    } else {
        let max = candidate_scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> =
            candidate_scores.iter().map(|s| ((s - max) / DE_TEMPERATURE).exp()).collect();
        let total: f64 = weights.iter().sum();
        let de = -weights
            .iter()
            .map(|w| {
                let p = w / total;
                if p > 0.0 {
                    p * p.ln()
                } else {
                    0.0
                }
            })
            .sum::<f64>();
        (de, de / (n.max(2) as f64).ln())
    };

    let mut sorted: Vec<f64> = candidate_scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let score_best = sorted.first().copied();
    let score_second = sorted.get(1).copied();
    let action_spread_raw = match (score_best, score_second) {
        (Some(b), Some(s)) => b - s,
        _ => 0.0,
    };
    let as_norm = score_second
        .and(score_best)
        .map(|best| action_spread_raw / best.abs().max(1e-9));

    let w = &cfg.cus_weights;
    let cus = clamp01(
        w.hesitation * hi + w.entropy * de_norm + w.spread * (1.0 - as_norm.unwrap_or(0.0)),
    );
    let divergence = (confidence - (1.0 - de_norm)).abs();

    UncertaintyReport {
        hi,
        de,
        de_norm,
        action_spread_raw,
        as_norm,
        as_norm_missing: as_norm.is_none(),
        cus,
        divergence,
        n_candidates: n,
        score_best,
        score_second,
    }
}
