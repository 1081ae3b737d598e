//! Engine configuration: constraint box, critical thresholds, escalation
//! curve, drift windows, soft-clamp scalars and the selector weights.
//!
//! Resolved once at the boundary (profile name + env overrides) and passed
//! through the pipeline as an immutable value. The effective config is
//! hashed into every packet (`config_hash`), so two runs with numerically
//! equal configs are byte-comparable.

use serde::{Deserialize, Serialize};

use crate::errors::MdmError;

/// Selector objective weights: `S = alpha*W + beta*J - gamma*H + delta*C`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { alpha: 1.0, beta: 1.0, gamma: 1.0, delta: 0.5 }
    }
}

/// Weights of the combined uncertainty score over
/// `{hesitation, normalized entropy, 1 - normalized spread}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusWeights {
    pub hesitation: f64,
    pub entropy: f64,
    pub spread: f64,
}

impl Default for CusWeights {
    fn default() -> Self {
        Self { hesitation: 0.4, entropy: 0.4, spread: 0.2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Profile identifier, recorded in every packet.
    pub profile: String,

    // Constraint box on candidate scores.
    pub j_min: f64,
    pub h_max: f64,
    pub c_min: f64,
    pub c_max: f64,

    // Fail-safe triggers, evaluated on the selected action.
    pub j_critical: f64,
    pub h_critical: f64,

    // Escalation curve.
    pub confidence_gradient: f64,
    pub confidence_suggest_threshold: f64,
    pub confidence_escalation_force: f64,
    /// Level assigned on a suggest-grade low-confidence decision (1 or 2).
    pub confidence_low_escalation_level: u8,
    pub as_soft_threshold: f64,
    pub divergence_threshold: f64,

    // Temporal drift.
    pub cus_mean_window: usize,
    pub cus_mean_threshold: f64,
    pub delta_cus_threshold: f64,
    pub drift_min_history: usize,

    // Soft clamp strength: min(gamma, alpha + beta * cus).
    pub soft_clamp_alpha: f64,
    pub soft_clamp_beta: f64,
    pub soft_clamp_gamma: f64,

    /// Baseline action substituted on fail-safe and no-valid fallback:
    /// `[severity, compassion, intervention, delay]`.
    pub safe_action: [f64; 4],

    pub weights: ScoreWeights,
    pub cus_weights: CusWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: "base".to_string(),
            j_min: 0.65,
            h_max: 0.45,
            c_min: 0.05,
            c_max: 0.95,
            j_critical: 0.15,
            h_critical: 0.60,
            confidence_gradient: 2.0,
            confidence_suggest_threshold: 0.55,
            confidence_escalation_force: 0.35,
            confidence_low_escalation_level: 1,
            as_soft_threshold: 0.0,
            divergence_threshold: 0.6,
            cus_mean_window: 50,
            cus_mean_threshold: 0.88,
            delta_cus_threshold: 0.15,
            drift_min_history: 30,
            soft_clamp_alpha: 0.2,
            soft_clamp_beta: 0.5,
            soft_clamp_gamma: 0.8,
            safe_action: [0.0, 0.5, 0.0, 1.0],
            weights: ScoreWeights::default(),
            cus_weights: CusWeights::default(),
        }
    }
}

impl Config {
    /// Resolve a named profile. Unknown names are a configuration error.
    pub fn profile(name: &str) -> Result<Self, MdmError> {
        let mut cfg = Config::default();
        match name {
            "base" => {}
            // Conservative ops profile: low confidence goes straight to
            // human review and the fail-safe bites earlier.
            "production_safe" => {
                cfg.confidence_low_escalation_level = 2;
                cfg.h_critical = 0.50;
                cfg.confidence_suggest_threshold = 0.60;
                cfg.cus_mean_threshold = 0.80;
            }
            // Tolerates more harm before the hard stop but demands more
            // justice headroom; used for high-stakes replay audits.
            "high_critical" => {
                cfg.j_critical = 0.25;
                cfg.h_critical = 0.75;
                cfg.j_min = 0.70;
            }
            // Calibrated for noisy external classifiers: near-tie action
            // spreads are routine there, so the spread trigger is disabled
            // and the drift mean threshold sits above the observed baseline.
            "calibrated" => {
                cfg.as_soft_threshold = 0.0;
                cfg.confidence_low_escalation_level = 1;
                cfg.cus_mean_threshold = 0.90;
                cfg.h_critical = 0.95;
                cfg.j_min = 0.55;
                cfg.h_max = 0.55;
            }
            other => {
                return Err(MdmError::Config(format!("unknown config profile: {other}")));
            }
        }
        cfg.profile = name.to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Profile from `MDM_PROFILE` plus numeric env overrides.
    pub fn from_env() -> Result<Self, MdmError> {
        let name = std::env::var("MDM_PROFILE").unwrap_or_else(|_| "base".to_string());
        let mut cfg = Self::profile(&name)?;
        fn over(key: &str, slot: &mut f64) {
            if let Ok(v) = std::env::var(key) {
                if let Ok(x) = v.parse() {
                    *slot = x;
                }
            }
        }
        over("MDM_J_MIN", &mut cfg.j_min);
        over("MDM_H_MAX", &mut cfg.h_max);
        over("MDM_J_CRITICAL", &mut cfg.j_critical);
        over("MDM_H_CRITICAL", &mut cfg.h_critical);
        over("MDM_CUS_MEAN_THRESHOLD", &mut cfg.cus_mean_threshold);
        over("MDM_DELTA_CUS_THRESHOLD", &mut cfg.delta_cus_threshold);
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), MdmError> {
        if !(self.c_min <= self.c_max) {
            return Err(MdmError::Config("c_min must not exceed c_max".into()));
        }
        if self.cus_mean_window == 0 {
            return Err(MdmError::Config("cus_mean_window must be positive".into()));
        }
        // Level 0 with a non-"none" driver would break the level/driver
        // coupling invariant, so the low-confidence level is pinned to 1..=2.
        if !(1..=2).contains(&self.confidence_low_escalation_level) {
            return Err(MdmError::Config(
                "confidence_low_escalation_level must be 1 or 2".into(),
            ));
        }
        for (name, v) in [
            ("j_min", self.j_min),
            ("h_max", self.h_max),
            ("j_critical", self.j_critical),
            ("h_critical", self.h_critical),
        ] {
            if !v.is_finite() {
                return Err(MdmError::Config(format!("{name} must be finite")));
            }
        }
        Ok(())
    }
}
