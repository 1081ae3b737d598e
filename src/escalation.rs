//! Escalation resolution: base level and driver from the confidence /
//! margin / harm signals, plus the fixed driver priority used to keep the
//! primary driver stable when several fire at once.

use crate::config::Config;

pub const DRIVER_NONE: &str = "none";
pub const DRIVER_FAIL_SAFE: &str = "fail_safe";
pub const DRIVER_NO_VALID: &str = "no_valid_candidates";
pub const DRIVER_H_CRITICAL: &str = "h_critical";
pub const DRIVER_H_HIGH: &str = "h_high";
pub const DRIVER_CONSTRAINT: &str = "constraint_violation";
pub const DRIVER_CONFIDENCE_LOW: &str = "confidence_low";
pub const DRIVER_AS_NORM_LOW: &str = "as_norm_low";
pub const DRIVER_DIVERGENCE: &str = "divergence";

/// Priority order by substring match; unknown drivers sort last. The
/// composite driver string `"A|B"` is always the join in this order.
const DRIVER_PRIORITY: [&str; 7] = [
    "fail_safe",
    "no_valid_candidates",
    "h_critical",
    "constraint_violation",
    "as_norm",
    "temporal_drift",
    "confidence",
];

pub fn driver_priority(driver: &str) -> usize {
    let lower = driver.to_lowercase();
    DRIVER_PRIORITY
        .iter()
        .position(|key| lower.contains(key))
        .unwrap_or(DRIVER_PRIORITY.len())
}

/// Stable sort by priority; equal-priority drivers keep insertion order.
pub fn sort_drivers(drivers: &mut [String]) {
    drivers.sort_by_key(|d| driver_priority(d));
}

/// Inputs to the base escalation decision, all read from the selected
/// action and its uncertainty record.
#[derive(Debug, Clone, Copy)]
pub struct EscalationSignals {
    pub effective_confidence: f64,
    pub constraint_margin: f64,
    pub h_selected: f64,
    pub as_norm: Option<f64>,
    pub divergence: f64,
}

/// Base `(level, driver)`, first matching rule wins.
pub fn compute_escalation_decision(sig: &EscalationSignals, cfg: &Config) -> (u8, &'static str) {
    if sig.h_selected > cfg.h_critical {
        return (2, DRIVER_H_CRITICAL);
    }
    if sig.constraint_margin < 0.0 {
        return (2, DRIVER_CONSTRAINT);
    }
    if sig.effective_confidence < cfg.confidence_escalation_force {
        return (2, DRIVER_CONFIDENCE_LOW);
    }
    if sig.h_selected > cfg.h_max {
        return (1, DRIVER_H_HIGH);
    }
    if sig.effective_confidence < cfg.confidence_suggest_threshold {
        return (cfg.confidence_low_escalation_level, DRIVER_CONFIDENCE_LOW);
    }
    if sig.as_norm.is_some_and(|a| a < cfg.as_soft_threshold) {
        return (1, DRIVER_AS_NORM_LOW);
    }
    if sig.divergence > cfg.divergence_threshold {
        return (1, DRIVER_DIVERGENCE);
    }
    (0, DRIVER_NONE)
}

/// Level alone, same rule ladder.
pub fn compute_escalation_level(sig: &EscalationSignals, cfg: &Config) -> u8 {
    compute_escalation_decision(sig, cfg).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(conf: f64, margin: f64, h: f64) -> EscalationSignals {
        EscalationSignals {
            effective_confidence: conf,
            constraint_margin: margin,
            h_selected: h,
            as_norm: Some(0.5),
            divergence: 0.0,
        }
    }

    #[test]
    fn clean_signals_stay_level_zero() {
        let cfg = Config::default();
        assert_eq!(compute_escalation_decision(&sig(0.9, 0.2, 0.1), &cfg), (0, DRIVER_NONE));
    }

    #[test]
    fn critical_harm_outranks_everything() {
        let cfg = Config::default();
        let s = EscalationSignals { h_selected: 0.99, ..sig(0.1, -0.5, 0.0) };
        assert_eq!(compute_escalation_decision(&s, &cfg), (2, DRIVER_H_CRITICAL));
    }

    #[test]
    fn negative_margin_forces_review() {
        let cfg = Config::default();
        assert_eq!(
            compute_escalation_decision(&sig(0.9, -0.01, 0.1), &cfg),
            (2, DRIVER_CONSTRAINT)
        );
    }

    #[test]
    fn confidence_ladder_distinguishes_force_and_suggest() {
        let cfg = Config::default();
        assert_eq!(
            compute_escalation_decision(&sig(0.2, 0.2, 0.1), &cfg),
            (2, DRIVER_CONFIDENCE_LOW)
        );
        assert_eq!(
            compute_escalation_decision(&sig(0.45, 0.2, 0.1), &cfg),
            (cfg.confidence_low_escalation_level, DRIVER_CONFIDENCE_LOW)
        );
    }

    #[test]
    fn priority_sort_is_fixed_and_stable() {
        let mut drivers = vec![
            "temporal_drift:mean".to_string(),
            "confidence_low".to_string(),
            "fail_safe".to_string(),
            "h_critical".to_string(),
            "mystery_driver".to_string(),
            "constraint_violation".to_string(),
        ];
        sort_drivers(&mut drivers);
        assert_eq!(
            drivers,
            vec![
                "fail_safe",
                "h_critical",
                "constraint_violation",
                "temporal_drift:mean",
                "confidence_low",
                "mystery_driver",
            ]
        );
    }

    #[test]
    fn unknown_drivers_rank_last() {
        assert!(driver_priority("whatever") > driver_priority("confidence_low"));
        assert_eq!(driver_priority("fail_safe"), 0);
    }
}
