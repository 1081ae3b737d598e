//! Constraint validation: reject candidate actions whose scores fall
//! outside the configured `[J_min, H_max, C_min, C_max]` box.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::moral::MoralScores;

/// Violation tags, stable identifiers used in `invalid_reason_counts`.
pub const J_BELOW_MIN: &str = "J_below_min";
pub const H_ABOVE_MAX: &str = "H_above_max";
pub const C_BELOW_MIN: &str = "C_below_min";
pub const C_ABOVE_MAX: &str = "C_above_max";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintVerdict {
    pub valid: bool,
    pub violations: Vec<&'static str>,
}

pub fn validate_constraints(scores: &MoralScores, cfg: &Config) -> ConstraintVerdict {
    let mut violations = Vec::new();
    if scores.j < cfg.j_min {
        violations.push(J_BELOW_MIN);
    }
    if scores.h > cfg.h_max {
        violations.push(H_ABOVE_MAX);
    }
    if scores.c < cfg.c_min {
        violations.push(C_BELOW_MIN);
    }
    if scores.c > cfg.c_max {
        violations.push(C_ABOVE_MAX);
    }
    ConstraintVerdict { valid: violations.is_empty(), violations }
}

/// Distance of `(J, H, C)` from the box boundary, taken from the interior:
/// positive inside, negative outside, the minimum over the four faces.
pub fn constraint_margin(scores: &MoralScores, cfg: &Config) -> f64 {
    (scores.j - cfg.j_min)
        .min(cfg.h_max - scores.h)
        .min(scores.c - cfg.c_min)
        .min(cfg.c_max - scores.c)
}

/// Aggregate violation tags into a deterministic (sorted-key) count map.
pub fn count_violations<'a, I>(rejected: I) -> BTreeMap<String, u32>
where
    I: IntoIterator<Item = &'a ConstraintVerdict>,
{
    let mut counts = BTreeMap::new();
    for verdict in rejected {
        for tag in &verdict.violations {
            *counts.entry((*tag).to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(w: f64, j: f64, h: f64, c: f64) -> MoralScores {
        MoralScores { w, j, h, c }
    }

    #[test]
    fn in_box_scores_are_valid_with_positive_margin() {
        let cfg = Config::default();
        let s = scores(0.5, 0.8, 0.2, 0.5);
        let v = validate_constraints(&s, &cfg);
        assert!(v.valid);
        assert!(v.violations.is_empty());
        assert!(constraint_margin(&s, &cfg) > 0.0);
    }

    #[test]
    fn each_face_produces_its_tag() {
        let cfg = Config::default();
        assert_eq!(
            validate_constraints(&scores(0.5, 0.1, 0.2, 0.5), &cfg).violations,
            vec![J_BELOW_MIN]
        );
        assert_eq!(
            validate_constraints(&scores(0.5, 0.8, 0.9, 0.5), &cfg).violations,
            vec![H_ABOVE_MAX]
        );
        assert_eq!(
            validate_constraints(&scores(0.5, 0.8, 0.2, 0.0), &cfg).violations,
            vec![C_BELOW_MIN]
        );
        assert_eq!(
            validate_constraints(&scores(0.5, 0.8, 0.2, 1.0), &cfg).violations,
            vec![C_ABOVE_MAX]
        );
    }

    #[test]
    fn multiple_violations_accumulate() {
        let cfg = Config::default();
        let v = validate_constraints(&scores(0.5, 0.1, 0.9, 0.0), &cfg);
        assert_eq!(v.violations, vec![J_BELOW_MIN, H_ABOVE_MAX, C_BELOW_MIN]);
        let counts = count_violations([&v, &v]);
        assert_eq!(counts.get(J_BELOW_MIN), Some(&2));
        assert_eq!(counts.get(H_ABOVE_MAX), Some(&2));
        // BTreeMap iteration is the sorted-key contract for the packet.
        let keys: Vec<_> = counts.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn margin_is_negative_outside_the_box() {
        let cfg = Config::default();
        assert!(constraint_margin(&scores(0.5, 0.1, 0.2, 0.5), &cfg) < 0.0);
    }
}
