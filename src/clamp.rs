//! Soft clamp: L1-only re-projection of the chosen action toward the safe
//! baseline. Strength grows with the current combined uncertainty and is
//! capped by the gamma scalar. The clamp never raises the level.

use crate::actions::Action;
use crate::config::Config;

/// Blend `action` toward `cfg.safe_action` with strength
/// `min(gamma, alpha + beta * cus)`, clamped to the unit cube.
pub fn soft_clamp_action(action: &Action, cus: f64, cfg: &Config) -> Action {
    let strength = (cfg.soft_clamp_alpha + cfg.soft_clamp_beta * cus)
        .min(cfg.soft_clamp_gamma)
        .clamp(0.0, 1.0);
    let mut out = [0.0; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (action[i] + strength * (cfg.safe_action[i] - action[i])).clamp(0.0, 1.0);
    }
    out
}

/// The strength the clamp would use at this uncertainty.
pub fn clamp_strength(cus: f64, cfg: &Config) -> f64 {
    (cfg.soft_clamp_alpha + cfg.soft_clamp_beta * cus)
        .min(cfg.soft_clamp_gamma)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_uncertainty_still_applies_the_floor() {
        let cfg = Config::default();
        let a = [1.0, 1.0, 1.0, 0.0];
        let clamped = soft_clamp_action(&a, 0.0, &cfg);
        // strength = alpha = 0.2
        assert!((clamped[0] - 0.8).abs() < 1e-12);
        assert!((clamped[3] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn strength_is_capped_by_gamma() {
        let cfg = Config::default();
        assert!((clamp_strength(10.0, &cfg) - cfg.soft_clamp_gamma).abs() < 1e-12);
    }

    #[test]
    fn full_strength_lands_on_the_safe_action() {
        let mut cfg = Config::default();
        cfg.soft_clamp_alpha = 1.0;
        cfg.soft_clamp_gamma = 1.0;
        let clamped = soft_clamp_action(&[1.0, 0.0, 1.0, 0.0], 0.0, &cfg);
        assert_eq!(clamped, cfg.safe_action);
    }

    #[test]
    fn clamp_moves_every_axis_toward_safe() {
        let cfg = Config::default();
        let a = [0.9, 0.1, 0.8, 0.2];
        let clamped = soft_clamp_action(&a, 0.5, &cfg);
        for i in 0..4 {
            let before = (a[i] - cfg.safe_action[i]).abs();
            let after = (clamped[i] - cfg.safe_action[i]).abs();
            assert!(after <= before, "axis {i} moved away from safe");
        }
    }

    #[test]
    fn output_stays_in_unit_cube() {
        let cfg = Config::default();
        let clamped = soft_clamp_action(&[1.0, 1.0, 1.0, 1.0], 1.0, &cfg);
        assert!(clamped.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
