//! Action-space generation: a coarse Cartesian grid over the four action
//! axes, refined locally around the best coarse candidates.
//!
//! Actions are `[severity, compassion, intervention, delay]`, each in
//! `[0,1]`. Generation is a pure function of its inputs, so the space is
//! finite and restartable.

/// Action vector: `[severity, compassion, intervention, delay]`.
pub type Action = [f64; 4];

/// Default grid step on every axis.
pub const DEFAULT_STEP: f64 = 0.25;

/// Refinement step around top coarse candidates.
pub const REFINE_STEP: f64 = 0.25;

/// Dedup quantum: components are compared rounded to 6 decimals.
const DEDUP_SCALE: f64 = 1e6;

fn axis_values(step: f64) -> Vec<f64> {
    let step = if step > 0.0 && step <= 1.0 { step } else { DEFAULT_STEP };
    let n = (1.0 / step).round() as usize;
    (0..=n).map(|i| (i as f64 * step).min(1.0)).collect()
}

/// Coarse grid: Cartesian product over the four axes. `resolution`
/// overrides the step per axis.
pub fn generate_actions(resolution: Option<[f64; 4]>) -> Vec<Action> {
    let steps = resolution.unwrap_or([DEFAULT_STEP; 4]);
    let axes: Vec<Vec<f64>> = steps.iter().map(|s| axis_values(*s)).collect();
    let mut out = Vec::with_capacity(axes.iter().map(Vec::len).product());
    for &s in &axes[0] {
        for &c in &axes[1] {
            for &i in &axes[2] {
                for &d in &axes[3] {
                    out.push([s, c, i, d]);
                }
            }
        }
    }
    out
}

/// Local grid with `step` in a one-step ball around each anchor, clamped
/// to `[0,1]`.
pub fn refine_actions_around(anchors: &[Action], step: f64) -> Vec<Action> {
    let offsets = [-step, 0.0, step];
    let mut out = Vec::with_capacity(anchors.len() * 81);
    for a in anchors {
        for &ds in &offsets {
            for &dc in &offsets {
                for &di in &offsets {
                    for &dd in &offsets {
                        out.push([
                            (a[0] + ds).clamp(0.0, 1.0),
                            (a[1] + dc).clamp(0.0, 1.0),
                            (a[2] + di).clamp(0.0, 1.0),
                            (a[3] + dd).clamp(0.0, 1.0),
                        ]);
                    }
                }
            }
        }
    }
    out
}

/// Stable dedup key: components rounded to 6 decimals.
pub fn action_key(a: &Action) -> [i64; 4] {
    [
        (a[0] * DEDUP_SCALE).round() as i64,
        (a[1] * DEDUP_SCALE).round() as i64,
        (a[2] * DEDUP_SCALE).round() as i64,
        (a[3] * DEDUP_SCALE).round() as i64,
    ]
}
