//! Moral scoring: `(x_ext, x_moral, action) -> {W, J, H, C}`.
//!
//! The reference scorer is deterministic, side-effect-free and continuous
//! in the action vector, so soft clamping moves scores proportionally.
//! All outputs are in `[0,1]`.
//!
//! A private scorer can be injected through [`MoralModel`]; on absence or
//! failure the reference runs and the failure is demoted to a log line.

use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::encoder::StateVector;
use crate::logging::{self, Domain, Level};

/// The four moral dimensions of a scored action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct MoralScores {
    /// Wellbeing produced by the action.
    pub w: f64,
    /// Justice alignment.
    pub j: f64,
    /// Harm inflicted by the action itself.
    pub h: f64,
    /// Care / compassion expressed.
    pub c: f64,
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Reference scorer.
///
/// With `a = [severity, compassion, intervention, delay]` and the event's
/// risk `r`:
///
/// - wellbeing rewards intervention proportional to risk, timeliness under
///   risk, and decisive severity, discounted when compassion slows the
///   response in a risky situation;
/// - justice is carried by the event's own justice/responsibility signals;
/// - harm is a property of what the action does: severity tempered by the
///   harm sensitivity of the situation and by compassion. The safe baseline
///   (zero severity) therefore scores `H = 0`;
/// - care scales the action's compassion by the event's compassion and
///   empathy signals.
pub fn evaluate_moral(x: &StateVector, a: &Action) -> MoralScores {
    let [severity, compassion, intervention, delay] = *a;
    let r = x.risk();

    let w = clamp01(
        (1.0 - (intervention - r).abs())
            * (0.6 + 0.4 * x.social())
            * (0.8 + 0.2 * x.physical())
            * (1.0 - 0.3 * delay * r)
            * (0.65 + 0.35 * severity)
            * (1.0 - 0.2 * compassion * r),
    );
    let j = clamp01(x.justice() * (0.8 + 0.2 * x.responsibility()));
    let h = clamp01(severity * (0.25 + 0.6 * x.harm_sens()) * (1.0 - 0.35 * compassion));
    let c = clamp01(compassion * (0.5 + 0.5 * x.compassion()) * (0.8 + 0.2 * x.empathy()));

    MoralScores { w, j, h, c }
}

/// Injected private scorer. Implementations must be pure per call.
pub trait MoralModel: Send + Sync {
    fn evaluate(&self, x: &StateVector, a: &Action) -> anyhow::Result<MoralScores>;
}

/// Score through the private hook when present; fall back to the reference
/// on absence or error. A hook failure is never fatal.
pub fn evaluate_with_hook(
    hook: Option<&dyn MoralModel>,
    x: &StateVector,
    a: &Action,
) -> MoralScores {
    if let Some(model) = hook {
        match model.evaluate(x, a) {
            Ok(scores) => {
                return MoralScores {
                    w: clamp01(scores.w),
                    j: clamp01(scores.j),
                    h: clamp01(scores.h),
                    c: clamp01(scores.c),
                }
            }
            Err(err) => {
                logging::log_kv(
                    Level::Warn,
                    Domain::Engine,
                    "private_model_error",
                    &[("error", err.to_string().as_str())],
                );
            }
        }
    }
    evaluate_moral(x, a)
}
