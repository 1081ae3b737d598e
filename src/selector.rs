//! Action selection: Pareto frontier over `(-H, J, W, C)` with a strict
//! lexicographic tie-break inside the frontier.
//!
//! Tie-break order: constraint margin descending, H ascending, J
//! descending, W descending, C descending. With no valid candidates the
//! selector falls back to the configured safe action.

use std::cmp::Ordering;

use crate::actions::Action;
use crate::config::Config;
use crate::constraints::constraint_margin;
use crate::moral::MoralScores;

/// Selection reasons recorded in the trace and packet.
pub const REASON_SINGLE: &str = "single";
pub const REASON_PARETO: &str = "pareto_tiebreak";
pub const REASON_NO_VALID: &str = "no_valid_fallback";
pub const REASON_FAIL_SAFE: &str = "fail_safe";

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub action: Action,
    /// Index into the candidate list; `None` for the safe fallback.
    pub chosen_idx: Option<usize>,
    /// Objective value of the chosen action; `None` for the fallback.
    pub score: Option<f64>,
    pub reason: &'static str,
    pub frontier_size: usize,
    /// Objective gap between the two best frontier members; `None` for a
    /// singleton frontier or the fallback.
    pub pareto_gap: Option<f64>,
}

/// Selector objective `S = alpha*W + beta*J - gamma*H + delta*C`.
pub fn objective(s: &MoralScores, cfg: &Config) -> f64 {
    let w = &cfg.weights;
    w.alpha * s.w + w.beta * s.j - w.gamma * s.h + w.delta * s.c
}

/// `a` dominates `b` on `(-H, J, W, C)`: at least as good everywhere,
/// strictly better somewhere.
fn dominates(a: &MoralScores, b: &MoralScores) -> bool {
    let ge = a.h <= b.h && a.j >= b.j && a.w >= b.w && a.c >= b.c;
    let gt = a.h < b.h || a.j > b.j || a.w > b.w || a.c > b.c;
    ge && gt
}

fn tie_break(a: &(f64, MoralScores), b: &(f64, MoralScores)) -> Ordering {
    // (margin, scores); margin desc, then H asc, J desc, W desc, C desc.
    b.0.total_cmp(&a.0)
        .then(a.1.h.total_cmp(&b.1.h))
        .then(b.1.j.total_cmp(&a.1.j))
        .then(b.1.w.total_cmp(&a.1.w))
        .then(b.1.c.total_cmp(&a.1.c))
}

pub fn select_action(candidates: &[(Action, MoralScores)], cfg: &Config) -> SelectionResult {
    if candidates.is_empty() {
        return SelectionResult {
            action: cfg.safe_action,
            chosen_idx: None,
            score: None,
            reason: REASON_NO_VALID,
            frontier_size: 0,
            pareto_gap: None,
        };
    }

    let mut frontier: Vec<usize> = Vec::new();
    'outer: for (i, (_, si)) in candidates.iter().enumerate() {
        for (j, (_, sj)) in candidates.iter().enumerate() {
            if i != j && dominates(sj, si) {
                continue 'outer;
            }
        }
        frontier.push(i);
    }

    let mut gaps: Vec<f64> =
        frontier.iter().map(|&i| objective(&candidates[i].1, cfg)).collect();
    gaps.sort_by(|a, b| b.total_cmp(a));
    let pareto_gap = (gaps.len() >= 2).then(|| gaps[0] - gaps[1]);

    let chosen = *frontier
        .iter()
        .min_by(|&&i, &&j| {
            let ki = (constraint_margin(&candidates[i].1, cfg), candidates[i].1);
            let kj = (constraint_margin(&candidates[j].1, cfg), candidates[j].1);
            tie_break(&ki, &kj)
        })
        .expect("frontier of a non-empty candidate set is non-empty");

    SelectionResult {
        action: candidates[chosen].0,
        chosen_idx: Some(chosen),
        score: Some(objective(&candidates[chosen].1, cfg)),
        reason: if frontier.len() > 1 { REASON_PARETO } else { REASON_SINGLE },
        frontier_size: frontier.len(),
        pareto_gap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(a: Action, w: f64, j: f64, h: f64, c: f64) -> (Action, MoralScores) {
        (a, MoralScores { w, j, h, c })
    }

    #[test]
    fn empty_candidates_fall_back_to_safe_action() {
        let cfg = Config::default();
        let sel = select_action(&[], &cfg);
        assert_eq!(sel.action, cfg.safe_action);
        assert_eq!(sel.reason, REASON_NO_VALID);
        assert_eq!(sel.frontier_size, 0);
        assert_eq!(sel.pareto_gap, None);
        assert_eq!(sel.score, None);
    }

    #[test]
    fn dominated_candidates_never_win() {
        let cfg = Config::default();
        let cands = vec![
            cand([0.0, 0.5, 0.5, 0.0], 0.9, 0.8, 0.1, 0.5),
            // Strictly worse everywhere.
            cand([1.0, 0.0, 0.0, 0.0], 0.5, 0.7, 0.3, 0.4),
        ];
        let sel = select_action(&cands, &cfg);
        assert_eq!(sel.chosen_idx, Some(0));
        assert_eq!(sel.reason, REASON_SINGLE);
        assert_eq!(sel.frontier_size, 1);
        assert_eq!(sel.pareto_gap, None);
    }

    #[test]
    fn margin_breaks_frontier_ties_first() {
        let cfg = Config::default();
        // Both on the frontier (W vs C trade-off); the first has the larger
        // box margin (C nearer the middle of [0.05, 0.95]).
        let cands = vec![
            cand([0.0, 0.5, 0.25, 0.0], 0.9, 0.80, 0.0, 0.50),
            cand([0.0, 1.0, 0.25, 0.0], 0.8, 0.80, 0.0, 0.90),
        ];
        let sel = select_action(&cands, &cfg);
        assert_eq!(sel.chosen_idx, Some(0));
        assert_eq!(sel.reason, REASON_PARETO);
        assert_eq!(sel.frontier_size, 2);
        let gap = sel.pareto_gap.unwrap();
        // S0 = 0.9+0.8+0.25 = 1.95, S1 = 0.8+0.8+0.45 = 2.05 -> gap 0.1.
        assert!((gap - 0.1).abs() < 1e-12);
    }

    #[test]
    fn h_breaks_equal_margin_ties() {
        let mut cfg = Config::default();
        // Widen the box so both candidates share the same binding margin.
        cfg.c_min = 0.0;
        cfg.c_max = 1.0;
        cfg.h_max = 1.0;
        let cands = vec![
            cand([0.5, 0.5, 0.5, 0.0], 0.6, 0.70, 0.10, 0.5),
            cand([0.0, 0.5, 0.5, 0.0], 0.5, 0.70, 0.05, 0.5),
        ];
        // Margin is J - j_min = 0.05 for both; lower H wins.
        let sel = select_action(&cands, &cfg);
        assert_eq!(sel.chosen_idx, Some(1));
    }

    #[test]
    fn selection_is_order_independent() {
        let cfg = Config::default();
        let a = cand([0.0, 0.5, 0.25, 0.0], 0.9, 0.80, 0.0, 0.50);
        let b = cand([0.0, 1.0, 0.25, 0.0], 0.8, 0.80, 0.0, 0.90);
        let sel1 = select_action(&[a, b], &cfg);
        let sel2 = select_action(&[b, a], &cfg);
        assert_eq!(sel1.action, sel2.action);
        assert_eq!(sel1.frontier_size, sel2.frontier_size);
    }
}
