//! Decision invariants: rules that must never break in an emitted packet.
//!
//! Hard invariants are engine/packet semantics; a violation is a bug.
//! The soft margin rule is policy and bypassed for the hard overrides.

use serde_json::{json, Value};

use crate::engine::{final_action_for_level, Decision};
use crate::errors::MdmError;
use crate::packet::legacy_top_level_key;

pub const HARD_INVARIANTS: [&str; 7] = [
    "inv_fail_safe_level",
    "inv_fail_safe_action",
    "inv_fail_safe_clamp",
    "inv_no_valid_level",
    "inv_no_valid_count",
    "inv_l1_clamp",
    "inv_l0_driver",
];

pub const SOFT_INVARIANTS: [&str; 1] = ["inv_margin_driver"];

fn mdm_of(p: &Value) -> &Value {
    p.get("mdm").unwrap_or(p)
}

fn level_of(p: &Value) -> i64 {
    let m = mdm_of(p);
    m.get("level").or_else(|| m.get("escalation")).and_then(Value::as_i64).unwrap_or(0)
}

fn primary_driver_of(p: &Value) -> String {
    let m = mdm_of(p);
    if let Some(list) = m.get("escalation_drivers").and_then(Value::as_array) {
        if let Some(first) = list.first().and_then(Value::as_str) {
            return first.to_string();
        }
    }
    if let Some(joined) = m.get("escalation_driver").and_then(Value::as_str) {
        if let Some(first) = joined.split('|').find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    m.get("reason").and_then(Value::as_str).unwrap_or("none").to_string()
}

fn final_action_of(p: &Value) -> String {
    p.get("final_action")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| final_action_for_level(level_of(p) as u8).to_string())
}

fn clamp_applied_of(p: &Value) -> bool {
    let m = mdm_of(p);
    if let Some(flag) = m.get("soft_safe_applied").and_then(Value::as_bool) {
        return flag;
    }
    let clamps = p.get("clamps").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
    clamps > 0 && level_of(p) == 1
}

/// Check a packet (or packet view of an engine output). Returns the list
/// of `(invariant, message)` violations; empty means all hold. With
/// `strict` false, rules over absent fields are skipped.
pub fn check_decision_invariants(
    packet: &Value,
    strict: bool,
) -> Result<Vec<(String, String)>, MdmError> {
    if packet
        .as_object()
        .is_some_and(|o| o.contains_key(&legacy_top_level_key()))
    {
        return Err(MdmError::SchemaViolation(
            "packet must not contain the legacy key; schema v2 uses 'mdm' only".into(),
        ));
    }

    let level = level_of(packet);
    let driver = primary_driver_of(packet);
    let final_action = final_action_of(packet);
    let clamp_applied = clamp_applied_of(packet);
    let valid_count = mdm_of(packet).get("valid_candidate_count").and_then(Value::as_i64);
    let margin = mdm_of(packet).get("constraint_margin").and_then(Value::as_f64);

    let mut violations: Vec<(String, String)> = Vec::new();
    let mut fail = |name: &str, msg: String| violations.push((name.to_string(), msg));

    if driver == "fail_safe" {
        if level != 2 {
            fail("inv_fail_safe_level", format!("driver=fail_safe but level={level} (expected 2)"));
        }
        if final_action != "HOLD_REVIEW" {
            fail(
                "inv_fail_safe_action",
                format!("driver=fail_safe but final_action={final_action} (expected HOLD_REVIEW)"),
            );
        }
        if clamp_applied {
            fail("inv_fail_safe_clamp", "driver=fail_safe but clamp applied".to_string());
        }
    }

    if driver == "no_valid_candidates" {
        if level != 2 {
            fail(
                "inv_no_valid_level",
                format!("driver=no_valid_candidates but level={level} (expected 2)"),
            );
        }
        if strict {
            if let Some(count) = valid_count {
                if count != 0 {
                    fail(
                        "inv_no_valid_count",
                        format!(
                            "driver=no_valid_candidates but valid_candidate_count={count} \
                             (expected 0)"
                        ),
                    );
                }
            }
        }
    }

    if level == 1 && !clamp_applied {
        fail("inv_l1_clamp", "level=1 but no clamp applied".to_string());
    }

    if level == 0 && driver != "none" {
        fail("inv_l0_driver", format!("level=0 but driver={driver} (expected none)"));
    }

    if let Some(m) = margin {
        let exempt = matches!(driver.as_str(), "fail_safe" | "no_valid_candidates" | "none");
        let chained = mdm_of(packet)
            .get("escalation_driver")
            .and_then(Value::as_str)
            .is_some_and(|d| d.contains("constraint_violation"));
        if m < 0.0 && !exempt && !chained {
            fail(
                "inv_margin_driver",
                format!("constraint_margin={m}<0 but constraint_violation not in driver chain"),
            );
        }
    }

    Ok(violations)
}

/// Packet-shaped view of a raw engine output, for in-process assertion.
pub fn packet_view_of_decision(decision: &Decision) -> Result<Value, MdmError> {
    let mut mdm = serde_json::to_value(decision)?;
    if let Some(obj) = mdm.as_object_mut() {
        obj.remove("trace");
        obj.insert("level".into(), json!(decision.level));
    }
    let clamps = if decision.soft_safe_applied {
        json!([{"type": "soft_safe"}])
    } else {
        json!([])
    };
    Ok(json!({
        "mdm": mdm,
        "final_action": decision.final_action(),
        "clamps": clamps,
    }))
}

/// Strict-mode assertion used by the engine and the loop.
pub fn assert_decision_invariants(decision: &Decision) -> Result<(), MdmError> {
    let view = packet_view_of_decision(decision)?;
    let violations = check_decision_invariants(&view, true)?;
    if violations.is_empty() {
        Ok(())
    } else {
        let detail = violations
            .iter()
            .map(|(name, msg)| format!("{name}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(MdmError::InvariantViolation(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(level: i64, drivers: &[&str], clamped: bool) -> Value {
        json!({
            "mdm": {
                "level": level,
                "escalation_drivers": drivers,
                "escalation_driver": drivers.join("|"),
                "soft_safe_applied": clamped,
                "valid_candidate_count": 10,
                "constraint_margin": 0.2,
            },
            "final_action": final_action_for_level(level as u8),
            "clamps": [],
        })
    }

    #[test]
    fn clean_l0_packet_passes() {
        let v = check_decision_invariants(&packet(0, &[], false), true).unwrap();
        assert!(v.is_empty(), "{v:?}");
    }

    #[test]
    fn l0_with_driver_is_flagged() {
        let v = check_decision_invariants(&packet(0, &["confidence_low"], false), true).unwrap();
        assert_eq!(v[0].0, "inv_l0_driver");
    }

    #[test]
    fn l1_requires_a_clamp() {
        let v = check_decision_invariants(&packet(1, &["confidence_low"], false), true).unwrap();
        assert!(v.iter().any(|(n, _)| n == "inv_l1_clamp"));
        let ok = check_decision_invariants(&packet(1, &["confidence_low"], true), true).unwrap();
        assert!(ok.is_empty());
    }

    #[test]
    fn fail_safe_rules_bundle() {
        let mut p = packet(1, &["fail_safe"], true);
        p["final_action"] = json!("APPLY");
        let v = check_decision_invariants(&p, true).unwrap();
        let names: Vec<_> = v.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"inv_fail_safe_level"));
        assert!(names.contains(&"inv_fail_safe_action"));
        assert!(names.contains(&"inv_fail_safe_clamp"));
    }

    #[test]
    fn no_valid_requires_zero_candidates() {
        let mut p = packet(2, &["no_valid_candidates"], false);
        let v = check_decision_invariants(&p, true).unwrap();
        assert!(v.iter().any(|(n, _)| n == "inv_no_valid_count"));
        p["mdm"]["valid_candidate_count"] = json!(0);
        assert!(check_decision_invariants(&p, true).unwrap().is_empty());
    }

    #[test]
    fn negative_margin_needs_constraint_violation_in_chain() {
        let mut p = packet(2, &["h_critical"], false);
        p["mdm"]["constraint_margin"] = json!(-0.1);
        let v = check_decision_invariants(&p, true).unwrap();
        assert!(v.iter().any(|(n, _)| n == "inv_margin_driver"));

        let mut ok = packet(2, &["h_critical", "constraint_violation"], false);
        ok["mdm"]["constraint_margin"] = json!(-0.1);
        assert!(check_decision_invariants(&ok, true).unwrap().is_empty());
    }

    #[test]
    fn legacy_key_fails_loudly() {
        let mut p = packet(0, &[], false);
        p[legacy_top_level_key()] = json!({});
        assert!(check_decision_invariants(&p, true).is_err());
    }
}
