//! End-to-end pipeline scenarios: each test drives a literal event through
//! the full engine and checks the emitted levels, drivers and packets.

use serde_json::json;

use mdm_arbiter::config::Config;
use mdm_arbiter::encoder::RawEvent;
use mdm_arbiter::engine::{decide, DecideOptions, DecisionContext};
use mdm_arbiter::errors::MdmError;
use mdm_arbiter::invariants::assert_decision_invariants;
use mdm_arbiter::packet::{
    build_decision_packet, decision_packet_to_csv_row, legacy_top_level_key,
    validate_packet_schema_v2, PacketMeta,
};
use mdm_arbiter::replay::{replay, ReplayOptions};

fn event(pairs: &[(&str, f64)]) -> RawEvent {
    pairs.iter().map(|(k, v)| ((*k).to_string(), json!(v))).collect()
}

fn clean_event() -> RawEvent {
    event(&[
        ("physical", 0.8),
        ("social", 0.7),
        ("context", 0.6),
        ("risk", 0.25),
        ("compassion", 0.6),
        ("justice", 0.9),
        ("harm_sens", 0.4),
        ("responsibility", 0.8),
        ("empathy", 0.65),
    ])
}

fn meta() -> PacketMeta {
    PacketMeta {
        run_id: "scenario-run".into(),
        ts: 1_700_000_000.0,
        source: "test".into(),
        entity_id: "e1".into(),
        config_profile: "base".into(),
        latency_ms: Some(5),
        mdm_latency_ms: Some(3),
    }
}

fn deterministic() -> DecideOptions<'static> {
    DecideOptions { deterministic: true, ..Default::default() }
}

// ---------------------------------------------------------------------------
// S1: clean event auto-applies at L0
// ---------------------------------------------------------------------------
#[test]
fn s1_clean_event_is_level_zero() {
    let cfg = Config::default();
    let d = decide(&clean_event(), &cfg, None, &deterministic()).unwrap();

    assert_eq!(d.level, 0);
    assert_eq!(d.escalation_driver, "none");
    assert!(d.escalation_drivers.is_empty());
    assert!(!d.soft_safe_applied);
    assert!(!d.human_escalation);
    assert!(d.valid_candidate_count > 0);
    assert!(d.constraint_margin > 0.0);
    assert!(d.missing_fields.is_empty());
    assert_eq!(d.input_quality, 1.0);
    assert_decision_invariants(&d).unwrap();

    // Schema v2 packet assembles and validates.
    let packet = build_decision_packet(
        &meta(),
        json!({"decision": "ALLOW", "p_damaging": 0.1}),
        json!({"title": "T"}),
        &d,
        None,
    )
    .unwrap();
    validate_packet_schema_v2(&packet).unwrap();
    assert_eq!(packet["mdm"]["level"], json!(0));
    assert_eq!(packet["final_action"], json!("APPLY"));
    assert_eq!(packet["mismatch"], json!(false));

    // Replay matches in every mode.
    let modes =
        ReplayOptions { validate_action: true, verify_hash: true, validate_ethics: true };
    let replayed = replay(&d.trace, &cfg, &modes).unwrap();
    assert_eq!(replayed.action, d.action);
    assert_eq!(replayed.trace_hash, d.trace_hash);
}

// ---------------------------------------------------------------------------
// S2: critical risk trips the fail-safe
// ---------------------------------------------------------------------------
#[test]
fn s2_fail_safe_overrides_to_safe_action() {
    let cfg = Config::default();
    let mut raw = clean_event();
    raw.insert("risk".into(), json!(0.98));
    raw.insert("harm_sens".into(), json!(0.95));
    raw.insert("justice".into(), json!(0.05));

    let d = decide(&raw, &cfg, None, &deterministic()).unwrap();
    assert_eq!(d.level, 2);
    assert_eq!(d.escalation_drivers, vec!["fail_safe"]);
    assert_eq!(d.action, cfg.safe_action);
    assert!(!d.soft_safe_applied);
    assert!(d.human_escalation);
    assert_eq!(d.final_action(), "HOLD_REVIEW");
    assert!(d.fail_safe_reason.as_deref().unwrap().contains("J_critical"));
    assert_decision_invariants(&d).unwrap();
}

// ---------------------------------------------------------------------------
// S3: borderline confidence soft-clamps at L1
// ---------------------------------------------------------------------------
#[test]
fn s3_borderline_confidence_applies_soft_clamp() {
    let cfg = Config::default();
    // Justice sits just above the box floor, so the margin is thin and
    // confidence lands between the force and suggest thresholds.
    let raw = event(&[
        ("physical", 0.5),
        ("social", 0.5),
        ("context", 0.5),
        ("risk", 0.8),
        ("compassion", 0.5),
        ("justice", 0.75),
        ("harm_sens", 0.9),
        ("responsibility", 0.5),
        ("empathy", 0.5),
    ]);

    let d = decide(&raw, &cfg, None, &deterministic()).unwrap();
    assert!(
        d.confidence >= cfg.confidence_escalation_force
            && d.confidence < cfg.confidence_suggest_threshold,
        "confidence {} not in the borderline band",
        d.confidence
    );
    assert_eq!(d.level, 1);
    assert!(d.soft_safe_applied);
    assert!(d.escalation_drivers.iter().any(|x| x == "confidence_low"));
    assert_ne!(d.action, d.raw_action);
    let self_reg = d.self_regulation.expect("clamp must record self-regulation");
    assert!(self_reg.delta_confidence >= 0.0);
    assert!(!d.human_escalation);
    assert_eq!(d.final_action(), "APPLY_CLAMPED");
    assert_decision_invariants(&d).unwrap();

    // The clamp record survives into the packet.
    let packet = build_decision_packet(
        &meta(),
        json!({"decision": "FLAG", "p_damaging": 0.8}),
        json!({}),
        &d,
        None,
    )
    .unwrap();
    assert_eq!(packet["mdm"]["soft_clamp"], json!(true));
    let row = decision_packet_to_csv_row(&packet).unwrap();
    assert_eq!(row["clamp_applied"], json!(true));
}

// ---------------------------------------------------------------------------
// S4: an impossible constraint box leaves no valid candidates
// ---------------------------------------------------------------------------
#[test]
fn s4_impossible_box_holds_for_review() {
    let mut cfg = Config::default();
    cfg.j_min = 0.99;
    cfg.h_max = 0.01;

    let d = decide(&clean_event(), &cfg, None, &deterministic()).unwrap();
    assert_eq!(d.level, 2);
    assert_eq!(d.escalation_drivers, vec!["no_valid_candidates"]);
    assert_eq!(d.valid_candidate_count, 0);
    assert_eq!(d.action, cfg.safe_action);
    assert_eq!(d.frontier_size, 0);
    assert_eq!(d.pareto_gap, None);
    assert!(d.invalid_reason_counts.contains_key("J_below_min"));
    assert_decision_invariants(&d).unwrap();
}

// ---------------------------------------------------------------------------
// S5 lives in tests/drift_preemption.rs
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// S6: packets without `mdm` are rejected loudly
// ---------------------------------------------------------------------------
#[test]
fn s6_schema_rejects_packets_without_mdm() {
    let bad = json!({"schema_version": "2.0", "run_id": "x", "ts": 1.0});
    let err = validate_packet_schema_v2(&bad).unwrap_err();
    assert!(matches!(err, MdmError::SchemaViolation(_)));
    assert_eq!(err.exit_code(), 2);

    // No CSV row is produced for it either.
    assert!(decision_packet_to_csv_row(&bad).is_err());
}

#[test]
fn s6_schema_rejects_legacy_top_level_key() {
    let mut packet = json!({"mdm": {"level": 0}});
    packet[legacy_top_level_key()] = json!({"old": true});
    let err = validate_packet_schema_v2(&packet).unwrap_err();
    assert!(matches!(err, MdmError::SchemaViolation(_)));
}

// ---------------------------------------------------------------------------
// The mdm block carries the complete audit surface
// ---------------------------------------------------------------------------
#[test]
fn packet_mdm_carries_the_full_audit_surface() {
    let cfg = Config::default();
    let mut ctx = DecisionContext::default();
    let d = decide(&clean_event(), &cfg, Some(&mut ctx), &deterministic()).unwrap();
    let packet = build_decision_packet(
        &meta(),
        json!({"decision": "ALLOW", "p_damaging": 0.1}),
        json!({}),
        &d,
        None,
    )
    .unwrap();
    let mdm = packet["mdm"].as_object().unwrap();
    for key in [
        "level",
        "reason",
        "soft_clamp",
        "signals",
        "explain",
        "human_escalation",
        "action",
        "raw_action",
        "confidence",
        "confidence_internal",
        "confidence_external",
        "confidence_used",
        "confidence_source",
        "constraint_margin",
        "uncertainty",
        "temporal_drift",
        "escalation_driver",
        "escalation_drivers",
        "selection_reason",
        "J",
        "H",
        "worst_H",
        "worst_J",
        "state_hash",
        "config_hash",
        "valid_candidate_count",
        "invalid_reason_counts",
        "missing_fields",
        "input_quality",
        "evidence_consistency",
        "frontier_size",
        "pareto_gap",
    ] {
        assert!(mdm.contains_key(key), "mdm missing required key {key}");
    }
    // The packet never carries the legacy top-level key.
    assert!(!packet.as_object().unwrap().contains_key(&legacy_top_level_key()));
}

// ---------------------------------------------------------------------------
// Level/driver coupling holds across a profile sweep
// ---------------------------------------------------------------------------
#[test]
fn emitted_decisions_satisfy_invariants_across_profiles() {
    let events = [
        clean_event(),
        event(&[("risk", 0.9), ("justice", 0.3), ("harm_sens", 0.8)]),
        event(&[("justice", 0.7), ("risk", 0.5)]),
        event(&[]),
    ];
    for profile in ["base", "production_safe", "high_critical", "calibrated"] {
        let cfg = Config::profile(profile).unwrap();
        let mut ctx = DecisionContext::default();
        for raw in &events {
            let d = decide(raw, &cfg, Some(&mut ctx), &deterministic()).unwrap();
            assert_decision_invariants(&d).unwrap();
            assert_eq!(d.level == 0, d.escalation_driver == "none", "profile {profile}");
        }
    }
}

// ---------------------------------------------------------------------------
// Missing fields demote quality but never raise
// ---------------------------------------------------------------------------
#[test]
fn partial_events_record_missing_fields() {
    let cfg = Config::default();
    let raw = event(&[("risk", 0.3), ("justice", 0.9), ("responsibility", 0.8)]);
    let d = decide(&raw, &cfg, None, &deterministic()).unwrap();
    assert_eq!(d.missing_fields.len(), 6);
    assert!((d.input_quality - 3.0 / 9.0).abs() < 1e-12);
    // Quality discounts effective confidence below the internal value.
    assert!(d.confidence_used < d.confidence_internal);
    assert_decision_invariants(&d).unwrap();
}
