//! Decision packets: the single audit record emitted for every event at
//! every level, schema v2.0.
//!
//! A v2 packet carries the full engine result under the `mdm` key and must
//! not contain the legacy top-level key of the v1 schema (the key itself is
//! computed, never spelled out, so it cannot leak back in via source
//! search-and-replace).

use serde_json::{json, Map, Value};

use crate::engine::{final_action_for_level, Decision};
use crate::errors::MdmError;
use crate::trace::SCHEMA_VERSION;

/// The forbidden v1 top-level key, assembled from bytes.
pub fn legacy_top_level_key() -> String {
    String::from_utf8(vec![97, 109, 105]).expect("static bytes are valid UTF-8")
}

/// Reject packets that are not schema v2: `mdm` must be present and the
/// legacy top-level key absent.
pub fn validate_packet_schema_v2(packet: &Value) -> Result<(), MdmError> {
    let Some(obj) = packet.as_object() else {
        return Err(MdmError::SchemaViolation("packet must be a JSON object".into()));
    };
    if !obj.contains_key("mdm") {
        return Err(MdmError::SchemaViolation("packet must contain 'mdm' (schema v2)".into()));
    }
    if obj.contains_key(&legacy_top_level_key()) {
        return Err(MdmError::SchemaViolation(
            "packet must not contain the legacy top-level key; schema v2 uses 'mdm' only".into(),
        ));
    }
    Ok(())
}

/// Static description of what the system does at each level.
pub fn level_spec(level: u8) -> Value {
    match level {
        0 => json!({
            "label": "L0",
            "short": "safe, auto-apply",
            "system_action": ["apply the external decision", "record the packet"],
        }),
        1 => json!({
            "label": "L1",
            "short": "borderline, soft clamp",
            "system_action": ["apply with the clamped action", "optionally queue for light review"],
        }),
        _ => json!({
            "label": "L2",
            "short": "hold, human review required",
            "system_action": ["suspend automatic effect", "queue for human review"],
        }),
    }
}

/// Compact signal map surfaced to dashboards and the explain string.
pub fn extract_signals(decision: &Decision) -> Value {
    let mut signals = Map::new();
    signals.insert("cus".into(), json!(decision.uncertainty.cus));
    let cus_mean = decision
        .temporal_drift
        .as_ref()
        .map(|d| d.cus_mean)
        .unwrap_or(decision.uncertainty.cus);
    signals.insert("cus_mean".into(), json!(cus_mean));
    signals.insert("divergence".into(), json!(decision.uncertainty.divergence));
    signals.insert("constraint_margin".into(), json!(decision.constraint_margin));
    signals.insert("confidence".into(), json!(decision.confidence));
    Value::Object(signals)
}

/// One-paragraph human explanation for the level.
pub fn explain_for_level(decision: &Decision, external_decision: &str) -> String {
    let cus = decision.uncertainty.cus;
    let margin = decision.constraint_margin;
    match decision.level {
        2 => {
            let why = match decision.reason.as_str() {
                "fail_safe" => "a safety threshold was breached (fail-safe)",
                "no_valid_fallback" => "no valid safe alternative exists",
                other => other,
            };
            format!(
                "Human review required: {why}. External decision: {external_decision}. \
                 Signals: CUS={cus:.2}, margin={margin:.2}, \
                 divergence={:.2}.",
                decision.uncertainty.divergence
            )
        }
        1 => {
            let cause = if cus > 0.7 { "high uncertainty" } else { "borderline confidence" };
            format!(
                "Borderline decision: soft clamp applied ({cause}). \
                 External decision: {external_decision}."
            )
        }
        _ => format!(
            "Safe: low uncertainty, consistent evidence. External decision: {external_decision}."
        ),
    }
}

/// Metadata supplied by the loop, not by the engine.
#[derive(Debug, Clone, Default)]
pub struct PacketMeta {
    pub run_id: String,
    pub ts: f64,
    pub source: String,
    pub entity_id: String,
    pub config_profile: String,
    pub latency_ms: Option<u64>,
    pub mdm_latency_ms: Option<u64>,
}

/// Assemble the schema-v2 packet. `external` and `input` are stored as
/// given (the caller redacts them first); `review` defaults to empty.
pub fn build_decision_packet(
    meta: &PacketMeta,
    external: Value,
    input: Value,
    decision: &Decision,
    review: Option<Value>,
) -> Result<Value, MdmError> {
    let external_decision =
        external.get("decision").and_then(Value::as_str).unwrap_or("-").to_string();

    let mut mdm = match serde_json::to_value(decision)? {
        Value::Object(map) => map,
        _ => return Err(MdmError::Runtime("decision did not serialize to an object".into())),
    };
    // The full trace is persisted separately; the packet stays flat.
    mdm.remove("trace");
    mdm.insert("level".into(), json!(decision.level));
    mdm.insert("soft_clamp".into(), json!(decision.soft_safe_applied));
    mdm.insert("J".into(), json!(decision.scores.j));
    mdm.insert("H".into(), json!(decision.scores.h));
    mdm.insert("signals".into(), extract_signals(decision));
    mdm.insert("explain".into(), json!(explain_for_level(decision, &external_decision)));

    let mismatch = matches!(
        (external_decision.as_str(), decision.level),
        ("ALLOW", 1 | 2) | ("FLAG", 0)
    );

    let packet = json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": meta.run_id,
        "ts": meta.ts,
        "source": meta.source,
        "entity_id": meta.entity_id,
        "external": external,
        "input": input,
        "mdm": Value::Object(mdm),
        "review": review.unwrap_or_else(|| json!({})),
        "config_profile": meta.config_profile,
        "final_action": final_action_for_level(decision.level),
        "final_action_reason": decision.escalation_driver,
        "mismatch": mismatch,
        "latency_ms": meta.latency_ms,
        "mdm_latency_ms": meta.mdm_latency_ms,
    });
    validate_packet_schema_v2(&packet)?;
    Ok(packet)
}

/// Minimum dashboard projection of a packet.
pub fn decision_packet_to_flat_row(packet: &Value) -> Result<Value, MdmError> {
    validate_packet_schema_v2(packet)?;
    let input = packet.get("input").cloned().unwrap_or(json!({}));
    let ext = packet.get("external").cloned().unwrap_or(json!({}));
    let mdm = &packet["mdm"];
    let drift = mdm.get("temporal_drift").cloned().unwrap_or(Value::Null);
    Ok(json!({
        "time": packet.get("ts"),
        "title": input.get("title").cloned().unwrap_or(json!("")),
        "user": input.get("user").cloned().unwrap_or(json!("")),
        "revid": input.get("revid").cloned().unwrap_or(json!("")),
        "external_decision": ext.get("decision").cloned().unwrap_or(json!("")),
        "p_damaging": ext.get("p_damaging"),
        "mdm_level": mdm.get("level").cloned().unwrap_or(json!(0)),
        "clamp": mdm.get("soft_clamp").cloned().unwrap_or(json!(false)),
        "reason": packet.get("final_action_reason")
            .or_else(|| mdm.get("reason"))
            .cloned()
            .unwrap_or(json!("")),
        "selection_reason": mdm.get("selection_reason"),
        "final_action": packet.get("final_action").cloned().unwrap_or(json!("")),
        "mismatch": packet.get("mismatch").cloned().unwrap_or(json!(false)),
        "run_id": packet.get("run_id").cloned().unwrap_or(json!("")),
        "latency_ms": packet.get("latency_ms"),
        "config_profile": packet.get("config_profile"),
        "input_quality": mdm.get("input_quality"),
        "valid_candidate_count": mdm.get("valid_candidate_count"),
        "frontier_size": mdm.get("frontier_size"),
        "drift_applied": drift.get("applied"),
    }))
}

/// Column order of the full audit CSV.
pub const CSV_COLUMNS: &[&str] = &[
    "time",
    "latency_ms",
    "run_id",
    "title",
    "user",
    "revid",
    "comment",
    "external_decision",
    "external_p_damaging",
    "external_p_goodfaith",
    "external_threshold",
    "external_http_status",
    "external_latency_ms",
    "external_error",
    "external_cache_hit",
    "external_retry_count",
    "external_backoff_ms",
    "schema_version",
    "config_profile",
    "cfg_J_MIN",
    "cfg_H_MAX",
    "cfg_J_CRIT",
    "cfg_H_CRIT",
    "cfg_AS_SOFT_THRESHOLD",
    "cfg_CUS_MEAN_THRESHOLD",
    "cfg_DRIFT_MIN_HISTORY",
    "cfg_CONFIDENCE_ESCALATION_FORCE",
    "mdm_latency_ms",
    "final_action",
    "final_action_reason",
    "mismatch",
    "mdm_level",
    "mdm_reason",
    "selection_reason",
    "fail_safe_reason",
    "escalation_driver",
    "mdm_human_escalation",
    "drift_driver",
    "drift_history_len",
    "drift_min_history",
    "drift_applied",
    "clamp_applied",
    "mdm_soft_clamp",
    "mdm_confidence",
    "mdm_confidence_internal",
    "mdm_confidence_external",
    "mdm_confidence_used",
    "mdm_confidence_source",
    "mdm_constraint_margin",
    "mdm_cus",
    "mdm_cus_mean",
    "mdm_divergence",
    "mdm_delta_cus",
    "mdm_delta_confidence",
    "mdm_action_severity",
    "mdm_action_compassion",
    "mdm_action_intervention",
    "mdm_action_delay",
    "mdm_J",
    "mdm_H",
    "mdm_worst_H",
    "mdm_worst_J",
    "unc_hi",
    "unc_de",
    "unc_de_norm",
    "unc_as_norm",
    "unc_n_candidates",
    "unc_score_best",
    "unc_score_second",
    "unc_action_spread_raw",
    "unc_as_norm_missing",
    "mdm_input_quality",
    "mdm_evidence_consistency",
    "mdm_frontier_size",
    "mdm_pareto_gap",
    "mdm_driver_history_len",
    "mdm_drift_driver_alarm",
    "mdm_missing_fields",
    "mdm_valid_candidate_count",
    "mdm_invalid_reason_counts",
    "mdm_state_hash",
    "mdm_config_hash",
    "review_status",
    "review_decision",
    "review_category",
    "review_note",
];

/// Short documentation per CSV column (subset shown on dashboards).
pub fn csv_column_descriptions() -> &'static [(&'static str, &'static str)] {
    &[
        ("time", "Unix timestamp of the decision event"),
        ("latency_ms", "Total request latency (ms)"),
        ("run_id", "Run/session identifier"),
        ("external_decision", "External decision (ALLOW/FLAG)"),
        ("external_p_damaging", "External risk score"),
        ("mdm_level", "Decision level: 0=L0, 1=L1, 2=L2"),
        ("mdm_reason", "Primary escalation reason"),
        ("selection_reason", "Why the action was selected"),
        ("fail_safe_reason", "Which fail-safe trigger fired, if any"),
        ("escalation_driver", "Sorted composite driver string"),
        ("drift_driver", "Temporal drift trigger: warmup|delta|mean|delta+mean|none"),
        ("clamp_applied", "True when the L1 soft clamp was applied"),
        ("mdm_confidence_used", "Confidence actually used for the level decision"),
        ("mdm_constraint_margin", "Distance of (J,H,C) from the constraint box"),
        ("mdm_cus", "Combined uncertainty score"),
        ("mdm_state_hash", "Canonical state hash (replay anchor)"),
        ("mdm_config_hash", "Canonical config hash"),
        ("mismatch", "External decision and MDM level disagree"),
    ]
}

fn csv_escape(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Render one value under CSV conventions: booleans as `true`/`false`,
/// lists joined by `;`, strings quoted with `"`-escaping, null empty.
pub fn csv_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => csv_escape(s),
        Value::Array(items) => csv_escape(
            &items
                .iter()
                .map(|x| match x {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(";"),
        ),
        Value::Object(map) => csv_escape(
            &map.iter()
                .map(|(k, x)| format!("{k}:{x}"))
                .collect::<Vec<_>>()
                .join(";"),
        ),
    }
}

fn truncated(v: Option<&Value>, limit: usize) -> Value {
    match v.and_then(Value::as_str) {
        Some(s) => json!(s.chars().take(limit).collect::<String>()),
        None => Value::Null,
    }
}

/// Full audit projection keyed by [`CSV_COLUMNS`].
pub fn decision_packet_to_csv_row(packet: &Value) -> Result<Map<String, Value>, MdmError> {
    validate_packet_schema_v2(packet)?;
    let input = packet.get("input").cloned().unwrap_or(json!({}));
    let ext = packet.get("external").cloned().unwrap_or(json!({}));
    let mdm = packet["mdm"].clone();
    let unc = mdm.get("uncertainty").cloned().unwrap_or(json!({}));
    let drift = mdm.get("temporal_drift").cloned().unwrap_or(json!({}));
    let self_reg = mdm.get("self_regulation").cloned().unwrap_or(json!({}));
    let review = packet.get("review").cloned().unwrap_or(json!({}));
    let action = mdm.get("action").and_then(Value::as_array).cloned().unwrap_or_default();
    let level = mdm.get("level").and_then(Value::as_u64).unwrap_or(0);
    let get = |v: &Value, k: &str| v.get(k).cloned().unwrap_or(Value::Null);

    let clamp_applied =
        mdm.get("soft_safe_applied").and_then(Value::as_bool).unwrap_or(false) && level == 1;
    let reason = packet
        .get("final_action_reason")
        .or_else(|| mdm.get("reason"))
        .cloned()
        .unwrap_or(json!(""));

    let mut row = Map::new();
    let mut put = |k: &str, v: Value| {
        row.insert(k.to_string(), v);
    };
    put("time", get(packet, "ts"));
    put("latency_ms", get(packet, "latency_ms"));
    put("run_id", get(packet, "run_id"));
    put("title", get(&input, "title"));
    put("user", get(&input, "user"));
    put("revid", get(&input, "revid"));
    put("comment", truncated(input.get("comment"), 200));
    put("external_decision", get(&ext, "decision"));
    put("external_p_damaging", get(&ext, "p_damaging"));
    put("external_p_goodfaith", get(&ext, "p_goodfaith"));
    put("external_threshold", get(&ext, "threshold"));
    put("external_http_status", get(&ext, "http_status"));
    put("external_latency_ms", get(&ext, "latency_ms"));
    put("external_error", get(&ext, "error"));
    put("external_cache_hit", get(&ext, "cache_hit"));
    put("external_retry_count", get(&ext, "retry_count"));
    put("external_backoff_ms", get(&ext, "backoff_ms"));
    put("schema_version", get(packet, "schema_version"));
    put("config_profile", get(packet, "config_profile"));
    put("cfg_J_MIN", get(packet, "cfg_J_MIN"));
    put("cfg_H_MAX", get(packet, "cfg_H_MAX"));
    put("cfg_J_CRIT", get(packet, "cfg_J_CRIT"));
    put("cfg_H_CRIT", get(packet, "cfg_H_CRIT"));
    put("cfg_AS_SOFT_THRESHOLD", get(packet, "cfg_AS_SOFT_THRESHOLD"));
    put("cfg_CUS_MEAN_THRESHOLD", get(packet, "cfg_CUS_MEAN_THRESHOLD"));
    put("cfg_DRIFT_MIN_HISTORY", get(packet, "cfg_DRIFT_MIN_HISTORY"));
    put("cfg_CONFIDENCE_ESCALATION_FORCE", get(packet, "cfg_CONFIDENCE_ESCALATION_FORCE"));
    put("mdm_latency_ms", get(packet, "mdm_latency_ms"));
    put("final_action", get(packet, "final_action"));
    put("final_action_reason", reason.clone());
    put("mismatch", get(packet, "mismatch"));
    put("mdm_level", json!(level));
    put("mdm_reason", reason);
    put("selection_reason", get(&mdm, "selection_reason"));
    put("fail_safe_reason", get(&mdm, "fail_safe_reason"));
    put("escalation_driver", get(&mdm, "escalation_driver"));
    put("mdm_human_escalation", get(&mdm, "human_escalation"));
    put("drift_driver", get(&drift, "driver"));
    put("drift_history_len", get(&drift, "history_len"));
    put("drift_min_history", get(&drift, "min_history"));
    put("drift_applied", get(&drift, "applied"));
    put("clamp_applied", json!(clamp_applied));
    put("mdm_soft_clamp", get(&mdm, "soft_clamp"));
    put("mdm_confidence", get(&mdm, "confidence"));
    put("mdm_confidence_internal", get(&mdm, "confidence_internal"));
    put("mdm_confidence_external", get(&mdm, "confidence_external"));
    put("mdm_confidence_used", get(&mdm, "confidence_used"));
    put("mdm_confidence_source", get(&mdm, "confidence_source"));
    put("mdm_constraint_margin", get(&mdm, "constraint_margin"));
    put("mdm_cus", get(&unc, "cus"));
    put("mdm_cus_mean", get(&drift, "cus_mean"));
    put("mdm_divergence", get(&unc, "divergence"));
    put("mdm_delta_cus", get(&drift, "delta_cus"));
    put("mdm_delta_confidence", get(&self_reg, "delta_confidence"));
    put("mdm_action_severity", action.first().cloned().unwrap_or(Value::Null));
    put("mdm_action_compassion", action.get(1).cloned().unwrap_or(Value::Null));
    put("mdm_action_intervention", action.get(2).cloned().unwrap_or(Value::Null));
    put("mdm_action_delay", action.get(3).cloned().unwrap_or(Value::Null));
    put("mdm_J", get(&mdm, "J"));
    put("mdm_H", get(&mdm, "H"));
    put("mdm_worst_H", get(&mdm, "worst_H"));
    put("mdm_worst_J", get(&mdm, "worst_J"));
    put("unc_hi", get(&unc, "hi"));
    put("unc_de", get(&unc, "de"));
    put("unc_de_norm", get(&unc, "de_norm"));
    put("unc_as_norm", get(&unc, "as_norm"));
    put("unc_n_candidates", get(&unc, "n_candidates"));
    put("unc_score_best", get(&unc, "score_best"));
    put("unc_score_second", get(&unc, "score_second"));
    put("unc_action_spread_raw", get(&unc, "action_spread_raw"));
    put("unc_as_norm_missing", get(&unc, "as_norm_missing"));
    put("mdm_input_quality", get(&mdm, "input_quality"));
    put("mdm_evidence_consistency", get(&mdm, "evidence_consistency"));
    put("mdm_frontier_size", get(&mdm, "frontier_size"));
    put("mdm_pareto_gap", get(&mdm, "pareto_gap"));
    put("mdm_driver_history_len", get(&mdm, "driver_history_len"));
    put("mdm_drift_driver_alarm", get(&mdm, "drift_driver_alarm"));
    put("mdm_missing_fields", get(&mdm, "missing_fields"));
    put("mdm_valid_candidate_count", get(&mdm, "valid_candidate_count"));
    put("mdm_invalid_reason_counts", get(&mdm, "invalid_reason_counts"));
    put("mdm_state_hash", get(&mdm, "state_hash"));
    put("mdm_config_hash", get(&mdm, "config_hash"));
    put("review_status", get(&review, "status"));
    put("review_decision", get(&review, "decision"));
    put("review_category", get(&review, "category"));
    put("review_note", truncated(review.get("note"), 200));
    Ok(row)
}

/// CSV header line in [`CSV_COLUMNS`] order.
pub fn csv_header() -> String {
    CSV_COLUMNS.join(",")
}

/// One CSV line from a row map, missing columns empty.
pub fn csv_line(row: &Map<String, Value>) -> String {
    CSV_COLUMNS
        .iter()
        .map(|col| row.get(*col).map(csv_value).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_packet() -> Value {
        json!({
            "schema_version": "2.0",
            "run_id": "r1",
            "ts": 1000.0,
            "source": "test",
            "entity_id": "e1",
            "input": {"title": "T", "user": "U", "revid": 42},
            "external": {"decision": "ALLOW", "p_damaging": 0.2},
            "mdm": {"level": 0, "reason": "none", "selection_reason": "single"},
            "review": {},
            "final_action": "APPLY",
            "mismatch": false,
        })
    }

    #[test]
    fn v2_packet_validates() {
        validate_packet_schema_v2(&minimal_packet()).unwrap();
    }

    #[test]
    fn missing_mdm_is_a_schema_violation() {
        let err = validate_packet_schema_v2(&json!({"run_id": "x"})).unwrap_err();
        assert!(matches!(err, MdmError::SchemaViolation(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn legacy_top_level_key_is_rejected() {
        let mut packet = minimal_packet();
        packet[legacy_top_level_key()] = json!({});
        let err = validate_packet_schema_v2(&packet).unwrap_err();
        assert!(err.to_string().contains("legacy"));
    }

    #[test]
    fn legacy_key_never_appears_as_a_csv_prefix() {
        let row = decision_packet_to_csv_row(&minimal_packet()).unwrap();
        let prefix = format!("{}_", legacy_top_level_key());
        assert!(row.keys().all(|k| !k.starts_with(&prefix)));
        assert_eq!(row["mdm_level"], json!(0));
    }

    #[test]
    fn flat_row_carries_the_dashboard_minimum() {
        let flat = decision_packet_to_flat_row(&minimal_packet()).unwrap();
        for key in [
            "time", "title", "user", "revid", "external_decision", "p_damaging", "mdm_level",
            "clamp", "reason", "final_action", "mismatch", "run_id", "latency_ms",
        ] {
            assert!(flat.get(key).is_some(), "flat row missing {key}");
        }
    }

    #[test]
    fn csv_values_follow_the_conventions() {
        assert_eq!(csv_value(&json!(true)), "true");
        assert_eq!(csv_value(&json!(false)), "false");
        assert_eq!(csv_value(&Value::Null), "");
        assert_eq!(csv_value(&json!(["a", "b"])), "\"a;b\"");
        assert_eq!(csv_value(&json!("say \"hi\"")), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_value(&json!({"J_below_min": 3})), "\"J_below_min:3\"");
    }

    #[test]
    fn csv_line_matches_header_arity() {
        let row = decision_packet_to_csv_row(&minimal_packet()).unwrap();
        let line = csv_line(&row);
        // Quoted fields in this minimal packet contain no commas.
        assert_eq!(line.split(',').count(), csv_header().split(',').count());
    }
}
