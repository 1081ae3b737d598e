//! Event loop: pull events, fetch the external decision, run the engine,
//! emit packets. Each step is latency-measured; transport failures become
//! counters, never decisions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::adapter::{AuditSink, EventSource, ExternalDecision, ExternalDecisionClient, TraceSink, Verdict};
use crate::config::Config;
use crate::engine::{decide, DecideOptions, DecisionContext};
use crate::errors::MdmError;
use crate::logging::{self, Domain, Level};
use crate::packet::{build_decision_packet, PacketMeta};
use crate::security::redaction::redact_value;

/// Event-source retry ladder: attempts and backoff schedule.
const LIVE_FETCH_RETRIES: usize = 3;
const LIVE_FETCH_BACKOFF_SEC: [f64; 3] = [0.5, 1.0, 2.0];

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub run_id: String,
    pub source_name: String,
    /// Stop after this many events; `None` runs until the source drains.
    pub max_events: Option<usize>,
    /// Abort the run on a packet-invariant violation.
    pub strict_invariants: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopSummary {
    pub run_id: String,
    pub steps: usize,
    /// Packets per level, keys "0"/"1"/"2".
    pub level_counts: BTreeMap<String, u64>,
    /// Primary-driver histogram over the run.
    pub driver_counts: BTreeMap<String, u64>,
    pub mismatch_count: u64,
    pub live_fetch_errors: u32,
    pub external_fetch_errors: u32,
    pub avg_latency_ms: f64,
    pub stopped_reason: Option<String>,
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn entity_id_of(event: &Map<String, Value>, step: usize) -> String {
    if let Some(id) = event.get("entity_id").and_then(Value::as_str) {
        return id.to_string();
    }
    if let Some(revid) = event.get("revid") {
        return revid.to_string();
    }
    format!("step-{step}")
}

fn error_record(threshold: f64, error: String) -> ExternalDecision {
    ExternalDecision {
        decision: Verdict::Flag,
        p_damaging: None,
        p_goodfaith: None,
        threshold,
        http_status: None,
        latency_ms: None,
        error: Some(error),
        cache_hit: false,
        retry_count: 0,
        backoff_ms: 0,
    }
}

/// Run until the source drains, the stop flag is set, or `max_events` is
/// reached. Packets are emitted in event arrival order.
pub async fn run_loop(
    opts: &LoopOptions,
    source: &mut dyn EventSource,
    client: &dyn ExternalDecisionClient,
    cfg: &Config,
    packet_sink: &mut dyn TraceSink,
    decision_sink: Option<&mut dyn TraceSink>,
    audit: &mut dyn AuditSink,
    stop: &AtomicBool,
) -> Result<LoopSummary, MdmError> {
    let mut summary = LoopSummary { run_id: opts.run_id.clone(), ..Default::default() };
    let mut ctx = DecisionContext { assert_invariants: opts.strict_invariants, ..Default::default() };
    let mut latencies_ms: Vec<u64> = Vec::new();
    let mut decision_sink = decision_sink;

    loop {
        if stop.load(Ordering::Relaxed) {
            summary.stopped_reason = Some("stop_requested".to_string());
            break;
        }
        if opts.max_events.is_some_and(|max| summary.steps >= max) {
            summary.stopped_reason = Some("max_events".to_string());
            break;
        }

        // Event fetch with the fixed retry ladder; terminal failure ends
        // the run cleanly with a counter.
        let t0 = Instant::now();
        let mut event = None;
        let mut last_error: Option<String> = None;
        for attempt in 0..LIVE_FETCH_RETRIES {
            match source.next_event().await {
                Ok(e) => {
                    event = e;
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if attempt + 1 < LIVE_FETCH_RETRIES {
                        let delay = LIVE_FETCH_BACKOFF_SEC
                            [attempt.min(LIVE_FETCH_BACKOFF_SEC.len() - 1)];
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }
        if let Some(error) = last_error {
            summary.live_fetch_errors += 1;
            summary.stopped_reason = Some("live_fetch_error".to_string());
            logging::log_kv(
                Level::Error,
                Domain::Transport,
                "live_fetch_error",
                &[("error", error.as_str())],
            );
            break;
        }
        let Some(event) = event else {
            break;
        };

        let entity_id = entity_id_of(&event, summary.steps);
        let external = match client.fetch(&entity_id).await {
            Ok(record) => record,
            Err(e) => {
                summary.external_fetch_errors += 1;
                error_record(0.5, e.to_string())
            }
        };

        ctx.external_confidence = external.confidence_hint();

        let mdm_started = Instant::now();
        let decision = decide(&event, cfg, Some(&mut ctx), &DecideOptions::default())?;
        let mdm_latency_ms = mdm_started.elapsed().as_millis() as u64;
        let latency_ms = t0.elapsed().as_millis() as u64;
        latencies_ms.push(latency_ms);

        let meta = PacketMeta {
            run_id: opts.run_id.clone(),
            ts: now_ts(),
            source: opts.source_name.clone(),
            entity_id,
            config_profile: cfg.profile.clone(),
            latency_ms: Some(latency_ms),
            mdm_latency_ms: Some(mdm_latency_ms),
        };
        let packet = build_decision_packet(
            &meta,
            redact_value(&serde_json::to_value(&external)?),
            redact_value(&Value::Object(event.clone())),
            &decision,
            None,
        )?;
        packet_sink.write(&packet)?;
        if let Some(sink) = decision_sink.as_deref_mut() {
            sink.write(&serde_json::to_value(&decision)?)?;
        }

        *summary.level_counts.entry(decision.level.to_string()).or_insert(0) += 1;
        let primary = decision
            .escalation_drivers
            .first()
            .cloned()
            .unwrap_or_else(|| "none".to_string());
        *summary.driver_counts.entry(primary).or_insert(0) += 1;
        if packet.get("mismatch").and_then(Value::as_bool).unwrap_or(false) {
            summary.mismatch_count += 1;
        }
        summary.steps += 1;
    }

    packet_sink.flush()?;
    if let Some(sink) = decision_sink.as_deref_mut() {
        sink.flush()?;
    }
    summary.avg_latency_ms = if latencies_ms.is_empty() {
        0.0
    } else {
        latencies_ms.iter().sum::<u64>() as f64 / latencies_ms.len() as f64
    };
    let mut payload = Map::new();
    payload.insert("run_id".into(), json!(summary.run_id));
    payload.insert("steps".into(), json!(summary.steps));
    payload.insert("stopped_reason".into(), json!(summary.stopped_reason));
    audit.log("run_complete", payload)?;
    Ok(summary)
}
