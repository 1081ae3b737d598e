//! Capability seams consumed by the run loop: the event source, the
//! external-decision client and the packet/audit sinks. The core pipeline
//! never touches these; concrete transports live in the submodules.

pub mod http;
pub mod synthetic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::encoder::RawEvent;
use crate::errors::MdmError;

/// External classifier verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "FLAG")]
    Flag,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Flag => "FLAG",
        }
    }
}

/// Full record returned by an external-decision fetch, including the
/// transport telemetry that lands in the packet's `external` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDecision {
    pub decision: Verdict,
    pub p_damaging: Option<f64>,
    pub p_goodfaith: Option<f64>,
    pub threshold: f64,
    pub http_status: Option<u16>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub cache_hit: bool,
    pub retry_count: u32,
    pub backoff_ms: u64,
}

impl ExternalDecision {
    /// Distance-to-threshold confidence in `[0,1]`: how far the risk score
    /// sits from the decision boundary, normalized by the wider side.
    pub fn confidence_hint(&self) -> Option<f64> {
        let p = self.p_damaging?;
        let span = self.threshold.max(1.0 - self.threshold).max(1e-9);
        Some(((p - self.threshold).abs() / span).clamp(0.0, 1.0))
    }
}

/// Pull-based event producer. Returns `None` when exhausted.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>>;
}

/// External classifier client (e.g. a risk-scoring HTTP API).
#[async_trait]
pub trait ExternalDecisionClient: Send + Sync {
    async fn fetch(&self, entity_id: &str) -> anyhow::Result<ExternalDecision>;
}

/// Append-only packet sink.
pub trait TraceSink: Send {
    fn write(&mut self, packet: &Value) -> Result<(), MdmError>;
    fn flush(&mut self) -> Result<(), MdmError>;
}

/// Append-only ops/security event sink.
pub trait AuditSink: Send {
    fn log(&mut self, event: &str, payload: Map<String, Value>) -> Result<(), MdmError>;
}

impl AuditSink for crate::security::audit::AuditLogger {
    fn log(&mut self, event: &str, payload: Map<String, Value>) -> Result<(), MdmError> {
        crate::security::audit::AuditLogger::log(self, event, payload)
    }
}

/// Test/demo client returning one canned record for every entity.
#[derive(Debug, Clone)]
pub struct FixedDecisionClient {
    pub record: ExternalDecision,
}

#[async_trait]
impl ExternalDecisionClient for FixedDecisionClient {
    async fn fetch(&self, _entity_id: &str) -> anyhow::Result<ExternalDecision> {
        Ok(self.record.clone())
    }
}

impl ExternalDecision {
    /// Canned ALLOW record for tests and the synthetic demo loop.
    pub fn allow_with(p_damaging: f64, threshold: f64) -> Self {
        Self {
            decision: if p_damaging >= threshold { Verdict::Flag } else { Verdict::Allow },
            p_damaging: Some(p_damaging),
            p_goodfaith: Some(1.0 - p_damaging),
            threshold,
            http_status: Some(200),
            latency_ms: Some(0),
            error: None,
            cache_hit: false,
            retry_count: 0,
            backoff_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_to_wire_strings() {
        assert_eq!(serde_json::to_value(Verdict::Allow).unwrap(), "ALLOW");
        assert_eq!(serde_json::to_value(Verdict::Flag).unwrap(), "FLAG");
    }

    #[test]
    fn confidence_hint_is_distance_to_threshold() {
        let near = ExternalDecision::allow_with(0.52, 0.5);
        let far = ExternalDecision::allow_with(0.02, 0.5);
        assert!(near.confidence_hint().unwrap() < far.confidence_hint().unwrap());
        assert!((far.confidence_hint().unwrap() - 0.96).abs() < 1e-12);
    }

    #[test]
    fn allow_with_flips_to_flag_at_threshold() {
        assert_eq!(ExternalDecision::allow_with(0.7, 0.5).decision, Verdict::Flag);
        assert_eq!(ExternalDecision::allow_with(0.3, 0.5).decision, Verdict::Allow);
    }
}
