//! HTTP external-decision client: reqwest fetch with retry on 429/5xx and
//! a bounded FIFO response cache.
//!
//! Transport failures never abort a decision: the client always returns a
//! record, with `error` set and a fail-closed FLAG verdict on terminal
//! failure. Timeouts are owned here, not by the core.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{ExternalDecision, ExternalDecisionClient, Verdict};
use crate::logging::{self, Domain, Level};
use crate::security::rate_limit::backoff_with_jitter;

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_SEC: f64 = 0.5;
const BACKOFF_MAX_SEC: f64 = 8.0;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cache capacity (entries), eviction FIFO by insertion order.
pub const DEFAULT_CACHE_CAPACITY: usize = 2000;

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Bounded insertion-order cache.
struct FifoCache {
    capacity: usize,
    order: VecDeque<String>,
    map: HashMap<String, ExternalDecision>,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), map: HashMap::new() }
    }

    fn get(&self, key: &str) -> Option<ExternalDecision> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: ExternalDecision) {
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
        self.map.insert(key, value);
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Response body expected from the scoring endpoint.
#[derive(Debug, Deserialize)]
struct ScoreBody {
    p_damaging: f64,
    #[serde(default)]
    p_goodfaith: Option<f64>,
}

pub struct HttpDecisionClient {
    base_url: String,
    threshold: f64,
    client: reqwest::Client,
    cache: Mutex<FifoCache>,
}

impl HttpDecisionClient {
    pub fn new(base_url: &str, threshold: f64, cache_capacity: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            threshold,
            client,
            cache: Mutex::new(FifoCache::new(cache_capacity)),
        })
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record_from_score(&self, body: ScoreBody, status: u16, latency_ms: u64) -> ExternalDecision {
        ExternalDecision {
            decision: if body.p_damaging >= self.threshold {
                Verdict::Flag
            } else {
                Verdict::Allow
            },
            p_damaging: Some(body.p_damaging),
            p_goodfaith: body.p_goodfaith,
            threshold: self.threshold,
            http_status: Some(status),
            latency_ms: Some(latency_ms),
            error: None,
            cache_hit: false,
            retry_count: 0,
            backoff_ms: 0,
        }
    }

    fn fail_closed(&self, error: String, status: Option<u16>, latency_ms: u64) -> ExternalDecision {
        ExternalDecision {
            decision: Verdict::Flag,
            p_damaging: None,
            p_goodfaith: None,
            threshold: self.threshold,
            http_status: status,
            latency_ms: Some(latency_ms),
            error: Some(error),
            cache_hit: false,
            retry_count: 0,
            backoff_ms: 0,
        }
    }
}

#[async_trait]
impl ExternalDecisionClient for HttpDecisionClient {
    async fn fetch(&self, entity_id: &str) -> anyhow::Result<ExternalDecision> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(mut hit) = cache.get(entity_id) {
                hit.cache_hit = true;
                return Ok(hit);
            }
        }

        let url = format!("{}/{}", self.base_url, entity_id);
        let started = Instant::now();
        let mut retry_count = 0;
        let mut backoff_ms = 0u64;
        let mut last_error = String::new();
        let mut last_status = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_with_jitter(attempt - 1, BACKOFF_BASE_SEC, BACKOFF_MAX_SEC);
                backoff_ms += (delay * 1000.0) as u64;
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                retry_count = attempt;
            }
            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    last_status = Some(status);
                    if is_retryable_status(status) {
                        last_error = format!("retryable http status {status}");
                        continue;
                    }
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if !resp.status().is_success() {
                        return Ok(self.fail_closed(
                            format!("http status {status}"),
                            Some(status),
                            latency_ms,
                        ));
                    }
                    match resp.json::<ScoreBody>().await {
                        Ok(body) => {
                            let mut record = self.record_from_score(body, status, latency_ms);
                            record.retry_count = retry_count;
                            record.backoff_ms = backoff_ms;
                            if let Ok(mut cache) = self.cache.lock() {
                                cache.insert(entity_id.to_string(), record.clone());
                            }
                            return Ok(record);
                        }
                        Err(e) => {
                            last_error = format!("body decode: {e}");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    last_error = format!("transport: {e}");
                    continue;
                }
            }
        }

        logging::log_kv(
            Level::Warn,
            Domain::Transport,
            "external_fetch_failed",
            &[("entity_id", entity_id), ("error", last_error.as_str())],
        );
        let mut record =
            self.fail_closed(last_error, last_status, started.elapsed().as_millis() as u64);
        record.retry_count = retry_count;
        record.backoff_ms = backoff_ms;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(p: f64) -> ExternalDecision {
        ExternalDecision::allow_with(p, 0.5)
    }

    #[test]
    fn cache_evicts_in_insertion_order() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".into(), record(0.1));
        cache.insert("b".into(), record(0.2));
        cache.insert("c".into(), record(0.3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reinsertion_does_not_duplicate_order_entries() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".into(), record(0.1));
        cache.insert("a".into(), record(0.4));
        cache.insert("b".into(), record(0.2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().p_damaging, Some(0.4));
    }

    #[test]
    fn retryable_statuses_are_429_and_5xx() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn fail_closed_record_flags_for_review() {
        let client = HttpDecisionClient::new("http://localhost:9", 0.5, 10).unwrap();
        let rec = client.fail_closed("boom".into(), None, 12);
        assert_eq!(rec.decision, Verdict::Flag);
        assert_eq!(rec.error.as_deref(), Some("boom"));
        assert_eq!(rec.p_damaging, None);
    }
}
