//! Security properties: redaction totality, token-bucket bounds and the
//! audit sink's no-secrets guarantee.

use serde_json::json;

use mdm_arbiter::security::audit::AuditLogger;
use mdm_arbiter::security::rate_limit::RateLimiter;
use mdm_arbiter::security::redaction::{redact_value, REDACTED};

// ---------------------------------------------------------------------------
// Redaction totality: every sensitive key, any depth, any spelling
// ---------------------------------------------------------------------------
#[test]
fn redaction_covers_every_sensitive_key_at_any_depth() {
    let sensitive = [
        "api_key",
        "apikey",
        "API-Key",
        "secret",
        "PASSWORD",
        "token",
        "Authorization",
        "auth",
        "private_key",
        "Private Key",
        "signature",
        "raw_payload",
        "headers",
    ];
    for key in sensitive {
        let mut nested = json!({
            "level1": {"level2": [{}]},
            "safe": 1,
        });
        nested["level1"]["level2"][0][key] = json!("leak-me");
        nested[key] = json!("leak-me-too");
        let out = redact_value(&nested);
        let rendered = out.to_string();
        assert!(
            !rendered.contains("leak-me"),
            "key {key:?} leaked through redaction: {rendered}"
        );
        assert_eq!(out["safe"], json!(1));
        assert_eq!(out[key], json!(REDACTED));
        assert_eq!(out["level1"]["level2"][0][key], json!(REDACTED));
    }
}

#[test]
fn redaction_preserves_non_sensitive_structure() {
    let v = json!({
        "risk": 0.5,
        "notes": ["a", "b"],
        "nested": {"count": 3, "flag": true},
    });
    assert_eq!(redact_value(&v), v);
}

// ---------------------------------------------------------------------------
// Token bucket bounds
// ---------------------------------------------------------------------------
#[test]
fn start_full_bucket_allows_immediately() {
    let mut limiter = RateLimiter::new(1.0, 5, true);
    assert!(limiter.allow());
    assert!((0.0..=5.0).contains(&limiter.tokens()));
}

#[test]
fn empty_bucket_denies_until_refill() {
    let mut limiter = RateLimiter::new(0.0001, 5, false);
    for _ in 0..10 {
        assert!(!limiter.allow());
        assert!((0.0..=5.0).contains(&limiter.tokens()));
    }
}

#[test]
fn tokens_never_exceed_capacity_under_burst() {
    let mut limiter = RateLimiter::new(1_000_000.0, 3, false);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let mut grants = 0;
    for _ in 0..100 {
        if limiter.allow() {
            grants += 1;
        }
        assert!((0.0..=3.0).contains(&limiter.tokens()));
    }
    assert!(grants >= 3);
}

// ---------------------------------------------------------------------------
// Audit sink writes redacted lines only
// ---------------------------------------------------------------------------
#[test]
fn audit_sink_never_persists_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let mut audit = AuditLogger::open(dir.path()).unwrap();
    let payload = json!({
        "request": {"headers": {"authorization": "Bearer abc123"}},
        "api_key": "sk-live-1",
        "entity": "e9",
    });
    let map = payload.as_object().unwrap().clone();
    audit.log("external_call", map).unwrap();
    let path = audit.path().to_path_buf();
    audit.close().unwrap();

    let content = std::fs::read_to_string(path).unwrap();
    assert!(!content.contains("abc123"));
    assert!(!content.contains("sk-live-1"));
    assert!(content.contains("external_call"));
    assert!(content.contains("e9"));
}
