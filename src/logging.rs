//! Structured JSONL run logging.
//!
//! Design goals:
//! 1. Leveled records (TRACE -> FATAL) with an env-selected floor
//! 2. Domain categories for filtering (`LOG_DOMAINS` env var)
//! 3. Per-run directory with a manifest and an append-only events file
//! 4. Secrets sanitized before anything reaches disk or stderr

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::security::redaction::redact_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Pipeline internals: scoring, selection, clamping.
    Engine,
    /// Temporal drift and driver histogram alarms.
    Drift,
    /// Escalation decisions and overrides.
    Escalate,
    /// Packet emission and validation.
    Audit,
    /// Event source and external-decision transport.
    Transport,
    /// Startup, shutdown, configuration.
    System,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Engine => "engine",
            Domain::Drift => "drift",
            Domain::Escalate => "escalate",
            Domain::Audit => "audit",
            Domain::Transport => "transport",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        let events = create_dir_all(&run_dir)
            .ok()
            .and_then(|()| {
                let _ = std::fs::write(
                    run_dir.join("manifest.json"),
                    json!({
                        "run_id": run_id,
                        "ts": ts_now(),
                        "pid": process::id(),
                        "log_dir": run_dir.to_string_lossy(),
                    })
                    .to_string(),
                );
                File::create(run_dir.join("events.jsonl")).ok()
            })
            .map(|f| Mutex::new(BufWriter::new(f)));
        if events.is_none() {
            eprintln!("[log] run dir unavailable, logging to stderr only");
        }
        RunContext { run_id, events }
    })
}

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds (replay correlation).
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Identifier of the current logging run.
pub fn run_id() -> String {
    ensure_run_context().run_id.clone()
}

/// Emit a structured record. Fields pass through redaction first.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let ctx = ensure_run_context();
    let data = redact_value(&Value::Object(fields));

    let mut entry = Map::new();
    entry.insert("ts".into(), json!(ts_now()));
    entry.insert("run_id".into(), json!(ctx.run_id));
    entry.insert("seq".into(), json!(LOG_SEQ.fetch_add(1, Ordering::SeqCst)));
    entry.insert("lvl".into(), json!(level.as_str().to_uppercase()));
    entry.insert("domain".into(), json!(domain.as_str()));
    entry.insert("event".into(), json!(event));
    entry.insert("data".into(), data);

    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        if let Ok(mut w) = events.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }
    if level >= Level::Warn {
        eprintln!("{line}");
    }
}

/// Convenience wrapper for small string-valued field sets.
pub fn log_kv(level: Level, domain: Domain, event: &str, fields: &[(&str, &str)]) {
    let map = fields.iter().map(|(k, v)| ((*k).to_string(), json!(v))).collect();
    log(level, domain, event, map);
}
