//! CLI: run the decision loop over a synthetic or HTTP-fed event stream.
//!
//! Environment:
//!   MDM_PROFILE      config profile (base | production_safe | high_critical | calibrated)
//!   MDM_EVENTS       number of events to process (default 20)
//!   MDM_OUT          output directory (default out/runs/<run_id>)
//!   MDM_SCORE_URL    external scoring endpoint; synthetic client when unset
//!   MDM_SEED         synthetic source seed (default 7)
//!
//! Exit codes: 0 normal, 1 configuration error, 2 schema-validation
//! failure, 3 runtime error in the orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use serde_json::json;

use mdm_arbiter::adapter::http::{HttpDecisionClient, DEFAULT_CACHE_CAPACITY};
use mdm_arbiter::adapter::{ExternalDecision, ExternalDecisionClient, FixedDecisionClient};
use mdm_arbiter::config::Config;
use mdm_arbiter::errors::MdmError;
use mdm_arbiter::logging::{self, Domain, Level};
use mdm_arbiter::run_loop::{run_loop, LoopOptions};
use mdm_arbiter::security::audit::AuditLogger;
use mdm_arbiter::sink::{CsvExporter, TraceWriter};
use mdm_arbiter::adapter::synthetic::SyntheticSource;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

async fn run() -> Result<(), MdmError> {
    let cfg = Config::from_env()?;
    let run_id = logging::run_id();
    let events: usize = env_or("MDM_EVENTS", 20);
    let out_dir = std::env::var("MDM_OUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("out/runs").join(&run_id));

    logging::log_kv(
        Level::Info,
        Domain::System,
        "startup",
        &[("profile", cfg.profile.as_str()), ("run_id", run_id.as_str())],
    );

    let client: Box<dyn ExternalDecisionClient> = match std::env::var("MDM_SCORE_URL") {
        Ok(url) => Box::new(
            HttpDecisionClient::new(&url, 0.5, DEFAULT_CACHE_CAPACITY)
                .map_err(|e| MdmError::Config(format!("scoring endpoint: {e}")))?,
        ),
        Err(_) => Box::new(FixedDecisionClient {
            record: ExternalDecision::allow_with(0.2, 0.5),
        }),
    };

    let mut source = SyntheticSource::new(env_or("MDM_SEED", 7), events);
    let mut packets = TraceWriter::create(&out_dir, "packets.jsonl", 1)?;
    let mut decisions = TraceWriter::create(&out_dir, "decisions.jsonl", 1)?;
    let mut audit = AuditLogger::open(&out_dir)?;

    let opts = LoopOptions {
        run_id: run_id.clone(),
        source_name: "synthetic".to_string(),
        max_events: Some(events),
        strict_invariants: true,
    };
    let stop = AtomicBool::new(false);
    let summary = run_loop(
        &opts,
        &mut source,
        client.as_ref(),
        &cfg,
        &mut packets,
        Some(&mut decisions),
        &mut audit,
        &stop,
    )
    .await?;

    // Project the run into the audit CSV.
    let mut csv = CsvExporter::create(&out_dir.join("audit_full.csv"))?;
    let packet_lines = std::fs::read_to_string(packets.path())?;
    for line in packet_lines.lines() {
        let packet = serde_json::from_str(line)?;
        csv.write_packet(&packet)?;
    }
    csv.finish()?;

    println!("{}", json!(summary));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::log_kv(Level::Fatal, Domain::System, "fatal", &[("error", &e.to_string())]);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
