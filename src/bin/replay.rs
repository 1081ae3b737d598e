//! Replay verifier: rerun every decision in a decisions.jsonl file and
//! check action, trace-hash and ethics equality.
//!
//! Usage: replay <decisions.jsonl> [profile]
//! Exit codes: 0 all verified, 1 usage/config error, 3 replay mismatch.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::ExitCode;

use serde_json::Value;

use mdm_arbiter::config::Config;
use mdm_arbiter::errors::MdmError;
use mdm_arbiter::replay::{replay, ReplayOptions};
use mdm_arbiter::trace::Trace;

fn run() -> Result<(usize, usize), MdmError> {
    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .ok_or_else(|| MdmError::Config("usage: replay <decisions.jsonl> [profile]".into()))?;
    let profile = args.next().unwrap_or_else(|| "base".to_string());
    let cfg = Config::profile(&profile)?;

    let file = File::open(&path).map_err(|e| MdmError::Config(format!("{path}: {e}")))?;
    let modes =
        ReplayOptions { validate_action: true, verify_hash: true, validate_ethics: true };

    let mut verified = 0usize;
    let mut failed = 0usize;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(&line)?;
        let trace_value = record.get("trace").cloned().unwrap_or(record);
        let trace: Trace = serde_json::from_value(trace_value)?;
        match replay(&trace, &cfg, &modes) {
            Ok(_) => verified += 1,
            Err(e) => {
                eprintln!("line {}: {e}", lineno + 1);
                failed += 1;
            }
        }
    }
    Ok((verified, failed))
}

fn main() -> ExitCode {
    match run() {
        Ok((verified, 0)) => {
            println!("replay OK: {verified} decision(s) verified");
            ExitCode::SUCCESS
        }
        Ok((verified, failed)) => {
            eprintln!("replay FAILED: {failed} mismatch(es), {verified} verified");
            ExitCode::from(3)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
