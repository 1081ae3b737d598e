//! Append-only security/ops audit sink: one redacted JSON line per event.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::errors::MdmError;
use crate::logging::ts_now;
use crate::security::redaction::redact_value;

pub struct AuditLogger {
    path: PathBuf,
    file: BufWriter<File>,
}

impl AuditLogger {
    /// Open (append) `security_audit.jsonl` under the run directory.
    pub fn open(run_dir: &Path) -> Result<Self, MdmError> {
        create_dir_all(run_dir)?;
        let path = run_dir.join("security_audit.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one audit line; the payload is redacted before serialization.
    pub fn log(&mut self, event: &str, payload: Map<String, Value>) -> Result<(), MdmError> {
        let mut entry = Map::new();
        entry.insert("ts".into(), json!(ts_now()));
        entry.insert("event".into(), json!(event));
        for (k, v) in payload {
            entry.insert(k, v);
        }
        let line = redact_value(&Value::Object(entry));
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), MdmError> {
        self.file.flush()?;
        Ok(())
    }
}
