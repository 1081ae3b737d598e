//! Packet sinks: the append-only JSONL trace writer with a configurable
//! flush cadence, and a CSV exporter over the same packets.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::adapter::TraceSink;
use crate::errors::MdmError;
use crate::packet::{csv_header, csv_line, decision_packet_to_csv_row};

/// Line-delimited JSON packet writer. Flushes every `flush_every_n`
/// writes; dropping the writer flushes whatever remains.
pub struct TraceWriter {
    path: PathBuf,
    file: BufWriter<File>,
    flush_every_n: usize,
    pending: usize,
}

impl TraceWriter {
    pub fn create(run_dir: &Path, name: &str, flush_every_n: usize) -> Result<Self, MdmError> {
        create_dir_all(run_dir)?;
        let path = run_dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            flush_every_n: flush_every_n.max(1),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for TraceWriter {
    fn write(&mut self, packet: &Value) -> Result<(), MdmError> {
        writeln!(self.file, "{packet}")?;
        self.pending += 1;
        if self.pending >= self.flush_every_n {
            self.file.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MdmError> {
        self.file.flush()?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

/// CSV exporter: header plus one row per packet. Schema violations abort
/// the export; no row is produced for an invalid packet.
pub struct CsvExporter {
    file: BufWriter<File>,
}

impl CsvExporter {
    pub fn create(path: &Path) -> Result<Self, MdmError> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{}", csv_header())?;
        Ok(Self { file })
    }

    pub fn write_packet(&mut self, packet: &Value) -> Result<(), MdmError> {
        let row = decision_packet_to_csv_row(packet)?;
        writeln!(self.file, "{}", csv_line(&row))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MdmError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn packet(run_id: &str) -> Value {
        json!({
            "schema_version": "2.0",
            "run_id": run_id,
            "ts": 1.0,
            "source": "test",
            "entity_id": "e",
            "input": {},
            "external": {"decision": "ALLOW"},
            "mdm": {"level": 0, "reason": "none"},
            "review": {},
        })
    }

    #[test]
    fn writer_appends_one_line_per_packet() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TraceWriter::create(dir.path(), "packets.jsonl", 1).unwrap();
        w.write(&packet("a")).unwrap();
        w.write(&packet("b")).unwrap();
        w.flush().unwrap();
        let content = std::fs::read_to_string(w.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        let first: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["run_id"], json!("a"));
    }

    #[test]
    fn batched_flush_defers_until_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TraceWriter::create(dir.path(), "packets.jsonl", 10).unwrap();
        let path = w.path().to_path_buf();
        w.write(&packet("a")).unwrap();
        // Buffered: nothing guaranteed on disk yet; explicit flush drains.
        w.flush().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 1);
    }

    #[test]
    fn csv_exporter_rejects_invalid_packets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_full.csv");
        let mut csv = CsvExporter::create(&path).unwrap();
        csv.write_packet(&packet("a")).unwrap();
        let err = csv.write_packet(&json!({"run_id": "x"})).unwrap_err();
        assert!(matches!(err, MdmError::SchemaViolation(_)));
        csv.finish().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        // Header plus exactly one valid row; the invalid packet left none.
        assert_eq!(content.lines().count(), 2);
    }
}
