//! Fatal error kinds and their CLI exit codes.
//!
//! Data-quality problems never surface here: the engine demotes uncertain
//! decisions to L1/L2 instead of failing. Only schema violations, invariant
//! violations, configuration mistakes and replay mismatches are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdmError {
    /// Unknown profile, out-of-range threshold, malformed override.
    #[error("configuration error: {0}")]
    Config(String),

    /// Packet is not schema v2 (missing `mdm` or carrying the legacy key).
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// An emitted packet broke a decision invariant (strict mode only).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Replay produced a different action, hash or ethics record.
    #[error("replay mismatch: {0}")]
    Replay(String),

    /// Orchestrator-level runtime failure (sink I/O, serialization).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl MdmError {
    /// Process exit code contract: 0 normal, 1 config, 2 schema, 3 runtime.
    pub fn exit_code(&self) -> i32 {
        match self {
            MdmError::Config(_) => 1,
            MdmError::SchemaViolation(_) => 2,
            MdmError::InvariantViolation(_) | MdmError::Replay(_) | MdmError::Runtime(_) => 3,
        }
    }
}

impl From<std::io::Error> for MdmError {
    fn from(e: std::io::Error) -> Self {
        MdmError::Runtime(e.to_string())
    }
}

impl From<serde_json::Error> for MdmError {
    fn from(e: serde_json::Error) -> Self {
        MdmError::Runtime(e.to_string())
    }
}
