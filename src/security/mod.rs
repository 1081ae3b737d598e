//! Security helpers: secret redaction, token-bucket rate limiting, the
//! append-only audit sink and env-backed secret lookup.

pub mod audit;
pub mod rate_limit;
pub mod redaction;
pub mod secrets;
