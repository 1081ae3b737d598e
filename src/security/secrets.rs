//! Secrets provider: env-backed lookup for adapters. Values never appear
//! in code, packets or logs.

/// Capability interface for secret lookup; adapters depend on this, not on
/// the environment directly.
pub trait SecretsProvider: Send + Sync {
    /// Secret for `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `PREFIX + KEY` from the environment, dots mapped to underscores,
/// upper-cased (`ores.token` with prefix `MDM_` -> `MDM_ORES_TOKEN`).
pub struct EnvSecretsProvider {
    prefix: String,
}

impl EnvSecretsProvider {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key).replace('.', "_").to_uppercase()
    }
}

impl SecretsProvider for EnvSecretsProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.env_key(key)).ok()
    }
}
