//! Seeded synthetic event source for the demo loop and tests.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::adapter::EventSource;
use crate::encoder::{RawEvent, STATE_KEYS};

/// Generates events with the nine state dimensions drawn uniformly from
/// `[0,1]`; every seventh event drops one dimension to exercise the
/// missing-field path. Deterministic per seed.
pub struct SyntheticSource {
    rng: StdRng,
    steps: usize,
    emitted: usize,
}

impl SyntheticSource {
    pub fn new(seed: u64, steps: usize) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), steps, emitted: 0 }
    }
}

#[async_trait]
impl EventSource for SyntheticSource {
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        if self.emitted >= self.steps {
            return Ok(None);
        }
        let step = self.emitted;
        self.emitted += 1;

        let mut event = RawEvent::new();
        let dropped = if step % 7 == 6 { Some(step % STATE_KEYS.len()) } else { None };
        for (i, key) in STATE_KEYS.iter().enumerate() {
            let value: f64 = self.rng.gen();
            if Some(i) != dropped {
                event.insert((*key).to_string(), json!((value * 1e6).round() / 1e6));
            }
        }
        event.insert("entity_id".to_string(), json!(format!("e{step}")));
        event.insert("revid".to_string(), json!(step as u64));
        Ok(Some(event))
    }
}
