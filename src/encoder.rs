//! State encoding: raw event map -> fixed-dimension state vectors.
//!
//! The nine supported dimensions are read in a fixed alphabetical order;
//! that order is the canonical contract for the missing mask and the
//! `missing_fields` packet column. Absent or non-numeric values default to
//! 0.0 and are recorded in the mask rather than raised.

use serde_json::{Map, Value};

/// Raw event: string keys to (nominally `[0,1]`) scalars. Extra keys are
/// ignored by the encoder but participate in the state hash.
pub type RawEvent = Map<String, Value>;

/// All supported state keys, alphabetical.
pub const STATE_KEYS: [&str; 9] = [
    "compassion",
    "context",
    "empathy",
    "harm_sens",
    "justice",
    "physical",
    "responsibility",
    "risk",
    "social",
];

/// Contextual subset of [`STATE_KEYS`], alphabetical.
const EXT_KEYS: [&str; 4] = ["context", "physical", "risk", "social"];

/// Moral-trait subset of [`STATE_KEYS`], alphabetical.
const MORAL_KEYS: [&str; 5] = ["compassion", "empathy", "harm_sens", "justice", "responsibility"];

/// Dimension pairs expected to broadly agree; disagreement lowers
/// `evidence_consistency`.
const RELATED_PAIRS: [(&str, &str); 3] = [
    ("compassion", "empathy"),
    ("harm_sens", "risk"),
    ("justice", "responsibility"),
];

/// Encoded state: `x_ext = [context, physical, risk, social]`,
/// `x_moral = [compassion, empathy, harm_sens, justice, responsibility]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector {
    pub x_ext: Vec<f64>,
    pub x_moral: Vec<f64>,
}

impl StateVector {
    pub fn context(&self) -> f64 {
        self.x_ext[0]
    }
    pub fn physical(&self) -> f64 {
        self.x_ext[1]
    }
    pub fn risk(&self) -> f64 {
        self.x_ext[2]
    }
    pub fn social(&self) -> f64 {
        self.x_ext[3]
    }
    pub fn compassion(&self) -> f64 {
        self.x_moral[0]
    }
    pub fn empathy(&self) -> f64 {
        self.x_moral[1]
    }
    pub fn harm_sens(&self) -> f64 {
        self.x_moral[2]
    }
    pub fn justice(&self) -> f64 {
        self.x_moral[3]
    }
    pub fn responsibility(&self) -> f64 {
        self.x_moral[4]
    }
}

/// Input quality report: present-field mask plus derived scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct InputQuality {
    /// `true` where the corresponding [`STATE_KEYS`] entry was present.
    pub present_mask: [bool; 9],
    /// Fraction of the nine dimensions present, in `[0,1]`.
    pub input_quality: f64,
    /// Pairwise agreement of related dimensions, in `[0,1]`.
    pub evidence_consistency: f64,
}

fn field(raw: &RawEvent, key: &str) -> Option<f64> {
    raw.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

/// Encode the event into the two fixed-length vectors. Missing values are
/// 0.0; presence is tracked separately by [`compute_input_quality`].
pub fn encode_state(raw: &RawEvent) -> StateVector {
    let read = |keys: &[&str]| keys.iter().map(|k| field(raw, k).unwrap_or(0.0)).collect();
    StateVector { x_ext: read(&EXT_KEYS), x_moral: read(&MORAL_KEYS) }
}

/// Pure function of the event: presence mask, quality fraction and the
/// consistency of related evidence pairs.
pub fn compute_input_quality(raw: &RawEvent) -> InputQuality {
    let mut present_mask = [false; 9];
    let mut present = 0usize;
    for (i, key) in STATE_KEYS.iter().enumerate() {
        if field(raw, key).is_some() {
            present_mask[i] = true;
            present += 1;
        }
    }
    let input_quality = present as f64 / STATE_KEYS.len() as f64;

    let mut acc = 0.0;
    let mut pairs = 0usize;
    for (a, b) in RELATED_PAIRS {
        if let (Some(va), Some(vb)) = (field(raw, a), field(raw, b)) {
            acc += (va - vb).abs();
            pairs += 1;
        }
    }
    let evidence_consistency = if pairs == 0 { 1.0 } else { 1.0 - acc / pairs as f64 };

    InputQuality { present_mask, input_quality, evidence_consistency }
}

/// Keys absent from the event, already alphabetical (mask order).
pub fn missing_fields(quality: &InputQuality) -> Vec<String> {
    STATE_KEYS
        .iter()
        .zip(quality.present_mask.iter())
        .filter(|(_, present)| !**present)
        .map(|(k, _)| (*k).to_string())
        .collect()
}
