use serde::{Deserialize, Serialize};

/// Face descriptor vector (512-dimensional for the buffalo_l ArcFace model).
///
/// The dimension is whatever the analyzer produces; the gallery only requires
/// that every descriptor it holds has the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Compute cosine similarity between two descriptors.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero-norm
    /// operand yields 0.0. Accumulates in f64 and narrows the result.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.0.iter().zip(other.0.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { (dot / denom) as f32 } else { 0.0 }
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// One face reported by the analyzer for an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "embedding")]
    pub descriptor: Descriptor,
    /// Detector confidence, when the analyzer reports one.
    #[serde(default)]
    pub score: Option<f32>,
}

/// A query face accepted against one enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub name: String,
    /// Similarity at acceptance, rounded to two decimals.
    pub confidence: f32,
}

/// Round a similarity score to two decimal places.
pub fn round_confidence(similarity: f32) -> f32 {
    (similarity * 100.0).round() / 100.0
}
