//! Sample and epoch-payload data definitions.
//!
//! A sample's identity is its position in the epoch's sample array. The same
//! index refers to the same training example in every epoch, so adjacency,
//! edges and highlight state all address samples by `usize` index.

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::DEFAULT_SCOPE;

/// Training epoch identifier as supplied by the backend.
pub type EpochId = u32;

/// Label value used when the backend omits a sample's label.
pub const UNKNOWN_LABEL: i64 = -1;

/// One render-ready sample in one epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub label: i64,
    pub predicted_label: i64,
    /// Softmax confidence of the predicted label, in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub text: String,
}

impl Sample {
    pub fn is_misclassified(&self) -> bool {
        self.predicted_label != self.label
    }
}

/// Epoch data as it arrives from the backend.
///
/// Every list defaults to empty, whether absent or `null`, so a partial
/// payload still deserializes. Field aliases accept the backend's historical names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEpochPayload {
    #[serde(default, alias = "proj", deserialize_with = "null_as_default")]
    pub projection: Vec<Vec<f64>>,
    #[serde(default, alias = "predProbability", deserialize_with = "null_as_default")]
    pub prediction_probabilities: Vec<Vec<f64>>,
    #[serde(default, alias = "originalNeighbors", deserialize_with = "null_as_default")]
    pub original_space_neighbors: Vec<Vec<usize>>,
    #[serde(default, alias = "projectionNeighbors", deserialize_with = "null_as_default")]
    pub projection_space_neighbors: Vec<Vec<usize>>,
    #[serde(default, alias = "background", skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<i64>,
}

/// Read an explicit `null` as `T::default()`. Pair with `#[serde(default)]`
/// to cover a missing key too.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RawEpochPayload {
    pub fn sample_count(&self) -> usize {
        self.projection.len()
    }

    pub fn has_probabilities(&self) -> bool {
        !self.prediction_probabilities.is_empty()
    }

    /// Position `(x, y)` of sample `i`. Missing coordinates read as 0.
    pub fn point(&self, i: usize) -> (f64, f64) {
        let p = &self.projection[i];
        (
            p.first().copied().unwrap_or(0.0),
            p.get(1).copied().unwrap_or(0.0),
        )
    }

    pub fn label(&self, i: usize) -> i64 {
        self.labels.get(i).copied().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Axis-aligned extent of an epoch's projection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            x_min: -DEFAULT_SCOPE,
            x_max: DEFAULT_SCOPE,
            y_min: -DEFAULT_SCOPE,
            y_max: DEFAULT_SCOPE,
        }
    }
}

impl Bounds {
    /// Inverted bounds, ready to be grown with [`Bounds::include`].
    pub fn empty() -> Self {
        Self {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max
    }

    pub fn include(&mut self, x: f64, y: f64) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    /// Replace never-grown bounds with the default plot scope.
    pub fn or_default_scope(self) -> Self {
        if self.is_empty() { Self::default() } else { self }
    }

    pub fn padded(&self, padding: f64) -> Self {
        Self {
            x_min: self.x_min - padding,
            x_max: self.x_max + padding,
            y_min: self.y_min - padding,
            y_max: self.y_max + padding,
        }
    }
}

/// Round to `precision` decimal places. Non-finite input maps to 0.
pub fn round_coord(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// Numerically stable softmax. Empty input yields an empty vector.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / logits.len() as f64;
        return vec![uniform; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Predicted class and its confidence from a raw probability/logit vector.
/// Ties resolve to the lowest index.
pub fn predict(logits: &[f64]) -> Option<(i64, f64)> {
    let probs = softmax(logits);
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in probs.into_iter().enumerate() {
        match best {
            Some((_, bp)) if p <= bp => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, p)| (i as i64, p))
}
