use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Dimension of every face embedding the system stores or matches.
pub const EMBEDDING_DIM: usize = 128;

/// Accepted deviation of a stored embedding's L2 norm from 1.0.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("expected {EMBEDDING_DIM}-dim embedding, got {0}")]
    WrongLength(usize),
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("embedding is not unit length (norm {0})")]
    NotNormalized(f64),
}

/// Stable key used to group embeddings by enrolled identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fresh random key for a newly created identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Unit-length 128-dim face embedding.
///
/// Values are write-once: the backing slice is shared between clones and
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f64]>,
}

impl EmbeddingVector {
    /// Build an embedding from raw model output, L2-normalizing it.
    ///
    /// Rejects wrong dimension, non-finite values and zero-norm vectors.
    pub fn new(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        let norm = checked_norm(&values)?;
        let values: Vec<f64> = values.iter().map(|v| v / norm).collect();
        Ok(Self {
            values: values.into(),
        })
    }

    /// Build an embedding from values that must already be unit length.
    pub fn from_unit(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        let norm = checked_norm(&values)?;
        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(EmbeddingError::NotNormalized(norm));
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Convenience for single-precision inference output.
    pub fn from_f32(values: &[f32]) -> Result<Self, EmbeddingError> {
        Self::new(values.iter().map(|&v| v as f64).collect())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &EmbeddingVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

fn checked_norm(values: &[f64]) -> Result<f64, EmbeddingError> {
    if values.len() != EMBEDDING_DIM {
        return Err(EmbeddingError::WrongLength(values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return Err(EmbeddingError::ZeroNorm);
    }
    Ok(norm)
}

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Integer pixel rectangle `(x, y, width, height)` clipped to the image.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = self.y.max(0.0).floor() as u32;
        let x2 = ((self.x + self.width).min(image_width as f32).max(0.0)).ceil() as u32;
        let y2 = ((self.y + self.height).min(image_height as f32).max(0.0)).ceil() as u32;
        let x2 = x2.min(image_width);
        let y2 = y2.min(image_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Outcome of matching one query embedding against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` when the best candidate did not pass the threshold.
    pub identity: Option<IdentityKey>,
    /// Best similarity observed during the scan, in [0, 1].
    pub similarity: f64,
}

impl MatchResult {
    pub fn no_match(similarity: f64) -> Self {
        Self {
            identity: None,
            similarity,
        }
    }

    pub fn matched(&self) -> bool {
        self.identity.is_some()
    }
}
