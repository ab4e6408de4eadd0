//! Query-to-gallery matching.

use crate::imaging::crop_face;
use crate::store::Snapshot;
use crate::types::{BoundingBox, EmbeddingVector, IdentityKey, MatchResult};
use crate::vision::{EmbeddingExtractor, FaceDetector, VisionError};
use image::RgbImage;

/// Native match-distance scale of 128-d face embeddings: a Euclidean distance
/// at or beyond this maps to zero similarity.
pub const DEFAULT_DISTANCE_SCALE: f64 = 0.6;

/// Strategy for comparing embeddings and scanning a snapshot.
pub trait Matcher {
    /// Similarity in [0, 1]; 1.0 for identical embeddings.
    fn similarity(&self, a: &EmbeddingVector, b: &EmbeddingVector) -> f64;

    /// Find the single best candidate across the whole snapshot.
    ///
    /// Every stored vector is compared; a later candidate replaces the current
    /// best only when strictly more similar, so on exact ties the first entry
    /// in snapshot order wins.
    fn recognize(&self, query: &EmbeddingVector, snapshot: &Snapshot, threshold: f64) -> MatchResult {
        let mut best: Option<(&IdentityKey, f64)> = None;

        for (key, vectors) in snapshot.entries() {
            for stored in vectors {
                let sim = self.similarity(query, stored);
                if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                    best = Some((key, sim));
                }
            }
        }

        match best {
            Some((key, sim)) if passes_threshold(sim, threshold) => MatchResult {
                identity: Some(key.clone()),
                similarity: sim,
            },
            Some((_, sim)) => MatchResult::no_match(sim),
            None => MatchResult::no_match(0.0),
        }
    }
}

/// A candidate must strictly exceed the threshold. The closed ends of the
/// range are special: 0.0 accepts any candidate and 1.0 accepts an exact match.
pub fn passes_threshold(similarity: f64, threshold: f64) -> bool {
    if threshold <= 0.0 {
        true
    } else if threshold >= 1.0 {
        similarity >= 1.0
    } else {
        similarity > threshold
    }
}

/// Euclidean-distance matcher: `max(0, 1 - distance / scale)`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    scale: f64,
}

impl DistanceMatcher {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_SCALE)
    }
}

impl Matcher for DistanceMatcher {
    fn similarity(&self, a: &EmbeddingVector, b: &EmbeddingVector) -> f64 {
        let distance = a.euclidean_distance(b);
        (1.0 - distance / self.scale).clamp(0.0, 1.0)
    }
}

/// Match result for one detected face in a frame.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub bounding_box: BoundingBox,
    pub result: MatchResult,
}

/// Detect every face in `frame`, embed each and match it against `snapshot`.
///
/// Results keep detection order. A face whose crop or embedding fails is
/// skipped; only a detector failure fails the frame.
pub fn recognize_frame<M: Matcher + ?Sized>(
    matcher: &M,
    detector: &dyn FaceDetector,
    extractor: &dyn EmbeddingExtractor,
    frame: &RgbImage,
    snapshot: &Snapshot,
    threshold: f64,
) -> Result<Vec<FaceMatch>, VisionError> {
    let faces = detector.detect(frame)?;
    tracing::debug!(faces = faces.len(), "frame: faces detected");

    let mut matches = Vec::with_capacity(faces.len());
    for face in faces {
        let Some(region) = crop_face(frame, &face) else {
            tracing::debug!(?face, "frame: face box outside image, skipping");
            continue;
        };

        let embedding = match extractor.extract(&region) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                tracing::debug!(?face, "frame: no embedding for face, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame: embedding extraction failed, skipping face");
                continue;
            }
        };

        let result = matcher.recognize(&embedding, snapshot, threshold);
        match &result.identity {
            Some(key) => tracing::info!(
                identity = %key,
                confidence = result.similarity,
                "recognized face"
            ),
            None => tracing::debug!(best = result.similarity, "unknown face"),
        }
        matches.push(FaceMatch {
            bounding_box: face,
            result,
        });
    }

    Ok(matches)
}
