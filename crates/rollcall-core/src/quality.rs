//! Sharpness gate for face crops.
//!
//! Blurry or flat crops produce unreliable embeddings, so a crop must pass
//! this gate before an embedding is extracted from it during training.

use image::{GrayImage, RgbImage};
use serde::Serialize;

/// Laplacian variance that maps to a quality of 1.0.
const LAPLACIAN_NORMALIZATION: f64 = 1000.0;

/// Default minimum quality for a crop to be used.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    /// Normalized sharpness in [0, 1].
    pub value: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    threshold: f64,
}

impl QualityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a face crop and judge it against the configured threshold.
    pub fn score(&self, face: &RgbImage) -> QualityScore {
        let gray = image::DynamicImage::ImageRgb8(face.clone()).to_luma8();
        let value = (laplacian_variance(&gray) / LAPLACIAN_NORMALIZATION).clamp(0.0, 1.0);
        QualityScore {
            value,
            passed: Self::is_acceptable(value, self.threshold),
        }
    }

    pub fn is_acceptable(score: f64, threshold: f64) -> bool {
        score >= threshold
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY_THRESHOLD)
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
///
/// Images smaller than 3x3 have no interior and score 0.0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}
