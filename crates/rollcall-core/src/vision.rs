//! Seams to the vision backend: face detection and embedding extraction.

use crate::types::{BoundingBox, EmbeddingVector};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0} (place the ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a full image.
pub trait FaceDetector: Send + Sync {
    /// Bounding boxes in image pixel coordinates, in detection order.
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Computes an identity embedding from a cropped face region.
pub trait EmbeddingExtractor: Send + Sync {
    /// `Ok(None)` when the region yields no usable embedding.
    fn extract(&self, face: &RgbImage) -> Result<Option<EmbeddingVector>, VisionError>;
}
