//! 128-d face embedder via ONNX Runtime.
//!
//! Takes a cropped face region, resizes it to the model's square input and
//! returns an L2-normalized double-precision embedding.

use crate::types::{EmbeddingVector, EMBEDDING_DIM};
use crate::vision::{EmbeddingExtractor, VisionError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

// --- Named constants ---
const EMBEDDER_INPUT_SIZE: usize = 160;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 128.0;

/// ONNX embedding extractor.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    /// Load the embedding model from the given path.
    pub fn load(model_path: &str) -> Result<Self, VisionError> {
        if !Path::new(model_path).exists() {
            return Err(VisionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Resize a face crop to the square model input as a NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE;
        let resized = imageops::resize(face, size as u32, size as u32, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for OnnxEmbedder {
    fn extract(&self, face: &RgbImage) -> Result<Option<EmbeddingVector>, VisionError> {
        if face.width() == 0 || face.height() == 0 {
            return Ok(None);
        }
        let input = Self::preprocess(face);

        let raw: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| VisionError::InferenceFailed("embedder session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::InferenceFailed(format!("embedding extraction: {e}")))?;
            raw_data.to_vec()
        };

        if raw.len() != EMBEDDING_DIM {
            return Err(VisionError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        match EmbeddingVector::from_f32(&raw) {
            Ok(embedding) => Ok(Some(embedding)),
            Err(e) => {
                tracing::debug!(error = %e, "embedder produced a degenerate embedding");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(37, 53, Rgb([128, 128, 128]));
        let tensor = OnnxEmbedder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(EMBEDDER_INPUT_SIZE as u32, EMBEDDER_INPUT_SIZE as u32, Rgb([128, 0, 255]));
        let tensor = OnnxEmbedder::preprocess(&face);
        let expected = [
            (128.0 - EMBEDDER_MEAN) / EMBEDDER_STD,
            (0.0 - EMBEDDER_MEAN) / EMBEDDER_STD,
            (255.0 - EMBEDDER_MEAN) / EMBEDDER_STD,
        ];
        for (c, want) in expected.iter().enumerate() {
            let got = tensor[[0, c, 5, 5]];
            assert!((got - want).abs() < 1e-6, "channel {c}: got {got}, expected {want}");
        }
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load("/nonexistent/face_embedder.onnx").err().unwrap();
        assert!(matches!(err, VisionError::ModelNotFound(_)));
    }
}
