//! UltraFace-style face detector via ONNX Runtime.
//!
//! The model takes a fixed 320x240 RGB input and emits per-prior class scores
//! and already-decoded corner boxes normalized to [0, 1], so decoding is a
//! threshold pass followed by NMS.

use crate::types::BoundingBox;
use crate::vision::{FaceDetector, VisionError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

// --- Named constants (no magic numbers) ---
const DETECTOR_INPUT_WIDTH: usize = 320;
const DETECTOR_INPUT_HEIGHT: usize = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;

/// ONNX face detector. The session is locked per call so one instance can be
/// shared across request handlers and the training thread.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    scores_idx: usize,
    boxes_idx: usize,
    confidence_threshold: f32,
}

impl OnnxFaceDetector {
    /// Load the detector model from the given path.
    pub fn load(model_path: &str) -> Result<Self, VisionError> {
        if !Path::new(model_path).exists() {
            return Err(VisionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face detector model"
        );

        if output_names.len() < 2 {
            return Err(VisionError::InferenceFailed(format!(
                "detector model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let (scores_idx, boxes_idx) = discover_output_indices(&output_names);

        Ok(Self {
            session: Mutex::new(session),
            scores_idx,
            boxes_idx,
            confidence_threshold: DETECTOR_CONFIDENCE_THRESHOLD,
        })
    }

    /// Resize to the fixed model input and normalize into a NCHW tensor.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = imageops::resize(
            image,
            DETECTOR_INPUT_WIDTH as u32,
            DETECTOR_INPUT_HEIGHT as u32,
            FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, DETECTOR_INPUT_HEIGHT, DETECTOR_INPUT_WIDTH));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }
        tensor
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        let input = Self::preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::InferenceFailed("detector session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode_detections(
            scores,
            boxes,
            image.width(),
            image.height(),
            self.confidence_threshold,
        );

        Ok(nms(detections, DETECTOR_NMS_THRESHOLD))
    }
}

/// Map output tensors by name ("scores", "boxes"), falling back to positional order.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "detector: output names not recognized, using [0]=scores, [1]=boxes");
            (0, 1)
        }
    }
}

/// Turn per-prior `[background, face]` scores and normalized corner boxes into
/// image-space detections above `threshold`.
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    image_width: u32,
    image_height: u32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let priors = (scores.len() / 2).min(boxes.len() / 4);
    let w = image_width as f32;
    let h = image_height as f32;

    let mut detections = Vec::new();
    for i in 0..priors {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression: keep the most confident of each overlapping group.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_filters_and_scales() {
        // Two priors: background-dominated, then a confident face.
        let scores = [0.9, 0.1, 0.05, 0.95];
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.5, 0.75, 1.0];
        let dets = decode_detections(&scores, &boxes, 640, 480, 0.7);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (160.0, 240.0, 320.0, 240.0));
        assert!((d.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_decode_clamps_and_drops_degenerate() {
        let scores = [0.0, 0.99, 0.0, 0.99];
        let boxes = [-0.2, -0.1, 0.5, 0.5, 0.6, 0.6, 0.6, 0.9];
        let dets = decode_detections(&scores, &boxes, 100, 100, 0.7);
        assert_eq!(dets.len(), 1);
        assert_eq!((dets[0].x, dets[0].y), (0.0, 0.0));
    }

    #[test]
    fn test_discover_output_indices() {
        let named: Vec<String> = ["boxes", "scores"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&named), (1, 0));
        let generic: Vec<String> = ["460", "461"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&generic), (0, 1));
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let image = RgbImage::from_pixel(64, 48, Rgb([127, 255, 0]));
        let tensor = OnnxFaceDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, DETECTOR_INPUT_HEIGHT, DETECTOR_INPUT_WIDTH]);
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        assert!((tensor[[0, 1, 10, 10]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 10, 10]] + 127.0 / 128.0).abs() < 1e-6);
    }
}
