//! Deterministic vision stand-ins for unit tests.
//!
//! A test face is a checkerboard whose top-left pixel carries a tag in its
//! green channel; the extractor maps that tag to a unit axis, so the same tag
//! always embeds to the same vector and different tags never match.

use image::{Rgb, RgbImage};
use rollcall_core::{BoundingBox, EmbeddingExtractor, EmbeddingVector, FaceDetector, VisionError, EMBEDDING_DIM};
use std::path::Path;

/// Sharp test face carrying `tag`.
pub fn face_image(tag: u8) -> RgbImage {
    RgbImage::from_fn(48, 48, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([255, tag, 0])
        } else {
            Rgb([20, tag, 0])
        }
    })
}

/// Frame in which no face is detected.
pub fn blank_image() -> RgbImage {
    RgbImage::from_pixel(48, 48, Rgb([0, 0, 0]))
}

pub fn unit_axis(axis: usize) -> EmbeddingVector {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[axis % EMBEDDING_DIM] = 1.0;
    EmbeddingVector::new(v).expect("unit axis is a valid embedding")
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encoding");
    bytes
}

/// Write `count` copies of the tagged face into `root/name`.
pub fn write_identity(root: &Path, name: &str, tag: u8, count: usize) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("identity dir");
    for i in 0..count {
        face_image(tag).save(dir.join(format!("{i:02}.png"))).expect("write face");
    }
}

/// One face covering the frame, unless the top-left pixel is dark.
pub struct WholeFrameDetector;

impl FaceDetector for WholeFrameDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        if image.get_pixel(0, 0)[0] < 10 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            confidence: 0.99,
        }])
    }
}

/// Embeds a face as the unit axis named by its tag.
pub struct TagExtractor;

impl EmbeddingExtractor for TagExtractor {
    fn extract(&self, face: &RgbImage) -> Result<Option<EmbeddingVector>, VisionError> {
        Ok(Some(unit_axis(face.get_pixel(0, 0)[1] as usize)))
    }
}
