//! Image loading and cropping shared by training and recognition.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Longest edge, in pixels, an image is processed at.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Decode an image file and apply its EXIF orientation.
pub fn load_oriented(path: &Path) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Decode in-memory image bytes and apply their EXIF orientation.
pub fn decode_oriented(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Downscale so the longer edge is at most `max_dimension`, keeping aspect ratio.
pub fn bound_dimension(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let longest = image.width().max(image.height());
    if longest <= max_dimension || max_dimension == 0 {
        return image;
    }
    let scale = max_dimension as f32 / longest as f32;
    let width = ((image.width() as f32 * scale) as u32).max(1);
    let height = ((image.height() as f32 * scale) as u32).max(1);
    image.resize_exact(width, height, FilterType::Triangle)
}

/// Load, orient, bound and convert to RGB: the form every backend consumes.
pub fn prepare(image: DynamicImage, max_dimension: u32) -> RgbImage {
    bound_dimension(image, max_dimension).to_rgb8()
}

/// Crop a detected face out of `image`. `None` when the box misses the image.
pub fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let (x, y, width, height) = face.clip_to(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, width, height).to_image())
}
