//! Per-identity photo folders → embeddings.
//!
//! The dataset root holds one folder per identity, named after it, each with
//! that person's photos. Ingestion is lenient: an unreadable image, a missed
//! face or a blurry crop is logged and skipped, never fatal to the identity.

use image::DynamicImage;
use rollcall_core::imaging::{self, DEFAULT_MAX_DIMENSION};
use rollcall_core::{EmbeddingExtractor, FaceDetector, QualityGate, ReferenceEmbedding};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Image extensions picked up by a scan, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Images per identity below which validation warns.
pub const DEFAULT_MIN_IMAGES: usize = 3;

/// Images per identity recommended for a robust model.
const RECOMMENDED_IMAGES: usize = 5;

/// How many names or sample paths a summary line lists.
const SAMPLE_LIMIT: usize = 3;

/// Folders created by `create_sample_structure` when none are given.
pub const SAMPLE_IDENTITIES: [&str; 5] = [
    "Pranav_A_067",
    "Raghuraman_R_072",
    "Shivani_T_101",
    "Kumar_S_068",
    "Priya_M_069",
];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("dataset root not found: {0}")]
    RootMissing(PathBuf),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Aggregate figures reported by validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_identities: usize,
    pub total_images: usize,
    pub identities_with_insufficient_images: Vec<String>,
    pub identities_with_no_faces: Vec<String>,
    /// Identity folders that could not be listed and were left out.
    pub unreadable_identities: Vec<String>,
    pub average_images_per_identity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: DatasetStats,
}

impl DatasetValidation {
    fn invalid(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            warnings: Vec::new(),
            stats: DatasetStats::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub name: String,
    pub image_count: usize,
    pub sample_images: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub total_identities: usize,
    pub total_images: usize,
    pub identities: Vec<IdentitySummary>,
}

/// Result of listing the dataset root.
#[derive(Debug, Default)]
struct DatasetScan {
    identities: BTreeMap<String, Vec<PathBuf>>,
    /// Identity folders that could not be listed, with the reason.
    unreadable: Vec<(String, String)>,
}

/// Walks the dataset tree and turns photos into embeddings.
pub struct DatasetIngestor {
    root: PathBuf,
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    gate: QualityGate,
    max_dimension: u32,
    min_images: usize,
}

impl DatasetIngestor {
    pub fn new(
        root: impl Into<PathBuf>,
        detector: Arc<dyn FaceDetector>,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        Self {
            root: root.into(),
            detector,
            extractor,
            gate: QualityGate::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            min_images: DEFAULT_MIN_IMAGES,
        }
    }

    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_min_images(mut self, min_images: usize) -> Self {
        self.min_images = min_images;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identity name → image paths, both sorted. Hidden entries, plain files
    /// at the root and folders without a supported image are left out, as are
    /// folders that cannot be listed.
    pub fn scan_identities(&self) -> Result<BTreeMap<String, Vec<PathBuf>>, IngestError> {
        self.scan().map(|scan| scan.identities)
    }

    fn scan(&self) -> Result<DatasetScan, IngestError> {
        if !self.root.is_dir() {
            return Err(IngestError::RootMissing(self.root.clone()));
        }

        let mut scan = DatasetScan::default();
        for entry in read_dir(&self.root)? {
            let path = entry.path();
            let Some(name) = visible_name(&path) else {
                continue;
            };
            if !path.is_dir() {
                continue;
            }

            let entries = match read_dir(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(identity = %name, error = %e, "skipping unreadable identity folder");
                    scan.unreadable.push((name, e.to_string()));
                    continue;
                }
            };
            let mut images: Vec<PathBuf> = entries
                .into_iter()
                .map(|e| e.path())
                .filter(|p| p.is_file() && visible_name(p).is_some() && is_supported_image(p))
                .collect();
            images.sort();

            if images.is_empty() {
                tracing::warn!(identity = %name, "no supported images in identity folder");
                continue;
            }
            tracing::debug!(identity = %name, images = images.len(), "found identity folder");
            scan.identities.insert(name, images);
        }

        tracing::info!(
            root = %self.root.display(),
            identities = scan.identities.len(),
            unreadable = scan.unreadable.len(),
            "scanned dataset"
        );
        Ok(scan)
    }

    /// Embeddings for one identity from its image files.
    pub fn process_identity(&self, name: &str, image_paths: &[PathBuf]) -> Vec<ReferenceEmbedding> {
        let mut embeddings = Vec::new();
        for path in image_paths {
            match imaging::load_oriented(path) {
                Ok(image) => embeddings.extend(self.embed_image(image, &path.display().to_string())),
                Err(e) => tracing::warn!(identity = name, path = %path.display(), error = %e, "could not load image"),
            }
        }
        tracing::info!(
            identity = name,
            images = image_paths.len(),
            embeddings = embeddings.len(),
            "processed identity"
        );
        embeddings
    }

    /// Embeddings for one identity from encoded image bytes.
    pub fn process_encoded(&self, name: &str, images: &[Vec<u8>]) -> Vec<ReferenceEmbedding> {
        let mut embeddings = Vec::new();
        for (i, bytes) in images.iter().enumerate() {
            match imaging::decode_oriented(bytes) {
                Ok(image) => embeddings.extend(self.embed_image(image, &format!("upload #{i}"))),
                Err(e) => tracing::warn!(identity = name, index = i, error = %e, "could not decode image"),
            }
        }
        tracing::info!(
            identity = name,
            images = images.len(),
            embeddings = embeddings.len(),
            "processed uploaded images"
        );
        embeddings
    }

    /// Detect, gate and embed every face in one image.
    fn embed_image(&self, image: DynamicImage, source: &str) -> Vec<ReferenceEmbedding> {
        let frame = imaging::prepare(image, self.max_dimension);
        let faces = match self.detector.detect(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(source, error = %e, "face detection failed");
                return Vec::new();
            }
        };
        if faces.is_empty() {
            tracing::warn!(source, "no faces detected");
            return Vec::new();
        }

        let mut embeddings = Vec::new();
        for face in &faces {
            let Some(crop) = imaging::crop_face(&frame, face) else {
                continue;
            };
            let quality = self.gate.score(&crop);
            if !quality.passed {
                tracing::warn!(source, quality = quality.value, "low quality face, skipping");
                continue;
            }
            match self.extractor.extract(&crop) {
                Ok(Some(embedding)) => embeddings.push(ReferenceEmbedding::scored(embedding, quality.value)),
                Ok(None) => tracing::debug!(source, "no embedding for face"),
                Err(e) => tracing::warn!(source, error = %e, "embedding extraction failed"),
            }
        }
        embeddings
    }

    /// Check the dataset layout before a training run.
    pub fn validate_structure(&self) -> DatasetValidation {
        let DatasetScan { identities, unreadable } = match self.scan() {
            Ok(scan) => scan,
            Err(e) => return DatasetValidation::invalid(e.to_string()),
        };

        let mut warnings: Vec<String> = unreadable
            .iter()
            .map(|(name, error)| format!("identity {name} skipped: {error}"))
            .collect();
        let unreadable_identities: Vec<String> = unreadable.into_iter().map(|(name, _)| name).collect();

        if identities.is_empty() {
            let mut validation = DatasetValidation::invalid("no identity folders found".to_string());
            validation.warnings = warnings;
            validation.stats.unreadable_identities = unreadable_identities;
            return validation;
        }

        let mut stats = DatasetStats {
            total_identities: identities.len(),
            unreadable_identities,
            ..DatasetStats::default()
        };

        for (name, images) in &identities {
            stats.total_images += images.len();

            if images.len() < self.min_images {
                warnings.push(format!(
                    "identity {name} has only {} images (minimum {} recommended)",
                    images.len(),
                    self.min_images
                ));
                stats.identities_with_insufficient_images.push(name.clone());
            }

            // Only the first image is checked; a full pass is the training run's job.
            let Some(first) = images.first() else {
                continue;
            };
            let Ok(image) = imaging::load_oriented(first) else {
                continue;
            };
            let frame = imaging::prepare(image, self.max_dimension);
            match self.detector.detect(&frame) {
                Ok(faces) if faces.is_empty() => {
                    warnings.push(format!("no faces detected in sample image for identity {name}"));
                    stats.identities_with_no_faces.push(name.clone());
                }
                Ok(_) => {}
                Err(e) => warnings.push(format!("could not check sample image for identity {name}: {e}")),
            }
        }

        stats.average_images_per_identity = stats.total_images as f64 / stats.total_identities as f64;
        tracing::info!(
            identities = stats.total_identities,
            images = stats.total_images,
            warnings = warnings.len(),
            "dataset validated"
        );

        DatasetValidation {
            valid: true,
            errors: Vec::new(),
            warnings,
            stats,
        }
    }

    /// Per-identity image counts with a few sample paths.
    pub fn scan_summary(&self) -> Result<DatasetSummary, IngestError> {
        let identities = self.scan_identities()?;
        let total_images = identities.values().map(Vec::len).sum();
        let identities: Vec<IdentitySummary> = identities
            .into_iter()
            .map(|(name, images)| IdentitySummary {
                name,
                image_count: images.len(),
                sample_images: images.into_iter().take(SAMPLE_LIMIT).collect(),
            })
            .collect();
        Ok(DatasetSummary {
            total_identities: identities.len(),
            total_images,
            identities,
        })
    }
}

/// User-facing advice derived from a validation result.
pub fn recommendations(validation: &DatasetValidation) -> Vec<String> {
    let stats = &validation.stats;
    let mut advice = Vec::new();

    if !validation.valid {
        advice.push("Fix validation errors before training".to_string());
    }
    if stats.total_identities == 0 {
        advice.push("Add identity folders with photos to the dataset root".to_string());
    }
    if stats.total_images < stats.total_identities * RECOMMENDED_IMAGES {
        advice.push("Add more images per identity (recommended: 5-15 images)".to_string());
    }
    if !stats.identities_with_insufficient_images.is_empty() {
        advice.push(format!(
            "Add more images for: {}",
            first_names(&stats.identities_with_insufficient_images)
        ));
    }
    if !stats.identities_with_no_faces.is_empty() {
        advice.push(format!(
            "Check image quality for: {}",
            first_names(&stats.identities_with_no_faces)
        ));
    }
    if !stats.unreadable_identities.is_empty() {
        advice.push(format!(
            "Check folder permissions for: {}",
            first_names(&stats.unreadable_identities)
        ));
    }
    if stats.average_images_per_identity < RECOMMENDED_IMAGES as f64 {
        advice.push(format!(
            "Increase average images per identity to at least {RECOMMENDED_IMAGES}"
        ));
    }

    if advice.is_empty() {
        advice.push("Dataset looks good! Ready for training.".to_string());
    }
    advice
}

/// Create empty identity folders, each with a README on what to put there.
/// Returns the number of folders created or refreshed.
pub fn create_sample_structure(root: &Path, names: &[&str]) -> Result<usize, IngestError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| IngestError::Io { path, source }
    };

    std::fs::create_dir_all(root).map_err(io_err(root))?;
    for name in names {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let readme = dir.join("README.txt");
        std::fs::write(&readme, sample_readme(name)).map_err(io_err(&readme))?;
    }
    tracing::info!(root = %root.display(), folders = names.len(), "created sample dataset structure");
    Ok(names.len())
}

fn sample_readme(name: &str) -> String {
    format!(
        "Identity: {name}\n\
         \n\
         Add face images for this person to this folder.\n\
         Supported formats: JPG, JPEG, PNG, BMP\n\
         \n\
         Recommended:\n\
         - 5-15 clear face images\n\
         - Good lighting conditions\n\
         - Various angles (front, slight left/right)\n\
         - Sharp, unblurred images\n"
    )
}

fn first_names(names: &[String]) -> String {
    names.iter().take(SAMPLE_LIMIT).cloned().collect::<Vec<_>>().join(", ")
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, IngestError> {
    let io_err = |source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)
}

/// File name unless hidden (dot-prefixed) or not valid UTF-8.
fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    (!name.starts_with('.')).then(|| name.to_string())
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
