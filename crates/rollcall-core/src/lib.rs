//! rollcall-core: face embedding index and matching engine.
//!
//! Holds enrolled embeddings as atomically published snapshots, matches query
//! embeddings against them, gates training crops on sharpness, and provides
//! ONNX Runtime backends for face detection and embedding extraction.

pub mod codec;
pub mod detector;
pub mod imaging;
pub mod matcher;
pub mod quality;
pub mod recognizer;
pub mod repository;
pub mod store;
pub mod types;
pub mod vision;

pub use detector::OnnxFaceDetector;
pub use matcher::{recognize_frame, DistanceMatcher, FaceMatch, Matcher};
pub use quality::{QualityGate, QualityScore};
pub use recognizer::OnnxEmbedder;
pub use repository::{
    AttendanceLog, AttendanceRecord, EmbeddingRepository, ReferenceEmbedding, RepositoryError, RepositoryStats,
    ResolvedIdentity,
};
pub use store::{EmbeddingStore, Snapshot};
pub use types::{BoundingBox, EmbeddingError, EmbeddingVector, IdentityKey, MatchResult, EMBEDDING_DIM};
pub use vision::{EmbeddingExtractor, FaceDetector, VisionError};

/// Default directory for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
