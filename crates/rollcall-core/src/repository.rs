//! Persistence seams consumed by training and attendance recording.

use crate::types::{EmbeddingVector, IdentityKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(IdentityKey),
}

/// Identity resolved from an enrollment name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub key: IdentityKey,
    /// True when the identity did not exist before this call.
    pub created: bool,
}

/// A reference embedding together with the quality of the crop it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEmbedding {
    pub vector: EmbeddingVector,
    /// `None` when the vector did not come from a gated crop.
    pub quality: Option<f64>,
}

impl ReferenceEmbedding {
    pub fn scored(vector: EmbeddingVector, quality: f64) -> Self {
        Self {
            vector,
            quality: Some(quality),
        }
    }
}

impl From<EmbeddingVector> for ReferenceEmbedding {
    fn from(vector: EmbeddingVector) -> Self {
        Self { vector, quality: None }
    }
}

/// Durable home of identities and their reference embeddings.
pub trait EmbeddingRepository: Send + Sync {
    /// Find the identity enrolled under `name`, creating it if absent.
    fn resolve_or_create_identity(&self, name: &str) -> Result<ResolvedIdentity, RepositoryError>;

    /// Replace the stored embeddings of one identity. Returns the number stored.
    fn save_embeddings(
        &self,
        identity: &IdentityKey,
        embeddings: &[ReferenceEmbedding],
    ) -> Result<usize, RepositoryError>;

    /// Every active identity with its embeddings, in a stable order.
    fn load_all_embeddings(&self) -> Result<Vec<(IdentityKey, Vec<EmbeddingVector>)>, RepositoryError>;

    /// Human-readable name of an identity, if it exists.
    fn display_name(&self, identity: &IdentityKey) -> Result<Option<String>, RepositoryError>;

    /// Mark an identity inactive so it drops out of the next load. False
    /// when no such identity exists.
    fn deactivate_identity(&self, identity: &IdentityKey) -> Result<bool, RepositoryError>;

    fn statistics(&self) -> Result<RepositoryStats, RepositoryError>;
}

/// Counts over active identities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub identity_count: usize,
    pub embedding_count: usize,
    /// Enrollment names in creation order.
    pub identity_names: Vec<String>,
}

/// A durable attendance mark produced by a successful match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub identity: IdentityKey,
    pub confidence: f64,
    pub session_id: Option<String>,
    pub location: Option<String>,
    pub subject_code: Option<String>,
    pub period: Option<String>,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only attendance storage.
pub trait AttendanceLog: Send + Sync {
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), RepositoryError>;

    /// Records newest first, optionally narrowed to one identity and/or session.
    fn list_attendance(
        &self,
        identity: Option<&IdentityKey>,
        session_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError>;
}
