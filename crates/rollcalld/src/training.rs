//! Full-dataset training runs and single-identity enrollment.
//!
//! At most one run is in flight. It executes on a dedicated OS thread, since
//! detection and embedding are CPU-bound, and publishes its progress through
//! a `TrainingRun` behind an `RwLock` that status readers copy out of.
//! Whatever produced new embeddings, the live index is refreshed by reading
//! back everything persisted under `publish_lock`, so a run and an enrollment
//! finishing together cannot lose each other's update.

use crate::dataset::{DatasetIngestor, DatasetValidation};
use chrono::{DateTime, Utc};
use rollcall_core::{
    EmbeddingRepository, EmbeddingStore, IdentityKey, ReferenceEmbedding, RepositoryError, ResolvedIdentity, Snapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Observable state of the current, or most recent, training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub status: TrainingStatus,
    pub current_identity: Option<String>,
    pub completed: Vec<String>,
    pub errors: Vec<String>,
    /// Identities stored so far.
    pub progress: usize,
    /// Identities found by the scan.
    pub total: usize,
    pub identities_created: usize,
    pub identities_updated: usize,
    pub embeddings_stored: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub validation: Option<DatasetValidation>,
}

impl TrainingRun {
    fn idle() -> Self {
        Self {
            status: TrainingStatus::Idle,
            current_identity: None,
            completed: Vec::new(),
            errors: Vec::new(),
            progress: 0,
            total: 0,
            identities_created: 0,
            identities_updated: 0,
            embeddings_stored: 0,
            started_at: None,
            finished_at: None,
            validation: None,
        }
    }

    fn started() -> Self {
        Self {
            status: TrainingStatus::Running,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("failed to spawn training thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("no images supplied")]
    NoImages,
    #[error("no usable face found in the images for {0}")]
    NoUsableImages(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Reply to a start request.
#[derive(Debug)]
pub enum StartOutcome {
    /// A new run was launched on its own thread.
    Started(JoinHandle<()>),
    /// A run is already in flight; it was left untouched.
    AlreadyRunning,
}

impl StartOutcome {
    pub fn started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollOutcome {
    pub identity: IdentityKey,
    pub created: bool,
    pub embeddings_stored: usize,
    pub known_identities: usize,
}

pub struct TrainingPipeline {
    ingestor: Arc<DatasetIngestor>,
    repository: Arc<dyn EmbeddingRepository>,
    store: Arc<EmbeddingStore>,
    run: RwLock<TrainingRun>,
    cancel: Mutex<Option<CancellationToken>>,
    publish_lock: Mutex<()>,
}

impl TrainingPipeline {
    pub fn new(
        ingestor: Arc<DatasetIngestor>,
        repository: Arc<dyn EmbeddingRepository>,
        store: Arc<EmbeddingStore>,
    ) -> Self {
        Self {
            ingestor,
            repository,
            store,
            run: RwLock::new(TrainingRun::idle()),
            cancel: Mutex::new(None),
            publish_lock: Mutex::new(()),
        }
    }

    pub fn ingestor(&self) -> &DatasetIngestor {
        &self.ingestor
    }

    /// Copy of the current run state.
    pub fn status(&self) -> TrainingRun {
        self.run.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Launch a full training run unless one is already running.
    pub fn start(self: &Arc<Self>) -> Result<StartOutcome, TrainingError> {
        let Some(token) = self.begin() else {
            tracing::info!("training already running, start request ignored");
            return Ok(StartOutcome::AlreadyRunning);
        };

        let pipeline = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("rollcall-training".into())
            .spawn(move || pipeline.execute(token));

        match spawned {
            Ok(handle) => Ok(StartOutcome::Started(handle)),
            Err(e) => {
                self.finish(TrainingStatus::Failed, Some(format!("failed to spawn training thread: {e}")));
                Err(TrainingError::Spawn(e))
            }
        }
    }

    /// Ask the running run to stop before its next identity.
    pub fn cancel(&self) -> bool {
        if self.status().status != TrainingStatus::Running {
            return false;
        }
        match self.cancel.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(token) => {
                tracing::info!("training cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Single-flight transition into `running`. `None` when already running.
    fn begin(&self) -> Option<CancellationToken> {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        if run.status == TrainingStatus::Running {
            return None;
        }
        *run = TrainingRun::started();

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        tracing::info!(root = %self.ingestor.root().display(), "training run started");
        Some(token)
    }

    fn update(&self, f: impl FnOnce(&mut TrainingRun)) {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut run);
    }

    fn finish(&self, status: TrainingStatus, error: Option<String>) {
        // Token cleared under the run lock so a run begun right after keeps its own.
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = error {
            run.errors.push(error);
        }
        run.status = status;
        run.current_identity = None;
        run.finished_at = Some(Utc::now());
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Body of a run: validate, ingest and store each identity, then reload.
    fn execute(&self, token: CancellationToken) {
        let validation = self.ingestor.validate_structure();
        let valid = validation.valid;
        let validation_errors = validation.errors.clone();
        self.update(|run| run.validation = Some(validation));
        if !valid {
            tracing::error!(errors = ?validation_errors, "dataset validation failed");
            self.update(|run| run.errors.extend(validation_errors));
            self.finish(TrainingStatus::Failed, None);
            return;
        }

        let identities = match self.ingestor.scan_identities() {
            Ok(identities) if identities.is_empty() => {
                tracing::error!("no identities found in dataset");
                self.finish(TrainingStatus::Failed, Some("no identities found in dataset".to_string()));
                return;
            }
            Ok(identities) => identities,
            Err(e) => {
                tracing::error!(error = %e, "dataset scan failed");
                self.finish(TrainingStatus::Failed, Some(e.to_string()));
                return;
            }
        };
        self.update(|run| run.total = identities.len());

        let mut cancelled = false;
        for (name, paths) in &identities {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            self.update(|run| run.current_identity = Some(name.clone()));

            let embeddings = self.ingestor.process_identity(name, paths);
            let stored = if embeddings.is_empty() {
                Err(format!("no usable embeddings for identity {name}"))
            } else {
                self.persist(name, &embeddings)
                    .map_err(|e| format!("storing identity {name}: {e}"))
            };

            match stored {
                Ok(resolved) => {
                    tracing::info!(identity = %name, key = %resolved.key, embeddings = embeddings.len(), "stored embeddings");
                    self.update(|run| {
                        run.completed.push(name.clone());
                        run.progress = run.completed.len();
                        run.embeddings_stored += embeddings.len();
                        if resolved.created {
                            run.identities_created += 1;
                        } else {
                            run.identities_updated += 1;
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!(identity = %name, %error, "identity not stored");
                    self.update(|run| run.errors.push(error));
                }
            }
        }

        // Identities stored before a cancel are live as well.
        let reloaded = self.reload();

        if cancelled {
            tracing::warn!("training run cancelled");
            self.finish(TrainingStatus::Failed, Some("training cancelled".to_string()));
            return;
        }
        match reloaded {
            Ok(snapshot) => {
                let status = self.status();
                tracing::info!(
                    stored = status.completed.len(),
                    errors = status.errors.len(),
                    known_identities = snapshot.identity_count(),
                    "training run completed"
                );
                self.finish(TrainingStatus::Completed, None);
            }
            Err(e) => {
                tracing::error!(error = %e, "reload after training failed");
                self.finish(TrainingStatus::Failed, Some(format!("reloading embeddings: {e}")));
            }
        }
    }

    fn persist(&self, name: &str, embeddings: &[ReferenceEmbedding]) -> Result<ResolvedIdentity, RepositoryError> {
        let resolved = self.repository.resolve_or_create_identity(name)?;
        self.repository.save_embeddings(&resolved.key, embeddings)?;
        Ok(resolved)
    }

    /// Rebuild the live index from everything persisted and publish it.
    pub fn reload(&self) -> Result<Arc<Snapshot>, RepositoryError> {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.repository.load_all_embeddings()?;
        Ok(self.store.replace(entries))
    }

    /// Enroll or re-enroll one identity from encoded images, outside the
    /// run state machine.
    pub fn enroll_one(&self, name: &str, images: &[Vec<u8>]) -> Result<EnrollOutcome, EnrollError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::EmptyName);
        }
        if images.is_empty() {
            return Err(EnrollError::NoImages);
        }

        let embeddings = self.ingestor.process_encoded(name, images);
        if embeddings.is_empty() {
            return Err(EnrollError::NoUsableImages(name.to_string()));
        }

        let resolved = self.persist(name, &embeddings)?;
        let snapshot = self.reload()?;
        tracing::info!(
            identity = name,
            key = %resolved.key,
            embeddings = embeddings.len(),
            "enrolled identity"
        );
        Ok(EnrollOutcome {
            identity: resolved.key,
            created: resolved.created,
            embeddings_stored: embeddings.len(),
            known_identities: snapshot.identity_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{encode_png, face_image, write_identity, TagExtractor, WholeFrameDetector};
    use image::RgbImage;
    use rollcall_core::{BoundingBox, FaceDetector, VisionError};
    use rollcall_db::SqliteStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    fn pipeline_with(root: &Path, detector: Arc<dyn FaceDetector>) -> (Arc<TrainingPipeline>, Arc<EmbeddingStore>) {
        let ingestor = DatasetIngestor::new(root, detector, Arc::new(TagExtractor));
        let store = Arc::new(EmbeddingStore::new());
        let repository = Arc::new(SqliteStore::open_in_memory().unwrap());
        let pipeline = Arc::new(TrainingPipeline::new(Arc::new(ingestor), repository, store.clone()));
        (pipeline, store)
    }

    fn pipeline(root: &Path) -> (Arc<TrainingPipeline>, Arc<EmbeddingStore>) {
        pipeline_with(root, Arc::new(WholeFrameDetector))
    }

    fn run_to_end(pipeline: &Arc<TrainingPipeline>) -> TrainingRun {
        match pipeline.start().unwrap() {
            StartOutcome::Started(handle) => handle.join().unwrap(),
            StartOutcome::AlreadyRunning => panic!("nothing else should be running"),
        }
        pipeline.status()
    }

    #[test]
    fn test_initial_status_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let status = pipeline.status();
        assert_eq!(status.status, TrainingStatus::Idle);
        assert!(status.started_at.is_none());
        assert!(!pipeline.cancel());
    }

    #[test]
    fn test_run_completes_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "alice", 1, 3);
        write_identity(dir.path(), "bob", 2, 3);
        let (pipeline, store) = pipeline(dir.path());

        let run = run_to_end(&pipeline);
        assert_eq!(run.status, TrainingStatus::Completed);
        assert_eq!(run.completed, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(run.progress, 2);
        assert_eq!(run.total, 2);
        assert_eq!(run.identities_created, 2);
        assert_eq!(run.embeddings_stored, 6);
        assert!(run.errors.is_empty());
        assert!(run.finished_at.is_some());
        assert!(run.current_identity.is_none());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.identity_count(), 2);
        assert_eq!(snapshot.embedding_count(), 6);
    }

    #[test]
    fn test_identity_without_faces_is_an_error_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "alice", 1, 3);
        let ghost = dir.path().join("ghost");
        std::fs::create_dir_all(&ghost).unwrap();
        RgbImage::new(16, 16).save(ghost.join("empty.png")).unwrap();
        let (pipeline, store) = pipeline(dir.path());

        let run = run_to_end(&pipeline);
        assert_eq!(run.status, TrainingStatus::Completed);
        assert_eq!(run.completed, vec!["alice".to_string()]);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].contains("ghost"));
        assert_eq!(store.snapshot().identity_count(), 1);
    }

    #[test]
    fn test_missing_root_fails_without_processing() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, store) = pipeline(&dir.path().join("missing"));

        let run = run_to_end(&pipeline);
        assert_eq!(run.status, TrainingStatus::Failed);
        assert!(run.errors[0].contains("not found"));
        assert!(run.completed.is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_empty_dataset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let run = run_to_end(&pipeline);
        assert_eq!(run.status, TrainingStatus::Failed);
        assert_eq!(run.errors, vec!["no identity folders found".to_string()]);
    }

    #[test]
    fn test_rerun_overwrites_history() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "alice", 1, 3);
        let (pipeline, store) = pipeline(dir.path());

        let first = run_to_end(&pipeline);
        let second = run_to_end(&pipeline);
        assert_eq!(second.status, TrainingStatus::Completed);
        assert_eq!(second.identities_created, 0);
        assert_eq!(second.identities_updated, 1);
        assert!(second.started_at >= first.started_at);
        // Re-training replaces embeddings rather than accumulating them.
        assert_eq!(store.snapshot().embedding_count(), 3);
    }

    /// Cancels the run once `after` detections have happened.
    struct CancellingDetector {
        token: OnceLock<CancellationToken>,
        calls: AtomicUsize,
        after: usize,
    }

    impl FaceDetector for CancellingDetector {
        fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                if let Some(token) = self.token.get() {
                    token.cancel();
                }
            }
            WholeFrameDetector.detect(image)
        }
    }

    #[test]
    fn test_cancel_stops_between_identities() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "alice", 1, 3);
        write_identity(dir.path(), "bob", 2, 3);
        // Validation checks one sample per identity, so the third detection
        // is alice's first training image.
        let detector = Arc::new(CancellingDetector {
            token: OnceLock::new(),
            calls: AtomicUsize::new(0),
            after: 3,
        });
        let (pipeline, store) = pipeline_with(dir.path(), detector.clone());

        let token = pipeline.begin().unwrap();
        detector.token.set(token.clone()).unwrap();
        pipeline.execute(token);

        let run = pipeline.status();
        assert_eq!(run.status, TrainingStatus::Failed);
        assert_eq!(run.errors, vec!["training cancelled".to_string()]);
        // The identity in progress finishes; the next one never starts.
        assert_eq!(run.completed, vec!["alice".to_string()]);
        assert_eq!(store.snapshot().identity_count(), 1);
    }

    #[test]
    fn test_cancel_flag_set_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let token = pipeline.begin().unwrap();
        assert!(pipeline.begin().is_none());
        assert!(pipeline.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_enroll_one_publishes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, store) = pipeline(dir.path());

        let outcome = pipeline
            .enroll_one("Pranav_A_067", &[encode_png(&face_image(7)), encode_png(&face_image(7))])
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.embeddings_stored, 2);
        assert_eq!(outcome.known_identities, 1);
        assert_eq!(store.lookup(&outcome.identity).len(), 2);
        // The run state machine is not involved.
        assert_eq!(pipeline.status().status, TrainingStatus::Idle);
    }

    #[test]
    fn test_enroll_one_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, store) = pipeline(dir.path());

        assert!(matches!(pipeline.enroll_one("  ", &[vec![1]]), Err(EnrollError::EmptyName)));
        assert!(matches!(pipeline.enroll_one("alice", &[]), Err(EnrollError::NoImages)));
        assert!(matches!(
            pipeline.enroll_one("alice", &[b"not an image".to_vec()]),
            Err(EnrollError::NoUsableImages(_))
        ));
        assert!(store.snapshot().is_empty());
    }
}
