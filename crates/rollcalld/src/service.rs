//! The attendance service: one object built at startup and shared by every
//! request handler.
//!
//! Recognition always reads whatever snapshot is published at the time and
//! never waits on training. All methods are synchronous; async callers run
//! the heavy ones (`recognize_*`, `enroll_identity`, `reload`, dataset
//! inspection) on the blocking pool.

use crate::attendance::{AttendanceRecorder, DedupPolicy, RecognitionEvent, RecordOutcome};
use crate::broadcast::{ObserverConnection, RecognitionSession, SessionBroadcaster, SessionMetadata};
use crate::config::Config;
use crate::dataset::{self, DatasetIngestor, DatasetSummary, DatasetValidation, IngestError};
use crate::events::{EventMessage, InboundMessage};
use crate::training::{EnrollError, EnrollOutcome, StartOutcome, TrainingError, TrainingPipeline, TrainingRun, TrainingStatus};
use chrono::{DateTime, Utc};
use image::RgbImage;
use rollcall_core::imaging;
use rollcall_core::{
    recognize_frame, AttendanceLog, AttendanceRecord, DistanceMatcher, EmbeddingExtractor, EmbeddingRepository,
    EmbeddingStore, FaceDetector, IdentityKey, QualityGate, RepositoryError, RepositoryStats, VisionError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("no training data available; train the model first")]
    NoTrainingData,
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session already active: {0}")]
    SessionActive(String),
    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// True once at least one identity is loaded.
    pub online: bool,
    pub known_identity_count: usize,
    pub embedding_count: usize,
    pub threshold: f64,
    pub training: TrainingStatus,
    pub observer_count: usize,
    pub active_sessions: usize,
    /// When the live snapshot was published.
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityModel {
    pub identity: IdentityKey,
    pub embeddings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub loaded: bool,
    pub threshold: f64,
    pub identity_count: usize,
    pub identities: Vec<IdentityModel>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub validation: DatasetValidation,
    pub recommendations: Vec<String>,
}

/// Dataset, storage and live-model counts in one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStatistics {
    /// `None` when the dataset root cannot be scanned.
    pub dataset: Option<DatasetSummary>,
    pub stored: RepositoryStats,
    pub loaded_identities: usize,
    pub loaded_embeddings: usize,
}

pub struct AttendanceService {
    store: Arc<EmbeddingStore>,
    matcher: DistanceMatcher,
    /// `f64` bits.
    threshold: AtomicU64,
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    pipeline: Arc<TrainingPipeline>,
    repository: Arc<dyn EmbeddingRepository>,
    log: Arc<dyn AttendanceLog>,
    recorder: AttendanceRecorder,
    broadcaster: SessionBroadcaster,
    sessions: Mutex<HashMap<String, RecognitionSession>>,
    max_dimension: u32,
}

impl AttendanceService {
    pub fn new(
        config: &Config,
        detector: Arc<dyn FaceDetector>,
        extractor: Arc<dyn EmbeddingExtractor>,
        repository: Arc<dyn EmbeddingRepository>,
        log: Arc<dyn AttendanceLog>,
    ) -> Self {
        let store = Arc::new(EmbeddingStore::new());
        let ingestor = DatasetIngestor::new(&config.dataset_root, Arc::clone(&detector), Arc::clone(&extractor))
            .with_quality_gate(QualityGate::new(config.quality_threshold))
            .with_max_dimension(config.max_image_dimension)
            .with_min_images(config.min_images_per_identity);
        let pipeline = Arc::new(TrainingPipeline::new(
            Arc::new(ingestor),
            Arc::clone(&repository),
            Arc::clone(&store),
        ));

        let policy = if config.dedup_window_secs > 0 {
            DedupPolicy::window_secs(config.dedup_window_secs)
        } else {
            DedupPolicy::disabled()
        };

        Self {
            store,
            matcher: DistanceMatcher::default(),
            threshold: AtomicU64::new(config.recognition_threshold.to_bits()),
            detector,
            extractor,
            pipeline,
            repository,
            recorder: AttendanceRecorder::new(Arc::clone(&log), policy),
            log,
            broadcaster: SessionBroadcaster::new(config.observer_buffer),
            sessions: Mutex::new(HashMap::new()),
            max_dimension: config.max_image_dimension,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, RecognitionSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Acquire))
    }

    /// Replace the recognition threshold, returning the previous one.
    pub fn set_threshold(&self, value: f64) -> Result<f64, ServiceError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ServiceError::InvalidThreshold(value));
        }
        let old = f64::from_bits(self.threshold.swap(value.to_bits(), Ordering::AcqRel));
        tracing::info!(old, new = value, "recognition threshold updated");
        Ok(old)
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.store.snapshot();
        ServiceStatus {
            online: !snapshot.is_empty(),
            known_identity_count: snapshot.identity_count(),
            embedding_count: snapshot.embedding_count(),
            threshold: self.threshold(),
            training: self.pipeline.status().status,
            observer_count: self.broadcaster.observer_count(),
            active_sessions: self.sessions().len(),
            last_updated: snapshot.created_at(),
        }
    }

    pub fn start_training(&self) -> Result<StartOutcome, ServiceError> {
        Ok(self.pipeline.start()?)
    }

    pub fn cancel_training(&self) -> bool {
        self.pipeline.cancel()
    }

    pub fn training_status(&self) -> TrainingRun {
        self.pipeline.status()
    }

    pub fn validate_dataset(&self) -> DatasetReport {
        let validation = self.pipeline.ingestor().validate_structure();
        let recommendations = dataset::recommendations(&validation);
        DatasetReport {
            validation,
            recommendations,
        }
    }

    pub fn scan_dataset(&self) -> Result<DatasetSummary, ServiceError> {
        Ok(self.pipeline.ingestor().scan_summary()?)
    }

    /// Lay out sample identity folders under the dataset root.
    pub fn create_sample_dataset(&self) -> Result<usize, ServiceError> {
        Ok(dataset::create_sample_structure(
            self.pipeline.ingestor().root(),
            &dataset::SAMPLE_IDENTITIES,
        )?)
    }

    pub fn enroll_identity(&self, name: &str, images: &[Vec<u8>]) -> Result<EnrollOutcome, ServiceError> {
        Ok(self.pipeline.enroll_one(name, images)?)
    }

    /// Re-read persisted embeddings and publish them. Returns the identity count.
    pub fn reload(&self) -> Result<usize, ServiceError> {
        let snapshot = self.pipeline.reload()?;
        tracing::info!(identities = snapshot.identity_count(), "recognition model reloaded");
        Ok(snapshot.identity_count())
    }

    pub fn statistics(&self) -> Result<DatasetStatistics, ServiceError> {
        let dataset = match self.pipeline.ingestor().scan_summary() {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, "dataset not scannable; reporting stored counts only");
                None
            }
        };
        let snapshot = self.store.snapshot();
        Ok(DatasetStatistics {
            dataset,
            stored: self.repository.statistics()?,
            loaded_identities: snapshot.identity_count(),
            loaded_embeddings: snapshot.embedding_count(),
        })
    }

    /// Attendance marks, newest first.
    pub fn list_attendance(
        &self,
        identity: Option<&IdentityKey>,
        session_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        Ok(self.log.list_attendance(identity, session_id)?)
    }

    /// Retire an identity and republish without it. Returns false for an unknown key.
    pub fn deactivate_identity(&self, identity: &IdentityKey) -> Result<bool, ServiceError> {
        if !self.repository.deactivate_identity(identity)? {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    pub fn model_info(&self) -> ModelInfo {
        let snapshot = self.store.snapshot();
        ModelInfo {
            loaded: !snapshot.is_empty(),
            threshold: self.threshold(),
            identity_count: snapshot.identity_count(),
            identities: snapshot
                .entries()
                .map(|(identity, vectors)| IdentityModel {
                    identity: identity.clone(),
                    embeddings: vectors.len(),
                })
                .collect(),
            published_at: snapshot.created_at(),
        }
    }

    /// Open a recognition session and announce it to observers.
    pub fn start_session(
        &self,
        session_id: Option<String>,
        metadata: SessionMetadata,
    ) -> Result<RecognitionSession, ServiceError> {
        let started_at = Utc::now();
        let id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("session_{}", started_at.format("%Y%m%d_%H%M%S")));

        if self.store.snapshot().is_empty() {
            self.pipeline.reload()?;
            if self.store.snapshot().is_empty() {
                return Err(ServiceError::NoTrainingData);
            }
        }

        let session = RecognitionSession {
            id: id.clone(),
            metadata,
            started_at,
            stopped_at: None,
        };
        {
            let mut sessions = self.sessions();
            if sessions.contains_key(&id) {
                return Err(ServiceError::SessionActive(id));
            }
            sessions.insert(id.clone(), session.clone());
        }

        let notified = self.broadcaster.start_session(&session);
        tracing::info!(session = %id, observers = notified, "recognition session started");
        Ok(session)
    }

    pub fn stop_session(&self, session_id: &str) -> Result<RecognitionSession, ServiceError> {
        let mut session = self
            .sessions()
            .remove(session_id)
            .ok_or_else(|| ServiceError::UnknownSession(session_id.to_string()))?;
        session.stopped_at = Some(Utc::now());

        self.recorder.end_session(session_id);
        let notified = self.broadcaster.stop_session(session_id);
        tracing::info!(session = session_id, observers = notified, "recognition session stopped");
        Ok(session)
    }

    pub fn active_sessions(&self) -> Vec<RecognitionSession> {
        let mut sessions: Vec<_> = self.sessions().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    /// Recognize every face in an encoded image.
    pub fn recognize_image(
        &self,
        bytes: &[u8],
        session_id: Option<&str>,
    ) -> Result<Vec<RecognitionEvent>, ServiceError> {
        let frame = imaging::prepare(imaging::decode_oriented(bytes)?, self.max_dimension);
        self.recognize_frame(&frame, session_id)
    }

    /// Match every face in `frame`. Each matched face is recorded and then
    /// broadcast as `face_recognized`; unmatched faces are only returned.
    pub fn recognize_frame(
        &self,
        frame: &RgbImage,
        session_id: Option<&str>,
    ) -> Result<Vec<RecognitionEvent>, ServiceError> {
        let metadata = match session_id {
            Some(id) => Some(
                self.sessions()
                    .get(id)
                    .map(|s| s.metadata.clone())
                    .ok_or_else(|| ServiceError::UnknownSession(id.to_string()))?,
            ),
            None => None,
        };

        let snapshot = self.store.snapshot();
        let matches = recognize_frame(
            &self.matcher,
            self.detector.as_ref(),
            self.extractor.as_ref(),
            frame,
            &snapshot,
            self.threshold(),
        )?;

        let mut events = Vec::with_capacity(matches.len());
        for face in matches {
            let event = RecognitionEvent {
                identity: face.result.identity,
                confidence: face.result.similarity,
                bounding_box: face.bounding_box,
                session_id: session_id.map(str::to_string),
                timestamp: Utc::now(),
            };

            if let Some(identity) = &event.identity {
                let display_name = self.repository.display_name(identity).unwrap_or_else(|e| {
                    tracing::debug!(identity = %identity, error = %e, "display name lookup failed");
                    None
                });
                let attendance_id = match self.recorder.record(&event, metadata.as_ref()) {
                    Ok(RecordOutcome::Recorded(record)) => Some(record.id),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(identity = %identity, error = %e, "failed to record attendance");
                        None
                    }
                };
                self.broadcaster.broadcast(&EventMessage::FaceRecognized {
                    identity: identity.clone(),
                    display_name,
                    confidence: event.confidence,
                    session_id: event.session_id.clone(),
                    bounding_box: event.bounding_box,
                    attendance_id,
                    timestamp: event.timestamp,
                });
            }
            events.push(event);
        }
        Ok(events)
    }

    pub fn connect_observer(&self) -> ObserverConnection {
        self.broadcaster.connect()
    }

    pub fn disconnect_observer(&self, id: Uuid) -> bool {
        self.broadcaster.disconnect(id)
    }

    /// Reply to a message sent in by an observer, if it warrants one.
    pub fn handle_observer_message(&self, raw: &str) -> Option<EventMessage> {
        match serde_json::from_str::<InboundMessage>(raw) {
            Ok(InboundMessage::Ping) => Some(EventMessage::pong()),
            Ok(InboundMessage::GetStatus) => Some(EventMessage::StatusUpdate {
                status: self.status(),
                timestamp: Utc::now(),
            }),
            Ok(InboundMessage::Unknown) => None,
            Err(e) => {
                tracing::debug!(error = %e, "malformed observer message");
                Some(EventMessage::error(format!("invalid message: {e}")))
            }
        }
    }

    /// Broadcast a free-form announcement. Returns the number of recipients.
    pub fn announce(&self, message: &str) -> usize {
        self.broadcaster.broadcast(&EventMessage::announcement(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{blank_image, encode_png, face_image, TagExtractor, WholeFrameDetector};
    use rollcall_db::SqliteStore;

    fn service_with(config: Config) -> (AttendanceService, Arc<SqliteStore>) {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = AttendanceService::new(
            &config,
            Arc::new(WholeFrameDetector),
            Arc::new(TagExtractor),
            db.clone(),
            db.clone(),
        );
        (service, db)
    }

    fn service() -> (AttendanceService, Arc<SqliteStore>) {
        service_with(Config::default())
    }

    fn enroll(service: &AttendanceService, name: &str, tag: u8) -> IdentityKey {
        service
            .enroll_identity(name, &[encode_png(&face_image(tag)), encode_png(&face_image(tag))])
            .unwrap()
            .identity
    }

    #[test]
    fn test_status_offline_when_empty() {
        let (service, _) = service();
        let status = service.status();
        assert!(!status.online);
        assert_eq!(status.known_identity_count, 0);
        assert_eq!(status.threshold, 0.6);
        assert_eq!(status.training, TrainingStatus::Idle);
    }

    #[test]
    fn test_set_threshold_validates_before_mutation() {
        let (service, _) = service();
        assert_eq!(service.set_threshold(0.75).unwrap(), 0.6);
        assert!(matches!(service.set_threshold(1.01), Err(ServiceError::InvalidThreshold(_))));
        assert!(matches!(service.set_threshold(-0.1), Err(ServiceError::InvalidThreshold(_))));
        assert!(service.set_threshold(f64::NAN).is_err());
        assert_eq!(service.threshold(), 0.75);
    }

    #[test]
    fn test_start_session_requires_training_data() {
        let (service, _) = service();
        assert!(matches!(
            service.start_session(None, SessionMetadata::default()),
            Err(ServiceError::NoTrainingData)
        ));
    }

    #[test]
    fn test_start_session_reloads_persisted_state() {
        let (service, db) = service();
        // Persisted by another process; not yet published here.
        let key = db.resolve_or_create_identity("alice").unwrap().key;
        db.save_embeddings(&key, &[crate::fakes::unit_axis(3).into()]).unwrap();

        let session = service.start_session(None, SessionMetadata::default()).unwrap();
        assert!(session.id.starts_with("session_"));
        assert_eq!(session.id.len(), "session_YYYYmmdd_HHMMSS".len());
        assert!(service.status().online);
    }

    #[test]
    fn test_reload_reports_published_count() {
        let (service, db) = service();
        for (i, name) in ["alice", "bob"].iter().enumerate() {
            let key = db.resolve_or_create_identity(name).unwrap().key;
            db.save_embeddings(&key, &[crate::fakes::unit_axis(i).into()]).unwrap();
        }

        assert_eq!(service.reload().unwrap(), 2);
        assert_eq!(service.status().known_identity_count, 2);

        let outcome = service
            .enroll_identity("carol", &[encode_png(&face_image(9))])
            .unwrap();
        assert_eq!(outcome.known_identities, 3);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let (service, _) = service();
        enroll(&service, "alice", 1);
        service.start_session(Some("s1".into()), SessionMetadata::default()).unwrap();
        assert!(matches!(
            service.start_session(Some("s1".into()), SessionMetadata::default()),
            Err(ServiceError::SessionActive(_))
        ));
        assert_eq!(service.stop_session("s1").unwrap().id, "s1");
        assert!(matches!(service.stop_session("s1"), Err(ServiceError::UnknownSession(_))));
    }

    #[test]
    fn test_recognize_records_and_broadcasts() {
        let (service, db) = service();
        let alice = enroll(&service, "alice", 1);
        let metadata = SessionMetadata {
            location: Some("Room 101".into()),
            ..SessionMetadata::default()
        };
        service.start_session(Some("s1".into()), metadata).unwrap();
        let mut observer = service.connect_observer();
        observer.try_recv(); // greeting

        let events = service.recognize_frame(&face_image(1), Some("s1")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity.as_ref(), Some(&alice));
        assert!((events[0].confidence - 1.0).abs() < 1e-9);

        let records = db.list_attendance(None, Some("s1")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].location.as_deref(), Some("Room 101"));

        match observer.try_recv() {
            Some(EventMessage::FaceRecognized { identity, display_name, attendance_id, .. }) => {
                assert_eq!(identity, alice);
                assert_eq!(display_name.as_deref(), Some("alice"));
                assert_eq!(attendance_id, Some(records[0].id));
            }
            other => panic!("expected face_recognized, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_face_not_recorded() {
        let (service, db) = service();
        enroll(&service, "alice", 1);
        let mut observer = service.connect_observer();
        observer.try_recv();

        let events = service.recognize_frame(&face_image(2), None).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].identity.is_none());
        assert!(db.list_attendance(None, None).unwrap().is_empty());
        assert!(observer.try_recv().is_none());

        assert!(service.recognize_frame(&blank_image(), None).unwrap().is_empty());
    }

    #[test]
    fn test_recognize_unknown_session_rejected() {
        let (service, _) = service();
        enroll(&service, "alice", 1);
        assert!(matches!(
            service.recognize_frame(&face_image(1), Some("nope")),
            Err(ServiceError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_recognize_image_bytes() {
        let (service, _) = service();
        let alice = enroll(&service, "alice", 1);
        let events = service.recognize_image(&encode_png(&face_image(1)), None).unwrap();
        assert_eq!(events[0].identity, Some(alice));
        assert!(matches!(service.recognize_image(b"nope", None), Err(ServiceError::Image(_))));
    }

    #[test]
    fn test_dedup_window_from_config() {
        let (service, db) = service_with(Config {
            dedup_window_secs: 300,
            ..Config::default()
        });
        enroll(&service, "alice", 1);
        service.start_session(Some("s1".into()), SessionMetadata::default()).unwrap();
        service.recognize_frame(&face_image(1), Some("s1")).unwrap();
        service.recognize_frame(&face_image(1), Some("s1")).unwrap();
        assert_eq!(db.list_attendance(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_observer_messages() {
        let (service, _) = service();
        assert!(matches!(service.handle_observer_message(r#"{"type":"ping"}"#), Some(EventMessage::Pong { .. })));
        match service.handle_observer_message(r#"{"type":"get_status"}"#) {
            Some(EventMessage::StatusUpdate { status, .. }) => assert!(!status.online),
            other => panic!("expected status_update, got {other:?}"),
        }
        assert!(matches!(service.handle_observer_message("{oops"), Some(EventMessage::Error { .. })));
        assert!(service.handle_observer_message(r#"{"type":"subscribe"}"#).is_none());
    }

    #[test]
    fn test_model_info_and_announce() {
        let (service, _) = service();
        let alice = enroll(&service, "alice", 1);
        let info = service.model_info();
        assert!(info.loaded);
        assert_eq!(info.identities, vec![IdentityModel { identity: alice, embeddings: 2 }]);

        let _a = service.connect_observer();
        let _b = service.connect_observer();
        assert_eq!(service.announce("class starts in 5 minutes"), 2);
    }

    #[test]
    fn test_list_attendance_filters() {
        let (service, _) = service();
        let alice = enroll(&service, "alice", 1);
        let bob = enroll(&service, "bob", 2);
        service.start_session(Some("s1".into()), SessionMetadata::default()).unwrap();
        service.recognize_frame(&face_image(1), Some("s1")).unwrap();
        service.recognize_frame(&face_image(2), Some("s1")).unwrap();
        service.recognize_frame(&face_image(1), None).unwrap();

        assert_eq!(service.list_attendance(None, None).unwrap().len(), 3);
        assert_eq!(service.list_attendance(None, Some("s1")).unwrap().len(), 2);
        let alice_marks = service.list_attendance(Some(&alice), None).unwrap();
        assert_eq!(alice_marks.len(), 2);
        assert!(alice_marks[0].session_id.is_none());
        let bob_marks = service.list_attendance(Some(&bob), Some("s1")).unwrap();
        assert_eq!(bob_marks.len(), 1);
    }

    #[test]
    fn test_deactivate_identity_republishes() {
        let (service, _) = service();
        let alice = enroll(&service, "alice", 1);
        enroll(&service, "bob", 2);
        assert_eq!(service.status().known_identity_count, 2);

        assert!(service.deactivate_identity(&alice).unwrap());
        assert_eq!(service.status().known_identity_count, 1);
        let events = service.recognize_frame(&face_image(1), None).unwrap();
        assert!(events[0].identity.is_none());

        assert!(!service.deactivate_identity(&IdentityKey::from("missing")).unwrap());
        assert_eq!(service.status().known_identity_count, 1);
    }

    #[test]
    fn test_statistics_combines_dataset_and_storage() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service_with(Config {
            dataset_root: dir.path().join("absent"),
            ..Config::default()
        });
        enroll(&service, "Pranav_A_067", 1);

        let stats = service.statistics().unwrap();
        assert!(stats.dataset.is_none());
        assert_eq!(stats.stored.identity_count, 1);
        assert_eq!(stats.stored.embedding_count, 2);
        assert_eq!(stats.stored.identity_names, vec!["Pranav_A_067".to_string()]);
        assert_eq!(stats.loaded_identities, 1);
        assert_eq!(stats.loaded_embeddings, 2);

        crate::fakes::write_identity(&dir.path().join("absent"), "carol", 4, 2);
        let stats = service.statistics().unwrap();
        assert_eq!(stats.dataset.map(|d| d.total_images), Some(2));
    }

    #[test]
    fn test_create_and_scan_sample_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service_with(Config {
            dataset_root: dir.path().join("students"),
            ..Config::default()
        });
        assert_eq!(service.create_sample_dataset().unwrap(), 5);
        assert_eq!(service.scan_dataset().unwrap().total_identities, 0);
        let report = service.validate_dataset();
        assert!(!report.validation.valid);
        assert_eq!(report.recommendations[0], "Fix validation errors before training");
    }
}
