use crate::broadcast::SessionMetadata;
use crate::service::{AttendanceService, ServiceError};
use crate::training::EnrollError;
use rollcall_core::IdentityKey;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured replies are JSON strings. Every observer event is re-emitted
/// as the `Event` signal.
pub struct AttendanceBus {
    service: Arc<AttendanceService>,
}

impl AttendanceBus {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }

    /// Run a service call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> zbus::fdo::Result<T>
    where
        F: FnOnce(&AttendanceService) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?
            .map_err(to_fdo)
    }
}

fn to_fdo(e: ServiceError) -> zbus::fdo::Error {
    match e {
        ServiceError::Enroll(EnrollError::Repository(_)) => zbus::fdo::Error::Failed(e.to_string()),
        ServiceError::InvalidThreshold(_)
        | ServiceError::UnknownSession(_)
        | ServiceError::Image(_)
        | ServiceError::Enroll(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialize reply: {e}")))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceBus {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "service": self.service.status(),
        }))
    }

    /// Start a full training run. False when one is already running.
    async fn start_training(&self) -> zbus::fdo::Result<bool> {
        let outcome = self.service.start_training().map_err(to_fdo)?;
        tracing::info!(started = outcome.started(), "start_training requested");
        Ok(outcome.started())
    }

    /// Ask the running training run to stop before its next identity.
    async fn cancel_training(&self) -> bool {
        self.service.cancel_training()
    }

    async fn training_status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.training_status())
    }

    /// Validate the dataset layout and suggest fixes.
    async fn validate_dataset(&self) -> zbus::fdo::Result<String> {
        let report = self.blocking(|s| Ok(s.validate_dataset())).await?;
        to_json(&report)
    }

    async fn scan_dataset(&self) -> zbus::fdo::Result<String> {
        let summary = self.blocking(|s| s.scan_dataset()).await?;
        to_json(&summary)
    }

    async fn create_sample_dataset(&self) -> zbus::fdo::Result<u32> {
        let created = self.blocking(|s| s.create_sample_dataset()).await?;
        Ok(created as u32)
    }

    /// Enroll one identity from encoded images.
    async fn enroll(&self, name: String, images: Vec<Vec<u8>>) -> zbus::fdo::Result<String> {
        tracing::info!(name = %name, images = images.len(), "enroll requested");
        let outcome = self.blocking(move |s| s.enroll_identity(&name, &images)).await?;
        to_json(&outcome)
    }

    /// Set the recognition threshold; returns the previous value.
    async fn set_threshold(&self, value: f64) -> zbus::fdo::Result<f64> {
        self.service.set_threshold(value).map_err(to_fdo)
    }

    /// Re-read persisted embeddings; returns the number of known identities.
    async fn reload(&self) -> zbus::fdo::Result<u32> {
        let count = self.blocking(|s| s.reload()).await?;
        Ok(count as u32)
    }

    async fn model_info(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.model_info())
    }

    /// Dataset, stored and loaded counts.
    async fn statistics(&self) -> zbus::fdo::Result<String> {
        let stats = self.blocking(|s| s.statistics()).await?;
        to_json(&stats)
    }

    /// Attendance marks, newest first. Empty strings mean "any".
    async fn list_attendance(&self, identity: String, session_id: String) -> zbus::fdo::Result<String> {
        let identity = non_empty(&identity).map(IdentityKey::new);
        let session_id = non_empty(&session_id);
        let records = self
            .blocking(move |s| s.list_attendance(identity.as_ref(), session_id.as_deref()))
            .await?;
        to_json(&records)
    }

    /// Retire an identity from recognition. False when the key is unknown.
    async fn deactivate_identity(&self, identity: String) -> zbus::fdo::Result<bool> {
        let key = IdentityKey::new(identity.trim());
        tracing::info!(identity = %key, "deactivate requested");
        self.blocking(move |s| s.deactivate_identity(&key)).await
    }

    /// Open a recognition session. Empty strings mean "not given".
    async fn start_session(
        &self,
        session_id: String,
        location: String,
        subject_code: String,
        period: String,
    ) -> zbus::fdo::Result<String> {
        let metadata = SessionMetadata {
            location: non_empty(&location),
            subject_code: non_empty(&subject_code),
            period: non_empty(&period),
        };
        let id = non_empty(&session_id);
        let session = self.blocking(move |s| s.start_session(id, metadata)).await?;
        to_json(&session)
    }

    async fn stop_session(&self, session_id: &str) -> zbus::fdo::Result<String> {
        let session = self.service.stop_session(session_id).map_err(to_fdo)?;
        to_json(&session)
    }

    async fn list_sessions(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.active_sessions())
    }

    /// Recognize every face in an encoded image, optionally within a session.
    async fn recognize(&self, image: Vec<u8>, session_id: String) -> zbus::fdo::Result<String> {
        let session_id = non_empty(&session_id);
        let events = self
            .blocking(move |s| s.recognize_image(&image, session_id.as_deref()))
            .await?;
        to_json(&events)
    }

    /// Handle an observer message (`ping`, `get_status`); returns the reply
    /// or an empty string when none is due.
    async fn send_message(&self, message: &str) -> String {
        self.service
            .handle_observer_message(message)
            .map(|reply| reply.to_json())
            .unwrap_or_default()
    }

    /// Broadcast an announcement; returns the number of observers reached.
    async fn announce(&self, message: &str) -> u32 {
        self.service.announce(message) as u32
    }

    /// One observer event as JSON.
    #[zbus(signal)]
    pub async fn event(emitter: &SignalEmitter<'_>, payload: &str) -> zbus::Result<()>;
}
