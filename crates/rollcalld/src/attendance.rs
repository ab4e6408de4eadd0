//! Turns matched recognition events into attendance marks.

use crate::broadcast::SessionMetadata;
use chrono::{DateTime, Duration, Utc};
use rollcall_core::{AttendanceLog, AttendanceRecord, BoundingBox, IdentityKey, RepositoryError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

const STATUS_PRESENT: &str = "present";

/// Outcome of matching one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    pub identity: Option<IdentityKey>,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Suppression of repeat marks for one identity within one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupPolicy {
    window: Duration,
}

impl DedupPolicy {
    /// Every sighting is recorded.
    pub fn disabled() -> Self {
        Self { window: Duration::zero() }
    }

    pub fn window_secs(secs: u64) -> Self {
        Self {
            window: Duration::seconds(secs.min(u64::from(u32::MAX)) as i64),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > Duration::zero()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceRecord),
    /// No identity matched; nothing persisted.
    Rejected,
    /// Same identity already marked in this session within the window.
    Suppressed { last_marked: DateTime<Utc> },
}

pub struct AttendanceRecorder {
    log: Arc<dyn AttendanceLog>,
    policy: DedupPolicy,
    last_marks: Mutex<HashMap<(Option<String>, IdentityKey), DateTime<Utc>>>,
}

impl AttendanceRecorder {
    pub fn new(log: Arc<dyn AttendanceLog>, policy: DedupPolicy) -> Self {
        Self {
            log,
            policy,
            last_marks: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(
        &self,
        event: &RecognitionEvent,
        metadata: Option<&SessionMetadata>,
    ) -> Result<RecordOutcome, RepositoryError> {
        let Some(identity) = &event.identity else {
            return Ok(RecordOutcome::Rejected);
        };
        let dedup_key = (event.session_id.clone(), identity.clone());

        // Held across the insert so two sightings cannot both pass the window check.
        let mut last_marks = self.last_marks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.policy.is_enabled() {
            if let Some(&last_marked) = last_marks.get(&dedup_key) {
                if event.timestamp - last_marked < self.policy.window {
                    tracing::debug!(identity = %identity, session = ?event.session_id, "suppressed repeat attendance");
                    return Ok(RecordOutcome::Suppressed { last_marked });
                }
            }
        }

        let metadata = metadata.cloned().unwrap_or_default();
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            identity: identity.clone(),
            confidence: event.confidence,
            session_id: event.session_id.clone(),
            location: metadata.location,
            subject_code: metadata.subject_code,
            period: metadata.period,
            status: STATUS_PRESENT.to_string(),
            recorded_at: event.timestamp,
        };
        self.log.insert_attendance(&record)?;

        if self.policy.is_enabled() {
            last_marks.insert(dedup_key, event.timestamp);
        }
        tracing::info!(
            identity = %identity,
            confidence = event.confidence,
            session = ?event.session_id,
            attendance = %record.id,
            "attendance recorded"
        );
        Ok(RecordOutcome::Recorded(record))
    }

    /// Forget dedup state for a closed session.
    pub fn end_session(&self, session_id: &str) {
        let mut last_marks = self.last_marks.lock().unwrap_or_else(PoisonError::into_inner);
        last_marks.retain(|(session, _), _| session.as_deref() != Some(session_id));
    }
}
