//! Messages streamed to live observers.
//!
//! Every message is a JSON object with a `type` discriminator and an
//! RFC 3339 `timestamp`.

use chrono::{DateTime, Utc};
use rollcall_core::{BoundingBox, IdentityKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::ServiceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    ConnectionEstablished {
        observer_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SessionStarted {
        session_id: String,
        location: Option<String>,
        subject_code: Option<String>,
        period: Option<String>,
        timestamp: DateTime<Utc>,
    },
    SessionStopped {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    FaceRecognized {
        identity: IdentityKey,
        display_name: Option<String>,
        confidence: f64,
        session_id: Option<String>,
        bounding_box: BoundingBox,
        /// Set when the sighting was written to the attendance log.
        attendance_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    StatusUpdate {
        status: ServiceStatus,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Announcement {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl EventMessage {
    pub fn pong() -> Self {
        Self::Pong { timestamp: Utc::now() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn announcement(message: impl Into<String>) -> Self {
        Self::Announcement {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ConnectionEstablished { timestamp, .. }
            | Self::SessionStarted { timestamp, .. }
            | Self::SessionStopped { timestamp, .. }
            | Self::FaceRecognized { timestamp, .. }
            | Self::Ping { timestamp }
            | Self::Pong { timestamp }
            | Self::StatusUpdate { timestamp, .. }
            | Self::Error { timestamp, .. }
            | Self::Announcement { timestamp, .. } => *timestamp,
        }
    }

    /// Wire form; degrades to a bare `error` message if serialization fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize event");
            format!(r#"{{"type":"error","message":"serialization failed","timestamp":"{}"}}"#, Utc::now().to_rfc3339())
        })
    }
}

/// Messages an observer may send in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping,
    GetStatus,
    #[serde(other)]
    Unknown,
}
