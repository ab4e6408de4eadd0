//! Fan-out of events to live observers.
//!
//! Each observer owns a bounded queue. A broadcast copies the recipient list
//! out of the lock, then delivers with `try_send`; an observer whose queue is
//! closed or full is dropped so it can never hold up the others.

use crate::events::EventMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Context tags attached to a recognition session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub location: Option<String>,
    pub subject_code: Option<String>,
    pub period: Option<String>,
}

/// A bounded period of observation that recognition events refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionSession {
    pub id: String,
    #[serde(flatten)]
    pub metadata: SessionMetadata,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Receiving end handed to an observer.
pub struct ObserverConnection {
    id: Uuid,
    rx: mpsc::Receiver<EventMessage>,
}

impl ObserverConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the broadcaster has dropped this observer.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EventMessage> {
        self.rx.try_recv().ok()
    }
}

pub struct SessionBroadcaster {
    observers: Mutex<Vec<(Uuid, mpsc::Sender<EventMessage>)>>,
    buffer: usize,
}

impl SessionBroadcaster {
    /// `buffer` is each observer's queue depth.
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<(Uuid, mpsc::Sender<EventMessage>)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer. Its first message is `connection_established`.
    pub fn connect(&self) -> ObserverConnection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let greeting = EventMessage::ConnectionEstablished {
            observer_id: id,
            message: "Connected to face recognition system".to_string(),
            timestamp: Utc::now(),
        };
        // Fresh queue with capacity >= 1, so this cannot be full.
        let _ = tx.try_send(greeting);

        let count = {
            let mut observers = self.observers();
            observers.push((id, tx));
            observers.len()
        };
        tracing::info!(observer = %id, observers = count, "observer connected");
        ObserverConnection { id, rx }
    }

    pub fn disconnect(&self, id: Uuid) -> bool {
        let mut observers = self.observers();
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        let removed = observers.len() != before;
        if removed {
            tracing::info!(observer = %id, observers = observers.len(), "observer disconnected");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Deliver `event` to every observer. Returns how many received it.
    pub fn broadcast(&self, event: &EventMessage) -> usize {
        let recipients: Vec<(Uuid, mpsc::Sender<EventMessage>)> = self.observers().clone();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, tx) in &recipients {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(observer = %id, "observer queue full, dropping observer");
                    failed.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(observer = %id, "observer gone, dropping");
                    failed.push(*id);
                }
            }
        }

        if !failed.is_empty() {
            self.observers().retain(|(id, _)| !failed.contains(id));
        }
        tracing::debug!(delivered, dropped = failed.len(), "broadcast event");
        delivered
    }

    /// Announce a session start to every observer.
    pub fn start_session(&self, session: &RecognitionSession) -> usize {
        self.broadcast(&EventMessage::SessionStarted {
            session_id: session.id.clone(),
            location: session.metadata.location.clone(),
            subject_code: session.metadata.subject_code.clone(),
            period: session.metadata.period.clone(),
            timestamp: session.started_at,
        })
    }

    /// Announce a session stop to every observer.
    pub fn stop_session(&self, session_id: &str) -> usize {
        self.broadcast(&EventMessage::SessionStopped {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        })
    }
}
