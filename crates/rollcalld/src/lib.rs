//! rollcalld: attendance engine: dataset training, live recognition,
//! attendance recording and event fan-out to observers.

pub mod attendance;
pub mod broadcast;
pub mod config;
pub mod dataset;
pub mod dbus_interface;
pub mod events;
pub mod service;
pub mod training;

#[cfg(test)]
mod fakes;

pub use attendance::{AttendanceRecorder, DedupPolicy, RecognitionEvent, RecordOutcome};
pub use broadcast::{ObserverConnection, RecognitionSession, SessionBroadcaster, SessionMetadata};
pub use config::{BusKind, Config, ConfigError};
pub use dataset::{DatasetIngestor, DatasetValidation, IngestError};
pub use events::EventMessage;
pub use service::{AttendanceService, DatasetStatistics, ServiceError, ServiceStatus};
pub use training::{EnrollError, StartOutcome, TrainingPipeline, TrainingRun, TrainingStatus};
