#![allow(dead_code)]

use image::RgbImage;
use rollcall_core::{BoundingBox, FaceDetector, VisionError};
use rollcall_db::SqliteStore;
use rollcalld::{AttendanceService, Config};
use std::sync::{Arc, Condvar, Mutex};

#[path = "../../src/fakes.rs"]
mod fakes;

pub use fakes::{encode_png, face_image, write_identity, TagExtractor};

pub const TRAINING_THREAD: &str = "rollcall-training";

/// Closed gate blocks waiters until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }
}

/// One face covering the frame. Calls made from the training thread wait on
/// the gate first; everything else passes straight through.
pub struct GatedDetector {
    pub gate: Arc<Gate>,
}

impl FaceDetector for GatedDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        if std::thread::current().name() == Some(TRAINING_THREAD) {
            self.gate.wait();
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            confidence: 0.99,
        }])
    }
}

pub struct Harness {
    pub service: Arc<AttendanceService>,
    pub db: Arc<SqliteStore>,
    pub gate: Arc<Gate>,
    pub dataset: tempfile::TempDir,
}

/// Service over an in-memory database and an empty temporary dataset.
/// The training gate starts closed.
pub fn harness() -> Harness {
    let dataset = tempfile::tempdir().unwrap();
    let config = Config {
        dataset_root: dataset.path().to_path_buf(),
        min_images_per_identity: 2,
        ..Config::default()
    };
    let gate = Gate::closed();
    let db = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = Arc::new(AttendanceService::new(
        &config,
        Arc::new(GatedDetector { gate: gate.clone() }),
        Arc::new(TagExtractor),
        db.clone(),
        db.clone(),
    ));
    Harness {
        service,
        db,
        gate,
        dataset,
    }
}
