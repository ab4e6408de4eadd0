//! rollcall-db: SQLite storage for enrolled identities, their reference
//! embeddings and attendance marks.
//!
//! One connection guarded by a mutex; every public operation is a short
//! statement or a single transaction, so callers on the training thread and
//! on request handlers interleave safely.

use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::codec;
use rollcall_core::{
    AttendanceLog, AttendanceRecord, EmbeddingRepository, EmbeddingVector, IdentityKey, ReferenceEmbedding,
    RepositoryError, RepositoryStats, ResolvedIdentity,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    roll_number TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    quality_score REAL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_identity ON face_embeddings(identity_id);

CREATE TABLE IF NOT EXISTS attendance (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id),
    confidence REAL NOT NULL,
    session_id TEXT,
    location TEXT,
    subject_code TEXT,
    period TEXT,
    status TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session_id);
CREATE INDEX IF NOT EXISTS idx_attendance_identity ON attendance(identity_id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        RepositoryError::Backend(e.to_string())
    }
}

/// Split an enrollment folder name into a display name and an optional
/// trailing numeric roll number: `"Pranav_A_067"` → `("Pranav A", Some("067"))`.
pub fn parse_identity_name(name: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = name.split(|c: char| c == '_' || c.is_whitespace()).filter(|p| !p.is_empty()).collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() && last.chars().all(|c| c.is_ascii_digit()) => {
            (rest.join(" "), Some((*last).to_string()))
        }
        _ => (parts.join(" "), None),
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn fetch_display_name(&self, key: &IdentityKey) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let name = conn
            .query_row(
                "SELECT display_name FROM identities WHERE id = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn set_inactive(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE identities SET is_active = 0 WHERE id = ?1",
            params![key.as_str()],
        )?;
        Ok(updated > 0)
    }

    fn query_attendance(
        &self,
        identity: Option<&IdentityKey>,
        session_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, identity_id, confidence, session_id, location, subject_code, period, status, recorded_at
             FROM attendance
             WHERE (?1 IS NULL OR identity_id = ?1) AND (?2 IS NULL OR session_id = ?2)
             ORDER BY recorded_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![identity.map(|k| k.as_str()), session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, identity, confidence, session_id, location, subject_code, period, status, recorded_at) = row?;
            records.push(AttendanceRecord {
                id: Uuid::parse_str(&id).map_err(|e| StoreError::InvalidValue(format!("attendance id {id}: {e}")))?,
                identity: IdentityKey::new(identity),
                confidence,
                session_id,
                location,
                subject_code,
                period,
                status,
                recorded_at: parse_timestamp(&recorded_at)?,
            });
        }
        Ok(records)
    }

    fn count_active(&self) -> Result<RepositoryStats, StoreError> {
        let conn = self.lock()?;
        let embedding_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM face_embeddings e JOIN identities i ON i.id = e.identity_id WHERE i.is_active = 1",
            [],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare("SELECT name FROM identities WHERE is_active = 1 ORDER BY rowid")?;
        let identity_names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RepositoryStats {
            identity_count: identity_names.len(),
            embedding_count: embedding_count as usize,
            identity_names,
        })
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidValue(format!("timestamp {raw}: {e}")))
}

impl EmbeddingRepository for SqliteStore {
    fn resolve_or_create_identity(&self, name: &str) -> Result<ResolvedIdentity, RepositoryError> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row("SELECT id FROM identities WHERE name = ?1", params![name], |row| row.get(0))
            .optional()
            .map_err(StoreError::from)?;

        if let Some(id) = existing {
            conn.execute("UPDATE identities SET is_active = 1 WHERE id = ?1", params![id])
                .map_err(StoreError::from)?;
            return Ok(ResolvedIdentity {
                key: IdentityKey::new(id),
                created: false,
            });
        }

        let key = IdentityKey::generate();
        let (display_name, roll_number) = parse_identity_name(name);
        conn.execute(
            "INSERT INTO identities (id, name, display_name, roll_number, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![key.as_str(), name, display_name, roll_number, format_timestamp(Utc::now())],
        )
        .map_err(StoreError::from)?;
        tracing::info!(identity = %key, name, roll_number = ?roll_number, "created identity");
        Ok(ResolvedIdentity { key, created: true })
    }

    fn save_embeddings(
        &self,
        identity: &IdentityKey,
        embeddings: &[ReferenceEmbedding],
    ) -> Result<usize, RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM identities WHERE id = ?1", params![identity.as_str()], |row| row.get(0))
            .optional()
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Err(RepositoryError::IdentityNotFound(identity.clone()));
        }

        tx.execute("DELETE FROM face_embeddings WHERE identity_id = ?1", params![identity.as_str()])
            .map_err(StoreError::from)?;
        let now = format_timestamp(Utc::now());
        for embedding in embeddings {
            tx.execute(
                "INSERT INTO face_embeddings (identity_id, embedding, quality_score, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![identity.as_str(), codec::encode(&embedding.vector), embedding.quality, now],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit().map_err(StoreError::from)?;

        tracing::debug!(identity = %identity, embeddings = embeddings.len(), "replaced embeddings");
        Ok(embeddings.len())
    }

    fn load_all_embeddings(&self) -> Result<Vec<(IdentityKey, Vec<EmbeddingVector>)>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT i.id, e.embedding
                 FROM identities i JOIN face_embeddings e ON e.identity_id = i.id
                 WHERE i.is_active = 1
                 ORDER BY i.rowid, e.id",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(StoreError::from)?;

        let mut grouped: Vec<(IdentityKey, Vec<EmbeddingVector>)> = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(StoreError::from)?;
            let embedding = match codec::decode(&blob) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(identity = %id, error = %e, "skipping undecodable embedding");
                    continue;
                }
            };
            match grouped.last_mut() {
                Some((key, vectors)) if key.as_str() == id => vectors.push(embedding),
                _ => grouped.push((IdentityKey::new(id), vec![embedding])),
            }
        }
        Ok(grouped)
    }

    fn display_name(&self, identity: &IdentityKey) -> Result<Option<String>, RepositoryError> {
        Ok(self.fetch_display_name(identity)?)
    }

    fn deactivate_identity(&self, identity: &IdentityKey) -> Result<bool, RepositoryError> {
        let updated = self.set_inactive(identity)?;
        if updated {
            tracing::info!(identity = %identity, "deactivated identity");
        }
        Ok(updated)
    }

    fn statistics(&self) -> Result<RepositoryStats, RepositoryError> {
        Ok(self.count_active()?)
    }
}

impl AttendanceLog for SqliteStore {
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attendance (id, identity_id, confidence, session_id, location, subject_code, period, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.identity.as_str(),
                record.confidence,
                record.session_id,
                record.location,
                record.subject_code,
                record.period,
                record.status,
                format_timestamp(record.recorded_at),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn list_attendance(
        &self,
        identity: Option<&IdentityKey>,
        session_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        Ok(self.query_attendance(identity, session_id)?)
    }
}
