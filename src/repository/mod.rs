//! SQLite persistence layer.
//!
//! A single connection wrapped in an async mutex, shared by thin
//! per-aggregate repositories. Timestamps are stored as RFC 3339 text,
//! UUIDs as text, structured columns (verdict, exclusion reasons) as JSON.

mod analyses;
mod documents;
mod procurements;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

pub use analyses::AnalysisRepository;
pub use documents::{DocumentRepository, FileRecord};
pub use procurements::ProcurementRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared database handle; cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Create all tables. Idempotent; schema migration is out of scope.
    pub async fn init_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA)?;
        info!("Database schema initialized");
        Ok(())
    }

    pub fn procurements(&self) -> ProcurementRepository {
        ProcurementRepository::new(self.conn.clone())
    }

    pub fn analyses(&self) -> AnalysisRepository {
        AnalysisRepository::new(self.conn.clone())
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.conn.clone())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS procurements (
    id TEXT PRIMARY KEY,
    control_number TEXT NOT NULL,
    version_number INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    object_description TEXT NOT NULL,
    total_estimated_value REAL,
    proposal_opening_date TEXT,
    proposal_closing_date TEXT,
    last_update_date TEXT NOT NULL,
    entity_name TEXT NOT NULL,
    entity_cnpj TEXT NOT NULL,
    entity_sphere TEXT NOT NULL,
    region TEXT,
    votes_count INTEGER NOT NULL DEFAULT 0,
    raw_payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (control_number, version_number)
);
CREATE INDEX IF NOT EXISTS idx_procurements_control
    ON procurements (control_number);

CREATE TABLE IF NOT EXISTS analyses (
    id TEXT PRIMARY KEY,
    procurement_control_number TEXT NOT NULL,
    version_number INTEGER NOT NULL,
    status TEXT NOT NULL,
    document_hash TEXT NOT NULL,
    verdict TEXT,
    warnings TEXT NOT NULL DEFAULT '[]',
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    thinking_tokens INTEGER NOT NULL DEFAULT 0,
    search_queries INTEGER NOT NULL DEFAULT 0,
    input_cost REAL NOT NULL DEFAULT 0,
    output_cost REAL NOT NULL DEFAULT 0,
    thinking_cost REAL NOT NULL DEFAULT 0,
    search_cost REAL NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    priority_score INTEGER NOT NULL DEFAULT 0,
    votes_count INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    analysis_prompt TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analyses_version
    ON analyses (procurement_control_number, version_number);
CREATE INDEX IF NOT EXISTS idx_analyses_status ON analyses (status);

CREATE TABLE IF NOT EXISTS source_documents (
    id TEXT PRIMARY KEY,
    analysis_id TEXT NOT NULL REFERENCES analyses (id),
    synthetic_id TEXT NOT NULL,
    title TEXT NOT NULL,
    publication_date TEXT,
    document_type TEXT,
    url TEXT,
    raw_metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_source_documents_analysis
    ON source_documents (analysis_id);

CREATE TABLE IF NOT EXISTS file_records (
    id TEXT PRIMARY KEY,
    source_document_id TEXT NOT NULL REFERENCES source_documents (id),
    analysis_id TEXT NOT NULL REFERENCES analyses (id),
    original_path TEXT NOT NULL,
    nesting_level INTEGER NOT NULL DEFAULT 0,
    extension TEXT,
    inferred_extension TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    included INTEGER NOT NULL DEFAULT 0,
    exclusion_reason TEXT,
    prioritization TEXT NOT NULL,
    used_fallback_conversion INTEGER NOT NULL DEFAULT 0,
    token_estimate INTEGER NOT NULL DEFAULT 0,
    blob_key TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_records_analysis
    ON file_records (analysis_id);

CREATE TABLE IF NOT EXISTS analysis_status_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_id TEXT NOT NULL REFERENCES analyses (id),
    status TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_status_history_analysis
    ON analysis_status_history (analysis_id);

CREATE TABLE IF NOT EXISTS budget_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_id TEXT NOT NULL REFERENCES analyses (id),
    amount REAL NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub(crate) fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn from_ts(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Corrupt(format!("bad timestamp: {value}")))
}

pub(crate) fn from_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(from_ts).transpose()
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid, RepositoryError> {
    uuid::Uuid::parse_str(value).map_err(|_| RepositoryError::Corrupt(format!("bad uuid: {value}")))
}
