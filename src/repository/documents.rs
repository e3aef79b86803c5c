//! Source documents and the per-file audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use super::{from_ts, from_ts_opt, parse_uuid, to_ts, RepositoryError};
use crate::models::{ExclusionReason, FileCandidate, Prioritization, SourceDocument};

/// Persisted form of a `FileCandidate`: every discovered file keeps a row,
/// included or not.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: uuid::Uuid,
    pub source_document_id: uuid::Uuid,
    pub analysis_id: uuid::Uuid,
    pub original_path: String,
    pub nesting_level: i64,
    pub extension: Option<String>,
    pub inferred_extension: Option<String>,
    pub size_bytes: i64,
    pub included: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    pub prioritization: Prioritization,
    pub used_fallback_conversion: bool,
    pub token_estimate: i64,
    pub blob_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct DocumentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentRepository {
    pub(super) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn insert_source_document(
        &self,
        document: &SourceDocument,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO source_documents (
                id, analysis_id, synthetic_id, title, publication_date,
                document_type, url, raw_metadata, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                document.id.to_string(),
                document.analysis_id.to_string(),
                document.synthetic_id,
                document.title,
                document.publication_date.map(to_ts),
                document.document_type,
                document.url,
                serde_json::to_string(&document.raw_metadata)?,
                to_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Persist one candidate's audit row, returning the assigned id.
    pub async fn insert_file_record(
        &self,
        analysis_id: uuid::Uuid,
        source_document_id: uuid::Uuid,
        candidate: &FileCandidate,
        blob_key: Option<&str>,
    ) -> Result<uuid::Uuid, RepositoryError> {
        let id = uuid::Uuid::new_v4();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO file_records (
                id, source_document_id, analysis_id, original_path, nesting_level,
                extension, inferred_extension, size_bytes, included,
                exclusion_reason, prioritization, used_fallback_conversion,
                token_estimate, blob_key, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id.to_string(),
                source_document_id.to_string(),
                analysis_id.to_string(),
                candidate.original_path,
                candidate.nesting_level as i64,
                candidate.extension,
                candidate.inferred_extension,
                candidate.original_content.len() as i64,
                candidate.included,
                candidate
                    .exclusion_reason
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&candidate.prioritization)?,
                candidate.used_fallback_conversion,
                candidate.token_estimate as i64,
                blob_key,
                to_ts(Utc::now()),
            ],
        )?;
        Ok(id)
    }

    pub async fn source_documents_for(
        &self,
        analysis_id: uuid::Uuid,
    ) -> Result<Vec<SourceDocument>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, analysis_id, synthetic_id, title, publication_date,
                    document_type, url, raw_metadata
             FROM source_documents WHERE analysis_id = ?1 ORDER BY synthetic_id ASC",
        )?;
        let rows = stmt.query_map(params![analysis_id.to_string()], source_document_from_row)?;
        let mut documents = Vec::new();
        for row in rows {
            documents.push(row??);
        }
        Ok(documents)
    }

    pub async fn file_records_for(
        &self,
        analysis_id: uuid::Uuid,
    ) -> Result<Vec<FileRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, source_document_id, analysis_id, original_path, nesting_level,
                    extension, inferred_extension, size_bytes, included,
                    exclusion_reason, prioritization, used_fallback_conversion,
                    token_estimate, blob_key, created_at
             FROM file_records WHERE analysis_id = ?1 ORDER BY original_path ASC",
        )?;
        let rows = stmt.query_map(params![analysis_id.to_string()], file_record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }
}

fn source_document_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<Result<SourceDocument, RepositoryError>> {
    let id: String = row.get(0)?;
    let analysis_id: String = row.get(1)?;
    let synthetic_id: String = row.get(2)?;
    let title: String = row.get(3)?;
    let publication_date: Option<String> = row.get(4)?;
    let document_type: Option<String> = row.get(5)?;
    let url: Option<String> = row.get(6)?;
    let raw_metadata: String = row.get(7)?;
    Ok((|| {
        Ok(SourceDocument {
            id: parse_uuid(&id)?,
            analysis_id: parse_uuid(&analysis_id)?,
            synthetic_id,
            title,
            publication_date: from_ts_opt(publication_date)?,
            document_type,
            url,
            raw_metadata: serde_json::from_str(&raw_metadata)?,
        })
    })())
}

fn file_record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<FileRecord, RepositoryError>> {
    let id: String = row.get(0)?;
    let source_document_id: String = row.get(1)?;
    let analysis_id: String = row.get(2)?;
    let original_path: String = row.get(3)?;
    let nesting_level: i64 = row.get(4)?;
    let extension: Option<String> = row.get(5)?;
    let inferred_extension: Option<String> = row.get(6)?;
    let size_bytes: i64 = row.get(7)?;
    let included: bool = row.get(8)?;
    let exclusion_reason: Option<String> = row.get(9)?;
    let prioritization: String = row.get(10)?;
    let used_fallback_conversion: bool = row.get(11)?;
    let token_estimate: i64 = row.get(12)?;
    let blob_key: Option<String> = row.get(13)?;
    let created_at: String = row.get(14)?;
    Ok((|| {
        Ok(FileRecord {
            id: parse_uuid(&id)?,
            source_document_id: parse_uuid(&source_document_id)?,
            analysis_id: parse_uuid(&analysis_id)?,
            original_path,
            nesting_level,
            extension,
            inferred_extension,
            size_bytes,
            included,
            exclusion_reason: exclusion_reason
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            prioritization: serde_json::from_str(&prioritization)?,
            used_fallback_conversion,
            token_estimate,
            blob_key,
            created_at: from_ts(&created_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRecord, AnalysisStatus, CostBreakdown, TokenUsage};
    use crate::repository::Database;

    async fn database_with_analysis() -> (Database, uuid::Uuid) {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().await.unwrap();
        let now = Utc::now();
        let record = AnalysisRecord {
            id: uuid::Uuid::new_v4(),
            procurement_control_number: "c-1".to_string(),
            version_number: 1,
            status: AnalysisStatus::PendingAnalysis,
            document_hash: "h".to_string(),
            verdict: None,
            warnings: Vec::new(),
            tokens: TokenUsage::default(),
            costs: CostBreakdown::default(),
            priority_score: 0,
            votes_count: 0,
            retry_count: 0,
            analysis_prompt: None,
            created_at: now,
            updated_at: now,
        };
        db.analyses().insert(&record).await.unwrap();
        (db, record.id)
    }

    fn source_document(analysis_id: uuid::Uuid) -> SourceDocument {
        SourceDocument {
            id: uuid::Uuid::new_v4(),
            analysis_id,
            synthetic_id: "c-1-doc-1".to_string(),
            title: "Edital".to_string(),
            publication_date: None,
            document_type: Some("Edital".to_string()),
            url: Some("https://example.test/arquivo/1".to_string()),
            raw_metadata: serde_json::json!({"sequencialDocumento": 1}),
        }
    }

    #[tokio::test]
    async fn test_source_document_roundtrip() {
        let (db, analysis_id) = database_with_analysis().await;
        let repo = db.documents();
        repo.insert_source_document(&source_document(analysis_id)).await.unwrap();

        let documents = repo.source_documents_for(analysis_id).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].title, "Edital");
        assert_eq!(documents[0].raw_metadata["sequencialDocumento"], 1);
    }

    #[tokio::test]
    async fn test_file_record_keeps_exclusion_reason() {
        let (db, analysis_id) = database_with_analysis().await;
        let repo = db.documents();
        let doc = source_document(analysis_id);
        repo.insert_source_document(&doc).await.unwrap();

        let mut candidate = FileCandidate::new(
            doc.synthetic_id.clone(),
            "anexos.zip/planilha.xlsb".to_string(),
            1,
            vec![0u8; 64],
        );
        candidate.exclusion_reason = Some(ExclusionReason::TokenLimitExceeded { limit: 500 });
        repo.insert_file_record(analysis_id, doc.id, &candidate, None).await.unwrap();

        let records = repo.file_records_for(analysis_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].included);
        assert_eq!(records[0].nesting_level, 1);
        assert_eq!(
            records[0].exclusion_reason,
            Some(ExclusionReason::TokenLimitExceeded { limit: 500 })
        );
    }

    #[tokio::test]
    async fn test_file_record_keeps_inferred_extension_and_blob_key() {
        let (db, analysis_id) = database_with_analysis().await;
        let repo = db.documents();
        let doc = source_document(analysis_id);
        repo.insert_source_document(&doc).await.unwrap();

        let mut candidate =
            FileCandidate::new(doc.synthetic_id.clone(), "arquivo.bin".to_string(), 0, vec![1, 2]);
        candidate.inferred_extension = Some("pdf".to_string());
        candidate.included = true;
        repo.insert_file_record(analysis_id, doc.id, &candidate, Some("originals/ab/abcd1234.pdf"))
            .await
            .unwrap();

        let records = repo.file_records_for(analysis_id).await.unwrap();
        assert_eq!(records[0].inferred_extension.as_deref(), Some("pdf"));
        assert_eq!(records[0].blob_key.as_deref(), Some("originals/ab/abcd1234.pdf"));
    }
}
