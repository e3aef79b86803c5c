//! Analysis records, their status history, and the spending ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::{from_ts, parse_uuid, to_ts, RepositoryError};
use crate::models::{
    AnalysisRecord, AnalysisStatus, BudgetLedgerEntry, CostBreakdown, StatusHistoryEntry,
    TokenUsage,
};

const RECORD_COLUMNS: &str = "id, procurement_control_number, version_number, status, \
     document_hash, verdict, warnings, input_tokens, output_tokens, thinking_tokens, \
     search_queries, input_cost, output_cost, thinking_cost, search_cost, total_cost, \
     priority_score, votes_count, retry_count, analysis_prompt, created_at, updated_at";

pub struct AnalysisRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AnalysisRepository {
    pub(super) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert a record with its initial status history entry.
    pub async fn insert(&self, record: &AnalysisRecord) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO analyses (
                id, procurement_control_number, version_number, status, document_hash,
                verdict, warnings, input_tokens, output_tokens, thinking_tokens,
                search_queries, input_cost, output_cost, thinking_cost, search_cost,
                total_cost, priority_score, votes_count, retry_count, analysis_prompt,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                       ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                record.id.to_string(),
                record.procurement_control_number,
                record.version_number,
                record.status.as_str(),
                record.document_hash,
                record.verdict.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&record.warnings)?,
                record.tokens.input_tokens as i64,
                record.tokens.output_tokens as i64,
                record.tokens.thinking_tokens as i64,
                record.tokens.search_queries as i64,
                record.costs.input_cost,
                record.costs.output_cost,
                record.costs.thinking_cost,
                record.costs.search_cost,
                record.costs.total_cost,
                record.priority_score,
                record.votes_count,
                record.retry_count,
                record.analysis_prompt,
                to_ts(record.created_at),
                to_ts(record.updated_at),
            ],
        )?;
        append_history(&tx, record.id, record.status, None)?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get(&self, id: uuid::Uuid) -> Result<Option<AnalysisRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM analyses WHERE id = ?1"),
            params![id.to_string()],
            record_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Idempotency gate lookup: any record for this procurement, at any
    /// version, with this evidence fingerprint. A new version whose
    /// selected evidence is byte-identical to one already analyzed must
    /// hit this, so the scope is the control number, not the version.
    pub async fn find_by_hash(
        &self,
        control_number: &str,
        document_hash: &str,
    ) -> Result<Option<AnalysisRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM analyses
                 WHERE procurement_control_number = ?1 AND document_hash = ?2
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![control_number, document_hash],
            record_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Whether a non-terminal record exists for this procurement version.
    pub async fn has_active(
        &self,
        control_number: &str,
        version_number: i64,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analyses
             WHERE procurement_control_number = ?1 AND version_number = ?2
               AND status IN ('PENDING_TOKEN_CALCULATION', 'PENDING_ANALYSIS',
                              'ANALYSIS_IN_PROGRESS')",
            params![control_number, version_number],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Transition a record and append the matching history entry.
    pub async fn update_status(
        &self,
        id: uuid::Uuid,
        status: AnalysisStatus,
        details: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE analyses SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), to_ts(Utc::now())],
        )?;
        append_history(&tx, id, status, details)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist the outcome of one auditor call: verdict, usage, costs, the
    /// exact prompt, the terminal status, and a ledger line, atomically.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_result(
        &self,
        id: uuid::Uuid,
        status: AnalysisStatus,
        verdict: Option<&crate::ai::Verdict>,
        warnings: &[String],
        tokens: TokenUsage,
        costs: CostBreakdown,
        prompt: &str,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE analyses SET
                status = ?2, verdict = ?3, warnings = ?4,
                input_tokens = ?5, output_tokens = ?6, thinking_tokens = ?7,
                search_queries = ?8, input_cost = ?9, output_cost = ?10,
                thinking_cost = ?11, search_cost = ?12, total_cost = ?13,
                analysis_prompt = ?14, updated_at = ?15
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                verdict.map(serde_json::to_string).transpose()?,
                serde_json::to_string(warnings)?,
                tokens.input_tokens as i64,
                tokens.output_tokens as i64,
                tokens.thinking_tokens as i64,
                tokens.search_queries as i64,
                costs.input_cost,
                costs.output_cost,
                costs.thinking_cost,
                costs.search_cost,
                costs.total_cost,
                prompt,
                to_ts(Utc::now()),
            ],
        )?;
        append_history(&tx, id, status, None)?;
        if costs.total_cost > 0.0 {
            tx.execute(
                "INSERT INTO budget_ledger (analysis_id, amount, description, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    costs.total_cost,
                    "Chamada de análise ao modelo",
                    to_ts(Utc::now()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn increment_retry(&self, id: uuid::Uuid) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE analyses SET retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), to_ts(Utc::now())],
        )?;
        Ok(())
    }

    pub async fn set_priority(&self, id: uuid::Uuid, score: i64) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE analyses SET priority_score = ?2 WHERE id = ?1",
            params![id.to_string(), score],
        )?;
        Ok(())
    }

    /// Store the pre-flight input token count used for cost estimates.
    pub async fn set_input_tokens(&self, id: uuid::Uuid, tokens: u64) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE analyses SET input_tokens = ?2 WHERE id = ?1",
            params![id.to_string(), tokens as i64],
        )?;
        Ok(())
    }

    /// Failed or timed-out records still under the retry cap.
    pub async fn retry_candidates(
        &self,
        max_retries: i64,
    ) -> Result<Vec<AnalysisRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM analyses
             WHERE status IN ('ANALYSIS_FAILED', 'TIMEOUT') AND retry_count < ?1
             ORDER BY updated_at ASC"
        ))?;
        let rows = stmt.query_map(params![max_retries], record_from_row)?;
        collect_records(rows)
    }

    /// Records stalled mid-pipeline: in progress past `cutoff`, or left in
    /// token calculation by a preparation that died before finishing.
    pub async fn stalled(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnalysisRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM analyses
             WHERE status IN ('ANALYSIS_IN_PROGRESS', 'PENDING_TOKEN_CALCULATION')
               AND updated_at < ?1
             ORDER BY updated_at ASC"
        ))?;
        let rows = stmt.query_map(params![to_ts(cutoff)], record_from_row)?;
        collect_records(rows)
    }

    /// Pending backlog, highest priority first.
    pub async fn pending_ranked(&self) -> Result<Vec<AnalysisRecord>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM analyses
             WHERE status = 'PENDING_ANALYSIS'
             ORDER BY priority_score DESC, created_at ASC"
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        collect_records(rows)
    }

    pub async fn history(
        &self,
        analysis_id: uuid::Uuid,
    ) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, analysis_id, status, details, created_at
             FROM analysis_status_history WHERE analysis_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![analysis_id.to_string()], |row| {
            let id: i64 = row.get(0)?;
            let analysis_id: String = row.get(1)?;
            let status: String = row.get(2)?;
            let details: Option<String> = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok((id, analysis_id, status, details, created_at))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, analysis_id, status, details, created_at) = row?;
            entries.push(StatusHistoryEntry {
                id,
                analysis_id: parse_uuid(&analysis_id)?,
                status: AnalysisStatus::from_str(&status)
                    .ok_or_else(|| RepositoryError::Corrupt(format!("bad status: {status}")))?,
                details,
                created_at: from_ts(&created_at)?,
            });
        }
        Ok(entries)
    }

    pub async fn ledger_for(
        &self,
        analysis_id: uuid::Uuid,
    ) -> Result<Vec<BudgetLedgerEntry>, RepositoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, analysis_id, amount, description, created_at
             FROM budget_ledger WHERE analysis_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![analysis_id.to_string()], |row| {
            let id: i64 = row.get(0)?;
            let analysis_id: String = row.get(1)?;
            let amount: f64 = row.get(2)?;
            let description: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok((id, analysis_id, amount, description, created_at))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, analysis_id, amount, description, created_at) = row?;
            entries.push(BudgetLedgerEntry {
                id,
                analysis_id: parse_uuid(&analysis_id)?,
                amount,
                description,
                created_at: from_ts(&created_at)?,
            });
        }
        Ok(entries)
    }
}

fn append_history(
    conn: &Connection,
    analysis_id: uuid::Uuid,
    status: AnalysisStatus,
    details: Option<&str>,
) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO analysis_status_history (analysis_id, status, details, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![analysis_id.to_string(), status.as_str(), details, to_ts(Utc::now())],
    )?;
    Ok(())
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<Result<AnalysisRecord, RepositoryError>>>,
) -> Result<Vec<AnalysisRecord>, RepositoryError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row??);
    }
    Ok(records)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AnalysisRecord, RepositoryError>> {
    let id: String = row.get(0)?;
    let procurement_control_number: String = row.get(1)?;
    let version_number: i64 = row.get(2)?;
    let status: String = row.get(3)?;
    let document_hash: String = row.get(4)?;
    let verdict: Option<String> = row.get(5)?;
    let warnings: String = row.get(6)?;
    let input_tokens: i64 = row.get(7)?;
    let output_tokens: i64 = row.get(8)?;
    let thinking_tokens: i64 = row.get(9)?;
    let search_queries: i64 = row.get(10)?;
    let input_cost: f64 = row.get(11)?;
    let output_cost: f64 = row.get(12)?;
    let thinking_cost: f64 = row.get(13)?;
    let search_cost: f64 = row.get(14)?;
    let total_cost: f64 = row.get(15)?;
    let priority_score: i64 = row.get(16)?;
    let votes_count: i64 = row.get(17)?;
    let retry_count: i64 = row.get(18)?;
    let analysis_prompt: Option<String> = row.get(19)?;
    let created_at: String = row.get(20)?;
    let updated_at: String = row.get(21)?;
    Ok((|| {
        Ok(AnalysisRecord {
            id: parse_uuid(&id)?,
            procurement_control_number,
            version_number,
            status: AnalysisStatus::from_str(&status)
                .ok_or_else(|| RepositoryError::Corrupt(format!("bad status: {status}")))?,
            document_hash,
            verdict: verdict.as_deref().map(serde_json::from_str).transpose()?,
            warnings: serde_json::from_str(&warnings)?,
            tokens: TokenUsage {
                input_tokens: input_tokens as u64,
                output_tokens: output_tokens as u64,
                thinking_tokens: thinking_tokens as u64,
                search_queries: search_queries as u64,
            },
            costs: CostBreakdown {
                input_cost,
                output_cost,
                thinking_cost,
                search_cost,
                total_cost,
            },
            priority_score,
            votes_count,
            retry_count,
            analysis_prompt,
            created_at: from_ts(&created_at)?,
            updated_at: from_ts(&updated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;

    fn record(control: &str, version: i64, hash: &str) -> AnalysisRecord {
        let now = Utc::now();
        AnalysisRecord {
            id: uuid::Uuid::new_v4(),
            procurement_control_number: control.to_string(),
            version_number: version,
            status: AnalysisStatus::PendingAnalysis,
            document_hash: hash.to_string(),
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
        }
    }

    async fn database() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();

        let loaded = repo.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.procurement_control_number, "c-1");
        assert_eq!(loaded.status, AnalysisStatus::PendingAnalysis);
        assert_eq!(loaded.document_hash, "h-1");
    }

    #[tokio::test]
    async fn test_idempotency_lookup_by_hash() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();

        assert!(repo.find_by_hash("c-1", "h-1").await.unwrap().is_some());
        assert!(repo.find_by_hash("c-1", "h-2").await.unwrap().is_none());
        assert!(repo.find_by_hash("c-2", "h-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_lookup_sees_earlier_versions() {
        // a metadata-only feed change creates a new version whose evidence
        // bytes are unchanged; the fingerprint from v1 must still gate v2
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "evidence-h");
        repo.insert(&rec).await.unwrap();
        repo.update_status(rec.id, AnalysisStatus::AnalysisSuccessful, None).await.unwrap();

        let prior = repo.find_by_hash("c-1", "evidence-h").await.unwrap().unwrap();
        assert_eq!(prior.id, rec.id);
        assert_eq!(prior.version_number, 1);
    }

    #[tokio::test]
    async fn test_stalled_reaps_abandoned_preparation() {
        let db = database().await;
        let repo = db.analyses();

        let mut abandoned = record("c-1", 1, "h-1");
        abandoned.status = AnalysisStatus::PendingTokenCalculation;
        abandoned.updated_at = Utc::now() - chrono::Duration::hours(5);
        repo.insert(&abandoned).await.unwrap();

        let mut hung = record("c-2", 1, "h-2");
        hung.status = AnalysisStatus::AnalysisInProgress;
        hung.updated_at = Utc::now() - chrono::Duration::hours(5);
        repo.insert(&hung).await.unwrap();

        let fresh = record("c-3", 1, "h-3");
        repo.insert(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let stalled = repo.stalled(cutoff).await.unwrap();
        let ids: Vec<uuid::Uuid> = stalled.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&abandoned.id));
        assert!(ids.contains(&hung.id));
        assert!(!ids.contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_every_transition_lands_in_history() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();
        repo.update_status(rec.id, AnalysisStatus::AnalysisInProgress, Some("publicado"))
            .await
            .unwrap();
        repo.update_status(rec.id, AnalysisStatus::AnalysisSuccessful, None)
            .await
            .unwrap();

        let history = repo.history(rec.id).await.unwrap();
        let statuses: Vec<AnalysisStatus> = history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                AnalysisStatus::PendingAnalysis,
                AnalysisStatus::AnalysisInProgress,
                AnalysisStatus::AnalysisSuccessful,
            ]
        );
        assert_eq!(history[1].details.as_deref(), Some("publicado"));
    }

    #[tokio::test]
    async fn test_has_active_tracks_non_terminal_statuses() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();
        assert!(repo.has_active("c-1", 1).await.unwrap());

        repo.update_status(rec.id, AnalysisStatus::AnalysisFailed, None).await.unwrap();
        assert!(!repo.has_active("c-1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_candidates_respect_cap() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();
        repo.update_status(rec.id, AnalysisStatus::AnalysisFailed, None).await.unwrap();

        assert_eq!(repo.retry_candidates(3).await.unwrap().len(), 1);
        repo.increment_retry(rec.id).await.unwrap();
        repo.increment_retry(rec.id).await.unwrap();
        repo.increment_retry(rec.id).await.unwrap();
        assert!(repo.retry_candidates(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_ranked_orders_by_priority() {
        let db = database().await;
        let repo = db.analyses();
        let low = record("c-1", 1, "h-1");
        let high = record("c-2", 1, "h-2");
        repo.insert(&low).await.unwrap();
        repo.insert(&high).await.unwrap();
        repo.set_priority(low.id, 10).await.unwrap();
        repo.set_priority(high.id, 90).await.unwrap();

        let ranked = repo.pending_ranked().await.unwrap();
        assert_eq!(ranked[0].id, high.id);
        assert_eq!(ranked[1].id, low.id);
    }

    #[tokio::test]
    async fn test_save_result_writes_ledger_line() {
        let db = database().await;
        let repo = db.analyses();
        let rec = record("c-1", 1, "h-1");
        repo.insert(&rec).await.unwrap();

        let costs = CostBreakdown {
            input_cost: 0.10,
            output_cost: 0.02,
            thinking_cost: 0.0,
            search_cost: 0.0,
            total_cost: 0.12,
        };
        repo.save_result(
            rec.id,
            AnalysisStatus::AnalysisSuccessful,
            None,
            &["aviso".to_string()],
            TokenUsage { input_tokens: 100, output_tokens: 20, ..Default::default() },
            costs,
            "prompt",
        )
        .await
        .unwrap();

        let loaded = repo.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AnalysisStatus::AnalysisSuccessful);
        assert_eq!(loaded.tokens.input_tokens, 100);
        assert_eq!(loaded.warnings, vec!["aviso".to_string()]);
        assert_eq!(loaded.analysis_prompt.as_deref(), Some("prompt"));

        let ledger = repo.ledger_for(rec.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert!((ledger[0].amount - 0.12).abs() < 1e-9);
    }
}
