//! End-to-end pipeline tests over the in-memory database and queue, with
//! stubbed feed and auditor in place of the real APIs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use procaudit::ai::{AiFile, Auditor, AuditorError, Verdict};
use procaudit::config::Config;
use procaudit::feed::{FeedDocument, FeedError, FeedProcurement, ProcurementFeed};
use procaudit::models::{
    AnalysisRecord, AnalysisStatus, CostBreakdown, GovernmentEntity, Procurement, TokenUsage,
};
use procaudit::queue::{MemoryQueue, Queue};
use procaudit::repository::Database;
use procaudit::services::{AnalysisService, ProcessOutcome, Worker, WorkerOptions};
use procaudit::storage::{BlobStore, LocalBlobStore};

/// Auditor stub: scripted success or failure, with a call counter.
struct StubAuditor {
    calls: AtomicUsize,
    fail_status: Option<u16>,
}

impl StubAuditor {
    fn succeeding() -> Self {
        Self { calls: AtomicUsize::new(0), fail_status: None }
    }

    fn failing(status: u16) -> Self {
        Self { calls: AtomicUsize::new(0), fail_status: Some(status) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Auditor for StubAuditor {
    async fn count_tokens(&self, _prompt: &str, _files: &[AiFile]) -> Result<u64, AuditorError> {
        Ok(12_000)
    }

    async fn analyze(
        &self,
        _prompt: &str,
        _files: &[AiFile],
        _max_output_tokens: Option<u32>,
    ) -> Result<(Verdict, TokenUsage), AuditorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            return Err(AuditorError::Api { status, body: "stubbed failure".to_string() });
        }
        let verdict: Verdict = serde_json::from_value(serde_json::json!({
            "risk_score": 7,
            "risk_score_rationale": "Prazo exíguo e pesquisa de preços insuficiente.",
            "procurement_summary": "Aquisição de equipamentos de informática.",
            "analysis_summary": "Indícios de restrição de competitividade.",
            "red_flags": [{
                "category": "DIRECIONAMENTO",
                "severity": "GRAVE",
                "description": "Especificação direcionada a marca única.",
                "evidence_quote": "marca XYZ ou superior",
                "auditor_reasoning": "Exigência de marca sem justificativa técnica."
            }],
            "seo_keywords": ["licitacao", "direcionamento"]
        }))
        .expect("stub verdict matches the schema");
        let usage = TokenUsage {
            input_tokens: 12_000,
            output_tokens: 800,
            thinking_tokens: 300,
            search_queries: 0,
        };
        Ok((verdict, usage))
    }
}

/// Feed stub: one procurement with canned attachments, the raw payload
/// swappable so a test can simulate a metadata-only change upstream.
struct StubFeed {
    procurement: Procurement,
    raw: Mutex<serde_json::Value>,
    attachments: Vec<(String, Vec<u8>)>,
}

impl StubFeed {
    fn new(procurement: Procurement, attachments: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            procurement,
            raw: Mutex::new(serde_json::json!({"fonte": "original"})),
            attachments,
        }
    }

    fn empty() -> Self {
        Self::new(sample_procurement("07854402000100-1-000100/2025"), Vec::new())
    }

    fn set_raw(&self, raw: serde_json::Value) {
        *self.raw.lock().unwrap() = raw;
    }
}

#[async_trait]
impl ProcurementFeed for StubFeed {
    async fn procurements_for_date(
        &self,
        _date: NaiveDate,
        _region: Option<&str>,
    ) -> Result<Vec<FeedProcurement>, FeedError> {
        Ok(vec![FeedProcurement {
            procurement: self.procurement.clone(),
            raw: self.raw.lock().unwrap().clone(),
        }])
    }

    async fn documents_for(&self, _control: &str) -> Result<Vec<FeedDocument>, FeedError> {
        Ok(self
            .attachments
            .iter()
            .enumerate()
            .map(|(idx, (title, _))| FeedDocument {
                sequence: idx as i64 + 1,
                title: title.clone(),
                document_type: None,
                url: format!("stub://{title}"),
                publication_date: None,
                raw: serde_json::json!({}),
            })
            .collect())
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FeedError> {
        let title = url.trim_start_matches("stub://");
        let bytes = self
            .attachments
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, b)| b.clone())
            .unwrap_or_default();
        Ok((bytes, Some(title.to_string())))
    }
}

struct Harness {
    db: Database,
    queue: Arc<MemoryQueue>,
    service: Arc<AnalysisService>,
    auditor: Arc<StubAuditor>,
    feed: Arc<StubFeed>,
    blobs: Arc<LocalBlobStore>,
    _blob_root: tempfile::TempDir,
}

async fn harness(auditor: StubAuditor) -> Harness {
    harness_with(auditor, Config::default(), StubFeed::empty()).await
}

async fn harness_with(auditor: StubAuditor, mut config: Config, feed: StubFeed) -> Harness {
    config.worker.lease_safety_secs = 1;
    config.worker.lease_extension_secs = 2;
    let db = Database::open_in_memory().expect("in-memory db");
    db.init_schema().await.expect("schema");
    let blob_root = tempfile::tempdir().expect("tempdir");
    let queue = Arc::new(MemoryQueue::new(config.queue.clone()));
    let auditor = Arc::new(auditor);
    let feed = Arc::new(feed);
    let blobs = Arc::new(LocalBlobStore::new(blob_root.path()));
    let service = Arc::new(AnalysisService::new(
        config,
        db.clone(),
        Arc::clone(&feed) as _,
        Arc::clone(&auditor) as _,
        Arc::clone(&queue) as _,
        Arc::clone(&blobs) as _,
    ));
    Harness { db, queue, service, auditor, feed, blobs, _blob_root: blob_root }
}

fn sample_procurement(control: &str) -> Procurement {
    Procurement {
        control_number: control.to_string(),
        object_description: "Aquisição de equipamentos de informática".to_string(),
        total_estimated_value: Some(250_000.0),
        proposal_opening_date: None,
        proposal_closing_date: None,
        last_update_date: Utc::now(),
        government_entity: GovernmentEntity {
            name: "Prefeitura de Teste".to_string(),
            cnpj: "07854402000100".to_string(),
            sphere: "M".to_string(),
        },
        votes_count: 0,
        region: Some("SP".to_string()),
    }
}

/// Insert a procurement version plus a pending analysis, as the prepare
/// phase would have left them.
async fn seed_pending(harness: &Harness, control: &str) -> AnalysisRecord {
    let procurement = sample_procurement(control);
    harness
        .db
        .procurements()
        .insert_version(&procurement, 1, "hash-v1", &serde_json::json!({"seed": true}))
        .await
        .expect("insert version");
    let now = Utc::now();
    let record = AnalysisRecord {
        id: uuid::Uuid::new_v4(),
        procurement_control_number: control.to_string(),
        version_number: 1,
        status: AnalysisStatus::PendingAnalysis,
        document_hash: "doc-hash".to_string(),
        verdict: None,
        warnings: Vec::new(),
        tokens: TokenUsage::default(),
        costs: CostBreakdown::default(),
        priority_score: 0,
        votes_count: 0,
        retry_count: 0,
        analysis_prompt: Some("Analise os documentos anexados.".to_string()),
        created_at: now,
        updated_at: now,
    };
    harness.db.analyses().insert(&record).await.expect("insert analysis");
    record
}

async fn run_worker(harness: &Harness, max_messages: u64) -> u64 {
    let worker = Arc::new(Worker::new(
        harness.service_config().worker.clone(),
        Arc::clone(&harness.service),
        Arc::clone(&harness.queue) as _,
    ));
    worker
        .run(WorkerOptions {
            max_messages: Some(max_messages),
            idle_timeout: Some(Duration::from_millis(500)),
            debug: false,
        })
        .await
        .expect("worker run")
}

impl Harness {
    fn service_config(&self) -> Config {
        let mut config = Config::default();
        config.worker.lease_safety_secs = 1;
        config.worker.lease_extension_secs = 2;
        config
    }
}

#[tokio::test]
async fn successful_analysis_persists_verdict_and_costs() {
    let harness = harness(StubAuditor::succeeding()).await;
    let record = seed_pending(&harness, "07854402000100-1-000001/2025").await;

    harness.service.run(record.id).await.expect("publish");
    let processed = run_worker(&harness, 1).await;
    assert_eq!(processed, 1);
    assert_eq!(harness.auditor.calls(), 1);

    let stored = harness
        .db
        .analyses()
        .get(record.id)
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(stored.status, AnalysisStatus::AnalysisSuccessful);
    let verdict = stored.verdict.expect("verdict saved");
    assert_eq!(verdict.risk_score, 7);
    assert_eq!(verdict.red_flags.len(), 1);
    assert!(stored.costs.total_cost > 0.0);
    assert_eq!(stored.tokens.input_tokens, 12_000);

    let ledger = harness.db.analyses().ledger_for(record.id).await.expect("ledger");
    assert_eq!(ledger.len(), 1);

    let history = harness.db.analyses().history(record.id).await.expect("history");
    let statuses: Vec<&str> = history.iter().map(|h| h.status.as_str()).collect();
    assert!(statuses.contains(&"ANALYSIS_IN_PROGRESS"));
}

#[tokio::test]
async fn permanent_failure_marks_record_failed() {
    let harness = harness(StubAuditor::failing(400)).await;
    let record = seed_pending(&harness, "07854402000100-1-000002/2025").await;

    harness.service.run(record.id).await.expect("publish");
    let processed = run_worker(&harness, 1).await;
    assert_eq!(processed, 1);

    let stored = harness
        .db
        .analyses()
        .get(record.id)
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(stored.status, AnalysisStatus::AnalysisFailed);
    assert!(stored.verdict.is_none());
}

#[tokio::test]
async fn settled_record_is_skipped_not_reanalyzed() {
    let harness = harness(StubAuditor::succeeding()).await;
    let record = seed_pending(&harness, "07854402000100-1-000003/2025").await;
    harness
        .db
        .analyses()
        .update_status(record.id, AnalysisStatus::AnalysisSuccessful, Some("seeded"))
        .await
        .expect("settle");

    let payload = serde_json::json!({ "analysis_id": record.id }).to_string();
    let outcome = harness.service.process_from_message(payload.as_bytes()).await;
    assert!(matches!(outcome, ProcessOutcome::Skipped(_)));
    assert_eq!(harness.auditor.calls(), 0);
}

#[tokio::test]
async fn malformed_payload_is_permanent() {
    let harness = harness(StubAuditor::succeeding()).await;
    let outcome = harness.service.process_from_message(b"not json").await;
    assert!(matches!(outcome, ProcessOutcome::Permanent(_)));
}

#[tokio::test]
async fn run_rejects_records_not_pending() {
    let harness = harness(StubAuditor::succeeding()).await;
    let record = seed_pending(&harness, "07854402000100-1-000004/2025").await;
    harness
        .db
        .analyses()
        .update_status(record.id, AnalysisStatus::AnalysisFailed, None)
        .await
        .expect("fail");
    assert!(harness.service.run(record.id).await.is_err());
}

#[tokio::test]
async fn worker_stops_at_message_cap() {
    let harness = harness(StubAuditor::succeeding()).await;
    let first = seed_pending(&harness, "07854402000100-1-000005/2025").await;
    let second = seed_pending(&harness, "07854402000100-1-000006/2025").await;

    harness.service.run(first.id).await.expect("publish first");
    harness.service.run(second.id).await.expect("publish second");

    let processed = run_worker(&harness, 2).await;
    assert_eq!(processed, 2);
    assert_eq!(harness.auditor.calls(), 2);
}

#[tokio::test]
async fn retry_republishes_failed_records_after_backoff() {
    let harness = harness(StubAuditor::succeeding()).await;
    let record = seed_pending(&harness, "07854402000100-1-000007/2025").await;
    harness
        .db
        .analyses()
        .update_status(record.id, AnalysisStatus::AnalysisFailed, Some("stub"))
        .await
        .expect("fail");

    // retry_count 0, but the first backoff window has not elapsed yet
    let republished = harness.service.retry().await.expect("retry");
    assert_eq!(republished, 0);
}

#[tokio::test]
async fn prepare_builds_record_with_ranked_prepared_files() {
    let control = "07854402000100-1-000010/2025";
    let feed = StubFeed::new(
        sample_procurement(control),
        vec![
            ("anexo.txt".to_string(), b"Conteudo complementar do processo.".to_vec()),
            ("edital.txt".to_string(), b"Edital de pregao eletronico.".to_vec()),
        ],
    );
    let harness = harness_with(StubAuditor::succeeding(), Config::default(), feed).await;

    let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
    let created = harness.service.prepare(date, None, None).await.expect("prepare");
    assert_eq!(created, 1);

    let pending = harness.db.analyses().pending_ranked().await.expect("pending");
    assert_eq!(pending.len(), 1);
    let record = &pending[0];
    assert_eq!(record.procurement_control_number, control);
    assert_eq!(record.status, AnalysisStatus::PendingAnalysis);
    assert_eq!(record.tokens.input_tokens, 12_000);

    // the edital ranks first even though it was discovered second, and the
    // key prefixes follow that selection order
    let keys = harness
        .blobs
        .list(&format!("analyses/{}/prepared/", record.id))
        .await
        .expect("list prepared");
    assert_eq!(keys.len(), 2, "got {keys:?}");
    assert!(keys[0].ends_with("0000_00_edital.txt"), "got {keys:?}");
    assert!(keys[1].ends_with("0001_00_anexo.txt"), "got {keys:?}");
}

#[tokio::test]
async fn prepare_twice_skips_unchanged_and_reanalyzed_content() {
    let control = "07854402000100-1-000011/2025";
    let feed = StubFeed::new(
        sample_procurement(control),
        vec![("edital.txt".to_string(), b"Edital de pregao eletronico.".to_vec())],
    );
    let harness = harness_with(StubAuditor::succeeding(), Config::default(), feed).await;
    let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

    assert_eq!(harness.service.prepare(date, None, None).await.expect("first"), 1);
    // identical payload: the version hash gate skips everything
    assert_eq!(harness.service.prepare(date, None, None).await.expect("second"), 0);

    // metadata-only change: a new version is recorded, but the evidence
    // bytes are unchanged so no second analysis is created
    harness.feed.set_raw(serde_json::json!({"fonte": "alterada"}));
    assert_eq!(harness.service.prepare(date, None, None).await.expect("third"), 0);

    let latest = harness
        .db
        .procurements()
        .latest_version(control)
        .await
        .expect("latest")
        .expect("version exists");
    assert_eq!(latest.version_number, 2);
    assert_eq!(harness.db.analyses().pending_ranked().await.expect("pending").len(), 1);
}

#[tokio::test]
async fn stalled_analysis_times_out_then_retries() {
    let mut config = Config::default();
    config.retry.stuck_after_hours = 0;
    config.retry.initial_backoff_hours = 0;
    let harness = harness_with(StubAuditor::succeeding(), config, StubFeed::empty()).await;
    let record = seed_pending(&harness, "07854402000100-1-000012/2025").await;

    // published but never consumed: the record sits in progress
    harness.service.run(record.id).await.expect("publish");
    let reclaimed = harness.service.reclaim_stuck().await.expect("reclaim");
    assert_eq!(reclaimed, 1);
    let stored = harness.db.analyses().get(record.id).await.expect("get").expect("exists");
    assert_eq!(stored.status, AnalysisStatus::Timeout);

    let republished = harness.service.retry().await.expect("retry");
    assert_eq!(republished, 1);

    // two queued messages for the same analysis: the first settles it and
    // the second is an idempotent skip
    let processed = run_worker(&harness, 2).await;
    assert_eq!(processed, 2);
    assert_eq!(harness.auditor.calls(), 1);
    let settled = harness.db.analyses().get(record.id).await.expect("get").expect("exists");
    assert_eq!(settled.status, AnalysisStatus::AnalysisSuccessful);
}

#[tokio::test]
async fn publish_queues_message_for_subscribers() {
    let harness = harness(StubAuditor::succeeding()).await;
    let record = seed_pending(&harness, "07854402000100-1-000008/2025").await;
    harness.service.run(record.id).await.expect("publish");

    let mut deliveries = harness.queue.subscribe("analyses").await.expect("subscribe");
    let delivery = tokio::time::timeout(Duration::from_secs(2), deliveries.recv())
        .await
        .expect("delivery in time")
        .expect("stream open");
    let payload: serde_json::Value = serde_json::from_slice(&delivery.data).expect("json payload");
    assert_eq!(payload["analysis_id"], serde_json::json!(record.id));
    delivery.ack();
}
