//! Analysis orchestration: pre-analysis preparation, queue hand-off,
//! message processing, retries, and the ranked runner.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ai::{AiFile, Auditor};
use crate::config::Config;
use crate::convert;
use crate::extract;
use crate::feed::{FeedDocument, FeedProcurement, ProcurementFeed};
use crate::models::{
    AnalysisRecord, AnalysisStatus, CostBreakdown, ExclusionReason, FileCandidate,
    PipelineWarning, Procurement, ProcurementVersion, SourceDocument, TokenUsage,
};
use crate::pricing::Modality;
use crate::queue::Queue;
use crate::repository::Database;
use crate::selection;
use crate::storage::{content_key, BlobStore};

/// How handling one queue message ended, which decides ack versus nack.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Verdict persisted (successful or failed terminally).
    Completed,
    /// Nothing to do; the record was already settled.
    Skipped(String),
    /// Worth redelivering: network trouble, timeouts, missing record.
    Transient(String),
    /// Will never succeed; rely on queue-level dead-lettering.
    Permanent(String),
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct AnalysisMessage {
    analysis_id: uuid::Uuid,
}

pub struct AnalysisService {
    config: Config,
    db: Database,
    feed: Arc<dyn ProcurementFeed>,
    auditor: Arc<dyn Auditor>,
    queue: Arc<dyn Queue>,
    blobs: Arc<dyn BlobStore>,
}

impl AnalysisService {
    pub fn new(
        config: Config,
        db: Database,
        feed: Arc<dyn ProcurementFeed>,
        auditor: Arc<dyn Auditor>,
        queue: Arc<dyn Queue>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self { config, db, feed, auditor, queue, blobs }
    }

    /// Pre-analysis: fetch the feed for `date`, and for each procurement
    /// download, normalize, convert, select, fingerprint, and persist a
    /// pending analysis record. Returns how many records were created.
    pub async fn prepare(
        &self,
        date: chrono::NaiveDate,
        region: Option<&str>,
        max_records: Option<usize>,
    ) -> anyhow::Result<usize> {
        let procurements = self.feed.procurements_for_date(date, region).await?;
        let mut created = 0usize;
        for feed_procurement in procurements {
            if let Some(max) = max_records {
                if created >= max {
                    info!("Reached the limit of {} prepared records, stopping", max);
                    break;
                }
            }
            let control = feed_procurement.procurement.control_number.clone();
            match self.prepare_one(&feed_procurement).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to prepare procurement {}: {:#}", control, e),
            }
        }
        info!("Prepared {} analysis records for {}", created, date);
        Ok(created)
    }

    /// Prepare a single procurement. Returns whether a new record was
    /// created (false means an idempotent skip).
    pub async fn prepare_one(&self, feed_procurement: &FeedProcurement) -> anyhow::Result<bool> {
        let procurement = &feed_procurement.procurement;
        let control = &procurement.control_number;

        let documents = self.feed.documents_for(control).await?;
        let mut downloads: Vec<(FeedDocument, String, Vec<u8>)> = Vec::new();
        for document in documents {
            let (bytes, server_name) = self.feed.download(&document.url).await?;
            let name = server_name.unwrap_or_else(|| document.title.clone());
            downloads.push((document, name, bytes));
        }

        // version gate on the raw payload plus all attachment bytes
        let hash_inputs: Vec<(String, Vec<u8>)> = downloads
            .iter()
            .map(|(_, name, bytes)| (name.clone(), bytes.clone()))
            .collect();
        let content_hash = ProcurementVersion::compute_hash(&feed_procurement.raw, &hash_inputs);
        if self.db.procurements().exists_with_hash(control, &content_hash).await? {
            debug!("Procurement {} unchanged (hash {}), skipping", control, &content_hash[..8]);
            return Ok(false);
        }
        let version_number = self
            .db
            .procurements()
            .latest_version(control)
            .await?
            .map(|v| v.version_number + 1)
            .unwrap_or(1);
        if self.db.analyses().has_active(control, version_number).await? {
            info!("Procurement {} v{} already has an active analysis, skipping", control, version_number);
            return Ok(false);
        }
        self.db
            .procurements()
            .insert_version(procurement, version_number, &content_hash, &feed_procurement.raw)
            .await?;

        // normalize and convert every downloaded attachment
        let mut titles: HashMap<String, String> = HashMap::new();
        let mut candidates: Vec<FileCandidate> = Vec::new();
        let mut doc_of_candidate: Vec<usize> = Vec::new();
        let mut pipeline_warnings: Vec<PipelineWarning> = Vec::new();
        for (doc_index, (document, name, bytes)) in downloads.iter().enumerate() {
            let synthetic_id = format!("{}-{}", control, document.sequence);
            titles.insert(synthetic_id.clone(), document.title.clone());

            let outcome = extract::flatten(name, bytes.clone());
            for failed in outcome.failed_archives {
                pipeline_warnings.push(PipelineWarning::ArchiveExtractionFailed {
                    path: failed.clone(),
                });
                let mut candidate =
                    FileCandidate::new(synthetic_id.clone(), failed, 0, Vec::new());
                candidate.exclusion_reason = Some(ExclusionReason::ExtractionFailed);
                candidates.push(candidate);
                doc_of_candidate.push(doc_index);
            }
            for file in outcome.files {
                let mut candidate = FileCandidate::new(
                    synthetic_id.clone(),
                    file.path,
                    file.nesting_level,
                    file.content,
                );
                let (resolved, _sniffed) = extract::resolve_extension(
                    candidate.extension.as_deref(),
                    &candidate.original_content,
                );
                if resolved != candidate.extension {
                    candidate.inferred_extension = resolved;
                }

                match candidate.effective_extension() {
                    Some(ext) if convert::is_supported(ext) => {
                        if let Err(e) = convert::prepare(&mut candidate).await {
                            warn!("Conversion of '{}' failed: {}", candidate.original_path, e);
                            candidate.exclusion_reason = Some(ExclusionReason::ConversionFailed);
                        }
                    }
                    _ => {
                        candidate.exclusion_reason = Some(ExclusionReason::UnsupportedExtension);
                    }
                }
                candidates.push(candidate);
                doc_of_candidate.push(doc_index);
            }
        }

        let summary = selection::select(&mut candidates, &titles, &self.config.selection);
        for candidate in &candidates {
            if candidate.included {
                pipeline_warnings.extend(candidate.warnings.iter().cloned());
            }
        }
        pipeline_warnings.extend(summary.warnings.iter().cloned());
        let document_hash = evidence_fingerprint(&candidates);

        // idempotency gate on the selected evidence, across versions: a
        // metadata-only change yields a new version with the same bytes
        if let Some(existing) = self.db.analyses().find_by_hash(control, &document_hash).await? {
            info!(
                "Procurement {} evidence already analyzed as {} (v{}, status {}), skipping",
                control, existing.id, existing.version_number, existing.status.as_str()
            );
            return Ok(false);
        }

        let warnings_rendered: Vec<String> =
            pipeline_warnings.iter().map(|w| w.render()).collect();
        let prompt = build_prompt(procurement, &warnings_rendered);

        let now = Utc::now();
        let record = AnalysisRecord {
            id: uuid::Uuid::new_v4(),
            procurement_control_number: control.clone(),
            version_number,
            status: AnalysisStatus::PendingTokenCalculation,
            document_hash: document_hash.clone(),
            verdict: None,
            warnings: warnings_rendered,
            tokens: TokenUsage::default(),
            costs: CostBreakdown::default(),
            priority_score: 0,
            votes_count: procurement.votes_count,
            retry_count: 0,
            analysis_prompt: Some(prompt.clone()),
            created_at: now,
            updated_at: now,
        };
        self.db.analyses().insert(&record).await?;

        // persist documents, file records, and blobs
        let mut document_ids: Vec<uuid::Uuid> = Vec::new();
        for (document, _, _) in &downloads {
            let source = SourceDocument {
                id: uuid::Uuid::new_v4(),
                analysis_id: record.id,
                synthetic_id: format!("{}-{}", control, document.sequence),
                title: document.title.clone(),
                publication_date: document.publication_date,
                document_type: document.document_type.clone(),
                url: Some(document.url.clone()),
                raw_metadata: document.raw.clone(),
            };
            self.db.documents().insert_source_document(&source).await?;
            document_ids.push(source.id);
        }
        let order = selection::ranked_indices(&candidates);
        for (rank, &idx) in order.iter().enumerate() {
            let candidate = &mut candidates[idx];
            let blob_key = if candidate.original_content.is_empty() {
                None
            } else {
                let ext = candidate.effective_extension().unwrap_or("bin");
                let key = content_key("originals", &candidate.original_content, ext);
                self.blobs.put(&key, &candidate.original_content).await?;
                Some(key)
            };
            if candidate.included {
                // rank position in the key prefix so a lexicographic blob
                // listing reproduces the selection order
                for (artifact_index, artifact) in candidate.artifacts.iter().enumerate() {
                    let key = format!(
                        "analyses/{}/prepared/{:04}_{:02}_{}",
                        record.id, rank, artifact_index, artifact.name
                    );
                    self.blobs.put(&key, &artifact.bytes).await?;
                }
            }
            let source_document_id = document_ids[doc_of_candidate[idx]];
            let file_record_id = self
                .db
                .documents()
                .insert_file_record(record.id, source_document_id, candidate, blob_key.as_deref())
                .await?;
            candidate.file_record_id = Some(file_record_id);
        }

        // token pre-count, then the record becomes eligible for the queue
        let ai_files = included_files(&candidates, &order);
        let token_count = match self.auditor.count_tokens(&prompt, &ai_files).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Token pre-count failed for {} ({}), using the local estimate", control, e);
                summary.total_tokens
            }
        };
        self.db.analyses().set_input_tokens(record.id, token_count).await?;
        self.db
            .analyses()
            .update_status(
                record.id,
                AnalysisStatus::PendingAnalysis,
                Some(&format!("{token_count} tokens de entrada")),
            )
            .await?;

        let estimated_cost = self.config.pricing.estimate_input_cost(&tokens_by_modality(
            &candidates,
            &order,
            token_count,
        ));
        let priority =
            self.config
                .ranking
                .priority(procurement, &candidates, estimated_cost, Utc::now());
        self.db.analyses().set_priority(record.id, priority).await?;
        info!(
            "Prepared analysis {} for {} v{} (priority {}, {} files selected)",
            record.id, control, version_number, priority, summary.included
        );
        Ok(true)
    }

    /// Move a pending record into progress and publish it to the workers.
    pub async fn run(&self, analysis_id: uuid::Uuid) -> anyhow::Result<()> {
        let record = self
            .db
            .analyses()
            .get(analysis_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("analysis {} not found", analysis_id))?;
        if record.status != AnalysisStatus::PendingAnalysis {
            anyhow::bail!(
                "analysis {} is {}, expected PENDING_ANALYSIS",
                analysis_id,
                record.status.as_str()
            );
        }
        self.publish(&record, "publicado para processamento").await
    }

    async fn publish(&self, record: &AnalysisRecord, details: &str) -> anyhow::Result<()> {
        self.db
            .analyses()
            .update_status(record.id, AnalysisStatus::AnalysisInProgress, Some(details))
            .await?;
        let payload = serde_json::to_vec(&AnalysisMessage { analysis_id: record.id })?;
        let message_id = self.queue.publish(&self.config.worker.topic, payload).await?;
        info!("Published analysis {} as message {}", record.id, message_id);
        Ok(())
    }

    /// Handle one queue message end to end.
    pub async fn process_from_message(&self, payload: &[u8]) -> ProcessOutcome {
        let message: AnalysisMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => return ProcessOutcome::Permanent(format!("malformed payload: {e}")),
        };
        match self.process(message.analysis_id).await {
            Ok(outcome) => outcome,
            Err(e) => ProcessOutcome::Transient(format!("{e:#}")),
        }
    }

    async fn process(&self, analysis_id: uuid::Uuid) -> anyhow::Result<ProcessOutcome> {
        let Some(record) = self.db.analyses().get(analysis_id).await? else {
            // the record may not be visible yet right after publishing
            return Ok(ProcessOutcome::Transient(format!(
                "analysis {analysis_id} not found"
            )));
        };
        if record.status.is_settled() {
            return Ok(ProcessOutcome::Skipped(format!(
                "analysis {} already {}",
                record.id,
                record.status.as_str()
            )));
        }

        let prompt = record
            .analysis_prompt
            .clone()
            .ok_or_else(|| anyhow::anyhow!("analysis {} has no stored prompt", record.id))?;
        let files = self.load_prepared_files(record.id).await?;
        debug!("Analyzing {} with {} prepared files", record.id, files.len());

        match self
            .auditor
            .analyze(&prompt, &files, Some(self.config.ai.max_output_tokens))
            .await
        {
            Ok((verdict, tokens)) => {
                let costs = self.config.pricing.price(&tokens);
                self.db
                    .analyses()
                    .save_result(
                        record.id,
                        AnalysisStatus::AnalysisSuccessful,
                        Some(&verdict),
                        &record.warnings,
                        tokens,
                        costs,
                        &prompt,
                    )
                    .await?;
                info!(
                    "Analysis {} successful: risk {} with {} red flags",
                    record.id,
                    verdict.risk_score,
                    verdict.red_flags.len()
                );
                Ok(ProcessOutcome::Completed)
            }
            Err(e) if e.is_transient() => {
                // leave the record in progress so redelivery retries it;
                // reclaim_stuck catches it if the queue gives up
                warn!("Transient auditor failure for {}: {}", record.id, e);
                Ok(ProcessOutcome::Transient(e.to_string()))
            }
            Err(e) => {
                warn!("Permanent auditor failure for {}: {}", record.id, e);
                self.db
                    .analyses()
                    .update_status(record.id, AnalysisStatus::AnalysisFailed, Some(&e.to_string()))
                    .await?;
                Ok(ProcessOutcome::Permanent(e.to_string()))
            }
        }
    }

    async fn load_prepared_files(&self, analysis_id: uuid::Uuid) -> anyhow::Result<Vec<AiFile>> {
        let prefix = format!("analyses/{analysis_id}/prepared/");
        let keys = self.blobs.list(&prefix).await?;
        let mut files = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.blobs.get(&key).await? else {
                anyhow::bail!("blob {} listed but missing", key);
            };
            // key layout: analyses/{id}/prepared/{rank}_{part}_{name}
            let stored_name = key.rsplit('/').next().unwrap_or(&key);
            let name = stored_name
                .splitn(3, '_')
                .nth(2)
                .unwrap_or(stored_name)
                .to_string();
            let ext = crate::models::extension_of(&name).unwrap_or_default();
            files.push(AiFile {
                name,
                content_type: convert::content_type_for(&ext).to_string(),
                bytes,
            });
        }
        Ok(files)
    }

    /// Re-publish failed or timed-out records whose exponential backoff has
    /// elapsed. Returns how many were re-published.
    pub async fn retry(&self) -> anyhow::Result<usize> {
        let retry = &self.config.retry;
        let candidates = self.db.analyses().retry_candidates(retry.max_retries).await?;
        let now = Utc::now();
        let mut republished = 0usize;
        for record in candidates {
            let backoff_hours = retry
                .initial_backoff_hours
                .saturating_mul(1i64 << record.retry_count.min(16));
            if now - record.updated_at < Duration::hours(backoff_hours) {
                continue;
            }
            self.db.analyses().increment_retry(record.id).await?;
            self.publish(
                &record,
                &format!("tentativa {} de {}", record.retry_count + 1, retry.max_retries),
            )
            .await?;
            republished += 1;
        }
        if republished > 0 {
            info!("Re-published {} analyses for retry", republished);
        }
        Ok(republished)
    }

    /// Reclaim stalled records, marking them timed out so the retry path
    /// can pick them up. Covers both analyses stuck in progress and
    /// records abandoned mid-preparation in token calculation.
    pub async fn reclaim_stuck(&self) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.config.retry.stuck_after_hours);
        let stuck = self.db.analyses().stalled(cutoff).await?;
        let count = stuck.len();
        for record in stuck {
            warn!(
                "Analysis {} stalled as {} since {}, marking TIMEOUT",
                record.id,
                record.status.as_str(),
                record.updated_at
            );
            self.db
                .analyses()
                .update_status(record.id, AnalysisStatus::Timeout, Some("recuperado por inatividade"))
                .await?;
        }
        Ok(count)
    }

    /// Publish the pending backlog in priority order under the spending
    /// budget, with a reserved share for procurements nobody voted on.
    pub async fn run_ranked(&self, max_messages: Option<usize>) -> anyhow::Result<usize> {
        let budget = &self.config.budget;
        let mut remaining = budget.run_budget;
        let mut zero_vote_remaining = budget.run_budget * budget.zero_vote_share;
        let mut published = 0usize;

        for record in self.db.analyses().pending_ranked().await? {
            if let Some(max) = max_messages {
                if published >= max {
                    break;
                }
            }
            let snapshot = self
                .db
                .procurements()
                .get(&record.procurement_control_number, record.version_number)
                .await?;
            if let Some(procurement) = &snapshot {
                if !self.config.ranking.is_stable(procurement.last_update_date, Utc::now()) {
                    debug!(
                        "Procurement {} v{} still inside the stability window, holding back",
                        record.procurement_control_number, record.version_number
                    );
                    continue;
                }
            }
            let estimated = self
                .config
                .pricing
                .estimate_input_cost(&[(Modality::Text, record.tokens.input_tokens.max(1))])
                .max(MIN_ESTIMATED_COST);
            if estimated > remaining {
                debug!("Budget exhausted for {} (needs {:.4}, {:.4} left)", record.id, estimated, remaining);
                continue;
            }
            if record.votes_count == 0 && estimated > zero_vote_remaining {
                debug!("Zero-vote budget exhausted for {}", record.id);
                continue;
            }
            self.publish(&record, "publicado pela execução ranqueada").await?;
            remaining -= estimated;
            if record.votes_count == 0 {
                zero_vote_remaining -= estimated;
            }
            published += 1;
        }
        info!("Ranked run published {} analyses ({:.4} budget left)", published, remaining);
        Ok(published)
    }
}

/// Floor so free-looking estimates still consume budget.
const MIN_ESTIMATED_COST: f64 = 0.0001;

/// SHA-256 over the AI-ready bytes of the included files in selection
/// order: the identity of the evidence set actually analyzed.
pub fn evidence_fingerprint(candidates: &[FileCandidate]) -> String {
    let order = selection::ranked_indices(candidates);
    let mut hasher = Sha256::new();
    for idx in order {
        let candidate = &candidates[idx];
        if !candidate.included {
            continue;
        }
        for artifact in &candidate.artifacts {
            hasher.update(&artifact.bytes);
        }
    }
    hex::encode(hasher.finalize())
}

fn included_files(candidates: &[FileCandidate], order: &[usize]) -> Vec<AiFile> {
    let mut files = Vec::new();
    for &idx in order {
        let candidate = &candidates[idx];
        if !candidate.included {
            continue;
        }
        for artifact in &candidate.artifacts {
            files.push(AiFile {
                name: artifact.name.clone(),
                content_type: artifact.content_type.clone(),
                bytes: artifact.bytes.clone(),
            });
        }
    }
    files
}

fn tokens_by_modality(
    candidates: &[FileCandidate],
    order: &[usize],
    counted_total: u64,
) -> Vec<(Modality, u64)> {
    // distribute the counted total proportionally to the local estimates
    let mut estimates: Vec<(Modality, u64)> = Vec::new();
    let mut estimated_total = 0u64;
    for &idx in order {
        let candidate = &candidates[idx];
        if !candidate.included {
            continue;
        }
        for artifact in &candidate.artifacts {
            let tokens = selection::estimate_tokens(&artifact.content_type, artifact.bytes.len());
            estimates.push((Modality::from_content_type(&artifact.content_type), tokens));
            estimated_total += tokens;
        }
    }
    if estimated_total == 0 {
        return vec![(Modality::Text, counted_total)];
    }
    estimates
        .into_iter()
        .map(|(modality, tokens)| {
            (modality, (tokens as f64 / estimated_total as f64 * counted_total as f64) as u64)
        })
        .collect()
}

/// The auditor prompt: role, task, and the procurement's own metadata,
/// with pipeline warnings surfaced so degraded evidence is judged as such.
pub fn build_prompt(procurement: &Procurement, warnings: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Você é um auditor especializado em licitações públicas brasileiras. \
         Analise os documentos anexados desta contratação e identifique indícios \
         de irregularidade: direcionamento, restrição de competitividade, \
         sobrepreço, fraude ou documentação irregular.\n\n",
    );
    prompt.push_str(&format!(
        "Contratação: {}\nObjeto: {}\nÓrgão: {} (CNPJ {}, esfera {})\n",
        procurement.control_number,
        procurement.object_description,
        procurement.government_entity.name,
        procurement.government_entity.cnpj,
        procurement.government_entity.sphere,
    ));
    if let Some(value) = procurement.total_estimated_value {
        prompt.push_str(&format!("Valor total estimado: R$ {value:.2}\n"));
    }
    if let Some(closing) = procurement.proposal_closing_date {
        prompt.push_str(&format!("Encerramento das propostas: {}\n", closing.format("%d/%m/%Y")));
    }
    if !warnings.is_empty() {
        prompt.push_str("\nAvisos sobre os documentos (considere na análise):\n");
        for warning in warnings {
            prompt.push_str(&format!("- {warning}\n"));
        }
    }
    prompt.push_str(
        "\nResponda estritamente no esquema JSON solicitado, com risk_score de 0 a 10, \
         cada apontamento com categoria, gravidade, descrição, citação literal do \
         documento e o seu raciocínio de auditoria.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artifact, GovernmentEntity};

    fn included(path: &str, bytes: &[u8]) -> FileCandidate {
        let mut c = FileCandidate::new("d".into(), path.into(), 0, bytes.to_vec());
        c.artifacts.push(Artifact {
            name: path.to_string(),
            content_type: "text/plain".to_string(),
            bytes: bytes.to_vec(),
        });
        c.included = true;
        c
    }

    #[test]
    fn test_fingerprint_ignores_excluded_files() {
        let a = included("edital.txt", b"conteudo-a");
        let b = included("contrato.txt", b"conteudo-b");
        let mut excluded = included("outro.txt", b"conteudo-c");
        excluded.included = false;
        excluded.exclusion_reason = Some(ExclusionReason::UnsupportedExtension);

        let with_excluded = evidence_fingerprint(&[a.clone(), b.clone(), excluded]);
        let without = evidence_fingerprint(&[a, b]);
        assert_eq!(with_excluded, without);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let base = evidence_fingerprint(&[included("edital.txt", b"v1")]);
        let changed = evidence_fingerprint(&[included("edital.txt", b"v2")]);
        assert_ne!(base, changed);
    }

    #[test]
    fn test_prompt_carries_metadata_and_warnings() {
        let procurement = Procurement {
            control_number: "07854402000100-1-000123/2025".to_string(),
            object_description: "Aquisição de ambulâncias".to_string(),
            total_estimated_value: Some(1_500_000.0),
            proposal_opening_date: None,
            proposal_closing_date: None,
            last_update_date: Utc::now(),
            government_entity: GovernmentEntity {
                name: "Município X".to_string(),
                cnpj: "07854402000100".to_string(),
                sphere: "M".to_string(),
            },
            votes_count: 0,
            region: None,
        };
        let prompt = build_prompt(&procurement, &["Limite de arquivos excedido.".to_string()]);
        assert!(prompt.contains("Aquisição de ambulâncias"));
        assert!(prompt.contains("R$ 1500000.00"));
        assert!(prompt.contains("Limite de arquivos excedido."));
        assert!(prompt.contains("risk_score"));
    }

    #[test]
    fn test_tokens_by_modality_distributes_counted_total() {
        let text = included("a.txt", &[b'x'; 400]); // estimate 100
        let mut image = included("b.png", &[0u8; 10]);
        image.artifacts[0].content_type = "image/png".to_string(); // estimate 258
        let candidates = vec![text, image];
        let order = vec![0, 1];
        let split = tokens_by_modality(&candidates, &order, 716);
        let total: u64 = split.iter().map(|(_, t)| t).sum();
        assert!(total >= 714 && total <= 716);
        assert_eq!(split[0].0, Modality::Text);
        assert_eq!(split[1].0, Modality::Image);
        assert_eq!(split[0].1, 200);
        assert_eq!(split[1].1, 516);
    }
}
