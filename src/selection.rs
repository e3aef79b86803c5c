//! Budget-constrained evidence selection.
//!
//! Ranks converted candidates by a fixed list of high-signal terms and
//! walks them greedily against the file-count, total-size, and token
//! budgets. Every limit hit is recorded on the candidate it excluded;
//! a smaller file later in the ranking may still fit.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::models::{ExclusionReason, FileCandidate, PipelineWarning, Prioritization};

/// Document terms that usually carry the substance of a procurement,
/// in descending signal order.
pub const PRIORITY_KEYWORDS: &[&str] = &[
    "edital",
    "termo de referencia",
    "projeto basico",
    "planilha",
    "orcamento",
    "custos",
    "contrato",
    "ata de registro",
];

/// Editor lock artifacts and OS droppings that never hold real content.
const LOCK_FILE_PREFIXES: &[&str] = &["~$", ".~lock."];
const LOCK_FILE_NAMES: &[&str] = &["thumbs.db", ".ds_store"];

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionLimits {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_total_size_mb")]
    pub max_total_size_mb: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

fn default_max_files() -> usize {
    20
}
fn default_max_total_size_mb() -> f64 {
    20.0
}
fn default_max_tokens() -> u64 {
    1_000_000
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_total_size_mb: default_max_total_size_mb(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Aggregate outcome of a selection pass.
#[derive(Debug, Default)]
pub struct SelectionSummary {
    pub included: usize,
    pub total_tokens: u64,
    pub warnings: Vec<PipelineWarning>,
}

/// Rank and select candidates in place.
///
/// `titles` maps a source document's synthetic id to its feed title, so a
/// keyword present only in the metadata still promotes the file.
pub fn select(
    candidates: &mut [FileCandidate],
    titles: &HashMap<String, String>,
    limits: &SelectionLimits,
) -> SelectionSummary {
    for candidate in candidates.iter_mut() {
        if candidate.exclusion_reason.is_some() {
            continue;
        }
        if is_lock_file(candidate.file_name()) {
            candidate.exclusion_reason = Some(ExclusionReason::LockFile);
            continue;
        }
        candidate.prioritization = prioritize(candidate, titles);
        candidate.token_estimate = candidate
            .artifacts
            .iter()
            .map(|a| estimate_tokens(&a.content_type, a.bytes.len()))
            .sum();
    }

    let order = ranked_indices(candidates);

    let size_limit_bytes = (limits.max_total_size_mb * 1024.0 * 1024.0) as u64;
    let mut summary = SelectionSummary::default();
    let mut total_bytes: u64 = 0;
    let mut over_files: Vec<String> = Vec::new();
    let mut over_size: Vec<String> = Vec::new();
    let mut over_tokens: Vec<String> = Vec::new();

    for idx in order {
        let candidate = &mut candidates[idx];
        if candidate.exclusion_reason.is_some() {
            continue;
        }
        if summary.included >= limits.max_files {
            candidate.exclusion_reason = Some(ExclusionReason::FileLimitExceeded {
                max_files: limits.max_files,
            });
            over_files.push(candidate.file_name().to_string());
            continue;
        }
        let size = candidate.ai_size_bytes();
        if total_bytes + size > size_limit_bytes {
            candidate.exclusion_reason = Some(ExclusionReason::TotalSizeLimitExceeded {
                limit_mb: limits.max_total_size_mb,
            });
            over_size.push(candidate.file_name().to_string());
            continue;
        }
        if summary.total_tokens + candidate.token_estimate > limits.max_tokens {
            candidate.exclusion_reason = Some(ExclusionReason::TokenLimitExceeded {
                limit: limits.max_tokens,
            });
            over_tokens.push(candidate.file_name().to_string());
            continue;
        }
        candidate.included = true;
        total_bytes += size;
        summary.total_tokens += candidate.token_estimate;
        summary.included += 1;
        debug!(
            "Selected '{}' ({} tokens, {})",
            candidate.original_path,
            candidate.token_estimate,
            candidate.prioritization.render()
        );
    }

    if !over_files.is_empty() {
        summary.warnings.push(PipelineWarning::FileLimitExceeded {
            max_files: limits.max_files,
            ignored_files: over_files,
        });
    }
    if !over_size.is_empty() {
        summary.warnings.push(PipelineWarning::TotalSizeLimitExceeded {
            limit_mb: limits.max_total_size_mb,
            ignored_files: over_size,
        });
    }
    if !over_tokens.is_empty() {
        summary.warnings.push(PipelineWarning::TokenLimitExceeded {
            limit: limits.max_tokens,
            ignored_files: over_tokens,
        });
    }
    summary
}

/// Candidate indices in selection order. The sort is stable, so equal
/// ranks keep discovery order.
pub fn ranked_indices(candidates: &[FileCandidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| rank_of(&candidates[i].prioritization));
    order
}

fn prioritize(candidate: &FileCandidate, titles: &HashMap<String, String>) -> Prioritization {
    let path = normalize(&candidate.original_path);
    for keyword in PRIORITY_KEYWORDS {
        if path.contains(keyword) {
            return Prioritization::ByKeyword {
                keyword: (*keyword).to_string(),
            };
        }
    }
    if let Some(title) = titles.get(&candidate.synthetic_id) {
        let title = normalize(title);
        for keyword in PRIORITY_KEYWORDS {
            if title.contains(keyword) {
                return Prioritization::ByMetadata {
                    keyword: (*keyword).to_string(),
                };
            }
        }
    }
    Prioritization::None
}

fn rank_of(prioritization: &Prioritization) -> usize {
    let keyword = match prioritization {
        Prioritization::ByKeyword { keyword } | Prioritization::ByMetadata { keyword } => keyword,
        Prioritization::None => return PRIORITY_KEYWORDS.len(),
    };
    PRIORITY_KEYWORDS
        .iter()
        .position(|k| k == keyword)
        .unwrap_or(PRIORITY_KEYWORDS.len())
}

pub fn is_lock_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    LOCK_FILE_PREFIXES.iter().any(|p| lower.starts_with(p))
        || LOCK_FILE_NAMES.contains(&lower.as_str())
}

/// Lowercase and strip the accents found in pt-br text, so `Orçamento`
/// matches `orcamento`.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c.to_lowercase().next().unwrap_or(c) {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Pre-flight token estimate per artifact, by modality. Deliberately
/// conservative; the auditor's own count is used for final costing.
pub fn estimate_tokens(content_type: &str, byte_len: usize) -> u64 {
    if content_type.starts_with("image/") {
        // flat per-image cost in the Gemini token model
        258
    } else if content_type.starts_with("audio/") || content_type.starts_with("video/") {
        (byte_len as u64) / 32
    } else {
        (byte_len as u64) / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Artifact;

    fn candidate_with_text(path: &str, bytes: usize) -> FileCandidate {
        let mut c = FileCandidate::new("doc-1".into(), path.into(), 0, vec![b'x'; bytes]);
        c.artifacts.push(Artifact {
            name: path.to_string(),
            content_type: "text/plain".to_string(),
            bytes: vec![b'x'; bytes],
        });
        c
    }

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize("Orçamento Básico"), "orcamento basico");
        assert_eq!(normalize("EDITAL"), "edital");
    }

    #[test]
    fn test_lock_files_are_detected() {
        assert!(is_lock_file("~$edital.docx"));
        assert!(is_lock_file(".~lock.planilha.ods#"));
        assert!(is_lock_file("Thumbs.db"));
        assert!(!is_lock_file("edital.pdf"));
    }

    #[test]
    fn test_keyword_in_path_outranks_no_match() {
        let mut candidates = vec![
            candidate_with_text("zzz/outro_documento.txt", 100),
            candidate_with_text("anexos/Edital_01.txt", 100),
        ];
        let summary = select(&mut candidates, &HashMap::new(), &SelectionLimits::default());
        assert_eq!(summary.included, 2);
        assert_eq!(
            candidates[1].prioritization,
            Prioritization::ByKeyword { keyword: "edital".to_string() }
        );
        assert_eq!(candidates[0].prioritization, Prioritization::None);
    }

    #[test]
    fn test_metadata_title_promotes_file() {
        let mut candidates = vec![candidate_with_text("anexo_01.txt", 100)];
        let mut titles = HashMap::new();
        titles.insert("doc-1".to_string(), "Edital de Pregão".to_string());
        select(&mut candidates, &titles, &SelectionLimits::default());
        assert_eq!(
            candidates[0].prioritization,
            Prioritization::ByMetadata { keyword: "edital".to_string() }
        );
    }

    #[test]
    fn test_file_limit_excludes_lowest_ranked() {
        let mut candidates = vec![
            candidate_with_text("edital.txt", 100),
            candidate_with_text("contrato.txt", 100),
            candidate_with_text("sem_relevancia.txt", 100),
        ];
        let limits = SelectionLimits { max_files: 2, ..Default::default() };
        let summary = select(&mut candidates, &HashMap::new(), &limits);
        assert_eq!(summary.included, 2);
        assert!(candidates[0].included);
        assert!(candidates[1].included);
        assert_eq!(
            candidates[2].exclusion_reason,
            Some(ExclusionReason::FileLimitExceeded { max_files: 2 })
        );
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn test_smaller_file_still_fits_after_token_exclusion() {
        let mut candidates = vec![
            candidate_with_text("edital.txt", 400),       // 100 tokens
            candidate_with_text("contrato_grande.txt", 2000), // 500 tokens, over
            candidate_with_text("ata de registro.txt", 200), // 50 tokens, fits
        ];
        let limits = SelectionLimits { max_tokens: 160, ..Default::default() };
        let summary = select(&mut candidates, &HashMap::new(), &limits);
        assert!(candidates[0].included);
        assert!(!candidates[1].included);
        assert!(candidates[2].included);
        assert_eq!(summary.total_tokens, 150);
        assert_eq!(
            candidates[1].exclusion_reason,
            Some(ExclusionReason::TokenLimitExceeded { limit: 160 })
        );
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let mut candidates = vec![
            candidate_with_text("edital_a.txt", 100),
            candidate_with_text("edital_b.txt", 100),
        ];
        let limits = SelectionLimits { max_files: 1, ..Default::default() };
        select(&mut candidates, &HashMap::new(), &limits);
        assert!(candidates[0].included);
        assert!(!candidates[1].included);
    }

    #[test]
    fn test_image_tokens_are_flat() {
        assert_eq!(estimate_tokens("image/png", 5_000_000), 258);
        assert_eq!(estimate_tokens("text/plain", 400), 100);
        assert_eq!(estimate_tokens("video/mp4", 3200), 100);
    }
}
