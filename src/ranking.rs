//! Priority scoring for the pending-analysis backlog.
//!
//! The score combines evidence quality, estimated public impact, how close
//! the proposal window is, the government sphere, community votes, and the
//! estimated analysis cost. Each component is monotonic in its inputs.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::models::{ExclusionReason, FileCandidate, Procurement};

/// Terms in the object description that historically correlate with
/// irregular procurements.
pub const HIGH_IMPACT_KEYWORDS: &[&str] = &[
    "emergencial",
    "urgencia",
    "dispensa de licitacao",
    "inexigibilidade",
    "aditivo",
    "prorrogacao",
];

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_weight_impact")]
    pub weight_impact: f64,
    #[serde(default = "default_weight_quality")]
    pub weight_quality: f64,
    #[serde(default = "default_weight_temporal")]
    pub weight_temporal: f64,
    #[serde(default = "default_weight_votes")]
    pub weight_votes: f64,
    #[serde(default = "default_weight_cost")]
    pub weight_cost: f64,
    #[serde(default = "default_federal_bonus")]
    pub federal_bonus: f64,
    /// A procurement untouched for this long is considered stable enough
    /// to analyze without racing further amendments.
    #[serde(default = "default_stability_hours")]
    pub stability_hours: i64,
}

fn default_weight_impact() -> f64 {
    1.0
}
fn default_weight_quality() -> f64 {
    0.5
}
fn default_weight_temporal() -> f64 {
    1.0
}
fn default_weight_votes() -> f64 {
    1.0
}
fn default_weight_cost() -> f64 {
    1.0
}
fn default_federal_bonus() -> f64 {
    20.0
}
fn default_stability_hours() -> i64 {
    48
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weight_impact: default_weight_impact(),
            weight_quality: default_weight_quality(),
            weight_temporal: default_weight_temporal(),
            weight_votes: default_weight_votes(),
            weight_cost: default_weight_cost(),
            federal_bonus: default_federal_bonus(),
            stability_hours: default_stability_hours(),
        }
    }
}

impl RankingConfig {
    /// Composite priority score, rounded for storage.
    pub fn priority(
        &self,
        procurement: &Procurement,
        candidates: &[FileCandidate],
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> i64 {
        let impact = impact_score(procurement);
        let quality = quality_score(candidates);
        let temporal = temporal_score(procurement.proposal_closing_date, now);
        let votes_factor = 1.0 + self.weight_votes * (1.0 + procurement.votes_count as f64).ln();
        let federal = if procurement.government_entity.is_federal() {
            self.federal_bonus
        } else {
            0.0
        };

        let score = self.weight_impact * impact * votes_factor
            + self.weight_quality * quality
            + self.weight_temporal * temporal
            + federal
            - self.weight_cost * estimated_cost;
        score.round() as i64
    }

    /// A version still being amended should wait before analysis.
    pub fn is_stable(&self, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_update >= Duration::hours(self.stability_hours)
    }
}

/// Evidence quality: 100 minus penalties per excluded file and for a low
/// ratio of usable files, floored at zero.
pub fn quality_score(candidates: &[FileCandidate]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 100.0;
    for candidate in candidates {
        score -= match candidate.exclusion_reason {
            Some(ExclusionReason::ExtractionFailed) => 20.0,
            Some(ExclusionReason::ConversionFailed) => 15.0,
            Some(ExclusionReason::UnsupportedExtension) => 10.0,
            Some(ExclusionReason::LockFile)
            | Some(ExclusionReason::TokenLimitExceeded { .. })
            | Some(ExclusionReason::FileLimitExceeded { .. })
            | Some(ExclusionReason::TotalSizeLimitExceeded { .. }) => 5.0,
            None => 0.0,
        };
    }
    let usable = candidates.iter().filter(|c| c.included).count() as f64;
    let ratio = usable / candidates.len() as f64;
    if ratio < 0.5 {
        score -= 20.0;
    } else if ratio < 0.8 {
        score -= 10.0;
    }
    score.max(0.0)
}

/// Public impact from estimated value thresholds and high-impact terms in
/// the object description, capped at 100.
pub fn impact_score(procurement: &Procurement) -> f64 {
    let mut score: f64 = 0.0;
    if let Some(value) = procurement.total_estimated_value {
        if value > 1_000_000.0 {
            score += 50.0;
        } else if value > 100_000.0 {
            score += 25.0;
        }
    }
    let description = crate::selection::normalize(&procurement.object_description);
    for keyword in HIGH_IMPACT_KEYWORDS {
        if description.contains(keyword) {
            score += 20.0;
        }
    }
    score.min(100.0)
}

/// Best window is 5 to 15 days before the proposals close: enough time to
/// act on the findings, not so early the record is still shifting.
pub fn temporal_score(closing_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(closing) = closing_date else {
        return 0.0;
    };
    let days = (closing - now).num_days();
    if (5..=15).contains(&days) {
        30.0
    } else if (1..5).contains(&days) {
        15.0
    } else {
        0.0
    }
}
