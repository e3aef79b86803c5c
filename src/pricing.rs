//! Token cost model for auditor calls.
//!
//! Rates are per million tokens, with a higher tier once the prompt
//! crosses the long-context threshold. All monetary values are plain
//! `f64` in the account currency.

use serde::Deserialize;

use crate::models::{CostBreakdown, TokenUsage};

/// Input modality for pre-flight cost estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

impl Modality {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("audio/") {
            Self::Audio
        } else if content_type.starts_with("video/") {
            Self::Video
        } else {
            Self::Text
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModalityRates {
    #[serde(default = "default_text_rate")]
    pub text: f64,
    #[serde(default = "default_media_rate")]
    pub image: f64,
    #[serde(default = "default_media_rate")]
    pub audio: f64,
    #[serde(default = "default_media_rate")]
    pub video: f64,
}

fn default_text_rate() -> f64 {
    1.25
}
fn default_media_rate() -> f64 {
    1.25
}

impl Default for ModalityRates {
    fn default() -> Self {
        Self {
            text: default_text_rate(),
            image: default_media_rate(),
            audio: default_media_rate(),
            video: default_media_rate(),
        }
    }
}

impl ModalityRates {
    fn rate(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Text => self.text,
            Modality::Image => self.image,
            Modality::Audio => self.audio,
            Modality::Video => self.video,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Prompts above this many input tokens are billed at the long tier.
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: u64,
    #[serde(default)]
    pub input_per_million: ModalityRates,
    #[serde(default = "default_input_per_million_long")]
    pub input_per_million_long: ModalityRates,
    #[serde(default = "default_output_per_million")]
    pub output_per_million: f64,
    #[serde(default = "default_output_per_million_long")]
    pub output_per_million_long: f64,
    #[serde(default = "default_search_per_thousand")]
    pub search_per_thousand: f64,
}

fn default_long_context_threshold() -> u64 {
    200_000
}
fn default_input_per_million_long() -> ModalityRates {
    ModalityRates { text: 2.50, image: 2.50, audio: 2.50, video: 2.50 }
}
fn default_output_per_million() -> f64 {
    10.0
}
fn default_output_per_million_long() -> f64 {
    15.0
}
fn default_search_per_thousand() -> f64 {
    35.0
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            long_context_threshold: default_long_context_threshold(),
            input_per_million: ModalityRates::default(),
            input_per_million_long: default_input_per_million_long(),
            output_per_million: default_output_per_million(),
            output_per_million_long: default_output_per_million_long(),
            search_per_thousand: default_search_per_thousand(),
        }
    }
}

impl PricingConfig {
    fn is_long_context(&self, input_tokens: u64) -> bool {
        input_tokens > self.long_context_threshold
    }

    /// Cost of a completed call from its reported usage. Input is billed
    /// at the text rate since the API reports a single prompt count;
    /// thinking tokens bill at the output rate.
    pub fn price(&self, usage: &TokenUsage) -> CostBreakdown {
        let long = self.is_long_context(usage.input_tokens);
        let input_rate = if long {
            self.input_per_million_long.text
        } else {
            self.input_per_million.text
        };
        let output_rate = if long {
            self.output_per_million_long
        } else {
            self.output_per_million
        };

        let input_cost = usage.input_tokens as f64 / 1e6 * input_rate;
        let output_cost = usage.output_tokens as f64 / 1e6 * output_rate;
        let thinking_cost = usage.thinking_tokens as f64 / 1e6 * output_rate;
        let search_cost = usage.search_queries as f64 / 1000.0 * self.search_per_thousand;
        CostBreakdown {
            input_cost,
            output_cost,
            thinking_cost,
            search_cost,
            total_cost: input_cost + output_cost + thinking_cost + search_cost,
        }
    }

    /// Pre-flight input-cost estimate from per-modality token counts.
    pub fn estimate_input_cost(&self, tokens_by_modality: &[(Modality, u64)]) -> f64 {
        let total: u64 = tokens_by_modality.iter().map(|(_, t)| t).sum();
        let rates = if self.is_long_context(total) {
            &self.input_per_million_long
        } else {
            &self.input_per_million
        };
        tokens_by_modality
            .iter()
            .map(|(modality, tokens)| *tokens as f64 / 1e6 * rates.rate(*modality))
            .sum()
    }
}
