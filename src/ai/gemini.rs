//! Gemini-backed auditor implementation.
//!
//! Talks to the Gemini REST API: `countTokens` for pre-flight budgeting
//! and `generateContent` with a strict response schema for the audit
//! itself. Files are sent as inline base64 parts.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{AiFile, Auditor, AuditorError, Verdict};
use crate::models::TokenUsage;

/// Configuration for the Gemini auditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// API key; normally injected from the environment.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_max_output_tokens() -> u32 {
    65535
}
fn default_thinking_budget() -> u32 {
    32768
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            thinking_budget: default_thinking_budget(),
        }
    }
}

/// Auditor backed by the Gemini REST API.
pub struct GeminiAuditor {
    config: GeminiConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    thoughts_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: u64,
}

impl GeminiAuditor {
    pub fn new(config: GeminiConfig) -> Result<Self, AuditorError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuditorError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn contents(prompt: &str, files: &[AiFile]) -> serde_json::Value {
        let mut parts = vec![json!({ "text": prompt })];
        for file in files {
            parts.push(json!({
                "inline_data": {
                    "mime_type": file.content_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&file.bytes),
                }
            }));
        }
        json!([{ "role": "user", "parts": parts }])
    }

    /// Response schema mirroring [`Verdict`], enforced server-side.
    fn response_schema() -> serde_json::Value {
        json!({
            "type": "OBJECT",
            "required": [
                "risk_score", "risk_score_rationale",
                "procurement_summary", "analysis_summary", "red_flags"
            ],
            "properties": {
                "risk_score": { "type": "INTEGER", "minimum": 0, "maximum": 10 },
                "risk_score_rationale": { "type": "STRING" },
                "procurement_summary": { "type": "STRING" },
                "analysis_summary": { "type": "STRING" },
                "red_flags": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "required": [
                            "category", "severity", "description",
                            "evidence_quote", "auditor_reasoning"
                        ],
                        "properties": {
                            "category": {
                                "type": "STRING",
                                "enum": [
                                    "DIRECIONAMENTO", "RESTRICAO_COMPETITIVIDADE",
                                    "SOBREPRECO", "FRAUDE",
                                    "DOCUMENTACAO_IRREGULAR", "OUTROS"
                                ]
                            },
                            "severity": {
                                "type": "STRING",
                                "enum": ["LEVE", "MODERADA", "GRAVE"]
                            },
                            "description": { "type": "STRING" },
                            "evidence_quote": { "type": "STRING" },
                            "auditor_reasoning": { "type": "STRING" }
                        }
                    }
                },
                "seo_keywords": { "type": "ARRAY", "items": { "type": "STRING" } }
            }
        })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response, AuditorError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuditorError::Timeout(e.to_string())
                } else {
                    AuditorError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuditorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Auditor for GeminiAuditor {
    async fn count_tokens(&self, prompt: &str, files: &[AiFile]) -> Result<u64, AuditorError> {
        let url = format!(
            "{}/models/{}:countTokens",
            self.config.endpoint, self.config.model
        );
        let body = json!({ "contents": Self::contents(prompt, files) });

        let resp = self.post(&url, &body).await?;
        let counted: CountTokensResponse = resp
            .json()
            .await
            .map_err(|e| AuditorError::Parse(e.to_string()))?;
        Ok(counted.total_tokens)
    }

    async fn analyze(
        &self,
        prompt: &str,
        files: &[AiFile],
        max_output_tokens: Option<u32>,
    ) -> Result<(Verdict, TokenUsage), AuditorError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint, self.config.model
        );
        let body = json!({
            "contents": Self::contents(prompt, files),
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema(),
                "maxOutputTokens": max_output_tokens.unwrap_or(self.config.max_output_tokens),
                "thinkingConfig": { "thinkingBudget": self.config.thinking_budget },
            },
        });

        debug!("Submitting {} file(s) to {}", files.len(), self.config.model);
        let resp = self.post(&url, &body).await?;
        let generated: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| AuditorError::Parse(e.to_string()))?;

        let text = generated
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| AuditorError::Parse("empty candidate response".to_string()))?;

        let verdict: Verdict =
            serde_json::from_str(text).map_err(|e| AuditorError::Parse(e.to_string()))?;

        let usage = generated.usage_metadata.unwrap_or(UsageMetadata {
            prompt_token_count: None,
            candidates_token_count: None,
            thoughts_token_count: None,
        });
        let tokens = TokenUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            thinking_tokens: usage.thoughts_token_count.unwrap_or(0),
            search_queries: 0,
        };

        Ok((verdict, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contents_include_inline_files() {
        let files = vec![AiFile {
            name: "edital.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: vec![1, 2, 3],
        }];
        let contents = GeminiAuditor::contents("analise", &files);
        let parts = &contents[0]["parts"];
        assert_eq!(parts[0]["text"], "analise");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "application/pdf");
    }

    #[test]
    fn test_response_schema_limits_risk_score() {
        let schema = GeminiAuditor::response_schema();
        assert_eq!(schema["properties"]["risk_score"]["maximum"], 10);
    }

    #[test]
    fn test_usage_metadata_parses() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "{}"}]}}],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 30,
                "thoughtsTokenCount": 8
            }
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let usage = parsed.usage_metadata.unwrap();
        assert_eq!(usage.prompt_token_count, Some(120));
        assert_eq!(usage.thoughts_token_count, Some(8));
    }
}
