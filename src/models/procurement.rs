//! Procurement models with content-addressable versioning.
//!
//! A procurement is an immutable snapshot per (control number, version);
//! a new version is created whenever the source feed reports content whose
//! hash differs from the latest stored version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The government body that published a procurement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernmentEntity {
    pub name: String,
    pub cnpj: String,
    /// Administrative sphere: "F" (federal), "E" (state), "M" (municipal).
    pub sphere: String,
}

impl GovernmentEntity {
    pub fn is_federal(&self) -> bool {
        self.sphere == "F"
    }
}

/// A procurement record as reported by the source feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procurement {
    /// Unique control number assigned by the source feed.
    pub control_number: String,
    /// What is being purchased.
    pub object_description: String,
    /// Total estimated contract value, when disclosed.
    pub total_estimated_value: Option<f64>,
    pub proposal_opening_date: Option<DateTime<Utc>>,
    pub proposal_closing_date: Option<DateTime<Utc>>,
    /// When the feed last reported a change to this procurement.
    pub last_update_date: DateTime<Utc>,
    pub government_entity: GovernmentEntity,
    /// Public interest signal collected by the dashboard.
    #[serde(default)]
    pub votes_count: i64,
    /// Region filter value (state/UF), when present.
    pub region: Option<String>,
}

/// One immutable stored snapshot of a procurement.
#[derive(Debug, Clone)]
pub struct ProcurementVersion {
    pub id: uuid::Uuid,
    pub control_number: String,
    pub version_number: i64,
    /// SHA-256 over the raw feed payload plus all attached file bytes,
    /// used for version-change detection.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl ProcurementVersion {
    /// Compute the version-change hash over the canonical raw payload and
    /// the attached file bytes sorted by path, so the result does not
    /// depend on download order.
    pub fn compute_hash(raw_payload: &serde_json::Value, files: &[(String, Vec<u8>)]) -> String {
        let mut sorted: Vec<&(String, Vec<u8>)> = files.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        hasher.update(canonical_json(raw_payload).as_bytes());
        for (_, content) in sorted {
            hasher.update(content);
        }
        hex::encode(hasher.finalize())
    }
}

/// Serialize JSON with object keys sorted, for stable hashing.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
