//! Procurement snapshots and their content-addressed versions.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::{from_ts, from_ts_opt, parse_uuid, to_ts, RepositoryError};
use crate::models::{GovernmentEntity, Procurement, ProcurementVersion};

pub struct ProcurementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProcurementRepository {
    pub(super) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Latest stored version for a control number, if any.
    pub async fn latest_version(
        &self,
        control_number: &str,
    ) -> Result<Option<ProcurementVersion>, RepositoryError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, control_number, version_number, content_hash, created_at
             FROM procurements WHERE control_number = ?1
             ORDER BY version_number DESC LIMIT 1",
            params![control_number],
            version_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Whether any version of this procurement already stores this hash.
    pub async fn exists_with_hash(
        &self,
        control_number: &str,
        content_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM procurements
             WHERE control_number = ?1 AND content_hash = ?2",
            params![control_number, content_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a new immutable version snapshot.
    pub async fn insert_version(
        &self,
        procurement: &Procurement,
        version_number: i64,
        content_hash: &str,
        raw_payload: &serde_json::Value,
    ) -> Result<ProcurementVersion, RepositoryError> {
        let version = ProcurementVersion {
            id: uuid::Uuid::new_v4(),
            control_number: procurement.control_number.clone(),
            version_number,
            content_hash: content_hash.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO procurements (
                id, control_number, version_number, content_hash,
                object_description, total_estimated_value,
                proposal_opening_date, proposal_closing_date, last_update_date,
                entity_name, entity_cnpj, entity_sphere, region, votes_count,
                raw_payload, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                version.id.to_string(),
                version.control_number,
                version.version_number,
                version.content_hash,
                procurement.object_description,
                procurement.total_estimated_value,
                procurement.proposal_opening_date.map(to_ts),
                procurement.proposal_closing_date.map(to_ts),
                to_ts(procurement.last_update_date),
                procurement.government_entity.name,
                procurement.government_entity.cnpj,
                procurement.government_entity.sphere,
                procurement.region,
                procurement.votes_count,
                serde_json::to_string(raw_payload)?,
                to_ts(version.created_at),
            ],
        )?;
        Ok(version)
    }

    /// Load one version's procurement snapshot.
    pub async fn get(
        &self,
        control_number: &str,
        version_number: i64,
    ) -> Result<Option<Procurement>, RepositoryError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT control_number, object_description, total_estimated_value,
                    proposal_opening_date, proposal_closing_date, last_update_date,
                    entity_name, entity_cnpj, entity_sphere, region, votes_count
             FROM procurements
             WHERE control_number = ?1 AND version_number = ?2",
            params![control_number, version_number],
            procurement_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Result<ProcurementVersion, RepositoryError>> {
    let id: String = row.get(0)?;
    let control_number: String = row.get(1)?;
    let version_number: i64 = row.get(2)?;
    let content_hash: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok((|| {
        Ok(ProcurementVersion {
            id: parse_uuid(&id)?,
            control_number,
            version_number,
            content_hash,
            created_at: from_ts(&created_at)?,
        })
    })())
}

fn procurement_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Procurement, RepositoryError>> {
    let control_number: String = row.get(0)?;
    let object_description: String = row.get(1)?;
    let total_estimated_value: Option<f64> = row.get(2)?;
    let opening: Option<String> = row.get(3)?;
    let closing: Option<String> = row.get(4)?;
    let last_update: String = row.get(5)?;
    let entity_name: String = row.get(6)?;
    let entity_cnpj: String = row.get(7)?;
    let entity_sphere: String = row.get(8)?;
    let region: Option<String> = row.get(9)?;
    let votes_count: i64 = row.get(10)?;
    Ok((|| {
        Ok(Procurement {
            control_number,
            object_description,
            total_estimated_value,
            proposal_opening_date: from_ts_opt(opening)?,
            proposal_closing_date: from_ts_opt(closing)?,
            last_update_date: from_ts(&last_update)?,
            government_entity: GovernmentEntity {
                name: entity_name,
                cnpj: entity_cnpj,
                sphere: entity_sphere,
            },
            votes_count,
            region,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;

    fn sample(control_number: &str) -> Procurement {
        Procurement {
            control_number: control_number.to_string(),
            object_description: "Aquisição de equipamentos".to_string(),
            total_estimated_value: Some(250_000.0),
            proposal_opening_date: None,
            proposal_closing_date: None,
            last_update_date: Utc::now(),
            government_entity: GovernmentEntity {
                name: "Prefeitura".to_string(),
                cnpj: "00000000000191".to_string(),
                sphere: "M".to_string(),
            },
            votes_count: 0,
            region: Some("SP".to_string()),
        }
    }

    async fn database() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_insert_and_latest_version() {
        let db = database().await;
        let repo = db.procurements();
        let raw = serde_json::json!({"numeroControlePNCP": "c-1"});

        assert!(repo.latest_version("c-1").await.unwrap().is_none());
        repo.insert_version(&sample("c-1"), 1, "hash-a", &raw).await.unwrap();
        repo.insert_version(&sample("c-1"), 2, "hash-b", &raw).await.unwrap();

        let latest = repo.latest_version("c-1").await.unwrap().unwrap();
        assert_eq!(latest.version_number, 2);
        assert_eq!(latest.content_hash, "hash-b");
    }

    #[tokio::test]
    async fn test_exists_with_hash() {
        let db = database().await;
        let repo = db.procurements();
        let raw = serde_json::json!({});
        repo.insert_version(&sample("c-1"), 1, "hash-a", &raw).await.unwrap();

        assert!(repo.exists_with_hash("c-1", "hash-a").await.unwrap());
        assert!(!repo.exists_with_hash("c-1", "hash-b").await.unwrap());
        assert!(!repo.exists_with_hash("c-2", "hash-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_version_number_is_rejected() {
        let db = database().await;
        let repo = db.procurements();
        let raw = serde_json::json!({});
        repo.insert_version(&sample("c-1"), 1, "hash-a", &raw).await.unwrap();
        assert!(repo.insert_version(&sample("c-1"), 1, "hash-b", &raw).await.is_err());
    }

    #[tokio::test]
    async fn test_get_roundtrips_snapshot() {
        let db = database().await;
        let repo = db.procurements();
        let raw = serde_json::json!({});
        repo.insert_version(&sample("c-1"), 1, "hash-a", &raw).await.unwrap();

        let loaded = repo.get("c-1", 1).await.unwrap().unwrap();
        assert_eq!(loaded.object_description, "Aquisição de equipamentos");
        assert_eq!(loaded.total_estimated_value, Some(250_000.0));
        assert_eq!(loaded.region.as_deref(), Some("SP"));
        assert!(repo.get("c-1", 9).await.unwrap().is_none());
    }
}
