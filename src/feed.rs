//! Client for the public procurement source feed.
//!
//! The feed is a paginated JSON API keyed by publication date, with a
//! per-procurement attachment listing and direct file downloads. Raw
//! payloads are kept alongside the parsed records because the version
//! content hash covers them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::models::{GovernmentEntity, Procurement};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://pncp.gov.br/api/consulta/v1".to_string()
}
fn default_page_size() -> u32 {
    50
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed control number: {0}")]
    ControlNumber(String),
    #[error("invalid feed base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// One feed record: the parsed procurement plus its raw payload.
#[derive(Debug, Clone)]
pub struct FeedProcurement {
    pub procurement: Procurement,
    pub raw: serde_json::Value,
}

/// One attachment advertised for a procurement.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub sequence: i64,
    pub title: String,
    pub document_type: Option<String>,
    pub url: String,
    pub publication_date: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

pub struct FeedClient {
    client: reqwest::Client,
    config: FeedConfig,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(rename = "totalPaginas", default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProcurement {
    #[serde(rename = "numeroControlePNCP")]
    control_number: String,
    objeto_compra: String,
    #[serde(default)]
    valor_total_estimado: Option<f64>,
    #[serde(default)]
    data_abertura_proposta: Option<String>,
    #[serde(default)]
    data_encerramento_proposta: Option<String>,
    data_atualizacao: String,
    orgao_entidade: WireEntity,
    #[serde(default)]
    unidade_orgao: Option<WireUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntity {
    razao_social: String,
    cnpj: String,
    #[serde(default)]
    esfera_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUnit {
    #[serde(default)]
    uf_sigla: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocument {
    #[serde(default)]
    sequencial_documento: Option<i64>,
    #[serde(default)]
    titulo: Option<String>,
    #[serde(default)]
    tipo_documento_nome: Option<String>,
    url: String,
    #[serde(default)]
    data_publicacao_pncp: Option<String>,
}

/// Source of procurement records and their attachments. The production
/// implementation talks to the national feed over HTTP; tests substitute
/// a canned source.
#[async_trait::async_trait]
pub trait ProcurementFeed: Send + Sync {
    /// Fetch every procurement updated on `date`.
    async fn procurements_for_date(
        &self,
        date: NaiveDate,
        region: Option<&str>,
    ) -> Result<Vec<FeedProcurement>, FeedError>;

    /// List the attachments advertised for one procurement.
    async fn documents_for(&self, control_number: &str) -> Result<Vec<FeedDocument>, FeedError>;

    /// Download one attachment, returning its bytes and the server-supplied
    /// file name when present.
    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FeedError>;
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        url::Url::parse(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ProcurementFeed for FeedClient {
    /// Walks all pages of the daily update endpoint.
    async fn procurements_for_date(
        &self,
        date: NaiveDate,
        region: Option<&str>,
    ) -> Result<Vec<FeedProcurement>, FeedError> {
        let date_param = date.format("%Y%m%d").to_string();
        let mut results = Vec::new();
        let mut page = 1u32;
        loop {
            let mut request = self
                .client
                .get(format!("{}/contratacoes/atualizacao", self.config.base_url))
                .query(&[
                    ("dataInicial", date_param.as_str()),
                    ("dataFinal", date_param.as_str()),
                    ("pagina", &page.to_string()),
                    ("tamanhoPagina", &self.config.page_size.to_string()),
                ]);
            if let Some(region) = region {
                request = request.query(&[("uf", region)]);
            }

            let response = request.send().await?;
            if response.status() == reqwest::StatusCode::NO_CONTENT {
                break;
            }
            if !response.status().is_success() {
                return Err(FeedError::Status(response.status()));
            }
            let envelope: PageEnvelope = response.json().await?;
            debug!("Feed page {}/{}: {} records", page, envelope.total_pages, envelope.data.len());

            for raw in envelope.data {
                match serde_json::from_value::<WireProcurement>(raw.clone()) {
                    Ok(wire) => results.push(FeedProcurement {
                        procurement: wire.into_model(),
                        raw,
                    }),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable feed record: {}", e);
                    }
                }
            }

            if page >= envelope.total_pages {
                break;
            }
            page += 1;
        }
        info!("Feed returned {} procurements for {}", results.len(), date);
        Ok(results)
    }

    async fn documents_for(&self, control_number: &str) -> Result<Vec<FeedDocument>, FeedError> {
        let (cnpj, year, sequence) = parse_control_number(control_number)?;
        let url = format!(
            "{}/orgaos/{}/compras/{}/{}/arquivos",
            self.config.base_url, cnpj, year, sequence
        );
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status()));
        }
        let raw_docs: Vec<serde_json::Value> = response.json().await?;
        let mut documents = Vec::new();
        for (idx, raw) in raw_docs.into_iter().enumerate() {
            match serde_json::from_value::<WireDocument>(raw.clone()) {
                Ok(wire) => documents.push(FeedDocument {
                    sequence: wire.sequencial_documento.unwrap_or(idx as i64 + 1),
                    title: wire.titulo.unwrap_or_else(|| format!("documento_{}", idx + 1)),
                    document_type: wire.tipo_documento_nome,
                    url: wire.url,
                    publication_date: wire.data_publicacao_pncp.as_deref().and_then(parse_feed_datetime),
                    raw,
                }),
                Err(e) => {
                    tracing::warn!("Skipping unreadable document entry: {}", e);
                }
            }
        }
        Ok(documents)
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FeedError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status()));
        }
        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition_filename);
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, filename))
    }
}

impl WireProcurement {
    fn into_model(self) -> Procurement {
        Procurement {
            control_number: self.control_number,
            object_description: self.objeto_compra,
            total_estimated_value: self.valor_total_estimado,
            proposal_opening_date: self
                .data_abertura_proposta
                .as_deref()
                .and_then(parse_feed_datetime),
            proposal_closing_date: self
                .data_encerramento_proposta
                .as_deref()
                .and_then(parse_feed_datetime),
            last_update_date: parse_feed_datetime(&self.data_atualizacao).unwrap_or_else(Utc::now),
            government_entity: GovernmentEntity {
                name: self.orgao_entidade.razao_social,
                cnpj: self.orgao_entidade.cnpj,
                sphere: self.orgao_entidade.esfera_id.unwrap_or_default(),
            },
            votes_count: 0,
            region: self.unidade_orgao.and_then(|u| u.uf_sigla),
        }
    }
}

/// Control numbers look like `07854402000100-1-000123/2025`.
fn parse_control_number(control_number: &str) -> Result<(String, String, i64), FeedError> {
    let err = || FeedError::ControlNumber(control_number.to_string());
    let (head, year) = control_number.rsplit_once('/').ok_or_else(err)?;
    let mut parts = head.split('-');
    let cnpj = parts.next().ok_or_else(err)?;
    let _modality = parts.next().ok_or_else(err)?;
    let sequence: i64 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    if cnpj.len() != 14 || year.len() != 4 {
        return Err(err());
    }
    Ok((cnpj.to_string(), year.to_string(), sequence))
}

/// Feed timestamps come either as RFC 3339 or as a naive local timestamp;
/// naive values are taken as UTC.
fn parse_feed_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_content_disposition_filename(header: &str) -> Option<String> {
    let marker = "filename=";
    let start = header.find(marker)? + marker.len();
    let rest = &header[start..];
    let name = rest.split(';').next()?.trim().trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
