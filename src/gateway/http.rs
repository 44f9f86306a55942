use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Gateway, GatewayError, MetadataResponse, SearchResponse};
use crate::export::{filename_from_content_disposition, ExportFile, ExportFormat};
use crate::form::SearchRequest;
use crate::model::{LlmAnswerSet, LlmQuestion, Paper, ResultSet, SnowballDirection, SnowballEntry};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

const SEARCH_PATH: &str = "/scraper/search-and-clean";
const MANUAL_ADD_PATH: &str = "/scraper/manual-add-publication";
const METADATA_PATH: &str = "/scraper/publication-metadata";
const EXPORT_PATH: &str = "/scraper/export";
const HISTORICAL_PATH: &str = "/scraper/historical-search";
const SNOWBALL_PATH: &str = "/publication/snowballing";
const LLM_FILTER_PATH: &str = "/publication/llm-filter";

/// Gateway to the scraper backend over HTTP/JSON.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder().user_agent("arc-review/0.1");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!("POST {}", path);
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        decode(check(resp).await?).await
    }
}

/// Turn a non-success status into `GatewayError::Backend`, keeping the body
/// for error rendering.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!("Backend error {}: {}", status, body);
    Err(GatewayError::Backend {
        status: status.as_u16(),
        body,
    })
}

async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, GatewayError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Parse(e.to_string()))
}

#[derive(Deserialize)]
struct ManualAddResponse {
    #[serde(default)]
    publications: Vec<Paper>,
}

#[derive(Deserialize)]
struct ResultsEnvelope<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, GatewayError> {
        let resp: SearchResponse = self.post_json(SEARCH_PATH, request).await?;
        tracing::info!("Search {} returned {} papers", resp.id, resp.results.len());
        Ok(resp)
    }

    async fn fetch_historical(&self, id: &str) -> Result<ResultSet, GatewayError> {
        tracing::debug!("GET {}?id={}", HISTORICAL_PATH, id);
        let resp = self
            .client
            .get(self.url(HISTORICAL_PATH))
            .query(&[("id", id)])
            .send()
            .await?;
        let search: SearchResponse = decode(check(resp).await?).await?;
        Ok(search.into_result_set())
    }

    async fn add_manual(&self, dois: &[String]) -> Result<Vec<Paper>, GatewayError> {
        let resp: ManualAddResponse = self.post_json(MANUAL_ADD_PATH, &json!({ "dois": dois })).await?;
        Ok(resp.publications)
    }

    async fn populate_metadata(&self, paper_ids: &[String]) -> Result<MetadataResponse, GatewayError> {
        let resp: MetadataResponse = self
            .post_json(METADATA_PATH, &json!({ "paper_ids": paper_ids }))
            .await?;
        if !resp.failed.is_empty() {
            tracing::warn!("Metadata unavailable for {} papers: {:?}", resp.failed.len(), resp.failed);
        }
        Ok(resp)
    }

    async fn snowball(
        &self,
        paper_ids: &[String],
        direction: SnowballDirection,
    ) -> Result<Vec<SnowballEntry>, GatewayError> {
        let body = json!({
            "publication_ids": paper_ids,
            "search_type": direction.as_str(),
            "show_metadata": true,
        });
        let resp: ResultsEnvelope<SnowballEntry> = self.post_json(SNOWBALL_PATH, &body).await?;
        Ok(resp.results)
    }

    async fn llm_filter(
        &self,
        questions: &[LlmQuestion],
        paper_ids: &[String],
    ) -> Result<Vec<LlmAnswerSet>, GatewayError> {
        let body = json!({ "questions": questions, "paper_ids": paper_ids });
        let resp: ResultsEnvelope<LlmAnswerSet> = self.post_json(LLM_FILTER_PATH, &body).await?;
        Ok(resp.results)
    }

    async fn export(&self, paper_ids: &[String], format: ExportFormat) -> Result<ExportFile, GatewayError> {
        let body = json!({ "paper_ids": paper_ids, "format": format.as_str() });
        let resp = self.client.post(self.url(EXPORT_PATH)).json(&body).send().await?;
        let resp = check(resp).await?;
        let filename = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .unwrap_or_else(|| format.fallback_filename());
        let bytes = resp.bytes().await?.to_vec();
        Ok(ExportFile { filename, bytes })
    }
}
