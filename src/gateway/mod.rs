pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::{ExportFile, ExportFormat};
use crate::form::SearchRequest;
use crate::model::{
    KeywordVariation, LlmAnswerSet, LlmQuestion, MetadataPatch, Paper, ResultSet, SnowballDirection,
    SnowballEntry, ValidationMatch,
};

/// A stored search as returned by the search and historical endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub matches: ValidationMatch,
    #[serde(default)]
    pub results: Vec<Paper>,
    #[serde(default)]
    pub variations: Vec<KeywordVariation>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Search ids are database keys and arrive as numbers or strings.
fn string_or_number<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid search id: {}", other))),
    }
}

fn lenient_timestamp<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|t| t.with_timezone(&Utc))))
}

impl SearchResponse {
    pub fn into_result_set(self) -> ResultSet {
        ResultSet {
            matches: self.matches,
            results: self.results,
            variations: self.variations,
        }
    }
}

/// Outcome of a metadata request: patches plus identifiers the backend
/// could not enrich.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataResponse {
    #[serde(default)]
    pub metadata: Vec<MetadataPatch>,
    #[serde(default)]
    pub failed: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned status {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Text shown to the user. A structured JSON object body is rendered as
    /// one `key: value` line per field; anything else as the raw message.
    pub fn render(&self) -> String {
        match self {
            GatewayError::Backend { body, .. } => match serde_json::from_str::<serde_json::Value>(body) {
                Ok(serde_json::Value::Object(fields)) => fields
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, render_value(value)))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Ok(other) => other.to_string(),
                Err(_) => body.clone(),
            },
            other => other.to_string(),
        }
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.replace('"', ""),
        serde_json::Value::Array(items) => items.iter().map(render_value).collect(),
        serde_json::Value::Object(_) => value.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// The remote backend. Every call is a single request/response exchange;
/// nothing is retried.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, GatewayError>;
    async fn fetch_historical(&self, id: &str) -> Result<ResultSet, GatewayError>;
    async fn add_manual(&self, dois: &[String]) -> Result<Vec<Paper>, GatewayError>;
    async fn populate_metadata(&self, paper_ids: &[String]) -> Result<MetadataResponse, GatewayError>;
    async fn snowball(
        &self,
        paper_ids: &[String],
        direction: SnowballDirection,
    ) -> Result<Vec<SnowballEntry>, GatewayError>;
    async fn llm_filter(
        &self,
        questions: &[LlmQuestion],
        paper_ids: &[String],
    ) -> Result<Vec<LlmAnswerSet>, GatewayError>;
    async fn export(&self, paper_ids: &[String], format: ExportFormat) -> Result<ExportFile, GatewayError>;
}
