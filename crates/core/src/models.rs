use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A trimmed slice of one page's text, the unit sent for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub page_number: u32,
    pub chunk_index: u32,
    pub text: String,
}

/// Per-entry metadata persisted in the `.meta.json` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub file: String,
    pub page: u32,
    pub chunk: u32,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Generativa,
    OpenWebUi,
    Ollama,
}

impl ProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Generativa => "generativa",
            ProviderKind::OpenWebUi => "openwebui",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Generativa => "https://generativa.rapport.tec.br",
            ProviderKind::OpenWebUi => "http://localhost:8080",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = IndexError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "generativa" => Ok(ProviderKind::Generativa),
            "openwebui" => Ok(ProviderKind::OpenWebUi),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(IndexError::UnsupportedProvider(value.to_string())),
        }
    }
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Upper bound for one embedding request, connect through body.
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Parses the provider identifier, failing on anything not in the catalogue.
    pub fn parse(
        provider: &str,
        model: impl Into<String>,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            provider: provider.parse()?,
            model: model.into(),
            base_url: non_blank(base_url),
            api_key: non_blank(api_key),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Configured base URL, or the provider default, without a trailing slash.
    pub fn resolved_base_url(&self) -> String {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url());
        base.trim_end_matches('/').to_string()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    pub batch_size: usize,
    pub pause_between_batches: Duration,
    /// Stop after this many pages and finalize what was processed.
    pub pages_per_stage: Option<usize>,
    /// Delete the partially written files when a run aborts.
    pub discard_partial_output: bool,
    pub ocr_languages: String,
    pub text_timeout: Duration,
    pub ocr_timeout: Duration,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            batch_size: 16,
            pause_between_batches: Duration::ZERO,
            pages_per_stage: None,
            discard_partial_output: false,
            ocr_languages: "por+eng".to_string(),
            text_timeout: Duration::from_secs(20),
            ocr_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
    L2,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            "l2" => Ok(Metric::L2),
            other => Err(format!("unknown metric `{other}` (expected cosine, dot or l2)")),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
            Metric::L2 => "l2",
        })
    }
}

/// Caller-supplied cut-offs applied after ranking.
///
/// `min_similarity` filters cosine and dot scores, `max_distance` filters
/// L2 hits by their (positive) Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchThresholds {
    pub min_similarity: Option<f32>,
    pub max_distance: Option<f32>,
}

impl SearchThresholds {
    pub fn accepts(&self, metric: Metric, score: f32) -> bool {
        match metric {
            Metric::Cosine | Metric::Dot => self.min_similarity.map_or(true, |min| score >= min),
            Metric::L2 => self.max_distance.map_or(true, |max| -score <= max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub metric: Metric,
    pub thresholds: SearchThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub index: usize,
    pub id: String,
    pub score: f32,
    pub page: u32,
    pub chunk: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub metric: Metric,
    pub hits: Vec<SearchHit>,
}

impl SearchResult {
    /// Page numbers of the hits in rank order, each page reported once.
    pub fn ranked_pages(&self) -> Vec<u32> {
        let mut pages = Vec::new();
        for hit in &self.hits {
            if !pages.contains(&hit.page) {
                pages.push(hit.page);
            }
        }
        pages
    }
}
