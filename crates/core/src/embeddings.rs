use crate::chunking::normalize_whitespace;
use crate::error::ProviderError;
use crate::models::{ProviderConfig, ProviderKind};
use crate::traits::EmbeddingBackend;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Embedding client selected by [`ProviderConfig::provider`].
///
/// One variant per wire shape: a batch POST (OpenAI-compatible), a per-item
/// GET with the text in the path (retrieval endpoint), and a per-item POST
/// to a local model server.
#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    OpenAiCompatible(OpenAiCompatibleBackend),
    Retrieval(RetrievalBackend),
    LocalModel(LocalModelBackend),
}

impl EmbeddingProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let endpoint = Endpoint::new(config);
        match config.provider {
            ProviderKind::OpenAi => Self::OpenAiCompatible(OpenAiCompatibleBackend { endpoint }),
            ProviderKind::Generativa | ProviderKind::OpenWebUi => {
                Self::Retrieval(RetrievalBackend { endpoint })
            }
            ProviderKind::Ollama => Self::LocalModel(LocalModelBackend { endpoint }),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Self::OpenAiCompatible(backend) => backend.embed_batch(texts).await,
            Self::Retrieval(backend) => backend.embed_batch(texts).await,
            Self::LocalModel(backend) => backend.embed_batch(texts).await,
        }
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    backend: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl Endpoint {
    fn new(config: &ProviderConfig) -> Self {
        Self {
            backend: config.provider.id().to_string(),
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            client: Client::new(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| ProviderError::transport(&self.backend, url, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ProviderError::transport(&self.backend, url, error))?;

        if status.as_u16() >= 400 {
            return Err(ProviderError::status(
                &self.backend,
                url,
                status.as_u16(),
                &body,
            ));
        }

        serde_json::from_str(&body).map_err(|error| {
            ProviderError::malformed(&self.backend, url, format!("{error}: {body}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    endpoint: Endpoint,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct BatchResponse {
    data: Vec<BatchDatum>,
}

#[derive(Deserialize)]
struct BatchDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[async_trait]
impl EmbeddingBackend for OpenAiCompatibleBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = &self.endpoint;
        let url = format!("{}/embeddings", endpoint.base_url);
        let payload = BatchRequest {
            model: &endpoint.model,
            input: texts,
        };
        let request = endpoint.client.post(&url).json(&payload);
        let mut response: BatchResponse = endpoint.fetch(&url, request).await?;

        if response.data.iter().all(|datum| datum.index.is_some()) {
            response.data.sort_by_key(|datum| datum.index);
        }
        let vectors = response
            .data
            .into_iter()
            .map(|datum| datum.embedding)
            .collect::<Vec<_>>();

        debug!(backend = %endpoint.backend, count = vectors.len(), "batch embedded");
        check_batch(&endpoint.backend, &url, texts.len(), vectors)
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalBackend {
    endpoint: Endpoint,
}

#[derive(Deserialize)]
struct RetrievalResponse {
    result: Vec<f32>,
}

impl RetrievalBackend {
    fn item_url(&self, text: &str) -> Result<Url, ProviderError> {
        let raw = format!(
            "{}/api/v1/retrieval/ef/{}",
            self.endpoint.base_url,
            path_segment(text)
        );
        Url::parse(&raw).map_err(|error| {
            ProviderError::malformed(&self.endpoint.backend, &raw, format!("invalid base url: {error}"))
        })
    }
}

/// Percent-encodes the normalized text as a single path segment. URL parsing
/// collapses `.` and `..` segments (encoded or not), so those two get a
/// trailing encoded space to survive as text.
fn path_segment(text: &str) -> String {
    let normalized = normalize_whitespace(text);
    match normalized.as_str() {
        "." => "%2E%20".to_string(),
        ".." => "%2E%2E%20".to_string(),
        other => urlencoding::encode(other).into_owned(),
    }
}

#[async_trait]
impl EmbeddingBackend for RetrievalBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let endpoint = &self.endpoint;
        let mut vectors = Vec::with_capacity(texts.len());
        let mut last_url = endpoint.base_url.clone();

        for text in texts {
            let url = self.item_url(text)?;
            let request = endpoint.client.get(url.clone());
            let response: RetrievalResponse = endpoint.fetch(url.as_str(), request).await?;
            vectors.push(response.result);
            last_url = url.to_string();
        }

        check_batch(&endpoint.backend, &last_url, texts.len(), vectors)
    }
}

#[derive(Debug, Clone)]
pub struct LocalModelBackend {
    endpoint: Endpoint,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct PromptResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingBackend for LocalModelBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let endpoint = &self.endpoint;
        let url = format!("{}/api/embeddings", endpoint.base_url);
        let mut vectors = Vec::with_capacity(texts.len());

        for text in texts {
            let payload = PromptRequest {
                model: &endpoint.model,
                prompt: text,
            };
            let request = endpoint.client.post(&url).json(&payload);
            let response: PromptResponse = endpoint.fetch(&url, request).await?;
            vectors.push(response.embedding);
        }

        check_batch(&endpoint.backend, &url, texts.len(), vectors)
    }
}

/// One non-empty vector per input, all of the same length.
fn check_batch(
    backend: &str,
    url: &str,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::malformed(
            backend,
            url,
            format!("expected {expected} embeddings, got {}", vectors.len()),
        ));
    }

    if let Some(first) = vectors.first() {
        let dim = first.len();
        if dim == 0 {
            return Err(ProviderError::malformed(backend, url, "backend returned an empty embedding"));
        }
        if let Some(odd) = vectors.iter().find(|vector| vector.len() != dim) {
            return Err(ProviderError::malformed(
                backend,
                url,
                format!("embeddings differ in length: {dim} vs {}", odd.len()),
            ));
        }
    }

    Ok(vectors)
}
