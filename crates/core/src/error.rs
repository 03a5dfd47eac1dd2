use thiserror::Error;

const BODY_SNIPPET_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("unsupported embedding provider: {0}")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension changed from {expected} to {actual} within one run")]
    DimensionChanged { expected: usize, actual: usize },

    #[error("indexing was cancelled")]
    Cancelled,
}

/// Failure talking to an embedding backend.
///
/// `status` is set when the backend answered with HTTP >= 400, `transport`
/// when the request never produced a response (or the body could not be
/// decoded). `body` holds the first few hundred characters of the response.
#[derive(Debug, Clone, Error)]
#[error("{backend} request to {url} failed{}: {body}", failure_detail(.status, .transport))]
pub struct ProviderError {
    pub backend: String,
    pub url: String,
    pub status: Option<u16>,
    pub transport: Option<String>,
    pub body: String,
}

impl ProviderError {
    pub fn status(backend: &str, url: &str, status: u16, body: &str) -> Self {
        Self {
            backend: backend.to_string(),
            url: url.to_string(),
            status: Some(status),
            transport: None,
            body: snippet(body),
        }
    }

    pub fn transport(backend: &str, url: &str, error: impl ToString) -> Self {
        Self {
            backend: backend.to_string(),
            url: url.to_string(),
            status: None,
            transport: Some(error.to_string()),
            body: String::new(),
        }
    }

    pub fn malformed(backend: &str, url: &str, details: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            url: url.to_string(),
            status: None,
            transport: None,
            body: snippet(&details.into()),
        }
    }
}

fn failure_detail(status: &Option<u16>, transport: &Option<String>) -> String {
    let mut detail = String::new();
    if let Some(code) = status {
        detail.push_str(&format!(" with status {code}"));
    }
    if let Some(error) = transport {
        detail.push_str(&format!(" ({error})"));
    }
    detail
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("vector file does not start with the VEC1 marker")]
    BadMagic,

    #[error("vector file is shorter than its header")]
    ShortHeader,

    #[error("vector file header is invalid: count={count}, dim={dim}")]
    InvalidHeader { count: i32, dim: i32 },

    #[error("vector file is truncated: expected {expected} vectors")]
    Truncated { expected: usize },

    #[error("ids file is not a JSON array of strings")]
    InvalidIds,

    #[error("index is inconsistent: {vectors} vectors but {ids} ids")]
    CountMismatch { vectors: usize, ids: usize },

    #[error("metadata is inconsistent: {vectors} vectors but {entries} metadata entries")]
    Metadata { vectors: usize, entries: usize },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("no index is loaded")]
    NotLoaded,

    #[error("query vector has {actual} dimensions but the index stores {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_message_includes_status_and_snippet() {
        let error = ProviderError::status("openai", "http://x/embeddings", 429, "  slow down  ");
        let message = error.to_string();
        assert!(message.contains("status 429"));
        assert!(message.ends_with("slow down"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        let error = ProviderError::status("ollama", "http://x", 500, &body);
        assert_eq!(error.body.len(), BODY_SNIPPET_CHARS + 3);
    }
}
