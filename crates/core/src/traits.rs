use crate::events::EventSink;
use crate::{IndexError, ProviderError};
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Produces one text string per page, in page order.
///
/// Pages without recoverable text are returned as empty strings. The
/// cancellation token is checked before each page; once it fires the pages
/// read so far are returned.
#[async_trait]
pub trait PageTextExtractor {
    async fn extract_pages(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<Vec<String>, IndexError>;
}

/// Turns a batch of texts into one vector per text, in input order.
#[async_trait]
pub trait EmbeddingBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}
