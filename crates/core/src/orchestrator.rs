use crate::embeddings::EmbeddingProvider;
use crate::error::SearchError;
use crate::models::{ProviderConfig, SearchHit, SearchQuery, SearchResult};
use crate::store::IndexSnapshot;
use crate::stores::layout::IndexPaths;
use crate::traits::EmbeddingBackend;
use std::path::Path;
use tracing::{debug, warn};

/// Answers queries against one loaded index, embedding each query with the
/// same provider that built the index.
///
/// The loaded snapshot only changes on a successful [`load`](Self::load);
/// failed loads and failed queries leave it untouched.
pub struct SearchCoordinator<B> {
    backend: B,
    provider: ProviderConfig,
    snapshot: Option<IndexSnapshot>,
}

impl SearchCoordinator<EmbeddingProvider> {
    pub fn from_config(provider: ProviderConfig) -> Self {
        let backend = EmbeddingProvider::from_config(&provider);
        Self::new(backend, provider)
    }
}

impl<B> SearchCoordinator<B>
where
    B: EmbeddingBackend + Send + Sync,
{
    pub fn new(backend: B, provider: ProviderConfig) -> Self {
        Self {
            backend,
            provider,
            snapshot: None,
        }
    }

    pub fn snapshot(&self) -> Option<&IndexSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn load(&mut self, paths: &IndexPaths) -> Result<&IndexSnapshot, SearchError> {
        match IndexSnapshot::load(paths) {
            Ok(snapshot) => {
                debug!(entries = snapshot.store.len(), path = %paths.vectors.display(), "index loaded");
                Ok(self.snapshot.insert(snapshot))
            }
            Err(error) => {
                warn!(%error, path = %paths.vectors.display(), "index load failed, keeping previous index");
                Err(error.into())
            }
        }
    }

    /// Loads the index built for `document` with this coordinator's model.
    pub fn load_document(
        &mut self,
        index_dir: &Path,
        document: &Path,
    ) -> Result<&IndexSnapshot, SearchError> {
        let paths = IndexPaths::for_document(index_dir, document, &self.provider.model)?;
        self.load(&paths)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let snapshot = self.snapshot.as_ref().ok_or(SearchError::NotLoaded)?;

        let mut vectors = self.backend.embed_batch(&[query.text.clone()]).await?;
        let query_vector = vectors.pop().unwrap_or_default();
        if let Some(expected) = snapshot.store.dim() {
            if query_vector.len() != expected {
                return Err(SearchError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let hits = snapshot
            .store
            .top_k(&query_vector, query.top_k, query.metric)
            .into_iter()
            .filter(|scored| query.thresholds.accepts(query.metric, scored.score))
            .filter_map(|scored| {
                let entry = snapshot.metadata.get(scored.index)?;
                Some(SearchHit {
                    index: scored.index,
                    id: snapshot.store.ids()[scored.index].clone(),
                    score: scored.score,
                    page: entry.page,
                    chunk: entry.chunk,
                })
            })
            .collect::<Vec<_>>();

        debug!(metric = %query.metric, hits = hits.len(), "query answered");
        Ok(SearchResult {
            query: query.text.clone(),
            metric: query.metric,
            hits,
        })
    }
}
