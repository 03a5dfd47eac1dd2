pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_page, normalize_whitespace, sliding_chunks, ChunkingConfig};
pub use embeddings::EmbeddingProvider;
pub use error::{FormatError, IndexError, ProviderError, SearchError};
pub use events::{EventSink, IndexEvent};
pub use extractor::{PdfPageExtractor, ToolSet};
pub use ingest::{spawn_indexing, IndexBuilder, IndexJob, RunControl, RunOutcome, RunReport};
pub use models::{
    Chunk, EntryMetadata, IndexingOptions, Metric, ProviderConfig, ProviderKind, SearchHit,
    SearchQuery, SearchResult, SearchThresholds,
};
pub use orchestrator::SearchCoordinator;
pub use store::{IndexSnapshot, ScoredIndex, VectorStore};
pub use stores::{default_index_dir, IndexPaths, IndexWriter};
pub use traits::{EmbeddingBackend, PageTextExtractor};
