use crate::chunking::{chunk_page, ChunkingConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{IndexError, ProviderError};
use crate::events::EventSink;
use crate::extractor::{percent, PdfPageExtractor};
use crate::models::{Chunk, EntryMetadata, IndexingOptions, ProviderConfig};
use crate::stores::layout::{absolute_path, IndexPaths};
use crate::stores::writer::IndexWriter;
use crate::traits::{EmbeddingBackend, PageTextExtractor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const STAGE_READING: &str = "Reading document";
pub const STAGE_PREPARING: &str = "Preparing files";
pub const STAGE_EMBEDDING: &str = "Embedding";
pub const STAGE_DONE: &str = "Done";

/// Caller-side handle on a running indexing job.
///
/// Cancellation is checked before each page and before each batch; an
/// embedding request already in flight always runs to completion. Pausing
/// holds the run before its next batch until `resume` or `cancel`.
#[derive(Debug)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub async fn wait_if_paused(&self) {
        let mut paused = self.paused.subscribe();
        loop {
            let is_paused = *paused.borrow_and_update();
            if !is_paused || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        entries: usize,
        dim: usize,
    },
    /// `pages_per_stage` stopped the run early; the index covers the first
    /// `pages` pages and is fully finalized. A stage never ends before its
    /// first entry, so leading blank pages do not count against it.
    StageCompleted {
        pages: usize,
        total_pages: usize,
        entries: usize,
        dim: usize,
    },
    /// Extraction worked but no chunk survived to be embedded.
    NothingProduced,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::NothingProduced)
    }

    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed { .. } => "Indexing complete".to_string(),
            RunOutcome::StageCompleted {
                pages, total_pages, ..
            } => format!("Stage complete ({pages} of {total_pages} pages)"),
            RunOutcome::NothingProduced => "Nothing produced".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: Result<RunOutcome, IndexError>,
    /// Set once the output location is known, even when the run failed.
    pub paths: Option<IndexPaths>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn ok(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.is_success())
    }

    pub fn message(&self) -> String {
        match &self.outcome {
            Ok(outcome) => outcome.message(),
            Err(error) => failure_message(error).to_string(),
        }
    }
}

fn failure_message(error: &IndexError) -> &'static str {
    match error {
        IndexError::ExtractionFailure(_) => "Text extraction failed",
        IndexError::Provider(_) | IndexError::DimensionChanged { .. } => "Embedding failed",
        IndexError::UnsupportedProvider(_) => "Unsupported embedding provider",
        IndexError::Cancelled => "Cancelled",
        IndexError::Io(_) | IndexError::Serialization(_) | IndexError::Format(_) => {
            "Could not write index files"
        }
    }
}

/// Mutable state of one run, threaded through the page and batch steps.
struct RunState {
    writer: IndexWriter,
    batch: Vec<Chunk>,
    batches_sent: usize,
    pages_done: usize,
}

/// Runs extraction, chunking, batched embedding and incremental persistence
/// for one document.
pub struct IndexBuilder<E, B> {
    extractor: E,
    backend: B,
    provider: ProviderConfig,
    options: IndexingOptions,
    index_dir: PathBuf,
}

impl IndexBuilder<PdfPageExtractor, EmbeddingProvider> {
    pub fn from_config(provider: ProviderConfig, options: IndexingOptions, index_dir: PathBuf) -> Self {
        let extractor = PdfPageExtractor::new(&options);
        let backend = EmbeddingProvider::from_config(&provider);
        Self::new(extractor, backend, provider, options, index_dir)
    }
}

impl<E, B> IndexBuilder<E, B>
where
    E: PageTextExtractor + Send + Sync,
    B: EmbeddingBackend + Send + Sync,
{
    pub fn new(
        extractor: E,
        backend: B,
        provider: ProviderConfig,
        options: IndexingOptions,
        index_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            backend,
            provider,
            options,
            index_dir,
        }
    }

    pub fn index_paths(&self, document: &Path) -> Result<IndexPaths, IndexError> {
        IndexPaths::for_document(&self.index_dir, document, &self.provider.model)
    }

    /// Indexes `document` and reports the result on `events`. Never fails:
    /// every error ends up in the report and in a `finished(false, ..)`
    /// event preceded by an `error` event.
    pub async fn run(&self, document: &Path, control: &RunControl, events: &EventSink) -> RunReport {
        let started = Instant::now();
        info!(
            document = %document.display(),
            provider = %self.provider.provider,
            model = %self.provider.model,
            "indexing started"
        );

        let mut paths = None;
        let outcome = self
            .try_run(document, control, events, &mut paths, started)
            .await;

        match &outcome {
            Ok(outcome) => events.finished(outcome.is_success(), outcome.message()),
            Err(error) => {
                events.error(error.to_string());
                events.finished(false, failure_message(error));
            }
        }

        RunReport {
            outcome,
            paths,
            elapsed: started.elapsed(),
        }
    }

    async fn try_run(
        &self,
        document: &Path,
        control: &RunControl,
        events: &EventSink,
        paths_out: &mut Option<IndexPaths>,
        started: Instant,
    ) -> Result<RunOutcome, IndexError> {
        events.stage(STAGE_READING);
        let pages = self
            .extractor
            .extract_pages(document, control.token(), events)
            .await?;
        if control.is_cancelled() {
            events.warning("interrupted while reading the document");
            return Err(IndexError::Cancelled);
        }
        if pages.is_empty() {
            return Err(IndexError::ExtractionFailure(format!(
                "no pages extracted from {}",
                document.display()
            )));
        }

        let (chunking, warnings) =
            ChunkingConfig::corrected(self.options.chunk_size, self.options.chunk_overlap);
        for warning in warnings {
            events.warning(warning);
        }

        events.stage(STAGE_PREPARING);
        let paths = self.index_paths(document)?;
        *paths_out = Some(paths.clone());
        let file = absolute_path(document)?.to_string_lossy().into_owned();
        let mut state = RunState {
            writer: IndexWriter::create(paths.clone())?,
            batch: Vec::with_capacity(self.options.batch_size.max(1)),
            batches_sent: 0,
            pages_done: 0,
        };

        events.stage(STAGE_EMBEDDING);
        if let Err(error) = self
            .embed_pages(&pages, chunking, &file, &mut state, control, events)
            .await
        {
            let paths = state.writer.abandon();
            self.discard_partial(&paths, events);
            return Err(error);
        }

        let pages_done = state.pages_done;
        let written = match state.writer.finish() {
            Ok(written) => written,
            Err(error) => {
                self.discard_partial(&paths, events);
                return Err(error);
            }
        };
        events.metric("chunks", written.count);

        if written.count == 0 {
            events.warning("no vectors were written");
            return Ok(RunOutcome::NothingProduced);
        }

        events.stage(STAGE_DONE);
        events.metric("total_time_ms", started.elapsed().as_millis());

        if pages_done < pages.len() {
            events.progress(
                percent(pages_done, pages.len()),
                format!("stage complete: {pages_done}/{} pages", pages.len()),
            );
            return Ok(RunOutcome::StageCompleted {
                pages: pages_done,
                total_pages: pages.len(),
                entries: written.count,
                dim: written.dim,
            });
        }

        events.progress(100, "completed");
        Ok(RunOutcome::Completed {
            entries: written.count,
            dim: written.dim,
        })
    }

    async fn embed_pages(
        &self,
        pages: &[String],
        chunking: ChunkingConfig,
        file: &str,
        state: &mut RunState,
        control: &RunControl,
        events: &EventSink,
    ) -> Result<(), IndexError> {
        let total = pages.len();
        let limit = self
            .options
            .pages_per_stage
            .filter(|limit| *limit > 0)
            .map_or(total, |limit| limit.min(total));
        let batch_size = self.options.batch_size.max(1);

        for (offset, text) in pages.iter().enumerate() {
            if state.pages_done >= limit && state.writer.count() > 0 {
                break;
            }
            let page = offset as u32 + 1;
            if control.is_cancelled() {
                events.warning(format!("interrupted before page {page}"));
                return Err(IndexError::Cancelled);
            }

            for chunk in chunk_page(page, text, chunking) {
                state.batch.push(chunk);
                if state.batch.len() == batch_size {
                    self.flush_batch(state, file, page, total, control, events)
                        .await?;
                }
            }
            if !state.batch.is_empty() {
                self.flush_batch(state, file, page, total, control, events)
                    .await?;
            }

            state.pages_done += 1;
        }

        Ok(())
    }

    async fn flush_batch(
        &self,
        state: &mut RunState,
        file: &str,
        page: u32,
        total_pages: usize,
        control: &RunControl,
        events: &EventSink,
    ) -> Result<(), IndexError> {
        control.wait_if_paused().await;
        if state.batches_sent > 0 && !self.options.pause_between_batches.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.options.pause_between_batches) => {}
                _ = control.token().cancelled() => {}
            }
        }
        if control.is_cancelled() {
            events.warning(format!("interrupted on page {page}"));
            return Err(IndexError::Cancelled);
        }

        let batch = std::mem::take(&mut state.batch);
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.backend.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(ProviderError::malformed(
                self.provider.provider.id(),
                &self.provider.resolved_base_url(),
                format!("expected {} vectors, got {}", batch.len(), vectors.len()),
            )
            .into());
        }

        for (chunk, vector) in batch.iter().zip(&vectors) {
            let id = state.writer.count().to_string();
            let metadata = EntryMetadata {
                file: file.to_string(),
                page: chunk.page_number,
                chunk: chunk.chunk_index,
                model: self.provider.model.clone(),
                provider: self.provider.provider.id().to_string(),
            };
            state.writer.append(vector, &id, &metadata)?;
        }

        state.batches_sent += 1;
        debug!(
            page,
            batch = batch.len(),
            total = state.writer.count(),
            "batch persisted"
        );
        events.progress(
            percent(page as usize, total_pages),
            format!("embedded batch of {} (page {page})", batch.len()),
        );
        Ok(())
    }

    fn discard_partial(&self, paths: &IndexPaths, events: &EventSink) {
        if !self.options.discard_partial_output {
            return;
        }
        match paths.remove_all() {
            Ok(()) => events.warning("partial index removed"),
            Err(error) => events.warning(format!("could not remove partial index: {error}")),
        }
    }
}

/// Everything needed to start an indexing run from raw settings.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub document: PathBuf,
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub options: IndexingOptions,
    pub index_dir: PathBuf,
}

/// Runs an indexing job on the tokio runtime. The caller keeps `control` to
/// cancel or pause it and follows progress through the receiving end of
/// `events`.
pub fn spawn_indexing(
    job: IndexJob,
    control: Arc<RunControl>,
    events: EventSink,
) -> JoinHandle<RunReport> {
    tokio::spawn(async move {
        let started = Instant::now();
        let provider =
            match ProviderConfig::parse(&job.provider, job.model, job.base_url, job.api_key) {
                Ok(provider) => ProviderConfig {
                    request_timeout: job.request_timeout,
                    ..provider
                },
                Err(error) => {
                    events.error(error.to_string());
                    events.finished(false, failure_message(&error));
                    return RunReport {
                        outcome: Err(error),
                        paths: None,
                        elapsed: started.elapsed(),
                    };
                }
            };

        let builder = IndexBuilder::from_config(provider, job.options, job.index_dir);
        builder.run(&job.document, &control, &events).await
    })
}
