use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use page_rag_core::{
    default_index_dir, spawn_indexing, EventSink, IndexEvent, IndexJob, IndexingOptions, Metric,
    ProviderConfig, RunControl, SearchCoordinator, SearchQuery, SearchThresholds,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "page-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding provider: openai, generativa, openwebui or ollama
    #[arg(long, env = "PAGE_RAG_PROVIDER", default_value = "ollama")]
    provider: String,

    /// Embedding model id
    #[arg(long, env = "PAGE_RAG_MODEL", default_value = "nomic-embed-text")]
    model: String,

    /// Provider base URL (defaults to the provider's public or local endpoint)
    #[arg(long, env = "PAGE_RAG_BASE_URL")]
    base_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "PAGE_RAG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Seconds allowed for one embedding request
    #[arg(long, env = "PAGE_RAG_REQUEST_TIMEOUT", default_value = "120")]
    request_timeout: u64,

    /// Directory holding the index files
    #[arg(long, env = "PAGE_RAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed a PDF into a local vector index.
    Index {
        /// PDF to index.
        document: PathBuf,
        /// Chunk size in bytes.
        #[arg(long, default_value = "1000", allow_negative_numbers = true)]
        chunk_size: i64,
        /// Overlap between consecutive chunks in bytes.
        #[arg(long, default_value = "200", allow_negative_numbers = true)]
        chunk_overlap: i64,
        /// Chunks sent per embedding request.
        #[arg(long, default_value = "16")]
        batch_size: usize,
        /// Pause between embedding requests, in milliseconds.
        #[arg(long, default_value = "0")]
        pause_ms: u64,
        /// Stop after this many pages and finalize what was indexed.
        #[arg(long)]
        pages_per_stage: Option<usize>,
        /// Delete the partially written index when the run fails.
        #[arg(long, default_value_t = false)]
        discard_partial: bool,
        /// Tesseract languages for pages without a text layer.
        #[arg(long, default_value = "por+eng")]
        ocr_languages: String,
    },
    /// Query the index of a PDF and print the best matching pages.
    Search {
        /// PDF whose index is queried.
        document: PathBuf,
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of chunks to rank.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Similarity metric: cosine, dot or l2.
        #[arg(long, default_value = "cosine")]
        metric: Metric,
        /// Drop cosine/dot hits scoring below this value.
        #[arg(long)]
        min_similarity: Option<f32>,
        /// Drop l2 hits farther than this distance.
        #[arg(long)]
        max_distance: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let request_timeout = Duration::from_secs(cli.request_timeout);
    let index_dir = cli.index_dir.clone().unwrap_or_else(default_index_dir);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %index_dir.display(),
        "page-rag boot"
    );

    match cli.command {
        Command::Index {
            document,
            chunk_size,
            chunk_overlap,
            batch_size,
            pause_ms,
            pages_per_stage,
            discard_partial,
            ocr_languages,
        } => {
            let job = IndexJob {
                document,
                provider: cli.provider,
                model: cli.model,
                base_url: cli.base_url,
                api_key: cli.api_key,
                request_timeout,
                options: IndexingOptions {
                    chunk_size,
                    chunk_overlap,
                    batch_size,
                    pause_between_batches: Duration::from_millis(pause_ms),
                    pages_per_stage,
                    discard_partial_output: discard_partial,
                    ocr_languages,
                    ..IndexingOptions::default()
                },
                index_dir,
            };

            let control = Arc::new(RunControl::new());
            let (events, mut receiver) = EventSink::channel();
            let handle = spawn_indexing(job, Arc::clone(&control), events);

            let interrupt = {
                let control = Arc::clone(&control);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received, stopping before the next batch");
                        control.cancel();
                    }
                })
            };

            let toggle = pause_toggle(Arc::clone(&control));

            while let Some(event) = receiver.recv().await {
                print_event(&event);
            }

            let report = handle.await.context("indexing task panicked")?;
            interrupt.abort();
            toggle.abort();

            if let Some(paths) = &report.paths {
                println!("index: {}", paths.vectors.display());
            }
            println!(
                "elapsed: {:.1}s at {}",
                report.elapsed.as_secs_f64(),
                Utc::now().to_rfc3339()
            );
            if !report.ok() {
                anyhow::bail!(report.message());
            }
        }
        Command::Search {
            document,
            query,
            top_k,
            metric,
            min_similarity,
            max_distance,
        } => {
            let provider = ProviderConfig {
                request_timeout,
                ..ProviderConfig::parse(&cli.provider, cli.model, cli.base_url, cli.api_key)?
            };
            let mut coordinator = SearchCoordinator::from_config(provider);
            let entries = coordinator
                .load_document(&index_dir, &document)
                .with_context(|| format!("no usable index for {}", document.display()))?
                .store
                .len();
            info!(entries, document = %document.display(), "index loaded");

            let search_query = SearchQuery {
                text: query,
                top_k,
                metric,
                thresholds: SearchThresholds {
                    min_similarity,
                    max_distance,
                },
            };
            let result = coordinator.search(&search_query).await?;

            println!("query: {} ({})", result.query, result.metric);
            for hit in &result.hits {
                println!(
                    "score={:.4} page={} chunk={} id={}",
                    hit.score, hit.page, hit.chunk, hit.id
                );
            }
            let pages = result
                .ranked_pages()
                .iter()
                .map(|page| page.to_string())
                .collect::<Vec<_>>();
            println!("pages: {}", pages.join(", "));
        }
    }

    Ok(())
}

/// SIGUSR1 pauses the run before its next batch; a second SIGUSR1 resumes it.
#[cfg(unix)]
fn pause_toggle(control: Arc<RunControl>) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut signals = match signal(SignalKind::user_defined1()) {
            Ok(signals) => signals,
            Err(error) => {
                warn!(%error, "pause/resume on SIGUSR1 unavailable");
                return;
            }
        };
        while signals.recv().await.is_some() {
            println!("{}", toggle_pause(&control));
        }
    })
}

fn toggle_pause(control: &RunControl) -> &'static str {
    if control.is_paused() {
        control.resume();
        "resumed"
    } else {
        control.pause();
        "paused, send SIGUSR1 again to resume"
    }
}

#[cfg(not(unix))]
fn pause_toggle(_control: Arc<RunControl>) -> JoinHandle<()> {
    tokio::spawn(async {})
}

fn print_event(event: &IndexEvent) {
    match event {
        IndexEvent::Stage(name) => println!("== {name}"),
        IndexEvent::Metric { key, value } => println!("   {key}={value}"),
        IndexEvent::Progress { percent, info } => println!("[{percent:>3}%] {info}"),
        IndexEvent::Warning(message) => println!("warning: {message}"),
        IndexEvent::Error(message) => println!("error: {message}"),
        IndexEvent::Finished { ok, message } => {
            println!("{}: {message}", if *ok { "finished" } else { "failed" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_alternates_between_pause_and_resume() {
        let control = RunControl::new();
        assert_eq!(toggle_pause(&control), "paused, send SIGUSR1 again to resume");
        assert!(control.is_paused());
        assert_eq!(toggle_pause(&control), "resumed");
        assert!(!control.is_paused());
    }

    #[test]
    fn request_timeout_defaults_to_two_minutes() {
        let cli = Cli::parse_from(["page-rag", "search", "book.pdf", "--query", "q"]);
        assert_eq!(cli.request_timeout, 120);
        let cli = Cli::parse_from([
            "page-rag",
            "--request-timeout",
            "5",
            "search",
            "book.pdf",
            "--query",
            "q",
        ]);
        assert_eq!(cli.request_timeout, 5);
    }
}
