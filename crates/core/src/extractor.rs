use crate::error::IndexError;
use crate::events::EventSink;
use crate::models::IndexingOptions;
use crate::traits::PageTextExtractor;
use async_trait::async_trait;
use lopdf::Document;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

const TOOL_START_GRACE: Duration = Duration::from_secs(2);
const OCR_DPI: &str = "200";

/// External programs used for extraction, resolved from `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    pub pdftotext: Option<PathBuf>,
    pub pdftoppm: Option<PathBuf>,
    pub tesseract: Option<PathBuf>,
}

impl ToolSet {
    pub fn discover() -> Self {
        Self {
            pdftotext: which::which("pdftotext").ok(),
            pdftoppm: which::which("pdftoppm").ok(),
            tesseract: which::which("tesseract").ok(),
        }
    }

    fn can_ocr(&self) -> bool {
        self.pdftoppm.is_some() && self.tesseract.is_some()
    }

    pub fn missing_tool_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pdftotext.is_none() {
            warnings.push(
                "'pdftotext' not found; install poppler-utils for faster text extraction"
                    .to_string(),
            );
        }
        if self.pdftoppm.is_none() {
            warnings.push("'pdftoppm' not found; install poppler-utils to render pages for OCR".to_string());
        }
        if self.tesseract.is_none() {
            warnings.push("'tesseract' not found; install tesseract-ocr for the OCR fallback".to_string());
        }
        warnings
    }
}

/// Page extractor that prefers `pdftotext`, falls back to `pdftoppm` +
/// `tesseract` for pages without a text layer, and reads the text layer
/// in-process with lopdf when `pdftotext` is not installed.
#[derive(Debug, Clone)]
pub struct PdfPageExtractor {
    pub ocr_languages: String,
    pub text_timeout: Duration,
    pub ocr_timeout: Duration,
    tools: Option<ToolSet>,
}

impl PdfPageExtractor {
    pub fn new(options: &IndexingOptions) -> Self {
        Self {
            ocr_languages: options.ocr_languages.clone(),
            text_timeout: options.text_timeout,
            ocr_timeout: options.ocr_timeout,
            tools: None,
        }
    }

    /// Uses a fixed tool set instead of looking tools up on `PATH`.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = Some(tools);
        self
    }

    async fn text_layer(
        &self,
        tools: &ToolSet,
        document: &Arc<Document>,
        path: &Path,
        page: u32,
    ) -> String {
        if let Some(pdftotext) = &tools.pdftotext {
            let number = page.to_string();
            let args: Vec<OsString> = vec![
                "-q".into(),
                "-layout".into(),
                "-eol".into(),
                "unix".into(),
                "-f".into(),
                number.clone().into(),
                "-l".into(),
                number.into(),
                path.as_os_str().to_owned(),
                "-".into(),
            ];
            return run_tool(pdftotext, &args, self.text_timeout)
                .await
                .unwrap_or_default();
        }

        let document = Arc::clone(document);
        tokio::task::spawn_blocking(move || document.extract_text(&[page]).unwrap_or_default())
            .await
            .unwrap_or_default()
    }

    async fn ocr_page(&self, tools: &ToolSet, path: &Path, page: u32) -> String {
        let (Some(pdftoppm), Some(tesseract)) = (&tools.pdftoppm, &tools.tesseract) else {
            return String::new();
        };

        let raster_base = std::env::temp_dir().join(format!("page-rag-{}", Uuid::new_v4()));
        let number = page.to_string();
        let render_args: Vec<OsString> = vec![
            "-f".into(),
            number.clone().into(),
            "-l".into(),
            number.into(),
            "-r".into(),
            OCR_DPI.into(),
            "-png".into(),
            "-singlefile".into(),
            path.as_os_str().to_owned(),
            raster_base.as_os_str().to_owned(),
        ];
        if run_tool(pdftoppm, &render_args, self.ocr_timeout).await.is_none() {
            return String::new();
        }

        let raster = raster_base.with_extension("png");
        if !raster.exists() {
            debug!(page, raster = %raster.display(), "pdftoppm produced no raster");
            return String::new();
        }

        let ocr_args: Vec<OsString> = vec![
            raster.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            self.ocr_languages.clone().into(),
            "--psm".into(),
            "6".into(),
        ];
        let text = run_tool(tesseract, &ocr_args, self.ocr_timeout)
            .await
            .unwrap_or_default();
        let _ = tokio::fs::remove_file(&raster).await;
        text
    }
}

impl Default for PdfPageExtractor {
    fn default() -> Self {
        Self::new(&IndexingOptions::default())
    }
}

#[async_trait]
impl PageTextExtractor for PdfPageExtractor {
    async fn extract_pages(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<Vec<String>, IndexError> {
        let document = Arc::new(load_document(path).await?);
        let page_count = document.get_pages().len() as u32;
        events.metric("pages", page_count);

        let tools = match &self.tools {
            Some(tools) => tools.clone(),
            None => ToolSet::discover(),
        };
        for warning in tools.missing_tool_warnings() {
            events.warning(warning);
        }

        let mut pages = Vec::with_capacity(page_count as usize);
        for page in 1..=page_count {
            if cancel.is_cancelled() {
                events.warning(format!("extraction interrupted before page {page}"));
                break;
            }

            let mut text = self.text_layer(&tools, &document, path, page).await;
            if text.trim().is_empty() && tools.can_ocr() {
                debug!(page, "no text layer, running OCR");
                text = self.ocr_page(&tools, path, page).await;
            }
            if text.is_empty() && tools.pdftotext.is_none() && !tools.can_ocr() {
                events.warning(format!(
                    "page {page}: no extraction tools installed (poppler-utils, tesseract-ocr)"
                ));
            }

            pages.push(text);
            events.progress(
                percent(page as usize, page_count as usize),
                format!("extracted page {page}/{page_count}"),
            );
        }

        Ok(pages)
    }
}

async fn load_document(path: &Path) -> Result<Document, IndexError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || Document::load(&owned))
        .await
        .map_err(|error| IndexError::ExtractionFailure(error.to_string()))?
        .map_err(|error| {
            IndexError::ExtractionFailure(format!("cannot open {}: {error}", path.display()))
        })
}

/// Runs a tool and returns its stdout, or `None` if it could not be started
/// or did not finish in time.
async fn run_tool(program: &Path, args: &[OsString], limit: Duration) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(limit + TOOL_START_GRACE, output).await {
        Ok(Ok(output)) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        Ok(Err(error)) => {
            debug!(program = %program.display(), %error, "tool failed to start");
            None
        }
        Err(_) => {
            debug!(program = %program.display(), "tool timed out");
            None
        }
    }
}

pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as u8
}
