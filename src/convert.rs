//! Eager (full-document) extraction entry points.
//!
//! Every entry point here waits for all pages, then returns one
//! [`ExtractionOutput`]. Use [`crate::stream::extract_stream`] to receive
//! page outcomes as they complete.

use crate::agent::AgentSet;
use crate::config::ExtractionConfig;
use crate::error::RegisterError;
use crate::events::{Events, NoopSink};
use crate::output::{DocumentMetadata, ExtractionOutput, ExtractionStats};
use crate::pipeline::{
    input, render, CancellationFlag, DocumentPipeline, DocumentSource, PagePipeline, PdfPageSource,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Extract every household record from a register PDF (file path or URL).
///
/// # Returns
/// `Ok(ExtractionOutput)` even when some pages failed; check
/// `output.stats.failed_pages` and the per-page errors.
///
/// # Errors
/// Only when the page sequence cannot be obtained or the agents cannot be
/// built: missing file, not a PDF, corrupt or locked PDF, empty page
/// selection, unconfigured agents.
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, RegisterError> {
    extract_cancellable(input_str, config, &CancellationFlag::new()).await
}

/// [`extract`] with a stop flag checked between pages.
pub async fn extract_cancellable(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
    cancel: &CancellationFlag,
) -> Result<ExtractionOutput, RegisterError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    // ── Step 2: Build the agent ladder ───────────────────────────────────
    let agents = AgentSet::from_config(config)?;

    // ── Step 3: Open the document ────────────────────────────────────────
    let metadata = render::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    info!("PDF has {} pages", metadata.page_count);
    let mut source = PdfPageSource::with_page_count(&pdf_path, metadata.page_count, config)?;

    // ── Step 4: Run every page ───────────────────────────────────────────
    let mut output = extract_with_agents(&mut source, agents, config, cancel).await;
    output.metadata = Some(metadata);
    Ok(output)
}

/// Run an arbitrary page source through an explicit agent ladder.
///
/// This is the seam hosts and tests use to plug in their own sources
/// and agents; nothing here touches the network or the file system
/// beyond what the source and agents do.
pub async fn extract_with_agents(
    source: &mut dyn DocumentSource,
    agents: AgentSet,
    config: &ExtractionConfig,
    cancel: &CancellationFlag,
) -> ExtractionOutput {
    let events = events_for(config);
    events.info(None, format!("Processing {} pages", source.page_count()));

    let limit = Duration::from_secs(config.timeouts.pipeline_secs);
    let pipeline = DocumentPipeline::new(PagePipeline::new(agents, limit));
    let output = pipeline.run(source, &events, cancel).await;

    if output.stats.failed_pages > 0 {
        warn!(
            "{} of {} pages produced no records",
            output.stats.failed_pages, output.stats.total_pages
        );
    }
    output
}

/// Extract, but only on behalf of the one authorised requester.
///
/// Anyone else gets `Ok(None)` and no work is done. With no policy
/// configured nobody is authorised.
pub async fn extract_for_requester(
    requester: &str,
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<Option<ExtractionOutput>, RegisterError> {
    if !config.access.is_authorized(requester) {
        info!("Ignoring request from unauthorised requester '{}'", requester);
        return Ok(None);
    }
    extract(input_str, config).await.map(Some)
}

/// Extract and write the output as pretty JSON to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, RegisterError> {
    let output = extract(input_str, config).await?;
    write_json_atomic(output_path.as_ref(), &output).await?;
    Ok(output.stats)
}

pub(crate) async fn write_json_atomic(
    path: &Path,
    output: &ExtractionOutput,
) -> Result<(), RegisterError> {
    let write_failed = |e: std::io::Error| RegisterError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| RegisterError::Internal(format!("JSON serialisation failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, RegisterError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RegisterError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Read PDF metadata (page count, producer…) without running any agent.
pub async fn inspect(
    input_str: impl AsRef<str>,
    password: Option<&str>,
) -> Result<DocumentMetadata, RegisterError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    render::extract_metadata(resolved.path(), password).await
}

/// Extract from PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed on
/// return or panic.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, RegisterError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("parivar-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| RegisterError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| RegisterError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `extract` returns
    extract(&path, config).await
}

pub(crate) fn events_for(config: &ExtractionConfig) -> Events {
    match config.event_sink {
        Some(ref sink) => Events::new(Arc::clone(sink)),
        None => Events::new(Arc::new(NoopSink)),
    }
}
