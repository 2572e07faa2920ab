//! Entry points wiring the default components from a [`PipelineConfig`].
//!
//! [`process_document`] is what the CLI calls: pdfium for rendering, the HTTP
//! OCR client, JSON-file checkpoints and the SQLite result store. Callers
//! that need other backends build a [`Pipeline`] themselves.

use crate::checkpoint::{CheckpointStore, FsCheckpointStore};
use crate::config::PipelineConfig;
use crate::driver::{CancelHandle, Pipeline};
use crate::error::EtlError;
use crate::output::{DocumentId, RunOutput};
use crate::pipeline::input::validate_document;
use crate::pipeline::ocr::HttpOcrClient;
use crate::pipeline::render::PdfiumPageSource;
use crate::store::SqliteResultStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run the configured page range of the PDF at `input`.
///
/// # Errors
/// Besides the run's own fatal errors (see [`Pipeline::run`]), fails up front
/// when the file is missing, unreadable or not a PDF, or when pdfium cannot
/// be bound.
pub async fn process_document(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunOutput, EtlError> {
    process_document_with_cancel(input, config, CancelHandle::new()).await
}

/// Like [`process_document`], observing an external cancellation flag.
pub async fn process_document_with_cancel(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
    cancel: CancelHandle,
) -> Result<RunOutput, EtlError> {
    let path = validate_document(input.as_ref())?;
    let pipeline = default_pipeline(config)?.with_cancel_handle(cancel);
    info!(
        "Processing {} → {}",
        path.display(),
        config.database_path.display()
    );
    pipeline.run(&path).await
}

/// Synchronous wrapper around [`process_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_document_sync(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunOutput, EtlError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| EtlError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_document(input, config))
}

/// Pages of `input` that already have a checkpoint, ascending.
///
/// Touches neither pdfium nor the OCR server, and does not require the file
/// to still exist.
pub fn checkpoint_status(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Vec<usize>, EtlError> {
    let store = FsCheckpointStore::new(&config.checkpoint_dir);
    store.list_pages(&DocumentId::from_path(input.as_ref()))
}

fn default_pipeline(config: &PipelineConfig) -> Result<Pipeline, EtlError> {
    let pages = PdfiumPageSource::from_env(config.password.clone(), config.max_rendered_pixels)?;
    let ocr = HttpOcrClient::new(
        config.ocr_endpoint.clone(),
        config.ocr_timeout_secs,
        config.ocr_prompt.clone(),
    )?;
    let checkpoints = FsCheckpointStore::new(&config.checkpoint_dir);
    let results = SqliteResultStore::open(&config.database_path)?;

    Ok(Pipeline::new(
        config.clone(),
        Arc::new(pages),
        Arc::new(ocr),
        Arc::new(checkpoints),
        Arc::new(results),
    ))
}
