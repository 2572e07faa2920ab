//! Error types for the scan2events library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EtlError`]: **Fatal.** The run cannot proceed (input missing, OCR
//!   endpoint down or timing out, checkpoint directory unwritable). Returned
//!   as `Err(EtlError)` from [`crate::driver::Pipeline::run`] and the
//!   `process_*` entry points. Checkpoints written before the failure stay
//!   valid, so the caller can simply run again to resume.
//!
//! * [`EnvelopeError`]: **Non-fatal.** The OCR server answered with an
//!   envelope whose inner `raw_output` could not be parsed. The slice yields
//!   zero blocks and the page continues.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scan2events library.
#[derive(Debug, Error)]
pub enum EtlError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install pdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// A rendered slice could not be PNG-encoded for upload.
    #[error("Failed to encode page {page} for upload: {detail}")]
    EncodeFailed { page: usize, detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR request could not be sent or the connection dropped.
    #[error("OCR request for page {page} failed: {detail}\nIs the inference server running?")]
    OcrRequest { page: usize, detail: String },

    /// The OCR call exceeded the fixed timeout.
    #[error("OCR call timed out after {secs}s on page {page}")]
    OcrTimeout { page: usize, secs: u64 },

    /// The OCR server answered with a non-success status.
    #[error("OCR server returned HTTP {status} for page {page}: {body}")]
    OcrStatus { page: usize, status: u16, body: String },

    /// The OCR response body matched none of the accepted shapes.
    #[error("Unrecognised OCR response for page {page}: {detail}")]
    OcrResponse { page: usize, detail: String },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Reading or writing a checkpoint file failed.
    #[error("Checkpoint I/O failed at '{path}': {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint exists but does not hold a JSON array of blocks.
    #[error("Checkpoint '{path}' is corrupt: {detail}\nDelete it to force re-OCR of that page.")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// A checkpoint was requested that was never written.
    #[error("No checkpoint for page {page} of '{document}'")]
    CheckpointMissing { document: String, page: usize },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The result database rejected an operation.
    #[error("Result store error: {0}")]
    Store(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled; checkpoints up to `last_checkpoint` are kept.
    #[error("Run cancelled (last checkpointed page: {last_checkpoint:?})")]
    Cancelled { last_checkpoint: Option<usize> },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for EtlError {
    fn from(e: rusqlite::Error) -> Self {
        EtlError::Store(e.to_string())
    }
}

/// A non-fatal decoding problem for one slice.
///
/// Logged as a warning; the slice contributes zero blocks.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum EnvelopeError {
    /// `raw_output` was present but is not a JSON array of blocks.
    #[error("raw_output is not a block array: {detail}")]
    InvalidPayload { detail: String },

    /// `raw_output` was present but empty.
    #[error("raw_output is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_timeout_display() {
        let e = EtlError::OcrTimeout { page: 3, secs: 120 };
        assert!(e.to_string().contains("120s"));
        assert!(e.to_string().contains("page 3"));
    }

    #[test]
    fn ocr_status_display() {
        let e = EtlError::OcrStatus {
            page: 7,
            status: 503,
            body: "model busy".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("503"), "got: {msg}");
        assert!(msg.contains("model busy"), "got: {msg}");
    }

    #[test]
    fn cancelled_display_mentions_last_page() {
        let e = EtlError::Cancelled {
            last_checkpoint: Some(4),
        };
        assert!(e.to_string().contains("Some(4)"));
    }

    #[test]
    fn sqlite_errors_become_store_errors() {
        let e: EtlError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(e, EtlError::Store(_)));
    }

    #[test]
    fn envelope_error_serialises() {
        let e = EnvelopeError::InvalidPayload {
            detail: "expected `[`".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("InvalidPayload"));
    }
}
