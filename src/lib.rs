//! # scan2events
//!
//! Turn scanned chronicle books into a table of dated events.
//!
//! ## Why this crate?
//!
//! The source documents are image-only PDFs: two-column or two-up page
//! spreads, often in right-to-left scripts, where each entry opens with a
//! date line. A layout-aware OCR model reads them well one column at a time
//! but takes tens of seconds per call, so a book is hours of inference. This
//! crate runs that inference page by page, checkpoints every finished page,
//! and resumes after any crash or network failure without redoing work.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Resume     reload checkpointed pages, find the first page to do
//!  ├─ 2. Render     rasterise one page via pdfium (spawn_blocking)
//!  ├─ 3. Slice      cut it at the vertical midline, right half first
//!  ├─ 4. OCR        POST each half to the inference server, decode blocks
//!  ├─ 5. Checkpoint persist the page's blocks atomically
//!  ├─ 6. Aggregate  fold the block stream into dated events
//!  └─ 7. Persist    replace the document's raw dump and events in SQLite
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2events::{process_document, PageRange, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .pages(PageRange::new(11, Some(13)))
//!         .build()?;
//!     let output = process_document("data/input_pdfs/chronicle.pdf", &config).await?;
//!     for event in &output.events {
//!         println!("{}  {}", event.date, event.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2events` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scan2events = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore, ResumePoint};
pub use config::{PageRange, PipelineConfig, PipelineConfigBuilder, ResumePolicy, SliceOrder};
pub use driver::{CancelHandle, Pipeline, RunState};
pub use error::{EnvelopeError, EtlError};
pub use output::{
    Block, Category, DatedText, DocumentId, Event, EventRecord, RawResult, RunOutput, RunStats,
};
pub use pipeline::ocr::{HttpOcrClient, OcrEngine, SliceRequest};
pub use pipeline::render::{PageSource, PdfiumPageSource};
pub use pipeline::slice::Side;
pub use process::{
    checkpoint_status, process_document, process_document_sync, process_document_with_cancel,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use store::{EventQuery, ResultStore, SqliteResultStore};
