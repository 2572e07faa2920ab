//! The run state machine: resume, extract, aggregate, persist.
//!
//! ```text
//! Init ──▶ ResolveResume ──▶ Extracting(page)* ──▶ Aggregating ──▶ Persisting ──▶ Done
//! ```
//!
//! Pages are processed strictly one at a time, and within a page one slice
//! at a time. A page's checkpoint is written only after all of its slices
//! came back, so every failure leaves the checkpoint set at a page boundary
//! and the next run resumes from there.
//!
//! Every collaborator is injected as a trait object, so tests drive the
//! whole machine with in-memory fakes.

use crate::checkpoint::{resolve_resume, CheckpointStore};
use crate::config::PipelineConfig;
use crate::error::EtlError;
use crate::output::{Block, DocumentId, Event, RunOutput, RunStats};
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::encode::{encode_png, slice_file_name};
use crate::pipeline::ocr::{ingest, OcrEngine, SliceRequest};
use crate::pipeline::render::{page_stream, PageImage, PageSource};
use crate::pipeline::slice::slice_page;
use crate::progress::RunProgressCallback;
use crate::store::ResultStore;
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// States of one run, reported through [`RunProgressCallback::on_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    ResolveResume,
    Extracting { page: usize },
    Aggregating,
    Persisting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => f.write_str("init"),
            RunState::ResolveResume => f.write_str("resolve-resume"),
            RunState::Extracting { page } => write!(f, "extracting page {page}"),
            RunState::Aggregating => f.write_str("aggregating"),
            RunState::Persisting => f.write_str("persisting"),
            RunState::Done => f.write_str("done"),
        }
    }
}

/// Cooperative cancellation flag shared between a [`Pipeline`] and its caller.
///
/// The driver checks it before each page and before each checkpoint write.
/// Once set it stays set; build a new handle for the next run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One document-to-events run, wired to its page source, OCR engine and stores.
pub struct Pipeline {
    config: PipelineConfig,
    pages: Arc<dyn PageSource>,
    ocr: Arc<dyn OcrEngine>,
    checkpoints: Arc<dyn CheckpointStore>,
    results: Arc<dyn ResultStore>,
    cancel: CancelHandle,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        pages: Arc<dyn PageSource>,
        ocr: Arc<dyn OcrEngine>,
        checkpoints: Arc<dyn CheckpointStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            config,
            pages,
            ocr,
            checkpoints,
            results,
            cancel: CancelHandle::new(),
        }
    }

    /// Use an existing cancellation flag, e.g. one a signal handler holds.
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the configured page range of `document` to completion.
    ///
    /// # Errors
    /// Any OCR transport failure, checkpoint I/O error or store error aborts
    /// the run. Checkpoints written before the failure stay valid; running
    /// again resumes after them.
    pub async fn run(&self, document: impl AsRef<Path>) -> Result<RunOutput, EtlError> {
        let total_start = Instant::now();
        let path = document.as_ref().to_path_buf();
        let doc = DocumentId::from_path(&path);
        let range = self.config.pages;
        let range_tag = range.tag();
        info!("Starting run: {} (pages {})", doc, range);
        self.notify(|cb| cb.on_run_start(range));

        // ── Init ─────────────────────────────────────────────────────────
        self.enter(RunState::Init);
        // A resumed run keeps the stored results until Persisting replaces them.
        if self.checkpoints.list_pages(&doc)?.is_empty() {
            self.results.clear_prior_results(doc.as_str())?;
        }

        // ── ResolveResume ────────────────────────────────────────────────
        self.enter(RunState::ResolveResume);
        let resume = resolve_resume(
            self.checkpoints.as_ref(),
            &doc,
            range,
            self.config.resume_policy,
        )?;
        let mut stats = RunStats {
            pages_restored: resume.restored.len(),
            dropped_checkpoint: resume.dropped,
            ..Default::default()
        };
        let mut last_checkpoint = resume.restored.last().map(|(page, _)| *page);
        let mut blocks: Vec<Block> = Vec::new();
        for (page, page_blocks) in resume.restored {
            self.notify(|cb| cb.on_page_restored(page, page_blocks.len()));
            blocks.extend(page_blocks);
        }

        // ── Extracting ───────────────────────────────────────────────────
        let extract_start = Instant::now();
        let pages = page_stream(
            Arc::clone(&self.pages),
            path.clone(),
            self.config.dpi,
            range.starting_at(resume.resume_from),
        );
        let mut pages = std::pin::pin!(pages);
        loop {
            self.check_cancelled(last_checkpoint)?;
            let Some(page) = pages.next().await else {
                break;
            };
            self.enter(RunState::Extracting { page: page.index });

            let page_blocks = self.extract_page(&page, &mut stats).await?;

            self.check_cancelled(last_checkpoint)?;
            self.checkpoints.save(&doc, page.index, &page_blocks)?;
            last_checkpoint = Some(page.index);
            stats.pages_extracted += 1;
            info!("Page {} done: {} blocks", page.index, page_blocks.len());
            self.notify(|cb| cb.on_page_complete(page.index, page_blocks.len()));
            blocks.extend(page_blocks);
        }
        stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        // ── Aggregating ──────────────────────────────────────────────────
        self.enter(RunState::Aggregating);
        let events: Vec<Event> = aggregate(&blocks)
            .into_iter()
            .map(|dated| Event::from_dated(dated, &doc, &range_tag))
            .collect();

        // ── Persisting ───────────────────────────────────────────────────
        self.enter(RunState::Persisting);
        self.results
            .replace_results(doc.as_str(), &range_tag, &blocks, &events)?;

        if self.config.purge_checkpoints_on_success {
            let removed = self.checkpoints.clear(&doc)?;
            debug!("Purged {} checkpoint(s) of {}", removed, doc);
        }

        self.enter(RunState::Done);
        stats.total_blocks = blocks.len();
        stats.total_events = events.len();
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Run complete: {} restored + {} extracted page(s), {} blocks, {} events, {}ms",
            stats.pages_restored,
            stats.pages_extracted,
            stats.total_blocks,
            stats.total_events,
            stats.total_duration_ms
        );
        self.notify(|cb| cb.on_run_complete(&stats));

        Ok(RunOutput {
            document: doc,
            range_tag,
            blocks,
            events,
            stats,
        })
    }

    /// Slice, encode and OCR one page; blocks come back in slice order.
    async fn extract_page(
        &self,
        page: &PageImage,
        stats: &mut RunStats,
    ) -> Result<Vec<Block>, EtlError> {
        self.notify(|cb| cb.on_page_start(page.index));
        let mut page_blocks = Vec::new();

        for (i, slice) in slice_page(page, self.config.slice_order)
            .into_iter()
            .enumerate()
        {
            let png = encode_png(&slice.image).map_err(|e| EtlError::EncodeFailed {
                page: slice.page,
                detail: e.to_string(),
            })?;
            let request = SliceRequest {
                page: slice.page,
                side: slice.side,
                file_name: slice_file_name(slice.page, i + 1),
                png,
            };
            debug!(
                "Sending {} ({} half, {} bytes)",
                request.file_name,
                request.side,
                request.png.len()
            );

            let recognized = ingest(self.ocr.recognize(&request).await?, slice.page);
            stats.slices_sent += 1;
            debug!(
                "Page {} {} half: {} blocks",
                slice.page,
                slice.side,
                recognized.len()
            );
            self.notify(|cb| cb.on_slice_complete(slice.page, slice.side, recognized.len()));
            page_blocks.extend(recognized);
        }

        Ok(page_blocks)
    }

    fn enter(&self, state: RunState) {
        debug!("Run state → {}", state);
        self.notify(|cb| cb.on_state(state));
    }

    fn notify(&self, f: impl FnOnce(&dyn RunProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            f(cb.as_ref());
        }
    }

    fn check_cancelled(&self, last_checkpoint: Option<usize>) -> Result<(), EtlError> {
        if self.cancel.is_cancelled() {
            info!("Run cancelled (last checkpointed page: {:?})", last_checkpoint);
            return Err(EtlError::Cancelled { last_checkpoint });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::PageRange;
    use crate::store::{EventQuery, SqliteResultStore};
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::sync::Mutex;

    struct Pages(usize);

    impl PageSource for Pages {
        fn render_page(&self, _document: &Path, page: usize, _dpi: u32) -> Option<DynamicImage> {
            (page <= self.0).then(|| DynamicImage::ImageRgb8(RgbImage::new(8, 4)))
        }
    }

    /// Answers every slice with a date marker and one line naming the slice.
    struct EchoOcr;

    #[async_trait]
    impl OcrEngine for EchoOcr {
        async fn recognize(&self, request: &SliceRequest) -> Result<Vec<Block>, EtlError> {
            Ok(vec![
                Block::text(format!("1950/1/{}", request.page)),
                Block::text(request.file_name.clone()),
            ])
        }
    }

    #[derive(Default)]
    struct States(Mutex<Vec<RunState>>);

    impl RunProgressCallback for States {
        fn on_state(&self, state: RunState) {
            self.0.lock().unwrap().push(state);
        }
    }

    fn pipeline(
        pages: usize,
        config: PipelineConfig,
    ) -> (Pipeline, Arc<MemoryCheckpointStore>, Arc<SqliteResultStore>) {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let results = Arc::new(SqliteResultStore::open_in_memory().unwrap());
        let p = Pipeline::new(
            config,
            Arc::new(Pages(pages)),
            Arc::new(EchoOcr),
            checkpoints.clone(),
            results.clone(),
        );
        (p, checkpoints, results)
    }

    #[tokio::test]
    async fn walks_every_state_in_order() {
        let states = Arc::new(States::default());
        let config = PipelineConfig::builder()
            .progress_callback(states.clone())
            .build()
            .unwrap();
        let (p, _, _) = pipeline(2, config);
        p.run("doc.pdf").await.unwrap();

        assert_eq!(
            *states.0.lock().unwrap(),
            vec![
                RunState::Init,
                RunState::ResolveResume,
                RunState::Extracting { page: 1 },
                RunState::Extracting { page: 2 },
                RunState::Aggregating,
                RunState::Persisting,
                RunState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn run_checkpoints_and_persists() {
        let (p, checkpoints, results) = pipeline(2, PipelineConfig::default());
        let out = p.run("doc.pdf").await.unwrap();

        let doc = DocumentId::new("doc.pdf");
        assert_eq!(checkpoints.list_pages(&doc).unwrap(), vec![1, 2]);
        assert_eq!(out.stats.pages_extracted, 2);
        assert_eq!(out.stats.slices_sent, 4);
        assert_eq!(out.range_tag, "1-");
        // Right half first: half1 is the right side.
        assert_eq!(out.blocks[1].text, "page1_half1.png");
        assert!(out.blocks.iter().all(|b| b.page >= 1));

        let stored = results.events(&EventQuery::default()).unwrap();
        assert_eq!(stored.len(), out.events.len());
        assert_eq!(results.raw_results("doc.pdf").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_writes_nothing() {
        let (p, checkpoints, _) = pipeline(3, PipelineConfig::default());
        p.cancel_handle().cancel();
        let err = p.run("doc.pdf").await.unwrap_err();
        assert!(matches!(
            err,
            EtlError::Cancelled {
                last_checkpoint: None
            }
        ));
        assert!(checkpoints
            .list_pages(&DocumentId::new("doc.pdf"))
            .unwrap()
            .is_empty());
    }

    struct CancelAfterFirstPage(CancelHandle);

    impl RunProgressCallback for CancelAfterFirstPage {
        fn on_page_complete(&self, _page: usize, _blocks: usize) {
            self.0.cancel();
        }
    }

    #[tokio::test]
    async fn cancellation_keeps_written_checkpoints() {
        let handle = CancelHandle::new();
        let config = PipelineConfig::builder()
            .progress_callback(Arc::new(CancelAfterFirstPage(handle.clone())))
            .build()
            .unwrap();
        let (p, checkpoints, _) = pipeline(3, config);
        let p = p.with_cancel_handle(handle);

        let err = p.run("doc.pdf").await.unwrap_err();
        assert!(matches!(
            err,
            EtlError::Cancelled {
                last_checkpoint: Some(1)
            }
        ));
        assert_eq!(
            checkpoints.list_pages(&DocumentId::new("doc.pdf")).unwrap(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn purge_removes_checkpoints_after_success() {
        let config = PipelineConfig::builder()
            .purge_checkpoints_on_success(true)
            .pages(PageRange::new(1, Some(1)))
            .build()
            .unwrap();
        let (p, checkpoints, _) = pipeline(3, config);
        let out = p.run("doc.pdf").await.unwrap();
        assert_eq!(out.stats.pages_extracted, 1);
        assert!(checkpoints
            .list_pages(&DocumentId::new("doc.pdf"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::Extracting { page: 4 }.to_string(), "extracting page 4");
        assert_eq!(RunState::ResolveResume.to_string(), "resolve-resume");
    }
}
