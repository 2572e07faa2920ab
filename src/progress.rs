//! Progress-callback trait for per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the driver restores, renders and OCRs each page.
//!
//! # Example
//!
//! ```rust
//! use scan2events::{PipelineConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for PageCounter {
//!     fn on_page_complete(&self, page: usize, blocks: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page}: {blocks} blocks");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PageCounter { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::PageRange;
use crate::driver::RunState;
use crate::output::RunStats;
use crate::pipeline::slice::Side;
use std::sync::Arc;

/// Called by the driver as a run progresses.
///
/// Runs are sequential, so calls never overlap, but the callback may be
/// invoked from whichever Tokio worker drives the run; implementations must
/// be `Send + Sync`. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before anything else, with the requested range.
    fn on_run_start(&self, range: PageRange) {
        let _ = range;
    }

    /// Called on every state-machine transition.
    fn on_state(&self, state: RunState) {
        let _ = state;
    }

    /// Called for each page reloaded from a checkpoint.
    fn on_page_restored(&self, page: usize, blocks: usize) {
        let _ = (page, blocks);
    }

    /// Called after a page has rendered, before its first slice is sent.
    fn on_page_start(&self, page: usize) {
        let _ = page;
    }

    /// Called when one slice came back from OCR.
    fn on_slice_complete(&self, page: usize, side: Side, blocks: usize) {
        let _ = (page, side, blocks);
    }

    /// Called once a page's checkpoint has been written.
    fn on_page_complete(&self, page: usize, blocks: usize) {
        let _ = (page, blocks);
    }

    /// Called once after results are persisted.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        restored: AtomicUsize,
        slices: AtomicUsize,
        completed: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_page_restored(&self, _page: usize, _blocks: usize) {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slice_complete(&self, _page: usize, _side: Side, _blocks: usize) {
            self.slices.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page: usize, _blocks: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(PageRange::default());
        cb.on_state(RunState::Init);
        cb.on_page_restored(1, 4);
        cb.on_page_start(2);
        cb.on_slice_complete(2, Side::Right, 3);
        cb.on_page_complete(2, 6);
        cb.on_run_complete(&RunStats::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_restored(1, 2);
        tracker.on_slice_complete(2, Side::Right, 1);
        tracker.on_slice_complete(2, Side::Left, 1);
        tracker.on_page_complete(2, 2);

        assert_eq!(tracker.restored.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.slices.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_page_start(1);
    }
}
