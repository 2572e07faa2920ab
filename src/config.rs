//! Configuration types for a scan-to-events run.
//!
//! Everything a run needs besides the document itself lives in
//! [`PipelineConfig`]: where the OCR server is, how long to wait for it, where
//! checkpoints and results go, and how pages are sliced and resumed. The
//! driver receives it at construction; nothing is read from process-wide
//! globals.

use crate::error::EtlError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default inference endpoint of a locally running OCR server.
pub const DEFAULT_OCR_ENDPOINT: &str = "http://localhost:8000/infer";

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use scan2events::{PageRange, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .pages(PageRange::new(11, Some(13)))
///     .ocr_endpoint("http://gpu-box:8000/infer")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// URL receiving the multipart image upload. Default: [`DEFAULT_OCR_ENDPOINT`].
    pub ocr_endpoint: String,

    /// Fixed per-slice OCR timeout in seconds. Default: 120.
    ///
    /// Inference on a half page routinely takes tens of seconds on a single
    /// GPU. A timeout aborts the run; there is no in-pipeline retry.
    pub ocr_timeout_secs: u64,

    /// Prompt sent as the `prompt` form field. If None, the server default is used.
    pub ocr_prompt: Option<String>,

    /// Rendering DPI. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on either rendered edge in pixels. Default: 8000.
    pub max_rendered_pixels: u32,

    /// Page range to process. Default: from page 1 to the end of the document.
    pub pages: PageRange,

    /// Order in which the two halves of a page are sent. Default: right first.
    pub slice_order: SliceOrder,

    /// Root directory of the filesystem checkpoint store. Default: `data/checkpoints`.
    pub checkpoint_dir: PathBuf,

    /// SQLite database holding raw results and events. Default: `data/sqlite.db`.
    pub database_path: PathBuf,

    /// What to do with the newest checkpoint when resuming. Default: [`ResumePolicy::DropLast`].
    pub resume_policy: ResumePolicy,

    /// Delete the document's checkpoints after a successful run. Default: false.
    pub purge_checkpoints_on_success: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Progress callback for per-page events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_timeout_secs: 120,
            ocr_prompt: None,
            dpi: 300,
            max_rendered_pixels: 8000,
            pages: PageRange::default(),
            slice_order: SliceOrder::default(),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            database_path: PathBuf::from("data/sqlite.db"),
            resume_policy: ResumePolicy::default(),
            purge_checkpoints_on_success: false,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("ocr_prompt", &self.ocr_prompt.as_ref().map(|p| p.len()))
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("slice_order", &self.slice_order)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("database_path", &self.database_path)
            .field("resume_policy", &self.resume_policy)
            .field("purge_checkpoints_on_success", &self.purge_checkpoints_on_success)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr_prompt = Some(prompt.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = range;
        self
    }

    pub fn slice_order(mut self, order: SliceOrder) -> Self {
        self.config.slice_order = order;
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_dir = dir.into();
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.config.resume_policy = policy;
        self
    }

    pub fn purge_checkpoints_on_success(mut self, v: bool) -> Self {
        self.config.purge_checkpoints_on_success = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, EtlError> {
        let c = &self.config;
        if reqwest::Url::parse(&c.ocr_endpoint).is_err() {
            return Err(EtlError::InvalidConfig(format!(
                "OCR endpoint is not a valid URL: '{}'",
                c.ocr_endpoint
            )));
        }
        if c.ocr_timeout_secs == 0 {
            return Err(EtlError::InvalidConfig(
                "OCR timeout must be ≥ 1 second".into(),
            ));
        }
        c.pages.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// An inclusive, 1-indexed page range; `to = None` runs until the document ends.
///
/// The total page count is never looked up ahead of time: an open range
/// simply stops at the first page that fails to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: usize,
    pub to: Option<usize>,
}

impl Default for PageRange {
    fn default() -> Self {
        Self { from: 1, to: None }
    }
}

impl PageRange {
    pub fn new(from: usize, to: Option<usize>) -> Self {
        Self { from, to }
    }

    /// Whether `page` lies inside the range.
    pub fn contains(&self, page: usize) -> bool {
        page >= self.from && self.to.is_none_or(|to| page <= to)
    }

    /// The same range starting at `from` instead.
    pub fn starting_at(&self, from: usize) -> Self {
        Self { from, to: self.to }
    }

    /// Tag stored alongside results: `"11-13"`, or `"11-"` for open ranges.
    pub fn tag(&self) -> String {
        match self.to {
            Some(to) => format!("{}-{}", self.from, to),
            None => format!("{}-", self.from),
        }
    }

    fn validate(&self) -> Result<(), EtlError> {
        if self.from < 1 {
            return Err(EtlError::InvalidConfig(
                "Pages are 1-indexed, from_page must be ≥ 1".into(),
            ));
        }
        if let Some(to) = self.to {
            if to < self.from {
                return Err(EtlError::InvalidConfig(format!(
                    "Invalid page range {}-{}: to_page must be ≥ from_page",
                    self.from, to
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Which half of a page goes to OCR first.
///
/// Right-to-left layouts (Arabic, Hebrew, Persian) put the first column on
/// the right, hence the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SliceOrder {
    /// Right half, then left half. (default)
    #[default]
    RightFirst,
    /// Left half, then right half.
    LeftFirst,
}

/// How the newest checkpoint is treated when a run resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Delete the highest-indexed checkpoint and redo that page. (default)
    ///
    /// A write that completed on disk but was interrupted before the process
    /// could observe it cannot be told apart from a clean one.
    #[default]
    DropLast,
    /// Trust every checkpoint as written.
    KeepAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_batch_profile() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.ocr_timeout_secs, 120);
        assert_eq!(c.ocr_endpoint, DEFAULT_OCR_ENDPOINT);
        assert_eq!(c.slice_order, SliceOrder::RightFirst);
        assert_eq!(c.resume_policy, ResumePolicy::DropLast);
        assert_eq!(c.pages, PageRange::new(1, None));
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = PipelineConfig::builder().dpi(5000).build().unwrap();
        assert_eq!(c.dpi, 600);
        let c = PipelineConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn builder_rejects_bad_endpoint() {
        let err = PipelineConfig::builder()
            .ocr_endpoint("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, EtlError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(PipelineConfig::builder().ocr_timeout_secs(0).build().is_err());
    }

    #[test]
    fn builder_rejects_inverted_range() {
        let err = PipelineConfig::builder()
            .pages(PageRange::new(5, Some(2)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("5-2"));
        assert!(PipelineConfig::builder()
            .pages(PageRange::new(0, None))
            .build()
            .is_err());
    }

    #[test]
    fn page_range_tag_and_contains() {
        let closed = PageRange::new(11, Some(13));
        assert_eq!(closed.tag(), "11-13");
        assert!(closed.contains(11));
        assert!(closed.contains(13));
        assert!(!closed.contains(14));
        assert!(!closed.contains(10));

        let open = PageRange::new(3, None);
        assert_eq!(open.to_string(), "3-");
        assert!(open.contains(10_000));
        assert_eq!(open.starting_at(7), PageRange::new(7, None));
    }
}
