//! Page rendering: turn document pages into images, one at a time.
//!
//! The total page count is never queried. Pages are rendered lazily from the
//! start of the requested range and the first page that cannot be rendered
//! (past the end, damaged, unreadable) ends the stream. For open-ended ranges
//! that is the only way the run learns where the document stops.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Each page is rendered on Tokio's blocking pool so the OCR client's
//! executor thread never stalls.

use crate::config::PageRange;
use crate::error::EtlError;
use futures::stream::{self, Stream};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A rendered page, identified by its 1-based index.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub index: usize,
    pub image: DynamicImage,
}

/// Renders single pages of a document.
///
/// `None` means the page is unavailable; callers treat it as the end of the
/// document, never as an error.
pub trait PageSource: Send + Sync {
    fn render_page(&self, document: &Path, page: usize, dpi: u32) -> Option<DynamicImage>;
}

/// Lazily render `range` of `document` as a stream of pages.
///
/// The stream is finite and cannot be restarted; it ends at `range.to` or at
/// the first page `source` cannot render, whichever comes first.
pub fn page_stream(
    source: Arc<dyn PageSource>,
    document: PathBuf,
    dpi: u32,
    range: PageRange,
) -> impl Stream<Item = PageImage> + Send {
    stream::unfold(range.from, move |index| {
        let source = Arc::clone(&source);
        let document = document.clone();
        async move {
            if !range.contains(index) {
                return None;
            }
            let rendered =
                tokio::task::spawn_blocking(move || source.render_page(&document, index, dpi))
                    .await;
            match rendered {
                Ok(Some(image)) => {
                    debug!(
                        "Rendered page {} → {}x{} px",
                        index,
                        image.width(),
                        image.height()
                    );
                    Some((PageImage { index, image }, index + 1))
                }
                Ok(None) => {
                    debug!("Page {} unavailable, treating as end of document", index);
                    None
                }
                Err(e) => {
                    warn!("Render task for page {} panicked: {}", index, e);
                    None
                }
            }
        }
    })
}

/// [`PageSource`] backed by pdfium.
///
/// Binds the library from `library_path` (a file, or a directory holding the
/// platform library) or, when unset, from the system search path.
pub struct PdfiumPageSource {
    library_path: Option<PathBuf>,
    password: Option<String>,
    max_pixels: u32,
}

impl PdfiumPageSource {
    /// Create a source, failing fast if pdfium cannot be bound.
    pub fn new(
        library_path: Option<PathBuf>,
        password: Option<String>,
        max_pixels: u32,
    ) -> Result<Self, EtlError> {
        let source = Self {
            library_path,
            password,
            max_pixels,
        };
        source.bind()?;
        Ok(source)
    }

    /// Create a source honouring `PDFIUM_LIB_PATH`.
    pub fn from_env(password: Option<String>, max_pixels: u32) -> Result<Self, EtlError> {
        let library_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
        Self::new(library_path, password, max_pixels)
    }

    fn bind(&self) -> Result<Pdfium, EtlError> {
        let bindings = match &self.library_path {
            Some(p) if p.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            }
            Some(p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| EtlError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn render_blocking(&self, document: &Path, page: usize, dpi: u32) -> Result<DynamicImage, String> {
        let pdfium = self.bind().map_err(|e| e.to_string())?;
        let doc = pdfium
            .load_pdf_from_file(document, self.password.as_deref())
            .map_err(|e| format!("{:?}", e))?;

        let pages = doc.pages();
        let idx = page.checked_sub(1).ok_or("page index 0")?;
        if idx >= pages.len() as usize {
            return Err(format!("page {} beyond last page {}", page, pages.len()));
        }
        let pdf_page = pages.get(idx as u16).map_err(|e| format!("{:?}", e))?;

        let width_px = target_width(pdf_page.width().value, dpi, self.max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| format!("{:?}", e))?;
        Ok(bitmap.as_image())
    }
}

impl PageSource for PdfiumPageSource {
    fn render_page(&self, document: &Path, page: usize, dpi: u32) -> Option<DynamicImage> {
        match self.render_blocking(document, page, dpi) {
            Ok(image) => Some(image),
            Err(detail) => {
                debug!("Page {} of {} not rendered: {}", page, document.display(), detail);
                None
            }
        }
    }
}

/// Pixel width for a page `points` wide (1 pt = 1/72 in) at `dpi`, capped.
fn target_width(points: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (points * dpi as f32 / 72.0).round() as u32;
    px.clamp(1, max_pixels) as i32
}
