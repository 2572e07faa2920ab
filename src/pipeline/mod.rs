//! Pipeline stages for scan-to-events conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and swapped (another renderer, another OCR server) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ slice ──▶ encode ──▶ ocr ──▶ (checkpoint) ──▶ aggregate
//! (path)    (pdfium)   (halves)  (PNG)     (HTTP)                    (dates)
//! ```
//!
//! 1. [`input`]: validate the user-supplied document path
//! 2. [`render`]: lazily rasterise pages; runs in `spawn_blocking`
//! 3. [`slice`]: cut each page at its vertical midline
//! 4. [`encode`]: PNG-encode each half for the multipart upload
//! 5. [`ocr`]: the only stage with network I/O; decodes both response
//!    shapes and tags blocks with their page
//! 6. [`aggregate`]: fold the block stream into dated events, using the
//!    numeral and date rules in [`dates`]

pub mod aggregate;
pub mod dates;
pub mod encode;
pub mod input;
pub mod ocr;
pub mod render;
pub mod slice;
