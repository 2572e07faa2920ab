//! Image encoding: slice `DynamicImage` → PNG bytes for the multipart upload.
//!
//! PNG is lossless; JPEG ringing around thin glyph strokes (dots and
//! diacritics in Arabic script especially) measurably hurts OCR accuracy.

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a slice as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} slice → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Upload file name for the `position`-th slice (1-based, in slice order) of `page`.
pub fn slice_file_name(page: usize, position: usize) -> String {
    format!("page{page}_half{position}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert_eq!(decoded.width(), 10);
    }

    #[test]
    fn file_names_follow_page_and_position() {
        assert_eq!(slice_file_name(12, 1), "page12_half1.png");
        assert_eq!(slice_file_name(12, 2), "page12_half2.png");
    }
}
