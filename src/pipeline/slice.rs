//! Page slicing: split a rendered page at its vertical midline.
//!
//! Scanned chronicles are typically two-up spreads or two-column pages. The
//! OCR model reads a single column far more reliably than a full spread, so
//! each page is cut into a left and a right half and the halves are sent
//! separately, in reading order.

use crate::config::SliceOrder;
use crate::pipeline::render::PageImage;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the page a slice covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// One half of a page image.
#[derive(Debug, Clone)]
pub struct Slice {
    /// 1-based page index the slice came from.
    pub page: usize,
    pub side: Side,
    pub image: DynamicImage,
}

/// Split `page` into two halves, yielded in `order`.
///
/// The left half spans `[0, w/2)`, the right half `[w/2, w)`; for odd widths
/// the extra column goes to the right half.
pub fn slice_page(page: &PageImage, order: SliceOrder) -> [Slice; 2] {
    let (w, h) = page.image.dimensions();
    let mid = w / 2;

    let left = Slice {
        page: page.index,
        side: Side::Left,
        image: page.image.crop_imm(0, 0, mid, h),
    };
    let right = Slice {
        page: page.index,
        side: Side::Right,
        image: page.image.crop_imm(mid, 0, w - mid, h),
    };

    match order {
        SliceOrder::RightFirst => [right, left],
        SliceOrder::LeftFirst => [left, right],
    }
}
