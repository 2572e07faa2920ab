//! Aggregation: fold the ordered block stream into dated events.
//!
//! The grammar is small. A date marker opens an event; the `Text` blocks
//! that follow, up to the next marker, form its body. Text before the first
//! marker has no date and is dropped, as are headers, footers, pictures and
//! every other non-`Text` category.

use crate::output::{Block, Category, DatedText};
use crate::pipeline::dates::{is_date_marker, normalize_date};

/// Streaming aggregation state.
///
/// Feed blocks in stream order with [`Aggregator::push`] and call
/// [`Aggregator::finish`] once at the end.
#[derive(Debug, Default)]
pub struct Aggregator {
    /// Raw text of the most recent marker.
    pending_date: Option<String>,
    buffer: Vec<String>,
    events: Vec<DatedText>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: &Block) {
        if is_date_marker(&block.text) {
            self.flush();
            self.pending_date = Some(block.text.trim().to_string());
        } else if block.category == Category::Text {
            self.buffer.push(block.text.trim().to_string());
        }
    }

    /// Emit the pending event if it has both a date and some body.
    ///
    /// A marker followed directly by another marker is replaced silently.
    /// Undated text in the buffer is discarded.
    pub fn flush(&mut self) {
        if let Some(date) = self.pending_date.as_deref() {
            if !self.buffer.is_empty() {
                self.events.push(DatedText {
                    date: normalize_date(date),
                    text: self.buffer.join("\n").trim().to_string(),
                });
            }
        }
        self.buffer.clear();
    }

    pub fn finish(mut self) -> Vec<DatedText> {
        self.flush();
        self.events
    }
}

/// Aggregate a complete block stream.
pub fn aggregate(blocks: &[Block]) -> Vec<DatedText> {
    let mut agg = Aggregator::new();
    for block in blocks {
        agg.push(block);
    }
    agg.finish()
}
