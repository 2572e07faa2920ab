//! Data model shared by every pipeline stage: blocks in, events out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Layout category assigned to a block by the OCR model.
///
/// Serialised as the model's own label (`"List-item"`, `"Section-header"`,
/// …). Labels outside the known set are kept verbatim in [`Category::Other`]
/// so raw dumps never lose information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Caption,
    Footnote,
    Formula,
    ListItem,
    PageFooter,
    PageHeader,
    Picture,
    SectionHeader,
    Table,
    Text,
    Title,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Caption => "Caption",
            Category::Footnote => "Footnote",
            Category::Formula => "Formula",
            Category::ListItem => "List-item",
            Category::PageFooter => "Page-footer",
            Category::PageHeader => "Page-header",
            Category::Picture => "Picture",
            Category::SectionHeader => "Section-header",
            Category::Table => "Table",
            Category::Text => "Text",
            Category::Title => "Title",
            Category::Other(s) => s,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Caption" => Category::Caption,
            "Footnote" => Category::Footnote,
            "Formula" => Category::Formula,
            "List-item" => Category::ListItem,
            "Page-footer" => Category::PageFooter,
            "Page-header" => Category::PageHeader,
            "Picture" => Category::Picture,
            "Section-header" => Category::SectionHeader,
            "Table" => Category::Table,
            "Text" => Category::Text,
            "Title" => Category::Title,
            _ => Category::Other(s),
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        match c {
            Category::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OCR output unit.
///
/// `page` is absent on the wire and filled in by
/// [`crate::pipeline::ocr::ingest`]; `text` is absent for pictures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub category: Category,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl Block {
    pub fn new(category: Category, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            page: 0,
            bbox: None,
        }
    }

    /// Shorthand for a `Text` block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Category::Text, text)
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }
}

/// Identifies a document across checkpoints and stored results.
///
/// Built from the document path as given by the caller, so the same path
/// always maps to the same checkpoint namespace and `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.display().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of the aggregator before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedText {
    pub date: String,
    pub text: String,
}

/// A dated text record, the pipeline's final output unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// `YYYY/MM/DD`, or the digit-normalised marker text when it did not
    /// split into exactly three groups.
    pub date: String,
    pub text: String,
    pub source_id: String,
    pub range_tag: String,
}

impl Event {
    pub fn from_dated(dated: DatedText, source_id: &DocumentId, range_tag: &str) -> Self {
        Self {
            date: dated.date,
            text: dated.text,
            source_id: source_id.as_str().to_string(),
            range_tag: range_tag.to_string(),
        }
    }
}

/// A stored event together with its database id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    #[serde(flatten)]
    pub event: Event,
}

/// The merged block dump of one run, kept for audit and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub source_id: String,
    pub range_tag: String,
    pub blocks: Vec<Block>,
}

/// Complete result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub document: DocumentId,
    pub range_tag: String,
    /// Merged block stream, page-ascending.
    pub blocks: Vec<Block>,
    pub events: Vec<Event>,
    pub stats: RunStats,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Pages whose blocks were reloaded from checkpoints.
    pub pages_restored: usize,
    /// Pages rendered and sent through OCR in this run.
    pub pages_extracted: usize,
    /// Checkpoint discarded by the resume policy, if any.
    pub dropped_checkpoint: Option<usize>,
    pub slices_sent: usize,
    pub total_blocks: usize,
    pub total_events: usize,
    pub extract_duration_ms: u64,
    pub total_duration_ms: u64,
}
