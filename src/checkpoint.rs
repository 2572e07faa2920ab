//! Durable per-page checkpoints and resume resolution.
//!
//! A checkpoint holds the ingested blocks of one page of one document. It is
//! written once every slice of the page has come back from OCR, never
//! before, so "checkpoint exists" and "page fully OCR'd" mean the same
//! thing. After a crash, the next run reloads the checkpointed prefix and
//! carries on from the first page without one.

use crate::config::{PageRange, ResumePolicy};
use crate::error::EtlError;
use crate::output::{Block, DocumentId};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Keyed storage of page blocks, one record per `(document, page)`.
pub trait CheckpointStore: Send + Sync {
    fn exists(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError>;

    fn load(&self, document: &DocumentId, page: usize) -> Result<Vec<Block>, EtlError>;

    /// Write (or overwrite) the page's record atomically.
    fn save(&self, document: &DocumentId, page: usize, blocks: &[Block]) -> Result<(), EtlError>;

    /// Checkpointed pages of `document`, ascending.
    fn list_pages(&self, document: &DocumentId) -> Result<Vec<usize>, EtlError>;

    /// Remove one record; `false` if there was none.
    fn delete(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError>;

    /// Remove the highest-indexed record, returning its page.
    fn delete_last(&self, document: &DocumentId) -> Result<Option<usize>, EtlError> {
        match self.list_pages(document)?.last().copied() {
            Some(page) => {
                self.delete(document, page)?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Remove every record of `document`, returning how many were removed.
    fn clear(&self, document: &DocumentId) -> Result<usize, EtlError> {
        let mut removed = 0;
        for page in self.list_pages(document)? {
            if self.delete(document, page)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ── Resume ───────────────────────────────────────────────────────────────

/// Where a run picks up, and what it already has.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Reloaded pages, ascending and contiguous from the range start.
    pub restored: Vec<(usize, Vec<Block>)>,
    /// First page to render and OCR.
    pub resume_from: usize,
    /// Checkpoint deleted by [`ResumePolicy::DropLast`], if any.
    pub dropped: Option<usize>,
}

/// Work out how much of `range` is already done for `document`.
///
/// Only checkpoints inside `range` are considered. Under
/// [`ResumePolicy::DropLast`] the highest of them is deleted first, so that
/// page is always redone. The remaining pages are reloaded as long as they
/// run contiguously from `range.from`; extraction resumes right after the
/// last reloaded page. Pages past a gap are redone and their checkpoints
/// overwritten.
pub fn resolve_resume(
    store: &dyn CheckpointStore,
    document: &DocumentId,
    range: PageRange,
    policy: ResumePolicy,
) -> Result<ResumePoint, EtlError> {
    let mut pages: Vec<usize> = store
        .list_pages(document)?
        .into_iter()
        .filter(|p| range.contains(*p))
        .collect();

    let dropped = match policy {
        ResumePolicy::DropLast => pages.pop(),
        ResumePolicy::KeepAll => None,
    };
    if let Some(page) = dropped {
        store.delete(document, page)?;
        debug!("Dropped newest checkpoint (page {}) of {}", page, document);
    }

    let contiguous = pages
        .iter()
        .enumerate()
        .take_while(|(i, p)| **p == range.from + i)
        .count();
    if contiguous < pages.len() {
        warn!(
            "Checkpoints of {} have a gap after page {}; {} later page(s) will be redone",
            document,
            pages.get(contiguous.wrapping_sub(1)).map_or(range.from, |p| *p),
            pages.len() - contiguous
        );
        pages.truncate(contiguous);
    }

    let resume_from = pages.last().map_or(range.from, |p| p + 1);
    let restored = pages
        .into_iter()
        .map(|p| Ok((p, store.load(document, p)?)))
        .collect::<Result<Vec<_>, EtlError>>()?;

    if !restored.is_empty() {
        info!(
            "Resuming {} at page {} ({} page(s) restored)",
            document,
            resume_from,
            restored.len()
        );
    }

    Ok(ResumePoint {
        restored,
        resume_from,
        dropped,
    })
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// Checkpoints as JSON files: `<root>/<escaped document id>/page_NNNN.json`.
///
/// Saves go through a temp file in the same directory followed by a rename,
/// so a reader sees either the old record or the new one, never a torn
/// write.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document: &DocumentId) -> PathBuf {
        self.root.join(escape_id(document.as_str()))
    }

    fn page_path(&self, document: &DocumentId, page: usize) -> PathBuf {
        self.document_dir(document)
            .join(format!("page_{page:04}.json"))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn exists(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError> {
        Ok(self.page_path(document, page).is_file())
    }

    fn load(&self, document: &DocumentId, page: usize) -> Result<Vec<Block>, EtlError> {
        let path = self.page_path(document, page);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EtlError::CheckpointMissing {
                    document: document.to_string(),
                    page,
                });
            }
            Err(source) => return Err(EtlError::CheckpointIo { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|e| EtlError::CheckpointCorrupt {
            path,
            detail: e.to_string(),
        })
    }

    fn save(&self, document: &DocumentId, page: usize, blocks: &[Block]) -> Result<(), EtlError> {
        let dir = self.document_dir(document);
        let path = self.page_path(document, page);
        let io_err = |source| EtlError::CheckpointIo {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let json = serde_json::to_vec(blocks)
            .map_err(|e| EtlError::Internal(format!("serialise checkpoint: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!("Checkpointed page {} ({} blocks) → {}", page, blocks.len(), path.display());
        Ok(())
    }

    fn list_pages(&self, document: &DocumentId) -> Result<Vec<usize>, EtlError> {
        let dir = self.document_dir(document);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EtlError::CheckpointIo { path: dir, source }),
        };

        let mut pages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EtlError::CheckpointIo {
                path: dir.clone(),
                source,
            })?;
            if let Some(page) = parse_page_file_name(&entry.file_name().to_string_lossy()) {
                pages.push(page);
            }
        }
        pages.sort_unstable();
        Ok(pages)
    }

    fn delete(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError> {
        let path = self.page_path(document, page);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(EtlError::CheckpointIo { path, source }),
        }
    }

    fn clear(&self, document: &DocumentId) -> Result<usize, EtlError> {
        let mut removed = 0;
        for page in self.list_pages(document)? {
            if self.delete(document, page)? {
                removed += 1;
            }
        }
        // Only succeeds once the directory is empty; leftovers are harmless.
        let _ = std::fs::remove_dir(self.document_dir(document));
        Ok(removed)
    }
}

fn parse_page_file_name(name: &str) -> Option<usize> {
    name.strip_prefix("page_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Injective, filesystem-safe rendering of a document id.
///
/// ASCII alphanumerics, `-` and non-leading `.` are kept; every other byte
/// becomes `_XX`. The empty id maps to a lone `_`.
fn escape_id(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(id.len());
    for (i, b) in id.bytes().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(b as char),
            b'.' if i > 0 => out.push('.'),
            _ => out.push_str(&format!("_{b:02X}")),
        }
    }
    out
}

// ── In-memory store ──────────────────────────────────────────────────────

/// Checkpoints held in memory; for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    pages: Mutex<BTreeMap<(DocumentId, usize), Vec<Block>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pages<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<(DocumentId, usize), Vec<Block>>) -> T,
    ) -> Result<T, EtlError> {
        let mut guard = self
            .pages
            .lock()
            .map_err(|_| EtlError::Internal("checkpoint store lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn exists(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError> {
        self.with_pages(|m| m.contains_key(&(document.clone(), page)))
    }

    fn load(&self, document: &DocumentId, page: usize) -> Result<Vec<Block>, EtlError> {
        self.with_pages(|m| m.get(&(document.clone(), page)).cloned())?
            .ok_or_else(|| EtlError::CheckpointMissing {
                document: document.to_string(),
                page,
            })
    }

    fn save(&self, document: &DocumentId, page: usize, blocks: &[Block]) -> Result<(), EtlError> {
        self.with_pages(|m| {
            m.insert((document.clone(), page), blocks.to_vec());
        })
    }

    fn list_pages(&self, document: &DocumentId) -> Result<Vec<usize>, EtlError> {
        self.with_pages(|m| {
            m.keys()
                .filter(|(doc, _)| doc == document)
                .map(|(_, page)| *page)
                .collect()
        })
    }

    fn delete(&self, document: &DocumentId, page: usize) -> Result<bool, EtlError> {
        self.with_pages(|m| m.remove(&(document.clone(), page)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        DocumentId::new("data/input_pdfs/attacks.pdf")
    }

    fn blocks(page: usize) -> Vec<Block> {
        vec![Block::text(format!("p{page}")).on_page(page)]
    }

    fn seeded(store: &dyn CheckpointStore, pages: &[usize]) {
        for &p in pages {
            store.save(&doc(), p, &blocks(p)).unwrap();
        }
    }

    // ── Filesystem store ─────────────────────────────────────────────────

    #[test]
    fn fs_save_load_list_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        assert!(store.list_pages(&doc()).unwrap().is_empty());

        seeded(&store, &[3, 1, 2]);
        assert_eq!(store.list_pages(&doc()).unwrap(), vec![1, 2, 3]);
        assert!(store.exists(&doc(), 2).unwrap());
        assert_eq!(store.load(&doc(), 2).unwrap(), blocks(2));

        assert_eq!(store.delete_last(&doc()).unwrap(), Some(3));
        assert!(!store.exists(&doc(), 3).unwrap());
        assert!(!store.delete(&doc(), 3).unwrap());
        assert_eq!(store.clear(&doc()).unwrap(), 2);
        assert_eq!(store.delete_last(&doc()).unwrap(), None);
    }

    #[test]
    fn fs_save_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        store.save(&doc(), 1, &blocks(1)).unwrap();
        store.save(&doc(), 1, &blocks(9)).unwrap();
        assert_eq!(store.load(&doc(), 1).unwrap(), blocks(9));
        assert_eq!(store.list_pages(&doc()).unwrap(), vec![1]);
    }

    #[test]
    fn fs_ignores_foreign_files_and_separates_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        seeded(&store, &[1]);
        let other = DocumentId::new("other.pdf");
        store.save(&other, 5, &blocks(5)).unwrap();

        let dir = tmp.path().join(escape_id(doc().as_str()));
        std::fs::write(dir.join("notes.txt"), "x").unwrap();
        std::fs::write(dir.join(".tmpAbc123"), "partial").unwrap();

        assert_eq!(store.list_pages(&doc()).unwrap(), vec![1]);
        assert_eq!(store.list_pages(&other).unwrap(), vec![5]);
    }

    #[test]
    fn fs_missing_and_corrupt_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        assert!(matches!(
            store.load(&doc(), 4),
            Err(EtlError::CheckpointMissing { page: 4, .. })
        ));

        seeded(&store, &[4]);
        std::fs::write(store.page_path(&doc(), 4), b"{not json").unwrap();
        assert!(matches!(
            store.load(&doc(), 4),
            Err(EtlError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn escape_is_filesystem_safe_and_injective() {
        assert_eq!(escape_id("book.pdf"), "book.pdf");
        assert_eq!(escape_id("a/b"), "a_2Fb");
        assert_ne!(escape_id("a/b"), escape_id("a_b"));
        assert_eq!(escape_id(".."), "_2E.");
        assert_eq!(escape_id(""), "_");
        assert!(!escape_id("/etc/passwd").contains('/'));
    }

    #[test]
    fn page_file_names() {
        assert_eq!(parse_page_file_name("page_0007.json"), Some(7));
        assert_eq!(parse_page_file_name("page_12345.json"), Some(12345));
        assert_eq!(parse_page_file_name("page_x.json"), None);
        assert_eq!(parse_page_file_name(".tmpXYZ"), None);
    }

    // ── Resume ───────────────────────────────────────────────────────────

    #[test]
    fn resume_without_checkpoints_starts_at_from() {
        let store = MemoryCheckpointStore::new();
        let point =
            resolve_resume(&store, &doc(), PageRange::new(11, Some(13)), ResumePolicy::DropLast)
                .unwrap();
        assert_eq!(point.resume_from, 11);
        assert!(point.restored.is_empty());
        assert_eq!(point.dropped, None);
    }

    #[test]
    fn resume_drops_the_newest_checkpoint() {
        let store = MemoryCheckpointStore::new();
        seeded(&store, &[1, 2]);
        let point =
            resolve_resume(&store, &doc(), PageRange::default(), ResumePolicy::DropLast).unwrap();
        assert_eq!(point.dropped, Some(2));
        assert_eq!(point.resume_from, 2);
        assert_eq!(point.restored, vec![(1, blocks(1))]);
        assert_eq!(store.list_pages(&doc()).unwrap(), vec![1]);
    }

    #[test]
    fn resume_with_single_checkpoint_restarts_range() {
        let store = MemoryCheckpointStore::new();
        seeded(&store, &[1]);
        let point =
            resolve_resume(&store, &doc(), PageRange::default(), ResumePolicy::DropLast).unwrap();
        assert_eq!(point.resume_from, 1);
        assert!(point.restored.is_empty());
    }

    #[test]
    fn keep_all_policy_trusts_every_checkpoint() {
        let store = MemoryCheckpointStore::new();
        seeded(&store, &[1, 2]);
        let point =
            resolve_resume(&store, &doc(), PageRange::default(), ResumePolicy::KeepAll).unwrap();
        assert_eq!(point.dropped, None);
        assert_eq!(point.resume_from, 3);
        assert_eq!(point.restored.len(), 2);
    }

    #[test]
    fn resume_ignores_pages_outside_range() {
        let store = MemoryCheckpointStore::new();
        seeded(&store, &[1, 2, 3, 4, 9]);
        let point = resolve_resume(
            &store,
            &doc(),
            PageRange::new(2, Some(4)),
            ResumePolicy::DropLast,
        )
        .unwrap();
        assert_eq!(point.dropped, Some(4));
        assert_eq!(point.resume_from, 4);
        let restored: Vec<usize> = point.restored.iter().map(|(p, _)| *p).collect();
        assert_eq!(restored, vec![2, 3]);
        // Out-of-range checkpoints are left alone.
        assert_eq!(store.list_pages(&doc()).unwrap(), vec![1, 2, 3, 9]);
    }

    #[test]
    fn resume_stops_restoring_at_a_gap() {
        let store = MemoryCheckpointStore::new();
        seeded(&store, &[1, 2, 5, 6, 7]);
        let point =
            resolve_resume(&store, &doc(), PageRange::default(), ResumePolicy::DropLast).unwrap();
        assert_eq!(point.dropped, Some(7));
        assert_eq!(point.resume_from, 3);
        assert_eq!(point.restored.len(), 2);
    }
}
