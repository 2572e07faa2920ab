//! Input validation: make sure the document path points at a readable PDF.
//!
//! Inside a run, a page that fails to render means "end of document". That
//! rule would turn a typo in the path into a silent zero-page run which
//! then wipes the document's stored results, so the entry points check the
//! file up front and fail loudly instead.

use crate::error::EtlError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn validate_document(path: &Path) -> Result<PathBuf, EtlError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(EtlError::FileNotFound { path });
    }

    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(EtlError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(EtlError::FileNotFound { path });
        }
    };

    // Files shorter than the magic are rejected too; missing bytes stay zero.
    let mut head = Vec::with_capacity(4);
    if let Err(e) = file.take(4).read_to_end(&mut head) {
        return Err(if e.kind() == std::io::ErrorKind::PermissionDenied {
            EtlError::PermissionDenied { path }
        } else {
            EtlError::FileNotFound { path }
        });
    }
    let mut magic = [0u8; 4];
    magic[..head.len()].copy_from_slice(&head);
    if &magic != b"%PDF" {
        return Err(EtlError::NotAPdf { path, magic });
    }

    debug!("Validated document: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let err = validate_document(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, EtlError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04rest").unwrap();
        let err = validate_document(tmp.path()).unwrap_err();
        assert!(matches!(err, EtlError::NotAPdf { magic, .. } if &magic == b"PK\x03\x04"));
    }

    #[test]
    fn empty_file_is_not_a_pdf() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = validate_document(tmp.path()).unwrap_err();
        assert!(matches!(err, EtlError::NotAPdf { magic, .. } if magic == [0; 4]));
    }

    #[test]
    fn truncated_file_is_not_a_pdf() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK").unwrap();
        let err = validate_document(tmp.path()).unwrap_err();
        assert!(matches!(err, EtlError::NotAPdf { magic, .. } if &magic == b"PK\0\0"));

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PD").unwrap();
        assert!(matches!(
            validate_document(tmp.path()),
            Err(EtlError::NotAPdf { .. })
        ));
    }

    #[test]
    fn pdf_magic_accepted() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(validate_document(tmp.path()).unwrap(), tmp.path());
    }
}
