//! Documents and their derived output paths.
//!
//! A [`Document`] is identified by its source path. Every output location is
//! computed from that path alone, so a later run can find the outputs of an
//! earlier one without any ledger: the filesystem *is* the run state.

use crate::error::PdfOcrError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix appended to the stem of a searchable copy.
pub const SEARCHABLE_SUFFIX: &str = "_searchable";

/// One source PDF under the batch root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub path: PathBuf,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `report.pdf` → `report.txt`
    pub fn transcript_path(&self) -> PathBuf {
        self.path.with_extension("txt")
    }

    /// `report.pdf` → `report_searchable.pdf`
    pub fn searchable_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path
            .with_file_name(format!("{stem}{SEARCHABLE_SUFFIX}.pdf"))
    }

    /// Where the searchable PDF ends up for the given mode.
    pub fn final_pdf_path(&self, overwrite: bool) -> PathBuf {
        if overwrite {
            self.path.clone()
        } else {
            self.searchable_path()
        }
    }

    /// Path relative to `root`, for display.
    pub fn display_relative(&self, root: &Path) -> String {
        self.path
            .strip_prefix(root)
            .unwrap_or(&self.path)
            .display()
            .to_string()
    }

    /// Confirm the file starts with the `%PDF` magic bytes.
    pub fn check_magic(&self) -> Result<(), PdfOcrError> {
        use std::io::Read;
        let mut f = std::fs::File::open(&self.path).map_err(|e| PdfOcrError::DocumentUnreadable {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let mut magic = [0u8; 4];
        if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
            return Err(PdfOcrError::NotAPdf {
                path: self.path.clone(),
                magic,
            });
        }
        Ok(())
    }
}

/// True for files this crate writes itself, which must never be picked up as
/// new sources on a later run.
fn is_generated_output(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(&format!("{SEARCHABLE_SUFFIX}.pdf")) || name.ends_with(".pdf.tmp")
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Find every source PDF under `root`, recursively, in sorted path order.
///
/// # Errors
/// [`PdfOcrError::DirectoryNotFound`] / [`PdfOcrError::NotADirectory`] when
/// `root` is unusable. Unreadable subdirectories are skipped.
pub fn discover(root: &Path) -> Result<Vec<Document>, PdfOcrError> {
    if !root.exists() {
        return Err(PdfOcrError::DirectoryNotFound {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(PdfOcrError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_pdf(&path) && !is_generated_output(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    debug!("Discovered {} PDFs under {}", found.len(), root.display());
    Ok(found.into_iter().map(Document::new).collect())
}
