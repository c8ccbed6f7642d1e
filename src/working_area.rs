//! The per-message working area: where intermediate PDFs live before merging.
//!
//! Layout:
//!
//! ```text
//! <working area>/
//!   000-body.pdf
//!   001-attachment1.pdf
//!   003-attachment3.pdf      ← gaps are failed or unsupported items
//!   manifest.json            ← written once, after every artifact settled
//!   img/                     ← transient image files (deleted on drop)
//! ```
//!
//! File names carry the zero-padded sequence index so a directory listing
//! sorts in merge order; the manifest is still the authority when present.

use crate::error::Eml2PdfError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

/// Name of the manifest file inside a working area.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Subdirectory holding transient image files.
const IMAGE_DIR: &str = "img";

/// `NNN-name.pdf`, capturing the index and the artifact name.
static ARTIFACT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3,})-(.+)\.pdf$").expect("static regex"));

/// Where the intermediate PDFs of one run are kept.
#[derive(Debug)]
pub enum WorkingArea {
    /// A caller-chosen directory; never deleted by the library.
    Persistent(PathBuf),
    /// A temporary directory, removed when dropped unless [`kept`](Self::keep).
    Temporary(TempDir),
}

impl WorkingArea {
    /// Create a fresh temporary working area.
    pub fn temporary() -> Result<Self, Eml2PdfError> {
        let dir = tempfile::Builder::new()
            .prefix("eml2pdf-work-")
            .tempdir()
            .map_err(|e| Eml2PdfError::WorkingArea {
                path: std::env::temp_dir(),
                source: e,
            })?;
        Ok(WorkingArea::Temporary(dir))
    }

    /// Use `dir` as the working area.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        WorkingArea::Persistent(dir.into())
    }

    pub fn path(&self) -> &Path {
        match self {
            WorkingArea::Persistent(p) => p,
            WorkingArea::Temporary(t) => t.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, WorkingArea::Temporary(_))
    }

    /// Give up automatic deletion and return the directory path.
    pub fn keep(self) -> PathBuf {
        match self {
            WorkingArea::Persistent(p) => p,
            WorkingArea::Temporary(t) => t.keep(),
        }
    }
}

/// Create the working area and clear what an earlier run left behind.
///
/// Only files this crate writes are removed (`NNN-*.pdf`, `*.pdf.tmp`, the
/// manifest and the image subdirectory); anything else is left alone.
pub async fn prepare(dir: &Path) -> Result<(), Eml2PdfError> {
    let io_err = |e| Eml2PdfError::WorkingArea {
        path: dir.to_path_buf(),
        source: e,
    };

    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = ARTIFACT_FILE.is_match(&name)
            || name.ends_with(".pdf.tmp")
            || name == MANIFEST_FILE;
        if stale && entry.file_type().await.map_err(io_err)?.is_file() {
            tokio::fs::remove_file(entry.path()).await.map_err(io_err)?;
            removed += 1;
        }
    }

    let images = dir.join(IMAGE_DIR);
    if tokio::fs::metadata(&images).await.is_ok() {
        tokio::fs::remove_dir_all(&images).await.map_err(io_err)?;
    }
    tokio::fs::create_dir_all(&images).await.map_err(io_err)?;

    if removed > 0 {
        debug!("Removed {} stale files from {}", removed, dir.display());
    }
    Ok(())
}

/// On-disk file name for an artifact.
pub fn artifact_file_name(index: usize, name: &str) -> String {
    format!("{index:03}-{name}.pdf")
}

/// Recover `(index, name)` from a file name written by [`artifact_file_name`].
pub fn parse_artifact_file_name(file_name: &str) -> Option<(usize, String)> {
    let caps = ARTIFACT_FILE.captures(file_name)?;
    let index = caps.get(1)?.as_str().parse().ok()?;
    Some((index, caps.get(2)?.as_str().to_string()))
}

/// Write an artifact atomically (temp file + rename) and return its path.
pub async fn persist(
    dir: &Path,
    index: usize,
    name: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let path = dir.join(artifact_file_name(index, name));
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(path)
}

/// A uniquely named file for an image attachment, deleted when dropped.
pub fn image_scratch_file(dir: &Path, extension: &str) -> std::io::Result<NamedTempFile> {
    let images = dir.join(IMAGE_DIR);
    std::fs::create_dir_all(&images)?;
    tempfile::Builder::new()
        .prefix("image-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(images)
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// Record of the artifacts that converted successfully, in merge order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub message_id: Option<String>,
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub name: String,
    /// File name relative to the working area.
    pub file: String,
    pub page_count: usize,
}

impl Manifest {
    /// Entries sorted by index.
    pub fn ordered(mut self) -> Self {
        self.artifacts.sort_by_key(|e| e.index);
        self
    }
}

/// Write `manifest.json` atomically.
pub async fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), Eml2PdfError> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| Eml2PdfError::Internal(format!("serialising manifest: {e}")))?;
    let tmp_path = dir.join(format!("{MANIFEST_FILE}.tmp"));
    let io_err = |e| Eml2PdfError::WorkingArea {
        path: path.clone(),
        source: e,
    };
    tokio::fs::write(&tmp_path, json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;
    Ok(())
}

/// Read `manifest.json`; `Ok(None)` when the working area has none.
pub async fn read_manifest(dir: &Path) -> Result<Option<Manifest>, Eml2PdfError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Eml2PdfError::WorkingArea { path, source: e }),
    };
    let manifest: Manifest =
        serde_json::from_slice(&bytes).map_err(|e| Eml2PdfError::CorruptManifest {
            path,
            detail: e.to_string(),
        })?;
    Ok(Some(manifest.ordered()))
}
