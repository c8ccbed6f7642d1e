//! Error types for the eml2pdf library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`Eml2PdfError`]: **Fatal**: the message cannot be processed at all
//!   (unreadable file, malformed message, backend would not start, merge
//!   aborted). Returned as `Err(Eml2PdfError)` from the top-level entry points.
//!
//! * [`ArtifactError`]: **Non-fatal**: the body or one attachment failed to
//!   convert, but every sibling is unaffected. Stored inside
//!   [`crate::output::ArtifactFailure`] so callers can inspect partial
//!   success instead of losing the whole message to one bad attachment.
//!
//! * [`BackendError`]: what a [`crate::backend::ConversionBackend`]
//!   capability returns. Only [`BackendError::Fault`] is worth retrying; the
//!   other variants describe input problems that will fail the same way again.
//!
//! [`PdfError`] covers the PDF document model in [`crate::pdf`].

use crate::output::ConversionReport;
use crate::pipeline::classify::AttachmentKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the eml2pdf library.
///
/// Per-artifact failures use [`ArtifactError`] and are stored in the
/// [`crate::output::ConversionReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Eml2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Email file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes could not be parsed as an RFC 5322 message.
    #[error("Could not parse '{source_name}' as an email message: {detail}")]
    ParseFailed { source_name: String, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The conversion backend refused to start.
    #[error("Conversion backend '{backend}' failed to start: {detail}")]
    BackendStartup { backend: String, detail: String },

    // ── Working area errors ───────────────────────────────────────────────
    /// The working area could not be created, cleared or written.
    #[error("Working area '{path}' is unusable: {source}")]
    WorkingArea {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `manifest.json` exists but cannot be read back.
    #[error("Manifest '{path}' is corrupt: {detail}")]
    CorruptManifest { path: PathBuf, detail: String },

    // ── Merge errors ──────────────────────────────────────────────────────
    /// An intermediate PDF could not be opened and the merge policy is `Abort`.
    #[error("Failed to read intermediate PDF '{path}': {detail}")]
    MergeReadFailed { path: PathBuf, detail: String },

    /// The working area held no readable PDF artifacts.
    #[error("No PDF artifacts to merge in '{path}'")]
    NothingToMerge { path: PathBuf },

    /// The accumulated document could not be serialised.
    #[error("Failed to assemble merged PDF: {0}")]
    MergeFailed(String),

    /// Every artifact was attempted but the merge did not complete. The
    /// report is kept so per-artifact failures are not lost.
    #[error("Merge failed; artifacts left in '{}': {source}", report.working_area.display())]
    MergeIncomplete {
        report: Box<ConversionReport>,
        #[source]
        source: Box<Eml2PdfError>,
    },

    /// Some artifacts succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::ConversionReport::into_result`] when the
    /// caller wants to treat any artifact failure as an error.
    #[error("{failed}/{total} artifacts failed during conversion")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the merged output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single artifact.
///
/// The overall conversion continues; the message's artifact set is simply
/// smaller.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactError {
    /// HTML-to-PDF rendering of the message body failed.
    #[error("body: rendering failed after {retries} retries: {detail}")]
    RenderFailed { retries: u32, detail: String },

    /// An attachment could not be converted.
    #[error("attachment {position} ('{filename}', {attachment_kind}): conversion failed after {retries} retries: {detail}")]
    ConversionFailed {
        position: usize,
        filename: String,
        attachment_kind: AttachmentKind,
        retries: u32,
        detail: String,
    },

    /// The converted PDF could not be written to the working area.
    #[error("{name}: could not persist artifact: {detail}")]
    PersistFailed { name: String, detail: String },
}

impl ArtifactError {
    /// Short machine-readable label used in structured log records.
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactError::RenderFailed { .. } => "render",
            ArtifactError::ConversionFailed { .. } => "conversion",
            ArtifactError::PersistFailed { .. } => "persist",
        }
    }
}

/// Failure reported by a conversion backend capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The input itself is unusable (corrupt PDF, unsupported image, …).
    #[error("input rejected: {0}")]
    Rejected(String),

    /// Lower-level engine failure; transient until proven otherwise.
    #[error("backend fault: {0}")]
    Fault(String),

    /// The external tool this capability needs is not installed.
    #[error("required tool '{tool}' is not available\nInstall it or point eml2pdf at it explicitly.")]
    ToolMissing { tool: String },
}

impl BackendError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Fault(_))
    }
}

/// Errors from the PDF document model.
#[derive(Debug, Error)]
pub enum PdfError {
    /// The bytes are not a PDF lopdf can open.
    #[error("unreadable PDF: {0}")]
    Load(#[from] lopdf::Error),

    /// The document opened but has no pages.
    #[error("PDF has no pages")]
    Empty,

    /// The document is encrypted and cannot be re-saved.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The image could not be decoded.
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),

    /// Serialising the document failed.
    #[error("could not serialise PDF: {0}")]
    Save(String),
}

impl From<PdfError> for BackendError {
    fn from(e: PdfError) -> Self {
        match e {
            PdfError::Save(detail) => BackendError::Fault(detail),
            other => BackendError::Rejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = Eml2PdfError::PartialFailure {
            succeeded: 3,
            failed: 1,
            total: 4,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/4"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_names_the_attachment() {
        let e = ArtifactError::ConversionFailed {
            position: 2,
            filename: "photo.jpg".into(),
            attachment_kind: AttachmentKind::Image,
            retries: 0,
            detail: "bad huffman table".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("attachment 2"), "got: {msg}");
        assert!(msg.contains("photo.jpg"), "got: {msg}");
        assert!(msg.contains("image"), "got: {msg}");
        assert_eq!(e.kind(), "conversion");
    }

    #[test]
    fn artifact_error_serialises_with_kind_tag() {
        let e = ArtifactError::RenderFailed {
            retries: 2,
            detail: "exit status 1".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "render_failed");
        assert_eq!(json["retries"], 2);
    }

    #[test]
    fn only_faults_are_retryable() {
        assert!(BackendError::Fault("timeout".into()).is_retryable());
        assert!(!BackendError::Rejected("corrupt".into()).is_retryable());
        assert!(!BackendError::ToolMissing {
            tool: "soffice".into()
        }
        .is_retryable());
    }

    #[test]
    fn pdf_save_errors_map_to_faults() {
        let e: BackendError = PdfError::Save("disk full".into()).into();
        assert!(e.is_retryable());
        let e: BackendError = PdfError::Empty.into();
        assert_eq!(e, BackendError::Rejected("PDF has no pages".into()));
    }

    #[test]
    fn merge_read_failed_display() {
        let e = Eml2PdfError::MergeReadFailed {
            path: PathBuf::from("/tmp/work/001-attachment1.pdf"),
            detail: "invalid xref".into(),
        };
        assert!(e.to_string().contains("001-attachment1.pdf"));
        assert!(e.to_string().contains("invalid xref"));
    }
}
