//! Output types returned by the conversion entry points.
//!
//! Everything here is `Serialize` so the CLI's `--json` mode and embedders
//! can dump a run as one document.

use crate::error::{ArtifactError, Eml2PdfError};
use crate::pipeline::classify::AttachmentKind;
use crate::pipeline::parse::Mailbox;
use serde::Serialize;
use std::path::PathBuf;

/// Where an artifact came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// The rendered header block and HTML body.
    Body,
    /// An attachment, by its 1-based position among all attachments.
    Attachment {
        position: usize,
        filename: String,
        content_type: String,
        kind: AttachmentKind,
    },
}

/// One intermediate PDF written to the working area.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionArtifact {
    /// `body` or `attachment{position}`.
    pub name: String,
    /// Merge order: 0 for the body, then dispatch order.
    pub index: usize,
    pub source: ArtifactSource,
    pub path: PathBuf,
    pub page_count: usize,
    pub size_bytes: u64,
    pub duration_ms: u64,
    /// Retries spent before the successful attempt.
    pub retries: u32,
}

impl ConversionArtifact {
    /// Read the artifact's PDF bytes back from the working area.
    pub async fn read_pdf(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// An artifact that did not make it into the working area.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFailure {
    pub name: String,
    /// The sequence index the artifact was assigned; it stays unused.
    pub index: usize,
    pub error: ArtifactError,
}

/// An attachment left out because its type is not convertible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAttachment {
    pub position: usize,
    pub filename: String,
    pub content_type: String,
}

/// Aggregate statistics for one message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// Attachments in the message, supported or not.
    pub total_attachments: usize,
    /// Artifacts attempted (body + supported attachments).
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Pages across all successful artifacts.
    pub total_pages: usize,
    pub total_duration_ms: u64,
}

/// Result of converting one message into a working area.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub message_id: Option<String>,
    pub subject: String,
    pub working_area: PathBuf,
    /// Successful artifacts, sorted by index.
    pub artifacts: Vec<ConversionArtifact>,
    /// Failed artifacts, sorted by index.
    pub failures: Vec<ArtifactFailure>,
    pub skipped: Vec<SkippedAttachment>,
    pub stats: ConversionStats,
}

impl ConversionReport {
    /// Look an artifact up by name.
    pub fn artifact(&self, name: &str) -> Option<&ConversionArtifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Treat any artifact failure as an error.
    pub fn into_result(self) -> Result<Self, Eml2PdfError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Eml2PdfError::PartialFailure {
                succeeded: self.artifacts.len(),
                failed: self.failures.len(),
                total: self.artifacts.len() + self.failures.len(),
            })
        }
    }
}

/// One working-area file that made it into the merged document.
#[derive(Debug, Clone, Serialize)]
pub struct MergedInput {
    pub path: PathBuf,
    pub page_count: usize,
}

/// A working-area file the merge could not read and left out.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedInput {
    pub path: PathBuf,
    pub reason: String,
}

/// The single merged PDF.
#[derive(Debug, Clone, Serialize)]
pub struct MergedDocument {
    pub path: PathBuf,
    pub page_count: usize,
    /// Inputs in the order their pages appear.
    pub inputs: Vec<MergedInput>,
    pub skipped: Vec<SkippedInput>,
}

/// Everything [`crate::convert::convert_to_file`] produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub report: ConversionReport,
    /// `None` when merging was disabled.
    pub merged: Option<MergedDocument>,
}

// ── Inspection ───────────────────────────────────────────────────────────

/// What [`crate::convert::inspect`] reports about a message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub message_id: Option<String>,
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub subject: String,
    pub has_html_body: bool,
    pub attachments: Vec<AttachmentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSummary {
    pub position: usize,
    pub filename: String,
    pub content_type: String,
    pub kind: AttachmentKind,
    pub size_bytes: usize,
    /// The artifact name it would get, when supported.
    pub artifact_name: Option<String>,
}
