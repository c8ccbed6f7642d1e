//! Attachment classification: declared content type → conversion path.
//!
//! The decision rests on the declared MIME type alone. Filenames in the wild
//! are unreliable (`scan.PDF.exe`, `image001`), and the content type is what
//! the sending client actually asserted about the bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The one MIME type routed through the PDF passthrough path.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Office MIME types routed to the office converter, paired with the file
/// extension the converter expects for each.
pub const OFFICE_DOCUMENT_TYPES: [(&str, &str); 6] = [
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
];

/// How an attachment will be turned into PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Already a PDF: load and re-save in normalised form.
    Pdf,
    /// Word, Excel or PowerPoint (legacy or OOXML).
    OfficeDocument,
    /// Any `image*` content type.
    Image,
    /// Everything else; dropped without an error.
    Unsupported,
}

impl AttachmentKind {
    /// Whether an artifact will be produced for this kind.
    pub fn is_supported(self) -> bool {
        !matches!(self, AttachmentKind::Unsupported)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Pdf => "pdf",
            AttachmentKind::OfficeDocument => "office document",
            AttachmentKind::Image => "image",
            AttachmentKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an attachment by its declared content type.
///
/// Total over every input: unknown or malformed types degrade to
/// [`AttachmentKind::Unsupported`]. The filename is accepted for callers
/// that only hold the pair; it does not influence the result.
pub fn classify(content_type: &str, _filename: &str) -> AttachmentKind {
    if content_type == PDF_MIME_TYPE {
        AttachmentKind::Pdf
    } else if office_extension(content_type).is_some() {
        AttachmentKind::OfficeDocument
    } else if content_type.starts_with("image") {
        AttachmentKind::Image
    } else {
        AttachmentKind::Unsupported
    }
}

/// File extension for a recognised office MIME type.
pub fn office_extension(content_type: &str) -> Option<&'static str> {
    OFFICE_DOCUMENT_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}
