//! # eml2pdf
//!
//! Convert an email (RFC 5322 / `.eml`) into a single PDF: the rendered
//! message body first, then every convertible attachment in order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .eml
//!  │
//!  ├─ 1. Parse     mail-parser → headers, HTML body, attachments
//!  ├─ 2. Render    from / to / subject header block + body as HTML
//!  ├─ 3. Classify  PDF, office document, image or unsupported
//!  ├─ 4. Convert   concurrent backend calls, one artifact per item,
//!  │               persisted as NNN-name.pdf in the working area
//!  └─ 5. Merge     artifacts in sequence-index order → one PDF
//! ```
//!
//! A failed attachment never takes its siblings down: it is logged, reported
//! in [`ConversionReport::failures`] and simply missing from the merge.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eml2pdf::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let output = convert_to_file("message.eml", "message.pdf", &config).await?;
//!     eprintln!(
//!         "{} artifacts, {} failed",
//!         output.report.stats.succeeded,
//!         output.report.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! Conversions go through a [`ConversionBackend`]. The default
//! [`ExternalToolBackend`] drives `wkhtmltopdf` or headless Chromium for the
//! body and LibreOffice for office documents; PDFs and images are handled in
//! process with `lopdf` and `image`.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `eml2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! eml2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod merge;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod stream;
pub mod working_area;

#[cfg(test)]
mod log_capture;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{run_scoped, ConversionBackend, ExternalToolBackend, HtmlEngine};
pub use config::{ConversionConfig, ConversionConfigBuilder, ExternalToolConfig, MergeFailurePolicy};
pub use convert::{
    convert_message, convert_parsed, convert_sync, convert_to_file, default_output_path, inspect,
};
pub use error::{ArtifactError, BackendError, Eml2PdfError, PdfError};
pub use merge::{merge_artifacts, merge_working_area};
pub use output::{
    ArtifactFailure, ArtifactSource, ConversionArtifact, ConversionOutput, ConversionReport,
    ConversionStats, MergedDocument, MessageSummary,
};
pub use pipeline::classify::{classify, AttachmentKind};
pub use pipeline::parse::{parse_email, Attachment, Mailbox, ParsedMessage};
pub use pipeline::render::render_html;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, ArtifactStream};
