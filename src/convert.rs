//! Eager (whole-message) conversion entry points.
//!
//! [`convert_message`] parses one email, converts its body and attachments
//! into a working area and returns once every conversion has settled.
//! [`convert_to_file`] adds file handling and the merge on top. Use
//! [`crate::stream::convert_stream`] instead to receive artifacts as they
//! complete.

use crate::backend::{run_scoped, ConversionBackend, ExternalToolBackend};
use crate::config::ConversionConfig;
use crate::error::Eml2PdfError;
use crate::merge::merge_artifacts;
use crate::output::{
    AttachmentSummary, ConversionArtifact, ConversionOutput, ConversionReport, ConversionStats,
    MessageSummary,
};
use crate::pipeline::dispatch::{self, attachment_artifact_name, JobContext};
use crate::pipeline::parse::{parse_email, ParsedMessage};
use crate::working_area::{self, Manifest, ManifestEntry, WorkingArea};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Convert one email into intermediate PDFs in `working_area`.
///
/// # Arguments
/// * `raw`         : the message bytes (RFC 5322)
/// * `working_area`: directory for the artifacts; created and cleared first
/// * `config`      : conversion configuration
///
/// # Returns
/// `Ok(ConversionReport)` once every artifact has either been persisted or
/// failed; per-artifact failures are in `report.failures`. `manifest.json`
/// is written after the last one settles.
///
/// # Errors
/// Fatal errors only: unparseable message, backend that will not start,
/// unusable working area.
pub async fn convert_message(
    raw: &[u8],
    working_area: &Path,
    config: &ConversionConfig,
) -> Result<ConversionReport, Eml2PdfError> {
    let message = parse_email(raw, "<message bytes>")?;
    let backend = resolve_backend(config);
    convert_parsed(&message, backend, working_area, config).await
}

/// [`convert_message`] for an already parsed message and a given backend.
pub async fn convert_parsed(
    message: &ParsedMessage,
    backend: Arc<dyn ConversionBackend>,
    working_area: &Path,
    config: &ConversionConfig,
) -> Result<ConversionReport, Eml2PdfError> {
    let total_start = Instant::now();
    info!(
        "Converting message {} ({} attachments)",
        message.identity(),
        message.attachments.len()
    );

    // ── Step 1: Prepare the working area ─────────────────────────────────
    working_area::prepare(working_area).await?;

    // ── Step 2: Plan every artifact ──────────────────────────────────────
    let plan = dispatch::plan(message);
    let attempted = plan.jobs.len();
    debug!(
        "{} artifact(s) planned, {} attachment(s) skipped",
        attempted,
        plan.skipped.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(attempted);
    }

    // ── Step 3: Convert within one backend session ───────────────────────
    let ctx = Arc::new(JobContext {
        backend: Arc::clone(&backend),
        working_area: working_area.to_path_buf(),
        config: config.clone(),
        message_id: message.identity().to_string(),
    });
    let outcomes: Vec<_> = run_scoped(backend.as_ref(), || async {
        Ok(stream::iter(plan.jobs.into_iter().map(|job| {
            let ctx = Arc::clone(&ctx);
            async move { dispatch::run_job(&ctx, job).await }
        }))
        .buffer_unordered(config.concurrency)
        .collect::<Vec<_>>()
        .await)
    })
    .await?;

    // ── Step 4: Every conversion has settled; record the set ─────────────
    let mut artifacts = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(artifact) => artifacts.push(artifact),
            Err(failure) => failures.push(failure),
        }
    }
    artifacts.sort_by_key(|a| a.index);
    failures.sort_by_key(|f| f.index);

    working_area::write_manifest(working_area, &manifest_for(message, &artifacts)).await?;

    let stats = ConversionStats {
        total_attachments: message.attachments.len(),
        attempted,
        succeeded: artifacts.len(),
        failed: failures.len(),
        skipped: plan.skipped.len(),
        total_pages: artifacts.iter().map(|a| a.page_count).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Message {}: {}/{} artifacts, {} page(s), {}ms",
        message.identity(),
        stats.succeeded,
        stats.attempted,
        stats.total_pages,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(attempted, artifacts.len());
    }

    Ok(ConversionReport {
        message_id: message.message_id.clone(),
        subject: message.subject.clone(),
        working_area: working_area.to_path_buf(),
        artifacts,
        failures,
        skipped: plan.skipped,
        stats,
    })
}

/// Convert an email file and merge the result into `output_path`.
///
/// The working area is `config.working_dir` or a temporary directory that
/// is removed afterwards (unless `keep_working_area`). The merged PDF is
/// written atomically (temp file + rename).
///
/// # Errors
/// A failed merge returns [`Eml2PdfError::MergeIncomplete`] carrying the
/// conversion report; a temporary working area is kept in that case so the
/// artifacts can be inspected or merged again.
pub async fn convert_to_file(
    email_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Eml2PdfError> {
    let email_path = email_path.as_ref();
    let output_path = output_path.as_ref();
    let raw = read_email(email_path).await?;
    let message = parse_email(&raw, &email_path.display().to_string())?;

    let area = match &config.working_dir {
        Some(dir) => WorkingArea::persistent(dir),
        None => WorkingArea::temporary()?,
    };

    let backend = resolve_backend(config);
    let mut report = convert_parsed(&message, backend, area.path(), config).await?;

    let merged = if config.merge {
        Some(
            merge_artifacts(
                &report.artifacts,
                output_path,
                config.merge_failure_policy,
                Some(message.identity()),
            )
            .await,
        )
    } else {
        None
    };
    let merge_failed = matches!(merged, Some(Err(_)));

    if area.is_temporary() && (config.keep_working_area || !config.merge || merge_failed) {
        let kept = area.keep();
        info!("Working area kept at {}", kept.display());
        report.working_area = kept;
    }

    match merged.transpose() {
        Ok(merged) => Ok(ConversionOutput { report, merged }),
        Err(source) => Err(Eml2PdfError::MergeIncomplete {
            report: Box::new(report),
            source: Box::new(source),
        }),
    }
}

/// Synchronous wrapper around [`convert_to_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    email_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Eml2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Eml2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_to_file(email_path, output_path, config))
}

/// Parse an email and describe it without converting anything.
///
/// Needs no backend or external tools.
pub async fn inspect(email_path: impl AsRef<Path>) -> Result<MessageSummary, Eml2PdfError> {
    let email_path = email_path.as_ref();
    let raw = read_email(email_path).await?;
    let message = parse_email(&raw, &email_path.display().to_string())?;
    Ok(summarize(&message))
}

/// Describe a parsed message.
pub fn summarize(message: &ParsedMessage) -> MessageSummary {
    let attachments = message
        .attachments
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let kind = a.kind();
            AttachmentSummary {
                position: i + 1,
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                kind,
                size_bytes: a.content.len(),
                artifact_name: kind.is_supported().then(|| attachment_artifact_name(i + 1)),
            }
        })
        .collect();
    MessageSummary {
        message_id: message.message_id.clone(),
        from: message.from.clone(),
        to: message.to.clone(),
        subject: message.subject.clone(),
        has_html_body: message.html_body.is_some(),
        attachments,
    }
}

/// Default merged-output path: the email's path with a `.pdf` extension.
pub fn default_output_path(email_path: &Path) -> PathBuf {
    email_path.with_extension("pdf")
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the backend, from most-specific to least-specific:
///
/// 1. **Pre-built backend** (`config.backend`), used as-is.
/// 2. **External tools** at the paths in `config.tools`, discovering any
///    unset one in `PATH`.
pub(crate) fn resolve_backend(config: &ConversionConfig) -> Arc<dyn ConversionBackend> {
    if let Some(ref backend) = config.backend {
        return Arc::clone(backend);
    }
    Arc::new(ExternalToolBackend::from_config(&config.tools))
}

/// Read the email file, mapping the common failures to dedicated errors.
async fn read_email(path: &Path) -> Result<Vec<u8>, Eml2PdfError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(Eml2PdfError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Eml2PdfError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(Eml2PdfError::ParseFailed {
            source_name: path.display().to_string(),
            detail: e.to_string(),
        }),
    }
}

pub(crate) fn manifest_for(message: &ParsedMessage, artifacts: &[ConversionArtifact]) -> Manifest {
    Manifest {
        message_id: message.message_id.clone(),
        artifacts: artifacts
            .iter()
            .map(|a| ManifestEntry {
                index: a.index,
                name: a.name.clone(),
                file: working_area::artifact_file_name(a.index, &a.name),
                page_count: a.page_count,
            })
            .collect(),
    }
    .ordered()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::AttachmentKind;

    #[tokio::test]
    async fn missing_email_is_file_not_found() {
        let err = inspect("/no/such/message.eml").await.unwrap_err();
        assert!(matches!(err, Eml2PdfError::FileNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn inspect_lists_attachments_with_artifact_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.eml");
        std::fs::write(
            &path,
            "From: a@x.com\r\n\
To: b@y.com\r\n\
Subject: Hi\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n\
--b1\r\n\
Content-Type: application/zip\r\n\
Content-Disposition: attachment; filename=\"x.zip\"\r\n\
\r\n\
PK\r\n\
--b1\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"y.png\"\r\n\
\r\n\
png\r\n\
--b1--\r\n",
        )
        .unwrap();

        let summary = inspect(&path).await.unwrap();
        assert_eq!(summary.subject, "Hi");
        assert_eq!(summary.attachments.len(), 2);
        assert_eq!(summary.attachments[0].kind, AttachmentKind::Unsupported);
        assert_eq!(summary.attachments[0].artifact_name, None);
        assert_eq!(summary.attachments[1].kind, AttachmentKind::Image);
        assert_eq!(
            summary.attachments[1].artifact_name.as_deref(),
            Some("attachment2")
        );
    }

    #[test]
    fn default_output_sits_next_to_the_email() {
        assert_eq!(
            default_output_path(Path::new("/mail/in/note.eml")),
            PathBuf::from("/mail/in/note.pdf")
        );
        assert_eq!(
            default_output_path(Path::new("note")),
            PathBuf::from("note.pdf")
        );
    }

    #[test]
    fn configured_backend_wins() {
        let custom: Arc<dyn ConversionBackend> = Arc::new(ExternalToolBackend::new(None, None));
        let config = ConversionConfig::builder()
            .backend(Arc::clone(&custom))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&resolve_backend(&config), &custom));
    }
}
