//! Artifact dispatch: plan the conversions for one message and run each one.
//!
//! [`plan`] assigns every artifact its name and sequence index up front, so
//! the merge order is fixed before any backend call starts and never depends
//! on which conversion finishes first. [`run_job`] performs one conversion
//! with retry, persists the result and reports it; it never returns a fatal
//! error, so one bad attachment cannot take its siblings down.
//!
//! ## Retry Strategy
//!
//! Only [`BackendError::Fault`] is retried, with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Rejected inputs and missing tools
//! fail the same way every time and are reported on the first attempt.

use crate::backend::ConversionBackend;
use crate::config::ConversionConfig;
use crate::error::{ArtifactError, BackendError};
use crate::output::{ArtifactFailure, ArtifactSource, ConversionArtifact, SkippedAttachment};
use crate::pdf;
use crate::pipeline::classify::AttachmentKind;
use crate::pipeline::parse::{Attachment, ParsedMessage};
use crate::pipeline::render::render_html;
use crate::working_area;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Name of the artifact rendered from the message body.
pub const BODY_ARTIFACT: &str = "body";

/// Extension used for image files whose name and type give nothing usable.
const FALLBACK_IMAGE_EXTENSION: &str = "img";

static SAFE_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,10}$").expect("static regex"));

/// Artifact name for the attachment at 1-based `position`.
pub fn attachment_artifact_name(position: usize) -> String {
    format!("attachment{position}")
}

/// What one job converts. Owned, so a job can move into a spawned task.
#[derive(Debug)]
pub enum JobInput {
    /// Rendered header block + body.
    Html(String),
    /// A supported attachment.
    Attachment {
        attachment: Attachment,
        kind: AttachmentKind,
    },
}

/// One planned conversion.
#[derive(Debug)]
pub struct ArtifactJob {
    pub index: usize,
    pub name: String,
    pub source: ArtifactSource,
    pub input: JobInput,
}

/// Every conversion for one message, in merge order.
#[derive(Debug)]
pub struct DispatchPlan {
    pub jobs: Vec<ArtifactJob>,
    pub skipped: Vec<SkippedAttachment>,
}

/// Plan the body job (index 0) and one job per supported attachment.
///
/// Indices are consecutive over the jobs; names use the attachment's
/// position among *all* attachments, so skipped ones leave a gap in the
/// names but not in the indices.
pub fn plan(message: &ParsedMessage) -> DispatchPlan {
    let mut jobs = vec![ArtifactJob {
        index: 0,
        name: BODY_ARTIFACT.to_string(),
        source: ArtifactSource::Body,
        input: JobInput::Html(render_html(message)),
    }];
    let mut skipped = Vec::new();

    for (i, attachment) in message.attachments.iter().enumerate() {
        let position = i + 1;
        let kind = attachment.kind();
        if !kind.is_supported() {
            info!(
                message_id = message.identity(),
                "Skipping attachment {} ('{}'): unsupported content type {}",
                position,
                attachment.filename,
                attachment.content_type
            );
            skipped.push(SkippedAttachment {
                position,
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
            });
            continue;
        }
        jobs.push(ArtifactJob {
            index: jobs.len(),
            name: attachment_artifact_name(position),
            source: ArtifactSource::Attachment {
                position,
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                kind,
            },
            input: JobInput::Attachment {
                attachment: attachment.clone(),
                kind,
            },
        });
    }

    DispatchPlan { jobs, skipped }
}

/// Shared state every job of one run needs.
///
/// Held behind an `Arc` and cloned into each job's future.
pub struct JobContext {
    pub backend: Arc<dyn ConversionBackend>,
    pub working_area: PathBuf,
    pub config: ConversionConfig,
    /// Message identity for log records.
    pub message_id: String,
}

/// Convert, persist and report one artifact.
///
/// Always returns a result for the job: failures come back as
/// [`ArtifactFailure`] after being logged and passed to the progress callback.
pub async fn run_job(
    ctx: &JobContext,
    job: ArtifactJob,
) -> Result<ConversionArtifact, ArtifactFailure> {
    let start = Instant::now();
    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_artifact_start(job.index, &job.name);
    }

    let result = convert_and_persist(ctx, &job).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok((path, bytes_len, page_count, retries)) => {
            debug!(
                message_id = %ctx.message_id,
                artifact = %job.name,
                "Artifact {} ready: {} page(s), {} bytes, {}ms",
                job.index,
                page_count,
                bytes_len,
                duration_ms
            );
            if let Some(ref cb) = ctx.config.progress_callback {
                cb.on_artifact_complete(job.index, &job.name, page_count);
            }
            Ok(ConversionArtifact {
                name: job.name,
                index: job.index,
                source: job.source,
                path,
                page_count,
                size_bytes: bytes_len as u64,
                duration_ms,
                retries,
            })
        }
        Err(error) => {
            warn!(
                message_id = %ctx.message_id,
                artifact = %job.name,
                error_kind = error.kind(),
                "Artifact {} failed: {}",
                job.index,
                error
            );
            if let Some(ref cb) = ctx.config.progress_callback {
                cb.on_artifact_error(job.index, &job.name, error.to_string());
            }
            Err(ArtifactFailure {
                name: job.name,
                index: job.index,
                error,
            })
        }
    }
}

/// Returns `(path, size, page_count, retries)`.
async fn convert_and_persist(
    ctx: &JobContext,
    job: &ArtifactJob,
) -> Result<(std::path::PathBuf, usize, usize, u32), ArtifactError> {
    let (bytes, retries) = convert_with_retry(ctx, job)
        .await
        .map_err(|(e, retries)| conversion_error(job, e, retries))?;

    let counted = bytes.clone();
    let page_count = tokio::task::spawn_blocking(move || pdf::page_count(&counted))
        .await
        .map_err(|e| BackendError::Fault(format!("page count task panicked: {e}")))
        .and_then(|r| r.map_err(BackendError::from))
        .map_err(|e| conversion_error(job, e, retries))?;

    let path = working_area::persist(&ctx.working_area, job.index, &job.name, &bytes)
        .await
        .map_err(|e| ArtifactError::PersistFailed {
            name: job.name.clone(),
            detail: e.to_string(),
        })?;

    Ok((path, bytes.len(), page_count, retries))
}

/// Run one conversion, retrying backend faults. On failure returns the last
/// error and the retries spent.
async fn convert_with_retry(
    ctx: &JobContext,
    job: &ArtifactJob,
) -> Result<(Vec<u8>, u32), (BackendError, u32)> {
    let max_retries = ctx.config.max_retries;
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let backoff = backoff_ms(ctx.config.retry_backoff_ms, attempt);
            warn!(
                message_id = %ctx.message_id,
                artifact = %job.name,
                error_kind = "backend_fault",
                "{}: retry {}/{} after {}ms",
                job.name,
                attempt,
                max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match convert_once(ctx, &job.input).await {
            Ok(bytes) => return Ok((bytes, attempt)),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(
                    message_id = %ctx.message_id,
                    artifact = %job.name,
                    error_kind = "backend_fault",
                    "{}: attempt {} failed: {}",
                    job.name,
                    attempt + 1,
                    e
                );
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// One backend call chain for the job's input kind.
async fn convert_once(ctx: &JobContext, input: &JobInput) -> Result<Vec<u8>, BackendError> {
    let backend = ctx.backend.as_ref();
    match input {
        JobInput::Html(html) => backend.html_to_pdf(html).await,
        JobInput::Attachment { attachment, kind } => match kind {
            AttachmentKind::Pdf => backend.load_and_normalize_pdf(&attachment.content).await,
            AttachmentKind::OfficeDocument => {
                let converted = backend
                    .office_to_pdf(&attachment.content, &attachment.content_type)
                    .await?;
                backend.load_and_normalize_pdf(&converted).await
            }
            AttachmentKind::Image => {
                let ext = image_extension(&attachment.filename, &attachment.content_type);
                // Removed on drop, whichever way this arm exits.
                let scratch = working_area::image_scratch_file(&ctx.working_area, &ext)
                    .map_err(|e| BackendError::Fault(format!("image scratch file: {e}")))?;
                tokio::fs::write(scratch.path(), &attachment.content)
                    .await
                    .map_err(|e| BackendError::Fault(format!("writing image scratch file: {e}")))?;
                let result = backend.image_file_to_pdf(scratch.path()).await;
                drop(scratch);
                result
            }
            AttachmentKind::Unsupported => Err(BackendError::Rejected(format!(
                "'{}' has no conversion path",
                attachment.content_type
            ))),
        },
    }
}

fn conversion_error(job: &ArtifactJob, e: BackendError, retries: u32) -> ArtifactError {
    match &job.source {
        ArtifactSource::Body => ArtifactError::RenderFailed {
            retries,
            detail: e.to_string(),
        },
        ArtifactSource::Attachment {
            position,
            filename,
            kind,
            ..
        } => ArtifactError::ConversionFailed {
            position: *position,
            filename: filename.clone(),
            attachment_kind: *kind,
            retries,
            detail: e.to_string(),
        },
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating instead of overflowing for large attempt counts.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Extension for an image's scratch file: the filename's, else the MIME
/// subtype (`svg+xml` → `svg`), else [`FALLBACK_IMAGE_EXTENSION`].
fn image_extension(filename: &str, content_type: &str) -> String {
    let from_name = Path::new(filename).extension().and_then(|e| e.to_str());
    let from_type = content_type
        .split_once('/')
        .and_then(|(_, sub)| sub.split(['+', ';']).next())
        .map(str::trim);
    from_name
        .into_iter()
        .chain(from_type)
        .find(|ext| SAFE_EXTENSION.is_match(ext))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| FALLBACK_IMAGE_EXTENSION.to_string())
}
