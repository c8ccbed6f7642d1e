//! Streaming conversion API: emit artifacts as they complete.
//!
//! Unlike [`crate::convert::convert_message`], which returns only after
//! every artifact has settled, [`convert_stream`] yields each
//! `ConversionArtifact` (or its `ArtifactFailure`) the moment it is
//! persisted. Items arrive in completion order; sort by `index` if merge
//! order matters.
//!
//! The stream ends after the last conversion settled, the manifest was
//! written and the backend was shut down, so the working area can be merged
//! once the stream is exhausted.

use crate::backend::ConversionBackend;
use crate::config::ConversionConfig;
use crate::convert::{manifest_for, resolve_backend};
use crate::error::Eml2PdfError;
use crate::output::{ArtifactFailure, ConversionArtifact};
use crate::pipeline::dispatch::{self, JobContext};
use crate::pipeline::parse::parse_email;
use crate::working_area;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A boxed stream of artifact outcomes.
pub type ArtifactStream =
    Pin<Box<dyn Stream<Item = Result<ConversionArtifact, ArtifactFailure>> + Send>>;

/// Convert one email, streaming artifacts as they are ready.
///
/// # Returns
/// - `Ok(ArtifactStream)`: a stream of `Result<ConversionArtifact, ArtifactFailure>`
/// - `Err(Eml2PdfError)`: fatal error (unparseable message, backend
///   startup failure, unusable working area); nothing was converted
pub async fn convert_stream(
    raw: &[u8],
    working_area: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ArtifactStream, Eml2PdfError> {
    let working_area: PathBuf = working_area.as_ref().to_path_buf();

    // ── Parse and prepare before anything is spawned ─────────────────────
    let message = parse_email(raw, "<message bytes>")?;
    working_area::prepare(&working_area).await?;
    info!(
        "Starting streaming conversion of {} ({} attachments)",
        message.identity(),
        message.attachments.len()
    );

    // ── Start the backend session; startup failure is reported here ──────
    let backend: Arc<dyn ConversionBackend> = resolve_backend(config);
    backend
        .startup()
        .await
        .map_err(|e| Eml2PdfError::BackendStartup {
            backend: backend.name().to_string(),
            detail: e.to_string(),
        })?;

    // ── Run the jobs in the background, forwarding each outcome ──────────
    // Jobs and their context are owned so the task borrows nothing from
    // the caller.
    let plan = dispatch::plan(&message);
    let attempted = plan.jobs.len();
    let concurrency = config.concurrency;
    let ctx = Arc::new(JobContext {
        backend: Arc::clone(&backend),
        working_area: working_area.clone(),
        config: config.clone(),
        message_id: message.identity().to_string(),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Some(ref cb) = ctx.config.progress_callback {
            cb.on_conversion_start(attempted);
        }

        let job_ctx = Arc::clone(&ctx);
        let mut outcomes = stream::iter(plan.jobs.into_iter().map(move |job| {
            let ctx = Arc::clone(&job_ctx);
            async move { dispatch::run_job(&ctx, job).await }
        }))
        .buffer_unordered(concurrency);

        let mut artifacts = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            if let Ok(ref artifact) = outcome {
                artifacts.push(artifact.clone());
            }
            // A dropped receiver only means nobody is listening any more;
            // the remaining conversions still complete for the manifest.
            let _ = tx.send(outcome);
        }
        drop(outcomes);

        artifacts.sort_by_key(|a| a.index);
        if let Err(e) =
            working_area::write_manifest(&working_area, &manifest_for(&message, &artifacts)).await
        {
            warn!(
                message_id = %ctx.message_id,
                error_kind = "manifest",
                "Could not write manifest: {}",
                e
            );
        }
        if let Some(ref cb) = ctx.config.progress_callback {
            cb.on_conversion_complete(attempted, artifacts.len());
        }

        if let Err(e) = backend.shutdown().await {
            warn!("Backend '{}' shutdown failed: {}", backend.name(), e);
        }
        debug!("Streaming conversion finished: {}/{} artifacts", artifacts.len(), attempted);
        drop(tx);
    });

    Ok(Box::pin(UnboundedReceiverStream::new(rx)))
}
