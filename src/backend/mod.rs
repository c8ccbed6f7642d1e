//! Conversion backends: the capabilities the pipeline drives.
//!
//! The core defined in this crate only sequences, names and merges. Every
//! real conversion goes through a [`ConversionBackend`]:
//!
//! | Capability | Input | Default implementation |
//! |------------|-------|------------------------|
//! | [`html_to_pdf`](ConversionBackend::html_to_pdf) | HTML fragment | none |
//! | [`office_to_pdf`](ConversionBackend::office_to_pdf) | office bytes + MIME type | none |
//! | [`load_and_normalize_pdf`](ConversionBackend::load_and_normalize_pdf) | PDF bytes | [`crate::pdf::normalize`] |
//! | [`image_file_to_pdf`](ConversionBackend::image_file_to_pdf) | image path | [`crate::pdf::image_file_to_pdf`] |
//!
//! [`ExternalToolBackend`] is the shipped implementation. Tests and embedders
//! can supply their own via [`crate::config::ConversionConfigBuilder::backend`].
//!
//! ## Lifecycle
//!
//! [`startup`](ConversionBackend::startup) and
//! [`shutdown`](ConversionBackend::shutdown) bracket one whole run, not each
//! call. [`run_scoped`] guarantees `shutdown` runs on every exit path.

pub mod external;

pub use external::{ExternalToolBackend, HtmlEngine};

use crate::error::{BackendError, Eml2PdfError};
use crate::pdf;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use tracing::{debug, warn};

/// A document-conversion engine.
///
/// Implementations must be `Send + Sync`: attachment conversions run
/// concurrently against one shared backend.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Acquire run-scoped resources. Called once before any conversion.
    async fn startup(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Release run-scoped resources. Called once after the last conversion,
    /// including after failures.
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Render an HTML fragment to PDF.
    async fn html_to_pdf(&self, html: &str) -> Result<Vec<u8>, BackendError>;

    /// Convert a Word/Excel/PowerPoint document to PDF.
    async fn office_to_pdf(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Vec<u8>, BackendError>;

    /// Load a PDF and re-save it in canonical form.
    async fn load_and_normalize_pdf(&self, bytes: &[u8]) -> Result<Vec<u8>, BackendError> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || pdf::normalize(&bytes))
            .await
            .map_err(|e| BackendError::Fault(format!("normalise task panicked: {e}")))?
            .map_err(BackendError::from)
    }

    /// Convert the image file at `path` to a one-page PDF.
    async fn image_file_to_pdf(&self, path: &Path) -> Result<Vec<u8>, BackendError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || pdf::image_file_to_pdf(&path))
            .await
            .map_err(|e| BackendError::Fault(format!("image task panicked: {e}")))?
            .map_err(BackendError::from)
    }
}

/// Run `f` inside one backend session.
///
/// `startup` failure is fatal. `shutdown` always runs once `startup`
/// succeeded; its failure is logged and never masks the result of `f`.
pub async fn run_scoped<T, F, Fut>(backend: &dyn ConversionBackend, f: F) -> Result<T, Eml2PdfError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Eml2PdfError>>,
{
    backend
        .startup()
        .await
        .map_err(|e| Eml2PdfError::BackendStartup {
            backend: backend.name().to_string(),
            detail: e.to_string(),
        })?;
    debug!("Backend '{}' started", backend.name());

    let result = f().await;

    if let Err(e) = backend.shutdown().await {
        warn!("Backend '{}' shutdown failed: {}", backend.name(), e);
    } else {
        debug!("Backend '{}' shut down", backend.name());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        stops: AtomicUsize,
        refuse_start: bool,
    }

    #[async_trait]
    impl ConversionBackend for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn startup(&self) -> Result<(), BackendError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.refuse_start {
                return Err(BackendError::Fault("license check failed".into()));
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), BackendError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn html_to_pdf(&self, _html: &str) -> Result<Vec<u8>, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }

        async fn office_to_pdf(&self, _b: &[u8], _ct: &str) -> Result<Vec<u8>, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }
    }

    #[tokio::test]
    async fn shutdown_runs_after_success_and_failure() {
        let backend = Counting::default();

        let ok: Result<u32, _> = run_scoped(&backend, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, _> =
            run_scoped(&backend, || async { Err(Eml2PdfError::Internal("boom".into())) }).await;
        assert!(err.is_err());

        assert_eq!(backend.starts.load(Ordering::SeqCst), 2);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn startup_failure_skips_body_and_shutdown() {
        let backend = Counting {
            refuse_start: true,
            ..Default::default()
        };
        let ran = AtomicUsize::new(0);
        let result: Result<(), _> = run_scoped(&backend, || async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(Eml2PdfError::BackendStartup { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn default_normalize_rejects_garbage() {
        let backend = Counting::default();
        let err = backend.load_and_normalize_pdf(b"nope").await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)), "{err:?}");
    }
}
