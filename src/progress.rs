//! Progress-callback trait for per-artifact conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline converts the body and each attachment.
//!
//! # Example
//!
//! ```rust
//! use eml2pdf::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_artifact_complete(&self, index: usize, name: &str, page_count: usize) {
//!         self.pages.fetch_add(page_count, Ordering::SeqCst);
//!         eprintln!("[{index}] {name}: {page_count} page(s)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each artifact.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_artifact_start`, `on_artifact_complete` and `on_artifact_error` may be
/// called concurrently and in any order across artifacts. Protect shared
/// mutable state with `Mutex`, `AtomicUsize` or similar.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any artifact is converted.
    ///
    /// # Arguments
    /// * `total`: artifacts that will be attempted (body + supported attachments)
    fn on_conversion_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before an artifact's first conversion attempt.
    ///
    /// # Arguments
    /// * `index`: sequence index (0 is the body)
    /// * `name` : artifact name, e.g. `body`, `attachment2`
    fn on_artifact_start(&self, index: usize, name: &str) {
        let _ = (index, name);
    }

    /// Called when an artifact has been converted and persisted.
    fn on_artifact_complete(&self, index: usize, name: &str, page_count: usize) {
        let _ = (index, name, page_count);
    }

    /// Called when an artifact fails after all retries are exhausted.
    ///
    /// # Arguments
    /// * `error`: human-readable error description, owned so implementations
    ///   can move it into a spawned task
    fn on_artifact_error(&self, index: usize, name: &str, error: String) {
        let _ = (index, name, error);
    }

    /// Called once after every artifact has been attempted.
    ///
    /// # Arguments
    /// * `total`        : artifacts attempted
    /// * `success_count`: artifacts that converted without error
    fn on_conversion_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
