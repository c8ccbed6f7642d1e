//! Configuration types for email-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct holds every knob so a
//! config can be shared across tasks and logged as a whole.

use crate::backend::ConversionBackend;
use crate::error::Eml2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound for [`ConversionConfig::concurrency`].
pub const MAX_CONCURRENCY: usize = 64;

/// Configuration for converting one email.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use eml2pdf::{ConversionConfig, MergeFailurePolicy};
///
/// let config = ConversionConfig::builder()
///     .concurrency(2)
///     .max_retries(1)
///     .merge_failure_policy(MergeFailurePolicy::Abort)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Directory for intermediate PDFs. Default: a fresh temporary directory.
    ///
    /// When set, the directory is created if needed and stale artifacts from
    /// an earlier run are removed before conversion starts.
    pub working_dir: Option<PathBuf>,

    /// Keep the working area after a successful merge. Default: false.
    ///
    /// Only meaningful for temporary working areas; an explicit
    /// `working_dir` is never deleted.
    pub keep_working_area: bool,

    /// Number of artifacts converted at once. Range: 1–64. Default: 4.
    ///
    /// Each in-flight office or HTML conversion is an external process, so
    /// this bounds CPU and memory as much as wall-clock time.
    pub concurrency: usize,

    /// Maximum retries per artifact on a backend fault. Default: 2.
    ///
    /// Rejected inputs and missing tools are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Merge the artifacts into one PDF after conversion. Default: true.
    pub merge: bool,

    /// What the merge does with an unreadable artifact. Default: skip it.
    pub merge_failure_policy: MergeFailurePolicy,

    /// Locations of the external converters.
    pub tools: ExternalToolConfig,

    /// Pre-constructed backend. Takes precedence over `tools`.
    pub backend: Option<Arc<dyn ConversionBackend>>,

    /// Per-artifact progress notifications.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            keep_working_area: false,
            concurrency: 4,
            max_retries: 2,
            retry_backoff_ms: 500,
            merge: true,
            merge_failure_policy: MergeFailurePolicy::default(),
            tools: ExternalToolConfig::default(),
            backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("working_dir", &self.working_dir)
            .field("keep_working_area", &self.keep_working_area)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("merge", &self.merge)
            .field("merge_failure_policy", &self.merge_failure_policy)
            .field("tools", &self.tools)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    pub fn keep_working_area(mut self, keep: bool) -> Self {
        self.config.keep_working_area = keep;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.config.merge = merge;
        self
    }

    pub fn merge_failure_policy(mut self, policy: MergeFailurePolicy) -> Self {
        self.config.merge_failure_policy = policy;
        self
    }

    pub fn html_renderer(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tools.html_renderer = Some(path.into());
        self
    }

    pub fn office_converter(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tools.office_converter = Some(path.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ConversionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Eml2PdfError> {
        let c = &self.config;
        if c.concurrency == 0 || c.concurrency > MAX_CONCURRENCY {
            return Err(Eml2PdfError::InvalidConfig(format!(
                "Concurrency must be 1–{MAX_CONCURRENCY}, got {}",
                c.concurrency
            )));
        }
        if let Some(dir) = &c.working_dir {
            if dir.as_os_str().is_empty() {
                return Err(Eml2PdfError::InvalidConfig(
                    "Working directory path is empty".into(),
                ));
            }
            if dir.is_file() {
                return Err(Eml2PdfError::InvalidConfig(format!(
                    "Working directory '{}' is an existing file",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the merge treats an intermediate PDF it cannot open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFailurePolicy {
    /// Log it, leave it out of the merged document, carry on. (default)
    #[default]
    Skip,
    /// Stop and return [`Eml2PdfError::MergeReadFailed`].
    Abort,
}

impl std::str::FromStr for MergeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(MergeFailurePolicy::Skip),
            "abort" => Ok(MergeFailurePolicy::Abort),
            other => Err(format!("unknown merge policy '{other}' (expected skip or abort)")),
        }
    }
}

/// Explicit locations of the external converters.
///
/// Unset fields are discovered in `PATH` when the backend is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    /// `wkhtmltopdf` or a Chromium-family browser.
    pub html_renderer: Option<PathBuf>,
    /// `soffice` / `libreoffice`.
    pub office_converter: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_retries, 2);
        assert!(c.merge);
        assert_eq!(c.merge_failure_policy, MergeFailurePolicy::Skip);
        assert!(c.working_dir.is_none());
    }

    #[test]
    fn concurrency_is_clamped() {
        let c = ConversionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
        let c = ConversionConfig::builder().concurrency(1000).build().unwrap();
        assert_eq!(c.concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn working_dir_that_is_a_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ConversionConfig::builder()
            .working_dir(file.path())
            .build()
            .unwrap_err();
        assert!(matches!(err, Eml2PdfError::InvalidConfig(_)), "{err:?}");
    }

    #[test]
    fn tool_paths_land_in_tools() {
        let c = ConversionConfig::builder()
            .html_renderer("/opt/wkhtmltopdf")
            .office_converter("/opt/soffice")
            .build()
            .unwrap();
        assert_eq!(c.tools.html_renderer, Some(PathBuf::from("/opt/wkhtmltopdf")));
        assert_eq!(c.tools.office_converter, Some(PathBuf::from("/opt/soffice")));
    }

    #[test]
    fn merge_policy_parses_case_insensitively() {
        assert_eq!("Abort".parse::<MergeFailurePolicy>(), Ok(MergeFailurePolicy::Abort));
        assert_eq!("skip".parse::<MergeFailurePolicy>(), Ok(MergeFailurePolicy::Skip));
        assert!("retry".parse::<MergeFailurePolicy>().is_err());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let dbg = format!("{:?}", ConversionConfig::default());
        assert!(dbg.contains("concurrency: 4"));
        assert!(dbg.contains("backend: None"));
    }
}
