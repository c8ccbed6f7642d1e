//! Backend built on external command-line converters.
//!
//! * HTML → PDF: `wkhtmltopdf`, or a headless Chromium/Chrome.
//! * Office → PDF: LibreOffice (`soffice --headless --convert-to pdf`).
//! * PDF normalisation and image → PDF: in-process, via [`crate::pdf`].
//!
//! Tools are located with the `which` crate unless configured explicitly. A
//! missing tool is not a startup error: only the capabilities that need it
//! fail, with [`BackendError::ToolMissing`], so a message with only image
//! and PDF attachments still converts on a machine without LibreOffice.
//!
//! ## Session scratch directory
//!
//! `startup` creates one scratch directory for the run; every tool call
//! works inside its own `TempDir` under it (removed when the call returns),
//! and `shutdown` removes the scratch directory itself. LibreOffice gets a
//! per-call user profile so concurrent conversions do not contend for the
//! profile lock.

use super::ConversionBackend;
use crate::config::ExternalToolConfig;
use crate::error::BackendError;
use crate::pipeline::classify::office_extension;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Chromium-family binaries tried, in order, when `wkhtmltopdf` is absent.
const CHROMIUM_BINARIES: [&str; 4] = [
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

/// LibreOffice entry points tried, in order.
const OFFICE_BINARIES: [&str; 2] = ["soffice", "libreoffice"];

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 400;

/// Which HTML renderer a binary is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtmlEngine {
    Wkhtmltopdf,
    Chromium,
}

impl HtmlEngine {
    /// Guess the engine from a binary's file name.
    pub fn detect(binary: &Path) -> Self {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("wkhtmltopdf") {
            HtmlEngine::Wkhtmltopdf
        } else {
            HtmlEngine::Chromium
        }
    }
}

/// Converts through external tools.
pub struct ExternalToolBackend {
    html_renderer: Option<(HtmlEngine, PathBuf)>,
    office_converter: Option<PathBuf>,
    scratch: Mutex<Option<TempDir>>,
}

impl std::fmt::Debug for ExternalToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalToolBackend")
            .field("html_renderer", &self.html_renderer)
            .field("office_converter", &self.office_converter)
            .finish()
    }
}

impl ExternalToolBackend {
    /// Create a backend with explicit tool locations.
    pub fn new(html_renderer: Option<(HtmlEngine, PathBuf)>, office_converter: Option<PathBuf>) -> Self {
        Self {
            html_renderer,
            office_converter,
            scratch: Mutex::new(None),
        }
    }

    /// Locate every tool in `PATH`.
    pub fn from_path() -> Self {
        Self::new(discover_html_renderer(), discover_office_converter())
    }

    /// Use configured paths where given, `PATH` discovery otherwise.
    pub fn from_config(tools: &ExternalToolConfig) -> Self {
        let html = match &tools.html_renderer {
            Some(path) => Some((HtmlEngine::detect(path), path.clone())),
            None => discover_html_renderer(),
        };
        let office = tools
            .office_converter
            .clone()
            .or_else(discover_office_converter);
        Self::new(html, office)
    }

    pub fn html_renderer(&self) -> Option<&(HtmlEngine, PathBuf)> {
        self.html_renderer.as_ref()
    }

    pub fn office_converter(&self) -> Option<&Path> {
        self.office_converter.as_deref()
    }

    /// A fresh per-call directory inside the session scratch directory.
    fn call_dir(&self, prefix: &str) -> Result<TempDir, BackendError> {
        let guard = self
            .scratch
            .lock()
            .map_err(|_| BackendError::Fault("scratch directory lock poisoned".into()))?;
        let scratch = guard
            .as_ref()
            .ok_or_else(|| BackendError::Fault("backend used outside a session".into()))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(scratch.path())
            .map_err(|e| BackendError::Fault(format!("scratch directory: {e}")))
    }
}

#[async_trait]
impl ConversionBackend for ExternalToolBackend {
    fn name(&self) -> &'static str {
        "external-tools"
    }

    async fn startup(&self) -> Result<(), BackendError> {
        let dir = tempfile::Builder::new()
            .prefix("eml2pdf-")
            .tempdir()
            .map_err(|e| BackendError::Fault(format!("scratch directory: {e}")))?;
        debug!("Backend scratch directory: {}", dir.path().display());

        match &self.html_renderer {
            Some((engine, path)) => info!("HTML renderer: {:?} at {}", engine, path.display()),
            None => warn!("No HTML renderer found (wkhtmltopdf or chromium); body rendering will fail"),
        }
        match &self.office_converter {
            Some(path) => info!("Office converter: {}", path.display()),
            None => warn!("LibreOffice not found; office attachments will fail"),
        }

        let mut guard = self
            .scratch
            .lock()
            .map_err(|_| BackendError::Fault("scratch directory lock poisoned".into()))?;
        *guard = Some(dir);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        let dir = self
            .scratch
            .lock()
            .map_err(|_| BackendError::Fault("scratch directory lock poisoned".into()))?
            .take();
        if let Some(dir) = dir {
            dir.close()
                .map_err(|e| BackendError::Fault(format!("removing scratch directory: {e}")))?;
        }
        Ok(())
    }

    async fn html_to_pdf(&self, html: &str) -> Result<Vec<u8>, BackendError> {
        let (engine, binary) = self
            .html_renderer
            .as_ref()
            .ok_or_else(|| BackendError::ToolMissing {
                tool: "wkhtmltopdf or chromium".into(),
            })?;

        let dir = self.call_dir("html-")?;
        let input = dir.path().join("body.html");
        let output = dir.path().join("body.pdf");
        tokio::fs::write(&input, wrap_document(html))
            .await
            .map_err(|e| BackendError::Fault(format!("writing HTML input: {e}")))?;

        let mut cmd = Command::new(binary);
        match engine {
            HtmlEngine::Wkhtmltopdf => {
                cmd.arg("--quiet")
                    .arg("--encoding")
                    .arg("utf-8")
                    .arg(&input)
                    .arg(&output);
            }
            HtmlEngine::Chromium => {
                cmd.arg("--headless")
                    .arg("--disable-gpu")
                    .arg("--no-sandbox")
                    .arg("--no-pdf-header-footer")
                    .arg(format!("--print-to-pdf={}", output.display()))
                    .arg(format!("file://{}", input.display()));
            }
        }

        run_tool(cmd, binary).await?;
        read_output(&output, binary).await
    }

    async fn office_to_pdf(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let binary = self
            .office_converter
            .as_ref()
            .ok_or_else(|| BackendError::ToolMissing {
                tool: "soffice".into(),
            })?;
        let ext = office_extension(content_type).ok_or_else(|| {
            BackendError::Rejected(format!("'{content_type}' is not an office document type"))
        })?;

        let dir = self.call_dir("office-")?;
        let input = dir.path().join(format!("document.{ext}"));
        let profile = dir.path().join("profile");
        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| BackendError::Fault(format!("writing office input: {e}")))?;

        let mut cmd = Command::new(binary);
        cmd.arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .arg("--headless")
            .arg("--norestore")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(dir.path())
            .arg(&input);

        run_tool(cmd, binary).await?;
        read_output(&dir.path().join("document.pdf"), binary).await
    }
}

/// Wrap a fragment in a UTF-8 document so renderers do not guess the charset.
fn wrap_document(fragment: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head><body>\n{fragment}\n</body></html>\n"
    )
}

fn discover_html_renderer() -> Option<(HtmlEngine, PathBuf)> {
    if let Ok(path) = which::which("wkhtmltopdf") {
        return Some((HtmlEngine::Wkhtmltopdf, path));
    }
    CHROMIUM_BINARIES
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| (HtmlEngine::Chromium, path))
}

fn discover_office_converter() -> Option<PathBuf> {
    OFFICE_BINARIES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Run a tool to completion; a non-zero exit is a (retryable) fault.
async fn run_tool(mut cmd: Command, binary: &Path) -> Result<Output, BackendError> {
    let tool = tool_name(binary);
    debug!("Running {:?}", cmd.as_std());
    let output = cmd.kill_on_drop(true).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::ToolMissing { tool: tool.clone() }
        } else {
            BackendError::Fault(format!("failed to execute {tool}: {e}"))
        }
    })?;

    if !output.status.success() {
        return Err(BackendError::Fault(format!(
            "{tool} exited with {}: {}",
            output.status,
            stderr_excerpt(&output.stderr)
        )));
    }
    Ok(output)
}

/// Read the file a tool was asked to produce. A tool that exits cleanly
/// without writing it has rejected the input.
async fn read_output(path: &Path, binary: &Path) -> Result<Vec<u8>, BackendError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(BackendError::Rejected(format!(
            "{} produced an empty PDF",
            tool_name(binary)
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::Rejected(format!(
            "{} produced no output",
            tool_name(binary)
        ))),
        Err(e) => Err(BackendError::Fault(format!("reading tool output: {e}"))),
    }
}

fn tool_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() > STDERR_EXCERPT {
        let tail: String = text
            .chars()
            .skip(text.chars().count() - STDERR_EXCERPT)
            .collect();
        format!("\u{2026}{tail}")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_detection_from_file_name() {
        assert_eq!(
            HtmlEngine::detect(Path::new("/usr/local/bin/wkhtmltopdf")),
            HtmlEngine::Wkhtmltopdf
        );
        assert_eq!(
            HtmlEngine::detect(Path::new("/usr/bin/chromium-browser")),
            HtmlEngine::Chromium
        );
    }

    #[test]
    fn configured_paths_take_precedence() {
        let tools = ExternalToolConfig {
            html_renderer: Some(PathBuf::from("/opt/wk/wkhtmltopdf")),
            office_converter: Some(PathBuf::from("/opt/lo/soffice")),
        };
        let backend = ExternalToolBackend::from_config(&tools);
        assert_eq!(
            backend.html_renderer(),
            Some(&(HtmlEngine::Wkhtmltopdf, PathBuf::from("/opt/wk/wkhtmltopdf")))
        );
        assert_eq!(backend.office_converter(), Some(Path::new("/opt/lo/soffice")));
    }

    #[test]
    fn discovery_agrees_with_which() {
        let backend = ExternalToolBackend::from_path();
        assert_eq!(
            backend.office_converter().is_some(),
            OFFICE_BINARIES.iter().any(|b| which::which(b).is_ok())
        );
    }

    #[test]
    fn wrapped_document_declares_utf8() {
        let doc = wrap_document("<p>grüße</p>");
        assert!(doc.contains("<meta charset=\"utf-8\">"));
        assert!(doc.contains("<p>grüße</p>"));
    }

    #[test]
    fn stderr_is_truncated_from_the_front() {
        let long = "x".repeat(1000) + "the real error";
        let excerpt = stderr_excerpt(long.as_bytes());
        assert!(excerpt.ends_with("the real error"));
        assert_eq!(excerpt.chars().count(), STDERR_EXCERPT + 1);
    }

    #[tokio::test]
    async fn missing_tools_fail_only_their_capability() {
        let backend = ExternalToolBackend::new(None, None);
        backend.startup().await.unwrap();

        let err = backend.html_to_pdf("<p>x</p>").await.unwrap_err();
        assert!(matches!(err, BackendError::ToolMissing { .. }), "{err:?}");
        let err = backend
            .office_to_pdf(b"PK", "application/msword")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ToolMissing { .. }), "{err:?}");

        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn nonexistent_binary_is_reported_missing() {
        let backend = ExternalToolBackend::new(
            Some((
                HtmlEngine::Wkhtmltopdf,
                PathBuf::from("/definitely/not/wkhtmltopdf"),
            )),
            None,
        );
        backend.startup().await.unwrap();
        let err = backend.html_to_pdf("<p>x</p>").await.unwrap_err();
        assert_eq!(
            err,
            BackendError::ToolMissing {
                tool: "wkhtmltopdf".into()
            }
        );
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn calls_outside_a_session_are_faults() {
        let backend = ExternalToolBackend::new(
            Some((HtmlEngine::Chromium, PathBuf::from("/bin/true"))),
            None,
        );
        let err = backend.html_to_pdf("<p>x</p>").await.unwrap_err();
        assert!(matches!(err, BackendError::Fault(_)), "{err:?}");
    }
}
