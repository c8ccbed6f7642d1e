//! Merge intermediate PDFs into the single output document.
//!
//! ## Input order
//!
//! [`merge_artifacts`] takes the orchestrator's artifact list and sorts it
//! by sequence index. [`merge_working_area`] reads the same order from the
//! working area: `manifest.json` when present, otherwise every `*.pdf` file
//! sorted by the zero-padded index embedded in its name, then by name. The
//! directory listing order is never used as is.
//!
//! ## Unreadable inputs
//!
//! Governed by [`MergeFailurePolicy`]: `Skip` logs the file, records it in
//! [`MergedDocument::skipped`] and carries on; `Abort` stops with
//! [`Eml2PdfError::MergeReadFailed`]. No readable input at all is
//! [`Eml2PdfError::NothingToMerge`] under either policy.
//!
//! Log records carry the message identity: the caller's for
//! [`merge_artifacts`], the manifest's for [`merge_working_area`].

use crate::config::MergeFailurePolicy;
use crate::error::Eml2PdfError;
use crate::output::{ConversionArtifact, MergedDocument, MergedInput, SkippedInput};
use crate::pdf::PdfAssembler;
use crate::pipeline::parse::NO_MESSAGE_ID;
use crate::working_area::{parse_artifact_file_name, read_manifest};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Merge the artifacts of one conversion, in sequence-index order.
///
/// `message_id` labels the log records of this merge.
pub async fn merge_artifacts(
    artifacts: &[ConversionArtifact],
    output: &Path,
    policy: MergeFailurePolicy,
    message_id: Option<&str>,
) -> Result<MergedDocument, Eml2PdfError> {
    let mut ordered: Vec<&ConversionArtifact> = artifacts.iter().collect();
    ordered.sort_by_key(|a| a.index);
    let inputs = ordered.into_iter().map(|a| a.path.clone()).collect();
    let origin = artifacts
        .first()
        .and_then(|a| a.path.parent())
        .unwrap_or(output)
        .to_path_buf();
    let message_id = message_id.unwrap_or(NO_MESSAGE_ID).to_string();
    merge_paths(inputs, origin, output, policy, message_id).await
}

/// Merge every artifact found in a working area.
pub async fn merge_working_area(
    dir: &Path,
    output: &Path,
    policy: MergeFailurePolicy,
) -> Result<MergedDocument, Eml2PdfError> {
    let (inputs, message_id) = discover(dir, output).await?;
    let message_id = message_id.unwrap_or_else(|| NO_MESSAGE_ID.to_string());
    merge_paths(inputs, dir.to_path_buf(), output, policy, message_id).await
}

/// The working area's PDFs in merge order, excluding `output` itself.
pub async fn discover_inputs(dir: &Path, output: &Path) -> Result<Vec<PathBuf>, Eml2PdfError> {
    Ok(discover(dir, output).await?.0)
}

/// Inputs in merge order plus the manifest's message identity, if any.
async fn discover(
    dir: &Path,
    output: &Path,
) -> Result<(Vec<PathBuf>, Option<String>), Eml2PdfError> {
    if let Some(manifest) = read_manifest(dir).await? {
        debug!(
            "Merging {} artifacts listed in the manifest of {}",
            manifest.artifacts.len(),
            dir.display()
        );
        let inputs = manifest
            .artifacts
            .into_iter()
            .map(|entry| dir.join(entry.file))
            .collect();
        return Ok((inputs, manifest.message_id));
    }

    let io_err = |e| Eml2PdfError::WorkingArea {
        path: dir.to_path_buf(),
        source: e,
    };
    let output = resolve(output).await;
    let mut found: Vec<(usize, String, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !entry.file_type().await.map_err(io_err)?.is_file() {
            continue;
        }
        if resolve(&path).await == output {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let index = parse_artifact_file_name(&name)
            .map(|(index, _)| index)
            .unwrap_or(usize::MAX);
        found.push((index, name, path));
    }
    found.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    debug!("Discovered {} PDF files in {}", found.len(), dir.display());
    Ok((found.into_iter().map(|(_, _, path)| path).collect(), None))
}

/// Absolute, symlink-free form of `path` for comparisons. A file that does
/// not exist yet is resolved through its parent directory.
async fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = tokio::fs::canonicalize(path).await {
        return resolved;
    }
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    tokio::fs::canonicalize(parent)
        .await
        .map(|p| p.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}

async fn merge_paths(
    inputs: Vec<PathBuf>,
    origin: PathBuf,
    output: &Path,
    policy: MergeFailurePolicy,
    message_id: String,
) -> Result<MergedDocument, Eml2PdfError> {
    let identity = message_id.clone();
    let (bytes, merged, skipped) =
        tokio::task::spawn_blocking(move || assemble(inputs, &origin, policy, &identity))
            .await
            .map_err(|e| Eml2PdfError::Internal(format!("merge task panicked: {e}")))??;

    let page_count = merged.iter().map(|m| m.page_count).sum();
    write_atomic(output, &bytes).await?;

    info!(
        message_id = %message_id,
        "Merged {} file(s), {} page(s) into {} ({} skipped)",
        merged.len(),
        page_count,
        output.display(),
        skipped.len()
    );

    Ok(MergedDocument {
        path: output.to_path_buf(),
        page_count,
        inputs: merged,
        skipped,
    })
}

type Assembled = (Vec<u8>, Vec<MergedInput>, Vec<SkippedInput>);

fn assemble(
    inputs: Vec<PathBuf>,
    origin: &Path,
    policy: MergeFailurePolicy,
    message_id: &str,
) -> Result<Assembled, Eml2PdfError> {
    let mut assembler = PdfAssembler::new();
    let mut merged = Vec::new();
    let mut skipped = Vec::new();

    for path in inputs {
        let appended = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| assembler.append_bytes(&bytes).map_err(|e| e.to_string()));
        match appended {
            Ok(page_count) => {
                debug!("Appended {} page(s) from {}", page_count, path.display());
                merged.push(MergedInput { path, page_count });
            }
            Err(detail) => match policy {
                MergeFailurePolicy::Abort => {
                    warn!(
                        message_id,
                        error_kind = "merge_read",
                        "Aborting merge at unreadable PDF {}: {}",
                        path.display(),
                        detail
                    );
                    return Err(Eml2PdfError::MergeReadFailed { path, detail });
                }
                MergeFailurePolicy::Skip => {
                    warn!(
                        message_id,
                        error_kind = "merge_read",
                        "Skipping unreadable PDF {}: {}",
                        path.display(),
                        detail
                    );
                    skipped.push(SkippedInput {
                        path,
                        reason: detail,
                    });
                }
            },
        }
    }

    if assembler.page_count() == 0 {
        return Err(Eml2PdfError::NothingToMerge {
            path: origin.to_path_buf(),
        });
    }

    let bytes = assembler
        .finish()
        .map_err(|e| Eml2PdfError::MergeFailed(e.to_string()))?;
    Ok((bytes, merged, skipped))
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Eml2PdfError> {
    let write_err = |e| Eml2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{page_widths, pdf_with_widths};
    use crate::working_area::{write_manifest, Manifest, ManifestEntry};

    #[tokio::test]
    async fn scan_order_follows_indices_not_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        // Created out of order on purpose.
        std::fs::write(dir.path().join("002-attachment3.pdf"), pdf_with_widths(&[300])).unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        std::fs::write(dir.path().join("001-attachment1.pdf"), pdf_with_widths(&[200])).unwrap();
        let out = dir.path().join("merged.pdf");

        let merged = merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();

        assert_eq!(merged.page_count, 3);
        assert_eq!(page_widths(&std::fs::read(&out).unwrap()), vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn index_sorting_is_numeric_past_three_digits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1000-attachment1000.pdf"), pdf_with_widths(&[400])).unwrap();
        std::fs::write(dir.path().join("999-attachment999.pdf"), pdf_with_widths(&[300])).unwrap();
        std::fs::write(dir.path().join("zzz.pdf"), pdf_with_widths(&[500])).unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        let out = dir.path().join("out").join("merged.pdf");

        merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();
        assert_eq!(
            page_widths(&std::fs::read(&out).unwrap()),
            vec![100, 300, 400, 500]
        );
    }

    #[tokio::test]
    async fn manifest_overrides_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        std::fs::write(dir.path().join("001-attachment2.pdf"), pdf_with_widths(&[200, 210])).unwrap();
        std::fs::write(dir.path().join("005-stray.pdf"), pdf_with_widths(&[999])).unwrap();
        write_manifest(
            dir.path(),
            &Manifest {
                message_id: None,
                artifacts: vec![
                    ManifestEntry {
                        index: 1,
                        name: "attachment2".into(),
                        file: "001-attachment2.pdf".into(),
                        page_count: 2,
                    },
                    ManifestEntry {
                        index: 0,
                        name: "body".into(),
                        file: "000-body.pdf".into(),
                        page_count: 1,
                    },
                ],
            },
        )
        .await
        .unwrap();
        let out = dir.path().join("merged.pdf");

        let merged = merge_working_area(dir.path(), &out, MergeFailurePolicy::Abort)
            .await
            .unwrap();
        assert_eq!(merged.inputs.len(), 2);
        assert_eq!(page_widths(&std::fs::read(&out).unwrap()), vec![100, 200, 210]);
    }

    #[tokio::test]
    async fn skip_policy_leaves_out_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        std::fs::write(dir.path().join("001-attachment1.pdf"), b"%PDF-1.4 garbage").unwrap();
        std::fs::write(dir.path().join("002-attachment2.pdf"), pdf_with_widths(&[300])).unwrap();
        let out = dir.path().join("merged.pdf");

        let merged = merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();
        assert_eq!(merged.page_count, 2);
        assert_eq!(merged.skipped.len(), 1);
        assert!(merged.skipped[0].path.ends_with("001-attachment1.pdf"));
        assert_eq!(page_widths(&std::fs::read(&out).unwrap()), vec![100, 300]);
    }

    #[tokio::test]
    async fn abort_policy_stops_at_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        std::fs::write(dir.path().join("001-attachment1.pdf"), b"not a pdf").unwrap();
        let out = dir.path().join("merged.pdf");

        let err = merge_working_area(dir.path(), &out, MergeFailurePolicy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, Eml2PdfError::MergeReadFailed { .. }), "{err:?}");
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn empty_working_area_has_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("merged.pdf");
        let err = merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, Eml2PdfError::NothingToMerge { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn previous_output_in_the_working_area_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        let out = dir.path().join("merged.pdf");
        merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();
        let again = merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();
        assert_eq!(again.page_count, 1);
    }

    #[tokio::test]
    async fn previous_output_is_ignored_under_another_spelling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("000-body.pdf"), pdf_with_widths(&[100])).unwrap();
        let out = dir.path().join("merged.pdf");
        merge_working_area(dir.path(), &out, MergeFailurePolicy::Skip)
            .await
            .unwrap();

        let same_file = dir.path().join("sub").join("..").join("merged.pdf");
        let again = merge_working_area(dir.path(), &same_file, MergeFailurePolicy::Skip)
            .await
            .unwrap();
        assert_eq!(again.page_count, 1);
        assert_eq!(again.inputs.len(), 1);
        assert_eq!(
            discover_inputs(dir.path(), &same_file).await.unwrap(),
            vec![dir.path().join("000-body.pdf")]
        );
    }

    #[tokio::test]
    async fn artifact_list_merge_accepts_missing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("merged.pdf");
        let err = merge_artifacts(&[], &out, MergeFailurePolicy::Skip, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Eml2PdfError::NothingToMerge { .. }), "{err:?}");
    }

    #[test]
    fn skipped_inputs_are_logged_with_message_identity() {
        use crate::log_capture::{field, EventLog};

        let log = EventLog::default();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("000-body.pdf");
        let bad = dir.path().join("001-attachment1.pdf");
        std::fs::write(&good, pdf_with_widths(&[100])).unwrap();
        std::fs::write(&bad, b"%PDF-1.4 garbage").unwrap();

        let (_, merged, skipped) = tracing::subscriber::with_default(log.subscriber(), || {
            assemble(vec![good, bad], dir.path(), MergeFailurePolicy::Skip, "m@x.com")
        })
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(skipped.len(), 1);

        let events = log.with_fields(&["message_id", "error_kind"]);
        assert_eq!(events.len(), 1);
        assert_eq!(field(&events[0], "message_id"), Some("m@x.com"));
        assert_eq!(field(&events[0], "error_kind"), Some("merge_read"));
    }
}
