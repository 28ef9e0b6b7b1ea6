//! Applies a validated execution to the working tree.
//!
//! The single exhaustive match over [`RefactorAction`] lives here. Per-file
//! failures are collected and summarized; any failure fails the apply so the
//! engine can roll the tree back.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::decision::{Decision, RefactorAction};
use crate::core::execution::Execution;
use crate::core::normalize::normalize;
use crate::core::path_guard::resolve_within;

/// Summary of one apply pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Repo-relative paths written, deleted, or created.
    pub touched: Vec<String>,
    /// Total Mojibake replacements across all written files.
    pub mojibake_replacements: usize,
}

/// Apply `execution` to the tree under `root` according to the decision.
#[instrument(skip_all, fields(kind = decision.action.kind()))]
pub fn apply_execution(
    root: &Path,
    decision: &Decision,
    execution: &Execution,
) -> Result<ApplyReport> {
    match &decision.action {
        RefactorAction::DeleteFile { file } => delete_file(root, file),
        RefactorAction::CreateDirectory { directory } => create_directory(root, directory),
        RefactorAction::MoveFunction { .. }
        | RefactorAction::MoveClass { .. }
        | RefactorAction::ModifyInFile { .. }
        | RefactorAction::CreateFile { .. } => write_modified_files(root, execution),
        RefactorAction::NoAction => Ok(ApplyReport::default()),
    }
}

fn delete_file(root: &Path, file: &str) -> Result<ApplyReport> {
    let target = resolve_within(root, file).with_context(|| format!("delete '{file}'"))?;
    let Ok(meta) = fs::symlink_metadata(&target) else {
        // Already absent: the desired state holds.
        debug!(path = %file, "delete target already absent");
        return Ok(ApplyReport::default());
    };

    if meta.is_file() || meta.is_symlink() {
        fs::remove_file(&target).with_context(|| format!("remove file {}", target.display()))?;
    } else if meta.is_dir() {
        let occupied = fs::read_dir(&target)
            .with_context(|| format!("read {}", target.display()))?
            .next()
            .is_some();
        if occupied {
            return Err(anyhow!("refusing to delete non-empty directory '{file}'"));
        }
        fs::remove_dir(&target).with_context(|| format!("remove dir {}", target.display()))?;
    } else {
        return Err(anyhow!("unsupported file type at '{file}'"));
    }

    Ok(ApplyReport {
        touched: vec![file.to_string()],
        mojibake_replacements: 0,
    })
}

fn create_directory(root: &Path, directory: &str) -> Result<ApplyReport> {
    let target =
        resolve_within(root, directory).with_context(|| format!("create dir '{directory}'"))?;
    if target.is_dir() {
        debug!(path = %directory, "directory already exists");
        return Ok(ApplyReport::default());
    }
    if target.exists() {
        return Err(anyhow!("'{directory}' exists and is not a directory"));
    }
    fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
    Ok(ApplyReport {
        touched: vec![directory.to_string()],
        mojibake_replacements: 0,
    })
}

fn write_modified_files(root: &Path, execution: &Execution) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    let mut failures = Vec::new();

    for (rel, contents) in &execution.modified_files {
        match write_one(root, rel, contents) {
            Ok(replacements) => {
                report.touched.push(rel.clone());
                report.mojibake_replacements += replacements;
            }
            Err(err) => {
                warn!(path = %rel, %err, "failed to apply file");
                failures.push(format!("{rel}: {err:#}"));
            }
        }
    }

    if !failures.is_empty() {
        return Err(anyhow!(
            "{} of {} files failed to apply:\n- {}",
            failures.len(),
            execution.modified_files.len(),
            failures.join("\n- ")
        ));
    }
    Ok(report)
}

fn write_one(root: &Path, rel: &str, contents: &str) -> Result<usize> {
    let target = resolve_within(root, rel)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let normalized = normalize(contents);
    if normalized.escapes_decoded || normalized.mojibake_replacements > 0 {
        debug!(
            path = %rel,
            escapes = normalized.escapes_decoded,
            mojibake = normalized.mojibake_replacements,
            "normalized file contents"
        );
    }
    if normalized.residue_suspected {
        warn!(path = %rel, "suspect encoding residue after normalization");
    }

    write_atomic(&target, &normalized.text)?;
    Ok(normalized.mojibake_replacements)
}

/// Overwrite `path` with UTF-8 `contents` via a temp file and rename.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn decision(action: RefactorAction) -> Decision {
        Decision {
            action,
            description: "test change".to_string(),
            relevant_files: Vec::new(),
            reasoning: "test".to_string(),
        }
    }

    fn execution(files: &[(&str, &str)]) -> Execution {
        Execution {
            modified_files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            warning: None,
        }
    }

    #[test]
    fn writes_files_and_creates_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let decision = decision(RefactorAction::ModifyInFile {
            file: "app/util.x".to_string(),
            internal_change_description: "trim".to_string(),
        });
        let execution = execution(&[("app/util.x", "fn util() {}\n")]);

        let report = apply_execution(root, &decision, &execution).expect("apply");
        assert_eq!(report.touched, vec!["app/util.x"]);
        let written = fs::read_to_string(root.join("app/util.x")).expect("read back");
        assert_eq!(written, "fn util() {}\n");
    }

    #[test]
    fn normalizes_contents_before_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let decision = decision(RefactorAction::CreateFile {
            file: "app/msg.x".to_string(),
            purpose: "strings".to_string(),
        });
        let execution = execution(&[("app/msg.x", "Descripci\\u00f3n: fallarÃ¡\\n")]);

        let report = apply_execution(root, &decision, &execution).expect("apply");
        assert_eq!(report.mojibake_replacements, 1);
        let written = fs::read_to_string(root.join("app/msg.x")).expect("read back");
        assert_eq!(written, "Descripción: fallará\n");
    }

    #[test]
    fn unsafe_path_fails_and_writes_nothing_outside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("tree");
        fs::create_dir_all(&root).expect("mkdir");
        let decision = decision(RefactorAction::ModifyInFile {
            file: "app/util.x".to_string(),
            internal_change_description: "trim".to_string(),
        });
        let execution = execution(&[("../evil", "x")]);

        let err = apply_execution(&root, &decision, &execution).unwrap_err();
        assert!(err.to_string().contains("1 of 1 files failed"));
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn partial_failure_reports_but_still_writes_valid_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let decision = decision(RefactorAction::ModifyInFile {
            file: "good.x".to_string(),
            internal_change_description: "trim".to_string(),
        });
        let execution = execution(&[("../evil", "x"), ("good.x", "ok\n")]);

        let err = apply_execution(root, &decision, &execution).unwrap_err();
        assert!(err.to_string().contains("1 of 2 files failed"));
        assert!(root.join("good.x").exists());
    }

    #[test]
    fn delete_absent_file_succeeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let decision = decision(RefactorAction::DeleteFile {
            file: "app/gone.x".to_string(),
        });
        let report =
            apply_execution(temp.path(), &decision, &Execution::default()).expect("apply");
        assert!(report.touched.is_empty());
    }

    #[test]
    fn delete_removes_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("app")).expect("mkdir");
        fs::write(root.join("app/old.x"), "bye").expect("write");
        let decision = decision(RefactorAction::DeleteFile {
            file: "app/old.x".to_string(),
        });

        apply_execution(root, &decision, &Execution::default()).expect("apply");
        assert!(!root.join("app/old.x").exists());
    }

    #[test]
    fn delete_refuses_non_empty_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("app/full")).expect("mkdir");
        fs::write(root.join("app/full/file.x"), "content").expect("write");
        let decision = decision(RefactorAction::DeleteFile {
            file: "app/full".to_string(),
        });

        let err = apply_execution(root, &decision, &Execution::default()).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn delete_removes_empty_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("app/empty")).expect("mkdir");
        let decision = decision(RefactorAction::DeleteFile {
            file: "app/empty".to_string(),
        });

        apply_execution(root, &decision, &Execution::default()).expect("apply");
        assert!(!root.join("app/empty").exists());
    }

    #[test]
    fn create_directory_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let decision = decision(RefactorAction::CreateDirectory {
            directory: "app/Helpers".to_string(),
        });

        apply_execution(root, &decision, &Execution::default()).expect("first");
        apply_execution(root, &decision, &Execution::default()).expect("second");
        assert!(root.join("app/Helpers").is_dir());
    }

    #[test]
    fn create_directory_rejects_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("blocked"), "file").expect("write");
        let decision = decision(RefactorAction::CreateDirectory {
            directory: "blocked".to_string(),
        });

        let err = apply_execution(root, &decision, &Execution::default()).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
