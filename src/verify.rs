//! Advisory cross-check between the declared intent and the working tree.
//!
//! The intended set derives from the decision's `relevant_files` plus the
//! paths its action names. Anything generated, modified, or left behind
//! outside that set is reported. Checks are advisory by design: the model
//! sometimes touches files it did not declare.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::core::decision::{Decision, RefactorAction};
use crate::core::execution::Execution;
use crate::core::path_guard::resolve_within;
use crate::io::vcs::VcsClient;

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub passed: bool,
    pub summary: String,
}

/// Snapshot of on-disk contents keyed by repo-relative path, taken before
/// the apply step. `None` means the file did not exist.
pub type ContentSnapshot = BTreeMap<String, Option<String>>;

/// Read the pre-apply contents of every path the execution will write.
pub fn snapshot_contents(root: &Path, execution: &Execution) -> ContentSnapshot {
    execution
        .modified_files
        .keys()
        .map(|rel| {
            let contents = resolve_within(root, rel)
                .ok()
                .and_then(|path| fs::read_to_string(path).ok());
            (rel.clone(), contents)
        })
        .collect()
}

/// Cross-check the applied execution against the decision's intent.
pub fn verify_changes<V: VcsClient>(
    vcs: &V,
    root: &Path,
    decision: &Decision,
    execution: &Execution,
    pre_contents: &ContentSnapshot,
) -> Result<VerifyReport> {
    let mut intended: BTreeSet<String> = decision.relevant_files.iter().cloned().collect();
    for path in decision.action.named_paths() {
        intended.insert(path.to_string());
    }

    let mut notes = Vec::new();

    for path in execution.modified_files.keys() {
        if !intended.contains(path) {
            notes.push(format!("unexpected generation: {path}"));
        }
    }

    for path in vcs.list_modified()? {
        if !intended.contains(&path) {
            notes.push(format!("unexpected modification: {path}"));
        }
    }

    for (path, pre) in pre_contents {
        let current = resolve_within(root, path)
            .ok()
            .and_then(|resolved| fs::read_to_string(resolved).ok());
        if pre.is_some() && *pre == current {
            notes.push(format!("no-op write: {path}"));
        }
    }

    if let RefactorAction::DeleteFile { file } = &decision.action {
        if let Ok(target) = resolve_within(root, file) {
            if target.exists() {
                notes.push(format!("delete target still exists: {file}"));
            }
        }
    }

    let passed = notes.is_empty();
    let summary = if passed {
        "consistent with declared intent".to_string()
    } else {
        notes.join("; ")
    };
    debug!(passed, %summary, "verification complete");
    Ok(VerifyReport { passed, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedVcs;

    fn decision_modify(file: &str) -> Decision {
        Decision {
            action: RefactorAction::ModifyInFile {
                file: file.to_string(),
                internal_change_description: "trim".to_string(),
            },
            description: "tidy".to_string(),
            relevant_files: vec![file.to_string()],
            reasoning: "test".to_string(),
        }
    }

    fn execution_with(files: &[(&str, &str)]) -> Execution {
        Execution {
            modified_files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            warning: None,
        }
    }

    #[test]
    fn consistent_change_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::write(root.join("util.x"), "new contents\n").expect("write");

        let vcs = ScriptedVcs::new().with_modified(["util.x"]);
        let decision = decision_modify("util.x");
        let execution = execution_with(&[("util.x", "new contents\n")]);
        let pre: ContentSnapshot =
            BTreeMap::from([("util.x".to_string(), Some("old contents\n".to_string()))]);

        let report = verify_changes(&vcs, root, &decision, &execution, &pre).expect("verify");
        assert!(report.passed, "{}", report.summary);
    }

    #[test]
    fn flags_unexpected_generation_and_modification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let vcs = ScriptedVcs::new().with_modified(["util.x", "sneaky.x"]);
        let decision = decision_modify("util.x");
        let execution = execution_with(&[("util.x", "a"), ("extra.x", "b")]);
        let pre = ContentSnapshot::new();

        let report = verify_changes(&vcs, root, &decision, &execution, &pre).expect("verify");
        assert!(!report.passed);
        assert!(report.summary.contains("unexpected generation: extra.x"));
        assert!(report.summary.contains("unexpected modification: sneaky.x"));
    }

    #[test]
    fn flags_no_op_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::write(root.join("util.x"), "same\n").expect("write");

        let vcs = ScriptedVcs::new();
        let decision = decision_modify("util.x");
        let execution = execution_with(&[("util.x", "same\n")]);
        let pre: ContentSnapshot =
            BTreeMap::from([("util.x".to_string(), Some("same\n".to_string()))]);

        let report = verify_changes(&vcs, root, &decision, &execution, &pre).expect("verify");
        assert!(!report.passed);
        assert!(report.summary.contains("no-op write: util.x"));
    }

    #[test]
    fn flags_surviving_delete_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::write(root.join("old.x"), "still here").expect("write");

        let vcs = ScriptedVcs::new();
        let decision = Decision {
            action: RefactorAction::DeleteFile {
                file: "old.x".to_string(),
            },
            description: "remove".to_string(),
            relevant_files: vec!["old.x".to_string()],
            reasoning: "test".to_string(),
        };
        let execution = Execution::default();
        let pre = ContentSnapshot::new();

        let report = verify_changes(&vcs, root, &decision, &execution, &pre).expect("verify");
        assert!(!report.passed);
        assert!(report.summary.contains("delete target still exists"));
    }
}
