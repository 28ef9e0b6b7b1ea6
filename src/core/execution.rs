//! Phase-2 execution record: wire validation bound to the decision.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::core::decision::{RefactorAction, validate_schema};

const EXECUTION_SCHEMA: &str = include_str!("../../schemas/execution.schema.json");

/// Tag value every execution record should carry.
pub const EXECUTION_TAG: &str = "execution_change";

/// A validated Phase-2 execution result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Execution {
    /// Repo-relative path to full post-change file contents.
    pub modified_files: BTreeMap<String, String>,
    pub warning: Option<String>,
}

/// Parse result plus leniencies applied, for the caller to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionParse {
    pub execution: Execution,
    /// `result_tag` was absent but `modified_files` was well-formed.
    pub missing_tag: bool,
    /// `modified_files` was cleared for a delete/create-directory decision.
    pub coerced_empty: bool,
}

/// Parse and validate an execution record from extracted model JSON.
///
/// For `delete_file` and `create_directory` decisions, a non-empty
/// `modified_files` with no `warning` set is silently replaced by the empty
/// mapping; with a `warning` present the mapping is kept as-is (the model
/// refused and said so).
pub fn parse_execution(value: &Value, action: &RefactorAction) -> Result<ExecutionParse> {
    let schema: Value = serde_json::from_str(EXECUTION_SCHEMA).context("parse execution schema")?;
    validate_schema(value, &schema).context("execution record")?;

    // The schema already rejects a present-but-wrong tag via `const`.
    let missing_tag = match value.get("result_tag") {
        Some(tag) if tag == EXECUTION_TAG => false,
        Some(other) => return Err(anyhow!("unexpected result_tag {other}")),
        None => true,
    };

    let mut modified_files: BTreeMap<String, String> = value["modified_files"]
        .as_object()
        .ok_or_else(|| anyhow!("'modified_files' must be an object"))?
        .iter()
        .map(|(path, contents)| {
            let contents = contents
                .as_str()
                .ok_or_else(|| anyhow!("'modified_files[{path}]' must be a string"))?;
            Ok((path.clone(), contents.to_string()))
        })
        .collect::<Result<_>>()?;

    let warning = value
        .get("warning")
        .and_then(Value::as_str)
        .map(str::to_string);

    let wants_empty = matches!(
        action,
        RefactorAction::DeleteFile { .. } | RefactorAction::CreateDirectory { .. }
    );
    let coerced_empty = wants_empty && !modified_files.is_empty() && warning.is_none();
    if coerced_empty {
        modified_files.clear();
    }

    Ok(ExecutionParse {
        execution: Execution {
            modified_files,
            warning,
        },
        missing_tag,
        coerced_empty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn modify_action() -> RefactorAction {
        RefactorAction::ModifyInFile {
            file: "app/util.x".to_string(),
            internal_change_description: "trim".to_string(),
        }
    }

    #[test]
    fn parses_tagged_record() {
        let value = json!({
            "result_tag": "execution_change",
            "modified_files": {"app/util.x": "contents"},
        });
        let parsed = parse_execution(&value, &modify_action()).expect("parse");
        assert!(!parsed.missing_tag);
        assert_eq!(
            parsed.execution.modified_files.get("app/util.x"),
            Some(&"contents".to_string())
        );
    }

    #[test]
    fn missing_tag_is_lenient() {
        let value = json!({"modified_files": {"app/util.x": "contents"}});
        let parsed = parse_execution(&value, &modify_action()).expect("parse");
        assert!(parsed.missing_tag);
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let value = json!({
            "result_tag": "other",
            "modified_files": {},
        });
        assert!(parse_execution(&value, &modify_action()).is_err());
    }

    #[test]
    fn non_string_contents_rejected() {
        let value = json!({
            "result_tag": "execution_change",
            "modified_files": {"app/util.x": 7},
        });
        assert!(parse_execution(&value, &modify_action()).is_err());
    }

    #[test]
    fn delete_file_coerces_stray_contents() {
        let value = json!({
            "result_tag": "execution_change",
            "modified_files": {"app/old.x": "should not be here"},
        });
        let action = RefactorAction::DeleteFile {
            file: "app/old.x".to_string(),
        };
        let parsed = parse_execution(&value, &action).expect("parse");
        assert!(parsed.coerced_empty);
        assert!(parsed.execution.modified_files.is_empty());
    }

    #[test]
    fn delete_file_warning_keeps_contents() {
        let value = json!({
            "result_tag": "execution_change",
            "modified_files": {"app/old.x": "original"},
            "warning": "file not empty",
        });
        let action = RefactorAction::DeleteFile {
            file: "app/old.x".to_string(),
        };
        let parsed = parse_execution(&value, &action).expect("parse");
        assert!(!parsed.coerced_empty);
        assert_eq!(parsed.execution.modified_files.len(), 1);
        assert_eq!(
            parsed.execution.warning.as_deref(),
            Some("file not empty")
        );
    }

    #[test]
    fn create_directory_coerces_stray_contents() {
        let value = json!({
            "result_tag": "execution_change",
            "modified_files": {"app/Helpers/readme.x": "hi"},
        });
        let action = RefactorAction::CreateDirectory {
            directory: "app/Helpers".to_string(),
        };
        let parsed = parse_execution(&value, &action).expect("parse");
        assert!(parsed.execution.modified_files.is_empty());
    }
}
