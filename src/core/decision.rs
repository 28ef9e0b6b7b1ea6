//! Phase-1 decision record: wire validation into a typed action.
//!
//! Structural checks run through the embedded JSON Schema; per-kind parameter
//! requirements and the `relevant_files` rule are semantic checks here. The
//! one exhaustive match over [`RefactorAction`] variants lives in the file
//! applier.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::{Value, json};

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// Tag value every decision record must carry.
pub const DECISION_TAG: &str = "refactor_decision";

/// The refactor the model chose, with per-variant parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefactorAction {
    MoveFunction {
        source_file: String,
        target_file: String,
        symbol_name: String,
        remove_from_source: bool,
    },
    MoveClass {
        source_file: String,
        target_file: String,
        symbol_name: String,
        remove_from_source: bool,
    },
    ModifyInFile {
        file: String,
        internal_change_description: String,
    },
    CreateFile {
        file: String,
        purpose: String,
    },
    DeleteFile {
        file: String,
    },
    CreateDirectory {
        directory: String,
    },
    NoAction,
}

impl RefactorAction {
    /// Wire value of the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            RefactorAction::MoveFunction { .. } => "move_function",
            RefactorAction::MoveClass { .. } => "move_class",
            RefactorAction::ModifyInFile { .. } => "modify_in_file",
            RefactorAction::CreateFile { .. } => "create_file",
            RefactorAction::DeleteFile { .. } => "delete_file",
            RefactorAction::CreateDirectory { .. } => "create_directory",
            RefactorAction::NoAction => "no_action",
        }
    }

    /// Paths this action names directly (verification intent set).
    pub fn named_paths(&self) -> Vec<&str> {
        match self {
            RefactorAction::MoveFunction {
                source_file,
                target_file,
                ..
            }
            | RefactorAction::MoveClass {
                source_file,
                target_file,
                ..
            } => vec![source_file, target_file],
            RefactorAction::ModifyInFile { file, .. }
            | RefactorAction::CreateFile { file, .. }
            | RefactorAction::DeleteFile { file } => vec![file],
            RefactorAction::CreateDirectory { directory } => vec![directory],
            RefactorAction::NoAction => Vec::new(),
        }
    }

    fn parameters_value(&self) -> Value {
        match self {
            RefactorAction::MoveFunction {
                source_file,
                target_file,
                symbol_name,
                remove_from_source,
            }
            | RefactorAction::MoveClass {
                source_file,
                target_file,
                symbol_name,
                remove_from_source,
            } => json!({
                "source_file": source_file,
                "target_file": target_file,
                "symbol_name": symbol_name,
                "remove_from_source": remove_from_source,
            }),
            RefactorAction::ModifyInFile {
                file,
                internal_change_description,
            } => json!({
                "file": file,
                "internal_change_description": internal_change_description,
            }),
            RefactorAction::CreateFile { file, purpose } => json!({
                "file": file,
                "purpose": purpose,
            }),
            RefactorAction::DeleteFile { file } => json!({ "file": file }),
            RefactorAction::CreateDirectory { directory } => json!({ "directory": directory }),
            RefactorAction::NoAction => json!({}),
        }
    }
}

/// A validated Phase-1 decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: RefactorAction,
    /// Free text, used as the commit subject.
    pub description: String,
    /// Repo-relative paths Phase 2 must see.
    pub relevant_files: Vec<String>,
    pub reasoning: String,
}

impl Decision {
    /// Serialize back to the wire shape for the Phase-2 prompt.
    pub fn to_wire_value(&self) -> Value {
        json!({
            "analysis_tag": DECISION_TAG,
            "kind": self.action.kind(),
            "description": self.description,
            "parameters": self.action.parameters_value(),
            "relevant_files": self.relevant_files,
            "reasoning": self.reasoning,
        })
    }
}

/// Parse and validate a decision record from extracted model JSON.
pub fn parse_decision(value: &Value) -> Result<Decision> {
    let schema: Value = serde_json::from_str(DECISION_SCHEMA).context("parse decision schema")?;
    validate_schema(value, &schema).context("decision record")?;

    let kind = value["kind"].as_str().unwrap_or_default();
    let params = value["parameters"]
        .as_object()
        .ok_or_else(|| anyhow!("'parameters' must be an object"))?;

    let action = match kind {
        "move_function" => RefactorAction::MoveFunction {
            source_file: require_str(params, kind, "source_file")?,
            target_file: require_str(params, kind, "target_file")?,
            symbol_name: require_str(params, kind, "symbol_name")?,
            remove_from_source: require_bool(params, kind, "remove_from_source")?,
        },
        "move_class" => RefactorAction::MoveClass {
            source_file: require_str(params, kind, "source_file")?,
            target_file: require_str(params, kind, "target_file")?,
            symbol_name: require_str(params, kind, "symbol_name")?,
            remove_from_source: require_bool(params, kind, "remove_from_source")?,
        },
        "modify_in_file" => RefactorAction::ModifyInFile {
            file: require_str(params, kind, "file")?,
            internal_change_description: require_str(params, kind, "internal_change_description")?,
        },
        "create_file" => RefactorAction::CreateFile {
            file: require_str(params, kind, "file")?,
            purpose: require_str(params, kind, "purpose")?,
        },
        "delete_file" => RefactorAction::DeleteFile {
            file: require_str(params, kind, "file")?,
        },
        "create_directory" => RefactorAction::CreateDirectory {
            directory: require_str(params, kind, "directory")?,
        },
        "no_action" => RefactorAction::NoAction,
        other => bail!("unknown decision kind '{other}'"),
    };

    let relevant_files: Vec<String> = value["relevant_files"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let may_skip_context = matches!(
        action,
        RefactorAction::CreateDirectory { .. }
            | RefactorAction::CreateFile { .. }
            | RefactorAction::NoAction
    );
    if relevant_files.is_empty() && !may_skip_context {
        bail!("'relevant_files' must not be empty for kind '{kind}'");
    }

    Ok(Decision {
        action,
        description: value["description"].as_str().unwrap_or_default().to_string(),
        relevant_files,
        reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
    })
}

fn require_str(
    params: &serde_json::Map<String, Value>,
    kind: &str,
    field: &str,
) -> Result<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("kind '{kind}' requires string parameter '{field}'"))
}

fn require_bool(params: &serde_json::Map<String, Value>, kind: &str, field: &str) -> Result<bool> {
    params
        .get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| anyhow!("kind '{kind}' requires boolean parameter '{field}'"))
}

/// Validate a JSON instance against a schema (Draft 2020-12).
pub(crate) fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
