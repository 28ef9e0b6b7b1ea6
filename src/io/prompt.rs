//! Prompt assembly for both model phases.
//!
//! Prompts render from fixed templates so section ordering stays stable
//! across runs: contract, structure, history, file contents, closing
//! JSON-only instruction for Phase 1; contract, decision, rules, reduced
//! context for Phase 2.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::decision::Decision;

const DECIDE_TEMPLATE: &str = include_str!("prompts/decide.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("decide", DECIDE_TEMPLATE)
            .expect("decide template should be valid");
        env.add_template("execute", EXECUTE_TEMPLATE)
            .expect("execute template should be valid");
        Self { env }
    }
}

/// Build the Phase-1 prompt from the structure rendering, recent history,
/// and the full framed file contents.
pub fn decide_prompt(structure: &str, history: &str, files: &str) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("decide").context("decide template")?;
    let rendered = template
        .render(context! {
            structure => structure.trim_end(),
            history => (!history.trim().is_empty()).then(|| history.trim()),
            files => files.trim_end(),
        })
        .context("render decide prompt")?;
    Ok(rendered)
}

/// Build the Phase-2 prompt binding the serialized decision to the reduced
/// context of relevant files.
pub fn execute_prompt(decision: &Decision, files: &str) -> Result<String> {
    let decision_json = serde_json::to_string_pretty(&decision.to_wire_value())
        .context("serialize decision for prompt")?;
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template("execute")
        .context("execute template")?;
    let rendered = template
        .render(context! {
            decision_json => decision_json,
            files => (!files.trim().is_empty()).then(|| files.trim_end()),
        })
        .context("render execute prompt")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::RefactorAction;

    fn sample_decision() -> Decision {
        Decision {
            action: RefactorAction::ModifyInFile {
                file: "app/util.x".to_string(),
                internal_change_description: "remove commented-out block".to_string(),
            },
            description: "clean util".to_string(),
            relevant_files: vec!["app/util.x".to_string()],
            reasoning: "dead code".to_string(),
        }
    }

    #[test]
    fn decide_prompt_orders_sections() {
        let prompt = decide_prompt("tree/\n", "past entry", "files here").expect("render");
        let contract = prompt.find("<contract>").expect("contract");
        let structure = prompt.find("<structure>").expect("structure");
        let history = prompt.find("<history>").expect("history");
        let files = prompt.find("<files>").expect("files");
        let closing = prompt.find("JSON object only").expect("closing");
        assert!(contract < structure);
        assert!(structure < history);
        assert!(history < files);
        assert!(files < closing);
    }

    #[test]
    fn decide_prompt_omits_empty_history() {
        let prompt = decide_prompt("tree/\n", "", "files").expect("render");
        assert!(!prompt.contains("<history>"));
    }

    #[test]
    fn decide_prompt_names_every_kind() {
        let prompt = decide_prompt("t", "", "f").expect("render");
        for kind in [
            "move_function",
            "move_class",
            "modify_in_file",
            "create_file",
            "delete_file",
            "create_directory",
            "no_action",
        ] {
            assert!(prompt.contains(kind), "missing {kind}");
        }
    }

    #[test]
    fn execute_prompt_embeds_decision_and_rules() {
        let prompt = execute_prompt(&sample_decision(), "framed files").expect("render");
        assert!(prompt.contains("\"kind\": \"modify_in_file\""));
        assert!(prompt.contains("\"app/util.x\""));
        assert!(prompt.contains("modified_files\": {}"));
        assert!(prompt.contains("framed files"));
    }

    #[test]
    fn execute_prompt_omits_empty_context() {
        let prompt = execute_prompt(&sample_decision(), "").expect("render");
        assert!(!prompt.contains("<files>"));
    }
}
