//! Orchestration for one Decide → Execute → Commit cycle.
//!
//! The engine sequences tree walking, the two model phases, the file apply,
//! optional verification, and the commit. Every failure path appends exactly
//! one history entry and rolls the working tree back before returning;
//! unexpected errors are caught at the boundary and become a `FATAL` outcome.

use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::decision::{Decision, RefactorAction, parse_decision};
use crate::core::execution::{ExecutionParse, parse_execution};
use crate::core::json_extract::extract_json_object;
use crate::core::types::CycleOutcome;
use crate::io::applier::apply_execution;
use crate::io::config::{ProjectPaths, Settings};
use crate::io::history::{HistoryEntry, HistoryStore, format_entry};
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::io::prompt::{decide_prompt, execute_prompt};
use crate::io::vcs::{CommitOutcome, VcsClient};
use crate::io::walker::{
    list_candidate_files, read_files_framed, relative_display, render_structure,
};
use crate::verify::{snapshot_contents, verify_changes};

const TEMPERATURE_DECIDE: f32 = 0.4;
const TEMPERATURE_EXECUTE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 16_384;
const STRUCTURE_DEPTH: usize = 4;

/// Result of one cycle, for exit-code mapping and operator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Whether a new commit was created on the work branch.
    pub committed: bool,
    /// The decision's description (the commit subject), when one was reached.
    pub description: Option<String>,
}

/// Run one full refactor cycle.
///
/// Expected failures terminate the cycle with their outcome tag; only
/// infrastructure errors that even the fault handlers cannot absorb surface
/// as `Err`.
pub fn run_cycle<M: ModelClient, V: VcsClient>(
    paths: &ProjectPaths,
    settings: &Settings,
    model: &M,
    vcs: &V,
) -> Result<CycleReport> {
    let history = HistoryStore::new(&paths.history_path);
    info!(outcome = %CycleOutcome::Start, root = %paths.root.display(), "cycle starting");

    match run_cycle_inner(paths, settings, model, vcs, &history) {
        Ok(report) => Ok(report),
        Err(err) => {
            error!(err = %format!("{err:#}"), "unexpected engine failure");
            let entry = format_entry(
                CycleOutcome::Fatal,
                None,
                None,
                None,
                Some(&format!("{err:#}")),
            );
            Ok(finalize_failure(
                &history,
                vcs,
                CycleOutcome::Fatal,
                entry,
                None,
            ))
        }
    }
}

#[instrument(skip_all)]
fn run_cycle_inner<M: ModelClient, V: VcsClient>(
    paths: &ProjectPaths,
    settings: &Settings,
    model: &M,
    vcs: &V,
    history: &HistoryStore,
) -> Result<CycleReport> {
    if let Err(err) = vcs.ensure_ready(&settings.repo_url, &settings.work_branch) {
        warn!(err = %format!("{err:#}"), "working tree setup failed");
        let entry = format_entry(
            CycleOutcome::Step1Error,
            None,
            None,
            None,
            Some(&format!("vcs setup: {err:#}")),
        );
        return Ok(finalize_failure(
            history,
            vcs,
            CycleOutcome::Step1Error,
            entry,
            None,
        ));
    }
    let tree_root = &paths.clone_dir;

    // Phase 1 context: structure, recent history, full candidate contents.
    let structure = render_structure(tree_root, settings, true, STRUCTURE_DEPTH)?;
    let candidates = list_candidate_files(tree_root, settings)?;
    let candidate_rels: Vec<String> = candidates
        .iter()
        .map(|path| relative_display(tree_root, path))
        .collect();
    let full_context = read_files_framed(tree_root, &candidate_rels)?;
    let recent = history.take_recent(settings.history_context_entries)?;
    let prompt = decide_prompt(&structure, &recent, &full_context)?;
    debug!(
        candidates = candidate_rels.len(),
        prompt_bytes = prompt.len(),
        "phase 1 prompt assembled"
    );

    let decision = match phase_one(model, settings, &prompt) {
        Ok(decision) => decision,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "phase 1 failed");
            let mut entry = format_entry(
                CycleOutcome::Step1Error,
                None,
                None,
                None,
                Some(&format!("{err:#}")),
            );
            entry.skip_in_context = is_transient(&err);
            return Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::Step1Error,
                entry,
                None,
            ));
        }
    };
    info!(
        outcome = %CycleOutcome::Step1Ok,
        kind = decision.action.kind(),
        description = %decision.description,
        "decision validated"
    );

    if decision.action == RefactorAction::NoAction {
        info!(outcome = %CycleOutcome::NoAction, "model chose no action");
        let entry = format_entry(CycleOutcome::NoAction, Some(&decision), None, None, None);
        return Ok(finalize_failure(
            history,
            vcs,
            CycleOutcome::NoAction,
            entry,
            Some(&decision),
        ));
    }

    // Phase 2: reduced context bound to the decision, with retries.
    let reduced_context = read_files_framed(tree_root, &decision.relevant_files)?;
    let exec_prompt = execute_prompt(&decision, &reduced_context)?;

    let parse = match phase_two_with_retry(model, settings, &exec_prompt, &decision.action) {
        Ok(parse) => parse,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "phase 2 exhausted");
            let mut entry = format_entry(
                CycleOutcome::Step2ApplyError,
                Some(&decision),
                None,
                None,
                Some(&format!("{err:#}")),
            );
            entry.skip_in_context = is_transient(&err);
            return Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::Step2ApplyError,
                entry,
                Some(&decision),
            ));
        }
    };
    if parse.missing_tag {
        warn!("execution record carried no result_tag; continuing");
    }
    if parse.coerced_empty {
        debug!(
            kind = decision.action.kind(),
            "cleared stray modified_files for non-content action"
        );
    }
    let execution = parse.execution;
    if let Some(warning) = &execution.warning {
        warn!(%warning, "model flagged a warning on execution");
    }

    let pre_contents = settings
        .verify_changes
        .then(|| snapshot_contents(tree_root, &execution))
        .unwrap_or_default();

    let applied = match apply_execution(tree_root, &decision, &execution) {
        Ok(report) => report,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "apply failed");
            let entry = format_entry(
                CycleOutcome::Step2ApplyError,
                Some(&decision),
                None,
                None,
                Some(&format!("{err:#}")),
            );
            return Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::Step2ApplyError,
                entry,
                Some(&decision),
            ));
        }
    };
    info!(
        outcome = %CycleOutcome::ApplyOk,
        files = applied.touched.len(),
        "changes applied"
    );

    let verify_note = if settings.verify_changes {
        let report = verify_changes(vcs, tree_root, &decision, &execution, &pre_contents)?;
        if !report.passed {
            warn!(outcome = %CycleOutcome::VerifyFail, summary = %report.summary, "verification failed");
            let entry = format_entry(
                CycleOutcome::VerifyFail,
                Some(&decision),
                Some(&applied.touched),
                Some(&report.summary),
                None,
            );
            return Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::VerifyFail,
                entry,
                Some(&decision),
            ));
        }
        info!(outcome = %CycleOutcome::VerifyOk, "verification passed");
        report.summary
    } else {
        debug!(outcome = %CycleOutcome::VerifySkipped, "verification disabled");
        "skipped".to_string()
    };

    match vcs.commit(&decision.description) {
        Ok(CommitOutcome::Committed) => {
            info!(outcome = %CycleOutcome::Success, subject = %decision.description, "commit created");
            let entry = format_entry(
                CycleOutcome::Success,
                Some(&decision),
                Some(&applied.touched),
                Some(&verify_note),
                None,
            );
            if let Err(err) = history.append(&entry) {
                warn!(err = %format!("{err:#}"), "failed to append history entry");
            }
            Ok(CycleReport {
                outcome: CycleOutcome::Success,
                committed: true,
                description: Some(decision.description.clone()),
            })
        }
        Ok(CommitOutcome::NothingToCommit) => {
            info!(outcome = %CycleOutcome::CommitNone, "nothing to commit");
            let entry = format_entry(
                CycleOutcome::CommitNone,
                Some(&decision),
                Some(&applied.touched),
                Some(&verify_note),
                None,
            );
            Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::CommitNone,
                entry,
                Some(&decision),
            ))
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), outcome = %CycleOutcome::CommitError, "commit failed");
            let entry = format_entry(
                CycleOutcome::CommitError,
                Some(&decision),
                Some(&applied.touched),
                Some(&verify_note),
                Some(&format!("{err:#}")),
            );
            Ok(finalize_failure(
                history,
                vcs,
                CycleOutcome::CommitError,
                entry,
                Some(&decision),
            ))
        }
    }
}

/// One Phase-1 attempt: call, extract, validate. No retries.
fn phase_one<M: ModelClient>(model: &M, settings: &Settings, prompt: &str) -> Result<Decision> {
    let raw = model.call(&ModelRequest {
        prompt: prompt.to_string(),
        temperature: TEMPERATURE_DECIDE,
        max_output_tokens: MAX_OUTPUT_TOKENS,
        response_is_json: true,
        timeout: Duration::from_secs(settings.model_timeout_secs),
    })?;
    let value = extract_json_object(&raw)?;
    parse_decision(&value)
}

/// One Phase-2 attempt: call, extract, validate bound to the decision.
fn phase_two<M: ModelClient>(
    model: &M,
    settings: &Settings,
    prompt: &str,
    action: &RefactorAction,
) -> Result<ExecutionParse> {
    let raw = model.call(&ModelRequest {
        prompt: prompt.to_string(),
        temperature: TEMPERATURE_EXECUTE,
        max_output_tokens: MAX_OUTPUT_TOKENS,
        response_is_json: true,
        timeout: Duration::from_secs(settings.model_timeout_secs),
    })?;
    let value = extract_json_object(&raw)?;
    parse_execution(&value, action)
}

/// Retry policy for Phase 2: fixed attempts, fixed delay, any failure class
/// retries. Phase 1 deliberately has none.
fn phase_two_with_retry<M: ModelClient>(
    model: &M,
    settings: &Settings,
    prompt: &str,
    action: &RefactorAction,
) -> Result<ExecutionParse> {
    let attempts = settings.execute_max_attempts.max(1);
    let delay = Duration::from_secs(settings.execute_retry_delay_secs);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match phase_two(model, settings, prompt, action) {
            Ok(parse) => return Ok(parse),
            Err(err) => {
                warn!(attempt, max_attempts = attempts, err = %format!("{err:#}"), "execution attempt failed");
                last_err = Some(err);
                if attempt < attempts && !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| anyhow!("execution failed after {attempts} attempts")))
}

/// Transient transport failures carry little prompt value; flag them so the
/// history store drops them at save time.
fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ModelError>()
        .map(ModelError::is_transport)
        .unwrap_or(false)
}

/// Append the terminal entry and roll the working tree back.
fn finalize_failure<V: VcsClient>(
    history: &HistoryStore,
    vcs: &V,
    outcome: CycleOutcome,
    entry: HistoryEntry,
    decision: Option<&Decision>,
) -> CycleReport {
    if let Err(err) = history.append(&entry) {
        warn!(err = %format!("{err:#}"), "failed to append history entry");
    }
    if let Err(err) = vcs.discard_local() {
        warn!(err = %format!("{err:#}"), "rollback failed");
    }
    CycleReport {
        outcome,
        committed: false,
        description: decision.map(|d| d.description.clone()),
    }
}
