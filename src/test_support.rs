//! Test-only helpers: scripted model/VCS clients and a real-git project
//! fixture for lifecycle tests.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use crate::io::config::{ProjectPaths, Settings, base_settings};
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::io::vcs::{CommitOutcome, VcsClient};

/// Wire JSON for a decision record, as the model would produce it.
pub fn decision_response(
    kind: &str,
    parameters: serde_json::Value,
    relevant_files: &[&str],
    description: &str,
) -> String {
    json!({
        "analysis_tag": "refactor_decision",
        "kind": kind,
        "description": description,
        "parameters": parameters,
        "relevant_files": relevant_files,
        "reasoning": "scripted decision",
    })
    .to_string()
}

/// Wire JSON for an execution record, as the model would produce it.
pub fn execution_response(files: &[(&str, &str)], warning: Option<&str>) -> String {
    let mut value = json!({
        "result_tag": "execution_change",
        "modified_files": files
            .iter()
            .map(|(k, v)| ((*k).to_string(), json!(v)))
            .collect::<serde_json::Map<_, _>>(),
    });
    if let Some(warning) = warning {
        value["warning"] = json!(warning);
    }
    value.to_string()
}

/// Model client that replays queued responses and records prompts.
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    /// Prompt text of call `index`.
    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().expect("prompts lock")[index].clone()
    }
}

impl ModelClient for ScriptedModelClient {
    fn call(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or(Err(ModelError::EmptyResponse))
    }
}

/// VCS client that records calls without touching any repository.
pub struct ScriptedVcs {
    calls: Mutex<Vec<String>>,
    commit_outcome: CommitOutcome,
    setup_error: bool,
    modified: BTreeSet<String>,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            commit_outcome: CommitOutcome::Committed,
            setup_error: false,
            modified: BTreeSet::new(),
        }
    }

    pub fn with_nothing_to_commit(mut self) -> Self {
        self.commit_outcome = CommitOutcome::NothingToCommit;
        self
    }

    pub fn with_setup_error(mut self) -> Self {
        self.setup_error = true;
        self
    }

    pub fn with_modified<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modified = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a method was invoked at least once.
    pub fn called(&self, name: &str) -> bool {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .any(|call| call == name)
    }

    fn record(&self, name: &str) {
        self.calls.lock().expect("calls lock").push(name.to_string());
    }
}

impl Default for ScriptedVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsClient for ScriptedVcs {
    fn ensure_ready(&self, _url: &str, _branch: &str) -> Result<()> {
        self.record("ensure_ready");
        if self.setup_error {
            return Err(anyhow!("scripted setup failure"));
        }
        Ok(())
    }

    fn list_modified(&self) -> Result<BTreeSet<String>> {
        self.record("list_modified");
        Ok(self.modified.clone())
    }

    fn commit(&self, _message: &str) -> Result<CommitOutcome> {
        self.record("commit");
        Ok(self.commit_outcome)
    }

    fn push(&self, _branch: &str) -> Result<bool> {
        self.record("push");
        Ok(true)
    }

    fn discard_local(&self) -> Result<()> {
        self.record("discard_local");
        Ok(())
    }
}

/// A project root with a real local git remote, for lifecycle tests.
///
/// Layout mirrors production: `<root>/remote` is the origin repository,
/// `<root>/clone` the working tree the engine operates on. Seed files into
/// the remote, then call [`TestRepo::clone_working_tree`] before running a
/// cycle.
pub struct TestRepo {
    temp: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { temp };
        let remote = repo.remote_dir();
        fs::create_dir_all(&remote).context("create remote dir")?;
        git(&remote, &["init"])?;
        git(&remote, &["config", "user.email", "cycle-test@example.com"])?;
        git(&remote, &["config", "user.name", "cycle test"])?;
        fs::write(remote.join("README.md"), "seed repo\n").context("write seed")?;
        git(&remote, &["add", "-A"])?;
        git(&remote, &["commit", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.temp.path().join("remote")
    }

    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.root())
    }

    /// Settings pointing at the local remote, tuned for fast tests.
    pub fn settings(&self) -> Settings {
        let mut settings = base_settings();
        settings.repo_url = self.remote_dir().display().to_string();
        settings
    }

    /// Write a file into the remote repository (not yet committed).
    pub fn seed_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.remote_dir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Commit everything staged-able in the remote.
    pub fn commit_remote(&self, message: &str) -> Result<()> {
        let remote = self.remote_dir();
        git(&remote, &["add", "-A"])?;
        git(&remote, &["commit", "-m", message])?;
        Ok(())
    }

    /// Clone the remote into `<root>/clone` and set a commit identity, as
    /// the operator's first run would have left it.
    pub fn clone_working_tree(&self) -> Result<()> {
        let clone = self.paths().clone_dir;
        fs::create_dir_all(&clone).context("create clone dir")?;
        git(
            &clone,
            &["clone", &self.remote_dir().display().to_string(), "."],
        )?;
        git(&clone, &["config", "user.email", "cycle-test@example.com"])?;
        git(&clone, &["config", "user.name", "cycle test"])?;
        Ok(())
    }

    /// Subjects of all commits on `branch` in the clone, newest first.
    pub fn clone_log(&self, branch: &str) -> Result<Vec<String>> {
        let out = Command::new("git")
            .args(["log", "--format=%s", branch])
            .current_dir(self.paths().clone_dir)
            .output()
            .context("git log")?;
        if !out.status.success() {
            return Err(anyhow!(
                "git log failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}
