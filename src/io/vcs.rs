//! Version-control abstraction and the git subprocess adapter.
//!
//! The engine commits deterministically and rolls back on every failure
//! path, so we keep a small, explicit wrapper around `git` calls behind the
//! [`VcsClient`] trait. Tests use scripted clients or real local remotes.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Result of a commit attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// Abstraction over the version-control transport.
pub trait VcsClient {
    /// Make sure the working tree exists, is up to date, and is on `branch`.
    fn ensure_ready(&self, url: &str, branch: &str) -> Result<()>;
    /// Paths changed relative to HEAD, including untracked files.
    fn list_modified(&self) -> Result<BTreeSet<String>>;
    /// Stage everything and commit with `message`.
    fn commit(&self, message: &str) -> Result<CommitOutcome>;
    /// Push `branch` to the default remote; `false` means the push failed.
    fn push(&self, branch: &str) -> Result<bool>;
    /// Revert the working tree to HEAD and remove untracked files.
    fn discard_local(&self) -> Result<()>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// `git` subprocess adapter for a working tree directory.
#[derive(Debug, Clone)]
pub struct GitClient {
    workdir: PathBuf,
}

impl GitClient {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        Ok(name)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn checkout(&self, branch: &str, create: bool) -> Result<()> {
        debug!(branch, create, "checking out work branch");
        if create {
            self.run_checked(&["checkout", "-b", branch])?;
        } else {
            self.run_checked(&["checkout", branch])?;
        }
        Ok(())
    }

    fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VcsClient for GitClient {
    #[instrument(skip_all, fields(branch))]
    fn ensure_ready(&self, url: &str, branch: &str) -> Result<()> {
        if !self.workdir.join(".git").exists() {
            debug!(workdir = %self.workdir.display(), "cloning working tree");
            fs::create_dir_all(&self.workdir)
                .with_context(|| format!("create {}", self.workdir.display()))?;
            self.run_checked(&["clone", url, "."])?;
        } else {
            self.run_checked(&["fetch", "origin"])?;
        }

        if self.current_branch()? != branch {
            let create = !self.branch_exists(branch)?;
            self.checkout(branch, create)?;
        }
        Ok(())
    }

    fn list_modified(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .map(|entry| entry.path)
            .collect())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<CommitOutcome> {
        self.run_checked(&["add", "-A"])?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }
        self.run_checked(&["commit", "-m", message])?;
        Ok(CommitOutcome::Committed)
    }

    fn push(&self, branch: &str) -> Result<bool> {
        let output = self.run(&["push", "origin", branch])?;
        if !output.status.success() {
            warn!(
                branch,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "push failed"
            );
        }
        Ok(output.status.success())
    }

    #[instrument(skip_all)]
    fn discard_local(&self) -> Result<()> {
        debug!("discarding local changes");
        self.run_checked(&["reset", "--hard", "HEAD"])?;
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
