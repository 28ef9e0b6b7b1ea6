//! Engine configuration from the environment.
//!
//! Settings come from environment variables (a `.env` file is honored by the
//! entry point via `dotenvy` before this module reads anything). Missing
//! optional fields default to sensible values; required fields fail fast so a
//! misconfigured process exits before touching the working tree.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

/// Directory names skipped by the tree walker when unset in the environment.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "build",
    "dist",
    "__pycache__",
    ".venv",
    "venv",
];

const DEFAULT_EXTENSIONS: &str = "py,rs,js,ts,java,go,rb,php";

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub alt_api_key: Option<String>,
    pub alt_model: Option<String>,
    pub alt_base_url: Option<String>,
    pub repo_url: String,
    pub work_branch: String,
    /// Lower-cased extension allow-list for candidate files.
    pub allowed_extensions: BTreeSet<String>,
    pub ignored_dirs: BTreeSet<String>,
    pub tokens_per_minute: u64,
    /// Number of history entries included in the Phase-1 prompt.
    pub history_context_entries: usize,
    pub verify_changes: bool,
    pub execute_max_attempts: u32,
    pub execute_retry_delay_secs: u64,
    pub model_timeout_secs: u64,
}

impl Settings {
    /// Read settings from `REFACTOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            api_key: required("REFACTOR_API_KEY")?,
            model: required("REFACTOR_MODEL")?,
            api_base_url: optional("REFACTOR_API_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            alt_api_key: optional("REFACTOR_ALT_API_KEY"),
            alt_model: optional("REFACTOR_ALT_MODEL"),
            alt_base_url: optional("REFACTOR_ALT_BASE_URL"),
            repo_url: required("REFACTOR_REPO_URL")?,
            work_branch: optional("REFACTOR_WORK_BRANCH")
                .unwrap_or_else(|| "auto-refactor".to_string()),
            allowed_extensions: list(
                &optional("REFACTOR_FILE_EXTENSIONS").unwrap_or_else(|| {
                    DEFAULT_EXTENSIONS.to_string()
                }),
            )
            .into_iter()
            .map(|ext| ext.to_ascii_lowercase())
            .collect(),
            ignored_dirs: match optional("REFACTOR_IGNORED_DIRS") {
                Some(raw) => list(&raw).into_iter().collect(),
                None => DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
            },
            tokens_per_minute: parsed("REFACTOR_TOKENS_PER_MINUTE", 250_000)?,
            history_context_entries: parsed("REFACTOR_HISTORY_CONTEXT", 5)?,
            verify_changes: parsed("REFACTOR_VERIFY", false)?,
            execute_max_attempts: parsed("REFACTOR_EXECUTE_ATTEMPTS", 7)?,
            execute_retry_delay_secs: parsed("REFACTOR_EXECUTE_RETRY_DELAY_SECS", 5)?,
            model_timeout_secs: parsed("REFACTOR_MODEL_TIMEOUT_SECS", 300)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.work_branch.trim().is_empty() {
            return Err(anyhow!("REFACTOR_WORK_BRANCH must not be empty"));
        }
        if self.allowed_extensions.is_empty() {
            return Err(anyhow!("REFACTOR_FILE_EXTENSIONS must not be empty"));
        }
        if self.tokens_per_minute == 0 {
            return Err(anyhow!("REFACTOR_TOKENS_PER_MINUTE must be > 0"));
        }
        if self.execute_max_attempts == 0 {
            return Err(anyhow!("REFACTOR_EXECUTE_ATTEMPTS must be > 0"));
        }
        if self.model_timeout_secs == 0 {
            return Err(anyhow!("REFACTOR_MODEL_TIMEOUT_SECS must be > 0"));
        }
        Ok(())
    }
}

/// Canonical on-disk layout for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    /// The working tree (a clone of the configured remote).
    pub clone_dir: PathBuf,
    pub history_path: PathBuf,
    pub log_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            clone_dir: root.join("clone"),
            history_path: root.join("refactor-history.log"),
            log_path: root.join("refactor.log"),
            root,
        }
    }
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| anyhow!("missing required environment variable {name}"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("parse {name}='{raw}'")),
        None => Ok(default),
    }
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Test-friendly defaults; required identity fields still must be filled in.
#[cfg(any(test, feature = "test-support"))]
pub fn base_settings() -> Settings {
    Settings {
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        api_base_url: "http://localhost:0".to_string(),
        alt_api_key: None,
        alt_model: None,
        alt_base_url: None,
        repo_url: String::new(),
        work_branch: "auto-refactor".to_string(),
        allowed_extensions: ["x".to_string()].into_iter().collect(),
        ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
        tokens_per_minute: 250_000,
        history_context_entries: 5,
        verify_changes: false,
        execute_max_attempts: 2,
        execute_retry_delay_secs: 0,
        model_timeout_secs: 30,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn project_paths_follow_layout() {
        let paths = ProjectPaths::new("/work");
        assert_eq!(paths.clone_dir, Path::new("/work/clone"));
        assert_eq!(paths.history_path, Path::new("/work/refactor-history.log"));
        assert_eq!(paths.log_path, Path::new("/work/refactor.log"));
    }

    #[test]
    fn list_splits_and_trims() {
        assert_eq!(list("py, rs ,,go"), vec!["py", "rs", "go"]);
    }

    #[test]
    fn validate_rejects_zero_ceiling() {
        let mut settings = base_settings();
        settings.tokens_per_minute = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_extensions() {
        let mut settings = base_settings();
        settings.allowed_extensions.clear();
        assert!(settings.validate().is_err());
    }
}
