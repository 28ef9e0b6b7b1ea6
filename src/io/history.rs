//! Append-only persistent log of cycle outcomes.
//!
//! The on-disk format is plain text: entries separated by the literal line
//! `--- END ENTRY ---` (the final separator may be absent). Entries flagged
//! `skip_in_context` are dropped at save time so transient failures do not
//! pollute later prompt context.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::core::decision::Decision;
use crate::core::types::CycleOutcome;

/// Literal separator line between persisted entries.
pub const ENTRY_SEPARATOR: &str = "--- END ENTRY ---";

/// One formatted cycle outcome, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub text: String,
    /// Drop this entry at save time (transient failure, low prompt value).
    pub skip_in_context: bool,
}

/// Render a timestamped, human-readable entry for one finished cycle.
///
/// The execution summary lists file paths only, never contents.
pub fn format_entry(
    outcome: CycleOutcome,
    decision: Option<&Decision>,
    executed_paths: Option<&[String]>,
    verification: Option<&str>,
    error: Option<&str>,
) -> HistoryEntry {
    let mut text = format!(
        "[{}] outcome: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        outcome.as_str()
    );
    if let Some(decision) = decision {
        text.push_str(&format!(
            "decision: {} - {}\n",
            decision.action.kind(),
            decision.description
        ));
        text.push_str(&format!("reasoning: {}\n", decision.reasoning));
    }
    if let Some(paths) = executed_paths {
        if paths.is_empty() {
            text.push_str("modified files: (none)\n");
        } else {
            text.push_str(&format!("modified files: {}\n", paths.join(", ")));
        }
    }
    if let Some(verification) = verification {
        text.push_str(&format!("verification: {verification}\n"));
    }
    if let Some(error) = error {
        text.push_str(&format!("error: {error}\n"));
    }
    HistoryEntry {
        text,
        skip_in_context: false,
    }
}

/// Plain-text store at a fixed path.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all persisted entries in order. A missing file is an empty log.
    pub fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let entries = contents
            .split(&format!("{ENTRY_SEPARATOR}\n"))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
        Ok(entries)
    }

    /// Overwrite the file with `entries`, honoring `skip_in_context`.
    ///
    /// The write is a full-buffer rewrite through a temp file and rename, so
    /// a crash never leaves a partial entry behind.
    pub fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let mut buf = String::new();
        for entry in entries {
            if entry.skip_in_context {
                continue;
            }
            buf.push_str(entry.text.trim_end());
            buf.push('\n');
            buf.push_str(ENTRY_SEPARATOR);
            buf.push('\n');
        }
        let tmp_path = self.path.with_extension("log.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&tmp_path, &buf)
            .with_context(|| format!("write temp history {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace history {}", self.path.display()))?;
        Ok(())
    }

    /// Append one entry, keeping everything already persisted.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut entries: Vec<HistoryEntry> = self
            .load()?
            .into_iter()
            .map(|text| HistoryEntry {
                text,
                skip_in_context: false,
            })
            .collect();
        entries.push(entry.clone());
        self.save(&entries)
    }

    /// The last `n` entries joined by `---`, for prompt context.
    pub fn take_recent(&self, n: usize) -> Result<String> {
        let entries = self.load()?;
        let start = entries.len().saturating_sub(n);
        Ok(entries[start..].join("\n---\n"))
    }
}
