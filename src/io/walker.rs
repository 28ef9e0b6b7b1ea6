//! Working-tree traversal: candidate listing, framed reads, and the ASCII
//! structure rendering used in the Phase-1 prompt.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::core::path_guard::resolve_within;
use crate::io::config::Settings;

const FRAME_HASHES: &str = "##########";

/// Enumerate candidate files for the Phase-1 prompt.
///
/// When the tree root contains an `app` directory, one of its immediate
/// subdirectories is picked at random as the listing root. This bounds prompt
/// size on large repositories while still covering the whole tree over many
/// runs. Empty picks fall back to `app`, then to the tree root.
pub fn list_candidate_files(tree_root: &Path, settings: &Settings) -> Result<Vec<PathBuf>> {
    let app_dir = tree_root.join("app");
    if app_dir.is_dir() {
        if let Some(subdir) = pick_random_subdir(&app_dir, settings)? {
            let files = walk(&subdir, settings)?;
            if !files.is_empty() {
                debug!(root = %subdir.display(), count = files.len(), "listing from app subdirectory");
                return Ok(files);
            }
        }
        let files = walk(&app_dir, settings)?;
        if !files.is_empty() {
            return Ok(files);
        }
    }
    walk(tree_root, settings)
}

fn pick_random_subdir(app_dir: &Path, settings: &Settings) -> Result<Option<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(app_dir).with_context(|| format!("read {}", app_dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", app_dir.display()))?;
        let path = entry.path();
        if path.is_dir() && !is_skipped_dir(&path, settings) {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    Ok(subdirs.choose(&mut rand::thread_rng()).cloned())
}

/// Recursive descent honoring the ignore set, the leading-`.` rule, and the
/// extension allow-list. Results are sorted for deterministic prompts.
fn walk(root: &Path, settings: &Settings) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_inner(root, settings, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_inner(dir: &Path, settings: &Settings, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            if !is_skipped_dir(&path, settings) {
                walk_inner(&path, settings, files)?;
            }
        } else if is_candidate_file(&path, settings) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_skipped_dir(path: &Path, settings: &Settings) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.') || settings.ignored_dirs.contains(name)
}

fn is_candidate_file(path: &Path, settings: &Settings) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| settings.allowed_extensions.contains(&ext.to_ascii_lowercase()))
        .unwrap_or(false)
}

/// Concatenate file contents in the framed prompt format.
///
/// Paths are repo-relative with forward slashes; each is PathGuard-checked
/// against `base`. Unreadable entries are skipped with a warning, undecodable
/// bytes are dropped.
pub fn read_files_framed(base: &Path, rel_paths: &[String]) -> Result<String> {
    let mut out = String::new();
    for rel in rel_paths {
        let resolved = match resolve_within(base, rel) {
            Ok(path) => path,
            Err(err) => {
                warn!(path = %rel, %err, "skipping unsafe path in context read");
                continue;
            }
        };
        let Ok(bytes) = fs::read(&resolved) else {
            warn!(path = %rel, "skipping unreadable file in context read");
            continue;
        };
        let contents = String::from_utf8_lossy(&bytes).replace('\u{fffd}', "");
        let display = rel.replace('\\', "/");
        out.push_str(&format!("{FRAME_HASHES} START FILE: {display} {FRAME_HASHES}\n"));
        out.push_str(&contents);
        if !contents.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{FRAME_HASHES} END FILE: {display} {FRAME_HASHES}\n"));
    }
    Ok(out)
}

/// Relative forward-slash form of a walked path, for prompt display.
pub fn relative_display(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Render an ASCII tree of `root` up to `max_depth` levels.
///
/// Symlink loops are detected via resolved-path bookkeeping and annotated
/// instead of followed; the depth cap is marked with an ellipsis entry.
pub fn render_structure(
    root: &Path,
    settings: &Settings,
    include_files: bool,
    max_depth: usize,
) -> Result<String> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());
    let mut out = format!("{name}/\n");
    let mut visited = HashSet::new();
    if let Ok(resolved) = fs::canonicalize(root) {
        visited.insert(resolved);
    }
    render_level(
        root,
        settings,
        include_files,
        max_depth,
        1,
        "",
        &mut visited,
        &mut out,
    )?;
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn render_level(
    dir: &Path,
    settings: &Settings,
    include_files: bool,
    max_depth: usize,
    depth: usize,
    prefix: &str,
    visited: &mut HashSet<PathBuf>,
    out: &mut String,
) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            if path.is_dir() {
                !is_skipped_dir(path, settings)
            } else {
                include_files && is_candidate_file(path, settings)
            }
        })
        .collect();
    entries.sort();

    let count = entries.len();
    for (idx, path) in entries.iter().enumerate() {
        let last = idx + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        let child_prefix = if last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if path.is_dir() {
            let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            if !visited.insert(resolved) {
                out.push_str(&format!("{prefix}{connector}{name}/ [cycle]\n"));
                continue;
            }
            out.push_str(&format!("{prefix}{connector}{name}/\n"));
            if depth >= max_depth {
                out.push_str(&format!("{child_prefix}...\n"));
            } else {
                render_level(
                    path,
                    settings,
                    include_files,
                    max_depth,
                    depth + 1,
                    &child_prefix,
                    visited,
                    out,
                )?;
            }
        } else {
            out.push_str(&format!("{prefix}{connector}{name}\n"));
        }
    }
    Ok(())
}
