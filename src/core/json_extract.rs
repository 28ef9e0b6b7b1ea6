//! Extraction of the JSON object embedded in raw model output.
//!
//! Models wrap their JSON in code fences, prose, or both. The extractor
//! strips fence framing, slices the outermost `{...}`, and parses it.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use serde_json::Value;

static FENCE_OPEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n").unwrap());

/// Context radius included in parse-failure messages.
const ERROR_CONTEXT_CHARS: usize = 150;

/// Locate and parse the outermost JSON object in `raw`.
pub fn extract_json_object(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let unfenced = strip_code_fence(trimmed);

    let start = unfenced
        .find('{')
        .ok_or_else(|| anyhow!("no '{{' found in model output"))?;
    let end = unfenced
        .rfind('}')
        .ok_or_else(|| anyhow!("no '}}' found in model output"))?;
    if end < start {
        return Err(anyhow!("mismatched braces in model output"));
    }
    let candidate = &unfenced[start..=end];

    serde_json::from_str(candidate).map_err(|err| {
        let offset = offset_of(candidate, err.line(), err.column());
        anyhow!(
            "invalid JSON at offset {offset}: {err}; context: ...{}...",
            context_window(candidate, offset)
        )
    })
}

/// Strip a triple-backtick fence (optionally tagged, e.g. ```` ```json ````)
/// wrapping the whole text. Text without a fence is returned unchanged.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = FENCE_OPEN_RE.find(text) else {
        return text;
    };
    let body = &text[open.end()..];
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => text,
    }
}

fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (idx, l) in text.lines().enumerate() {
        if idx + 1 == line {
            return (offset + column.saturating_sub(1)).min(text.len());
        }
        offset += l.len() + 1;
    }
    text.len()
}

fn context_window(text: &str, offset: usize) -> String {
    let start = offset.saturating_sub(ERROR_CONTEXT_CHARS);
    let end = (offset + ERROR_CONTEXT_CHARS).min(text.len());
    let mut lo = start;
    while lo < text.len() && !text.is_char_boundary(lo) {
        lo += 1;
    }
    let mut hi = end;
    while hi < text.len() && !text.is_char_boundary(hi) {
        hi += 1;
    }
    text[lo..hi].to_string()
}
