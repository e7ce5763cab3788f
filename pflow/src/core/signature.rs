//! Stable signatures over error sets, used by the orchestrator to detect a
//! repair loop that is making no progress.
//!
//! Two failures that differ only in volatile text (timestamps, generated
//! ids, line numbers) must produce the same signature, so the message is
//! normalized before it is folded in. Without this, every retry would look
//! like a "new" error and the loop detector would never fire.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::ErrorRecord;

/// Errors folded into one signature.
const SIGNATURE_ERROR_LIMIT: usize = 5;
/// Normalized-message prefix length per error.
const SIGNATURE_MESSAGE_LEN: usize = 40;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}:\d{2}(:\d{2})?\b").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .unwrap()
});
static HEX_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{12,}\b").unwrap());
static REQUEST_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"request_\d+").unwrap());
static LONG_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{6,}").unwrap());
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"line \d+").unwrap());
static LINE_COL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+:\d+").unwrap());

/// Strip volatile substrings, lowercase, and collapse whitespace.
pub fn normalize_message(message: &str) -> String {
    let mut text = message.to_string();
    for re in [
        &*TIME_RE,
        &*DATE_RE,
        &*UUID_RE,
        &*HEX_ID_RE,
        &*REQUEST_ID_RE,
        &*LONG_DIGITS_RE,
        &*LINE_RE,
        &*LINE_COL_RE,
    ] {
        text = re.replace_all(&text, "").into_owned();
    }
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable signature of an error set.
///
/// Takes up to the first five errors sorted by `(node_id, category, message)`
/// and renders each as `"{node_id|'unknown'}|{category}|{normalized[:40]}"`,
/// joined with `"||"`.
pub fn error_signature(errors: &[ErrorRecord]) -> String {
    let mut sorted: Vec<&ErrorRecord> = errors.iter().collect();
    sorted.sort_by(|a, b| {
        (a.node_id.as_deref(), a.category, a.message.as_str()).cmp(&(
            b.node_id.as_deref(),
            b.category,
            b.message.as_str(),
        ))
    });

    sorted
        .into_iter()
        .take(SIGNATURE_ERROR_LIMIT)
        .map(|record| {
            let node = record.node_id.as_deref().unwrap_or("unknown");
            let normalized: String = normalize_message(&record.message)
                .chars()
                .take(SIGNATURE_MESSAGE_LEN)
                .collect();
            format!("{node}|{}|{normalized}", record.category.as_str())
        })
        .collect::<Vec<_>>()
        .join("||")
}
