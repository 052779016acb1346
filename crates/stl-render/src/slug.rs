//! Filesystem-safe naming for rendered files.

use std::sync::LazyLock;

use regex::Regex;
use stl_models::JobId;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+").unwrap());
static SEPARATOR_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_-]{2,}").unwrap());

/// Reduce text to `[a-z0-9_-]`, joining words with `_`.
///
/// Returns an empty string when nothing survives.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let joined = WHITESPACE.replace_all(&lowered, "_");
    let cleaned = DISALLOWED.replace_all(&joined, "");
    let collapsed = SEPARATOR_RUN.replace_all(&cleaned, "_");
    collapsed.trim_matches(|c: char| c == '_' || c == '-').to_string()
}

/// Slug used when the text has no filesystem-safe characters.
pub const UNTITLED_SLUG: &str = "untitled";

/// File name for a job's STL: `task_<id>_<slug>.stl`.
///
/// An empty first line is named after the task (`task_<id>`); a line that
/// slugifies to nothing becomes [`UNTITLED_SLUG`].
pub fn output_file_name(job_id: JobId, first_line: &str) -> String {
    let source = if first_line.is_empty() {
        format!("task_{job_id}")
    } else {
        first_line.to_string()
    };
    let slug = slugify(&source);
    let slug = if slug.is_empty() { UNTITLED_SLUG } else { slug.as_str() };
    format!("task_{job_id}_{slug}.stl")
}
