//! Render parameters derived from a print job.

use serde::{Deserialize, Serialize};

use crate::PrintJob;

/// Number of text lines the template accepts.
pub const TEXT_LINES: usize = 3;

/// Primary colour used when the job has none.
pub const DEFAULT_COLOR_1: &str = "Black";

/// Secondary colour used when the job has none.
pub const DEFAULT_COLOR_2: &str = "White";

/// Values passed to the template for one render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderParams {
    pub text_lines: [String; TEXT_LINES],
    pub color_1: String,
    pub color_2: String,
}

impl RenderParams {
    /// Derive parameters from a job.
    ///
    /// `custom_text` is split on line breaks and then on `/` and `\`. The first
    /// three pieces are kept in order (empty pieces included) and trimmed;
    /// missing lines are empty strings.
    pub fn from_job(job: &PrintJob) -> Self {
        Self {
            text_lines: split_text_lines(job.custom_text.as_deref().unwrap_or_default()),
            color_1: colour_or(job.color_1.as_deref(), DEFAULT_COLOR_1),
            color_2: colour_or(job.color_2.as_deref(), DEFAULT_COLOR_2),
        }
    }

    /// The first text line, used to name the output file.
    pub fn first_line(&self) -> &str {
        &self.text_lines[0]
    }
}

/// Split free-form text into exactly [`TEXT_LINES`] trimmed lines.
pub fn split_text_lines(text: &str) -> [String; TEXT_LINES] {
    let mut pieces = split_line_breaks(text)
        .into_iter()
        .flat_map(|line| line.split(|c: char| c == '/' || c == '\\'))
        .map(|piece| piece.trim().to_string());

    std::array::from_fn(|_| pieces.next().unwrap_or_default())
}

/// Split on every line break, with `\r\n` counting as one.
///
/// Besides `\n` and `\r` this honours the vertical tab, form feed, the
/// file/group/record separators, NEL and the Unicode line and paragraph
/// separators. A trailing break does not produce an extra empty line.
fn split_line_breaks(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..idx]);
        start = idx + c.len_utf8();
        if c == '\r' {
            if let Some(&(next, '\n')) = chars.peek() {
                chars.next();
                start = next + 1;
            }
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn colour_or(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}
