//! Definition-boundary chunking.
//!
//! A new chunk starts at every `class`/`module`/`def` line (Ruby),
//! `class`/`def` line (Python) or top-level key (YAML). Sections too small to
//! stand alone are merged into their neighbour; sections over the budget are
//! split with the line-based splitter.

use once_cell::sync::Lazy;
use regex::Regex;

use super::fallback::split_line_range;
use super::{ChunkOutput, Language};

/// Sections with fewer non-whitespace characters are merged into a neighbour.
const MIN_SECTION_CHARS: usize = 40;

/// Sections with more non-whitespace characters are split further.
const MAX_SECTION_CHARS: usize = 3000;

static RUBY_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(class|module|def)\s+\S").expect("static regex"));

static PYTHON_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(async\s+)?(class|def)\s+\w").expect("static regex"));

// Unindented `key:` that is neither a comment, a list item nor a document marker.
static YAML_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s#\-][^:]*:").expect("static regex"));

/// Returns None when the language has no boundary rules or the file has no
/// boundaries, so the caller can fall back.
pub fn chunk_by_definitions(content: &str, language: Language) -> Option<Vec<ChunkOutput>> {
    let boundary: &Regex = match language {
        Language::Ruby => &RUBY_BOUNDARY,
        Language::Python => &PYTHON_BOUNDARY,
        Language::Yaml => &YAML_BOUNDARY,
        Language::Unknown => return None,
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| boundary.is_match(line))
        .map(|(i, _)| i)
        .collect();
    if starts.is_empty() {
        return None;
    }
    // Preamble (requires, comments, document header) is its own section
    if starts[0] != 0 {
        starts.insert(0, 0);
    }

    let mut chunks = Vec::new();
    let mut pending: Option<usize> = None;

    for (n, &start) in starts.iter().enumerate() {
        let end = starts
            .get(n + 1)
            .map(|next| next - 1)
            .unwrap_or(lines.len() - 1);
        // A bare header (`module Billing`, `class Foo`) has no body of its own
        let header_only = non_ws_chars(&lines[start + 1..=end]) == 0;
        let start = pending.take().unwrap_or(start);
        let chars = non_ws_chars(&lines[start..=end]);

        if header_only || chars < MIN_SECTION_CHARS {
            pending = Some(start);
        } else if chars > MAX_SECTION_CHARS {
            split_line_range(&lines, start, end, &mut chunks);
        } else {
            chunks.push(make_chunk(&lines, start, end));
        }
    }

    // Trailing fragment (usually a closing `end`) joins the previous chunk
    if let Some(start) = pending {
        let end = lines.len() - 1;
        match chunks.last_mut() {
            Some(last) => *last = make_chunk(&lines, last.start_line - 1, end),
            None => chunks.push(make_chunk(&lines, start, end)),
        }
    }

    chunks.retain(|c| !c.content.trim().is_empty());
    Some(chunks)
}

fn non_ws_chars(lines: &[&str]) -> usize {
    lines
        .iter()
        .flat_map(|l| l.chars())
        .filter(|c| !c.is_whitespace())
        .count()
}

fn make_chunk(lines: &[&str], start: usize, end: usize) -> ChunkOutput {
    ChunkOutput {
        content: lines[start..=end].join("\n"),
        start_line: start + 1,
        end_line: end + 1,
    }
}
