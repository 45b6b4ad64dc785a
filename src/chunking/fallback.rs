//! Line-based fallback chunker for files without definition boundaries.
//!
//! Blank-line paragraphs are merged up to the character budget; a paragraph
//! that alone exceeds the budget is split at line boundaries.

use super::ChunkOutput;

/// Maximum non-whitespace characters per chunk.
const CHAR_BUDGET: usize = 1500;

/// Chunk content using line-based heuristics.
pub fn chunk_fallback(content: &str) -> Vec<ChunkOutput> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    // (first line, last line, non-ws chars) of the chunk being built
    let mut open: Option<(usize, usize, usize)> = None;

    for (start, end) in paragraphs(&lines) {
        let chars = non_ws_chars(&lines[start..=end]);

        if chars > CHAR_BUDGET {
            if let Some((s, e, _)) = open.take() {
                chunks.push(range_chunk(&lines, s, e));
            }
            split_line_range(&lines, start, end, &mut chunks);
            continue;
        }

        open = match open {
            Some((s, e, acc)) if acc + chars > CHAR_BUDGET => {
                chunks.push(range_chunk(&lines, s, e));
                Some((start, end, chars))
            }
            Some((s, _, acc)) => Some((s, end, acc + chars)),
            None => Some((start, end, chars)),
        };
    }

    if let Some((s, e, _)) = open {
        chunks.push(range_chunk(&lines, s, e));
    }
    chunks
}

/// Split lines `start..=end` (0-based, inclusive) into budget-sized chunks.
pub(super) fn split_line_range(lines: &[&str], start: usize, end: usize, chunks: &mut Vec<ChunkOutput>) {
    let mut chunk_start = start;
    let mut chars = 0usize;

    for (i, line) in lines.iter().enumerate().take(end + 1).skip(start) {
        let line_chars = line.chars().filter(|c| !c.is_whitespace()).count();
        if chars + line_chars > CHAR_BUDGET && i > chunk_start {
            chunks.push(range_chunk(lines, chunk_start, i - 1));
            chunk_start = i;
            chars = line_chars;
        } else {
            chars += line_chars;
        }
    }

    if chunk_start <= end {
        chunks.push(range_chunk(lines, chunk_start, end));
    }
}

/// Maximal runs of non-blank lines, as inclusive (start, end) indices.
fn paragraphs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut run_start = None;

    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), run_start) {
            (true, Some(s)) => {
                out.push((s, i - 1));
                run_start = None;
            }
            (false, None) => run_start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = run_start {
        out.push((s, lines.len() - 1));
    }
    out
}

fn non_ws_chars(lines: &[&str]) -> usize {
    lines
        .iter()
        .flat_map(|l| l.chars())
        .filter(|c| !c.is_whitespace())
        .count()
}

fn range_chunk(lines: &[&str], start: usize, end: usize) -> ChunkOutput {
    ChunkOutput {
        content: lines[start..=end].join("\n"),
        start_line: start + 1,
        end_line: end + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_empty() {
        assert!(chunk_fallback("").is_empty());
        assert!(chunk_fallback("   \n\n  ").is_empty());
    }

    #[test]
    fn test_fallback_small_file() {
        let chunks = chunk_fallback("line 1\nline 2\nline 3");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_fallback_splits_at_blank_lines() {
        let block1: String = (0..80).map(|i| format!("var_{i} = fetch({i});")).collect::<Vec<_>>().join("\n");
        let block2: String = (0..80).map(|i| format!("other_{i} = fetch({i});")).collect::<Vec<_>>().join("\n");
        let content = format!("{block1}\n\n{block2}");

        let chunks = chunk_fallback(&content);
        assert_eq!(chunks.len(), 2, "should split at the blank line");
        assert_eq!(chunks[0].end_line, 80);
        assert_eq!(chunks[1].start_line, 82);
    }

    #[test]
    fn test_split_line_range_covers_every_line() {
        let lines: Vec<String> = (0..300).map(|i| format!("log_line_{i:04} = {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let mut chunks = Vec::new();
        split_line_range(&refs, 0, 299, &mut chunks);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 300);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_line + 1, pair[1].start_line);
        }
    }
}
