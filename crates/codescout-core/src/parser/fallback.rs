//! Line-Aware Fallback Chunking
//!
//! Used when no grammar is available for a file or the AST parse fails.
//! Splits on indentation boundaries: a new chunk preferentially starts at a
//! non-indented, non-blank line, so top-level constructs stay intact even
//! without a syntax tree.

use crate::types::{BlockType, CodeBlock};

use super::ParserLimits;

/// Chunk a file into line-based blocks respecting the configured limits.
///
/// Greedy algorithm: lines accumulate into the current chunk; once the chunk
/// reaches the target size it is closed at the next indentation boundary (a
/// line starting at column zero, or a blank line). A chunk is force-closed
/// when it would exceed the absolute maximum. Chunks below the minimum are
/// discarded.
pub fn chunk_lines(source: &str, file_path: &str, file_hash: &str, limits: &ParserLimits) -> Vec<CodeBlock> {
    let lines: Vec<&str> = source.lines().collect();
    let mut blocks = Vec::new();

    let mut start = 0usize;
    let mut chunk_len = 0usize;

    for (i, line) in lines.iter().enumerate() {
        let line_len = line.len() + 1;
        let at_boundary = is_boundary(line);
        let over_target = chunk_len >= limits.target_chars;
        let would_overflow = chunk_len + line_len > limits.max_chars;

        if chunk_len > 0 && ((over_target && at_boundary) || would_overflow) {
            push_chunk(&mut blocks, &lines, start, i - 1, file_path, file_hash, limits);
            start = i;
            chunk_len = 0;
        }

        chunk_len += line_len;
    }

    if chunk_len > 0 && start < lines.len() {
        push_chunk(&mut blocks, &lines, start, lines.len() - 1, file_path, file_hash, limits);
    }

    blocks
}

/// A line where a new top-level construct may begin.
fn is_boundary(line: &str) -> bool {
    line.trim().is_empty() || !line.starts_with([' ', '\t'])
}

fn push_chunk(
    blocks: &mut Vec<CodeBlock>,
    lines: &[&str],
    start: usize,
    end: usize,
    file_path: &str,
    file_hash: &str,
    limits: &ParserLimits,
) {
    let content = lines[start..=end].join("\n");
    if content.trim().len() < limits.min_chars {
        return;
    }
    blocks.push(CodeBlock::new(
        file_path,
        file_hash,
        start as u32 + 1,
        end as u32 + 1,
        content,
        BlockType::Chunk,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ParserLimits {
        ParserLimits {
            target_chars: 40,
            max_chars: 200,
            min_chars: 10,
        }
    }

    #[test]
    fn test_chunks_split_at_top_level_lines() {
        let source = "\
def first():
    a = 1
    b = 2
    return a + b

def second():
    c = 3
    return c
";
        let blocks = chunk_lines(source, "x.py", "fh", &limits());
        assert!(blocks.len() >= 2);
        assert!(blocks[0].content.contains("first"));
        // Chunks never start mid-indent
        for block in &blocks {
            let first_line = block.content.lines().next().unwrap_or("");
            assert!(first_line.trim().is_empty() || !first_line.starts_with(' '));
        }
    }

    #[test]
    fn test_small_content_dropped() {
        let blocks = chunk_lines("x = 1\n", "x.py", "fh", &limits());
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_line_numbers_are_one_based_and_contiguous() {
        let source = (0..40).map(|i| format!("line_{i} = {i}")).collect::<Vec<_>>().join("\n");
        let blocks = chunk_lines(&source, "x.py", "fh", &limits());
        assert!(!blocks.is_empty());
        assert_eq!(blocks[0].start_line, 1);
        for window in blocks.windows(2) {
            assert_eq!(window[1].start_line, window[0].end_line + 1);
        }
    }

    #[test]
    fn test_oversized_line_run_is_force_split() {
        // No boundaries at all (every line indented) still must not exceed max
        let source = (0..50)
            .map(|i| format!("    indented_line_number_{i} = {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let blocks = chunk_lines(&source, "x.py", "fh", &limits());
        for block in &blocks {
            assert!(block.content.len() <= limits().max_chars + 1);
        }
    }
}
