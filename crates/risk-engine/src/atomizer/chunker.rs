// crates/risk-engine/src/atomizer/chunker.rs
// Chunker (§4.2, L2): splits a file's diff (or reconstructed new-file
// content, for added files) into LLM-sized chunks aligned to function/class
// boundaries.

use super::diff::{ChangeType, FileChange};

pub const MAX_CHUNK_BYTES: usize = 100 * 1024;
pub const MAX_CHUNKS_PER_FILE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub file_header: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub chunks: Vec<Chunk>,
    /// Function/class boundaries (or hunks) dropped once `MAX_CHUNKS_PER_FILE`
    /// is reached — reported back on the commit row (§4.2).
    pub skipped: usize,
}

/// Lines that plausibly open a new top-level function/class/method, used to
/// decide chunk boundaries for reconstructed added-file content. Heuristic,
/// language-agnostic by keyword rather than a full grammar.
const BOUNDARY_KEYWORDS: &[&str] = &[
    "fn ", "func ", "function ", "def ", "class ", "struct ", "impl ", "interface ", "public ",
    "private ", "protected ", "async fn ", "export function ", "export default function ",
];

fn looks_like_boundary(line: &str) -> bool {
    let trimmed = line.trim_start();
    BOUNDARY_KEYWORDS.iter().any(|kw| trimmed.starts_with(kw))
}

/// Chunk a single file's change into `Chunk`s (§4.2). For added files with
/// no old-side content, reconstructs the new file from `+` lines and slices
/// by function boundary; otherwise chunks by hunk, merging adjacent hunks
/// until the byte budget is hit.
pub fn chunk_file(file_path: &str, change: &FileChange) -> ChunkResult {
    let file_header = format!("--- {} ---", file_path);

    if change.change_type == ChangeType::Added {
        return chunk_added_file(&file_header, change);
    }

    chunk_by_hunks(&file_header, change)
}

fn chunk_by_hunks(file_header: &str, change: &FileChange) -> ChunkResult {
    let mut chunks = Vec::new();
    let mut skipped = 0usize;

    let mut current_body = String::new();
    let mut current_start = None;
    let mut current_end = 0i64;

    for hunk in &change.hunks {
        if chunks.len() >= MAX_CHUNKS_PER_FILE {
            skipped += 1;
            continue;
        }

        let would_overflow = current_body.len() + hunk.body.len() > MAX_CHUNK_BYTES;
        if would_overflow && !current_body.is_empty() {
            chunks.push(Chunk {
                file_header: file_header.to_string(),
                start_line: current_start.unwrap_or(hunk.new_start),
                end_line: current_end,
                content: std::mem::take(&mut current_body),
            });
            current_start = None;
        }

        if current_start.is_none() {
            current_start = Some(hunk.new_start);
        }
        current_end = hunk.new_start + hunk.new_count.max(1) - 1;
        current_body.push_str(&hunk.body);
    }

    if !current_body.is_empty() && chunks.len() < MAX_CHUNKS_PER_FILE {
        chunks.push(Chunk {
            file_header: file_header.to_string(),
            start_line: current_start.unwrap_or(1),
            end_line: current_end,
            content: current_body,
        });
    }

    ChunkResult { chunks, skipped }
}

fn chunk_added_file(file_header: &str, change: &FileChange) -> ChunkResult {
    let content = reconstruct_added_content(change);
    let lines: Vec<&str> = content.lines().collect();

    let mut boundaries = vec![0usize];
    for (idx, line) in lines.iter().enumerate().skip(1) {
        if looks_like_boundary(line) {
            boundaries.push(idx);
        }
    }
    boundaries.push(lines.len());
    boundaries.dedup();

    let mut chunks = Vec::new();
    let mut skipped = 0usize;
    let mut idx = 0;

    while idx + 1 < boundaries.len() {
        if chunks.len() >= MAX_CHUNKS_PER_FILE {
            skipped += boundaries.len() - 1 - idx;
            break;
        }
        let start = boundaries[idx];
        let mut end = boundaries[idx + 1];

        let mut body = lines[start..end].join("\n");
        let mut next = idx + 1;
        while body.len() < MAX_CHUNK_BYTES && next + 1 < boundaries.len() {
            let candidate_end = boundaries[next + 1];
            let candidate = lines[start..candidate_end].join("\n");
            if candidate.len() > MAX_CHUNK_BYTES {
                break;
            }
            body = candidate;
            end = candidate_end;
            next += 1;
        }

        chunks.push(Chunk {
            file_header: file_header.to_string(),
            start_line: (start + 1) as i64,
            end_line: end as i64,
            content: body,
        });
        idx = next;
    }

    ChunkResult { chunks, skipped }
}

fn reconstruct_added_content(change: &FileChange) -> String {
    let mut out = String::new();
    for hunk in &change.hunks {
        for line in hunk.body.lines() {
            if let Some(rest) = line.strip_prefix('+') {
                out.push_str(rest);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomizer::diff::Hunk;

    fn modified_change(hunks: Vec<Hunk>) -> FileChange {
        FileChange {
            change_type: ChangeType::Modified,
            file_path: "src/a.rs".to_string(),
            old_path: None,
            hunks,
        }
    }

    #[test]
    fn test_single_small_hunk_yields_one_chunk() {
        let change = modified_change(vec![Hunk {
            old_start: 1,
            old_count: 1,
            new_start: 1,
            new_count: 1,
            body: "+fn foo() {}\n".to_string(),
        }]);
        let result = chunk_file("src/a.rs", &change);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn test_chunks_respect_byte_budget() {
        let big_body = "x".repeat(MAX_CHUNK_BYTES + 100);
        let change = modified_change(vec![
            Hunk {
                old_start: 1,
                old_count: 1,
                new_start: 1,
                new_count: 1,
                body: big_body.clone(),
            },
            Hunk {
                old_start: 50,
                old_count: 1,
                new_start: 50,
                new_count: 1,
                body: "+fn bar() {}\n".to_string(),
            },
        ]);
        let result = chunk_file("src/a.rs", &change);
        assert!(result.chunks.len() >= 2);
    }

    #[test]
    fn test_at_most_ten_chunks_per_file() {
        let hunks: Vec<Hunk> = (0..20)
            .map(|i| Hunk {
                old_start: i,
                old_count: 1,
                new_start: i,
                new_count: 1,
                body: "x".repeat(MAX_CHUNK_BYTES),
            })
            .collect();
        let change = modified_change(hunks);
        let result = chunk_file("src/a.rs", &change);
        assert!(result.chunks.len() <= MAX_CHUNKS_PER_FILE);
        assert!(result.skipped > 0);
    }

    #[test]
    fn test_added_file_reconstructs_and_slices_by_boundary() {
        let change = FileChange {
            change_type: ChangeType::Added,
            file_path: "src/new.rs".to_string(),
            old_path: None,
            hunks: vec![Hunk {
                old_start: 0,
                old_count: 0,
                new_start: 1,
                new_count: 4,
                body: "+fn foo() {\n+    1\n+}\n+fn bar() {}\n".to_string(),
            }],
        };
        let result = chunk_file("src/new.rs", &change);
        assert!(!result.chunks.is_empty());
        assert!(result.chunks[0].content.contains("fn foo"));
    }
}
