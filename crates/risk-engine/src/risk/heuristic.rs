// crates/risk-engine/src/risk/heuristic.rs
// Heuristic Filter (§4.12, Phase 0): classifies trivial changes before any
// agent is invoked. Rules are checked in order; the first match wins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::atomizer::diff::FileChange;

const MAX_TRIVIAL_DIFF_LINES: usize = 10;
const MAX_TRIVIAL_FILES: usize = 3;

const COMMENT_PREFIXES: &[&str] = &["//", "#", "/*", "*", "<!--"];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const DOC_BASENAMES: &[&str] = &["README", "LICENSE", "CHANGELOG"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicResult {
    pub is_trivial: bool,
    pub confidence: f64,
    pub reason: String,
}

impl HeuristicResult {
    fn trivial(confidence: f64, reason: &str) -> Self {
        Self {
            is_trivial: true,
            confidence,
            reason: reason.to_string(),
        }
    }

    fn complex(confidence: f64, reason: &str) -> Self {
        Self {
            is_trivial: false,
            confidence,
            reason: reason.to_string(),
        }
    }
}

struct ChangedLine<'a> {
    sign: char,
    content: &'a str,
}

fn changed_lines(files: &HashMap<String, FileChange>) -> Vec<ChangedLine<'_>> {
    let mut lines = Vec::new();
    for change in files.values() {
        for hunk in &change.hunks {
            for line in hunk.body.lines() {
                let mut chars = line.chars();
                match chars.next() {
                    Some(sign @ ('+' | '-')) => lines.push(ChangedLine { sign, content: chars.as_str() }),
                    _ => continue,
                }
            }
        }
    }
    lines
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_whitespace_only(lines: &[ChangedLine]) -> bool {
    if lines.is_empty() {
        return false;
    }
    let removed: String = lines.iter().filter(|l| l.sign == '-').map(|l| strip_whitespace(l.content)).collect();
    let added: String = lines.iter().filter(|l| l.sign == '+').map(|l| strip_whitespace(l.content)).collect();
    removed == added
}

fn is_comment_only(lines: &[ChangedLine]) -> bool {
    if lines.is_empty() {
        return false;
    }
    lines.iter().all(|l| {
        let trimmed = l.content.trim_start();
        COMMENT_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
    })
}

fn is_doc_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    if DOC_BASENAMES.iter().any(|base| name.eq_ignore_ascii_case(base)) {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

fn all_paths_are_docs(files: &HashMap<String, FileChange>) -> bool {
    !files.is_empty() && files.keys().all(|path| is_doc_path(path))
}

/// Classify a commit's diff as trivial or complex (§4.12 Phase 0).
pub fn classify(files: &HashMap<String, FileChange>) -> HeuristicResult {
    let lines = changed_lines(files);

    if is_whitespace_only(&lines) {
        return HeuristicResult::trivial(0.95, "Change is whitespace-only");
    }
    if is_comment_only(&lines) {
        return HeuristicResult::trivial(0.90, "Change touches only comments");
    }
    if all_paths_are_docs(files) {
        return HeuristicResult::trivial(0.85, "Change affects only documentation files");
    }
    if lines.len() <= MAX_TRIVIAL_DIFF_LINES && files.len() <= MAX_TRIVIAL_FILES {
        return HeuristicResult::trivial(0.70, "Small change across few files");
    }
    HeuristicResult::complex(0.80, "Change requires full analysis")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomizer::diff::{ChangeType, Hunk};

    fn file(path: &str, body: &str) -> HashMap<String, FileChange> {
        let mut files = HashMap::new();
        files.insert(
            path.to_string(),
            FileChange {
                change_type: ChangeType::Modified,
                file_path: path.to_string(),
                old_path: None,
                hunks: vec![Hunk {
                    old_start: 1,
                    old_count: 1,
                    new_start: 1,
                    new_count: 1,
                    body: body.to_string(),
                }],
            },
        );
        files
    }

    #[test]
    fn test_whitespace_only_diff_is_trivial_at_highest_confidence() {
        let files = file("src/x.rs", "-fn foo() {\n+fn foo()  {\n");
        let result = classify(&files);
        assert!(result.is_trivial);
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_comment_only_diff_is_trivial() {
        let files = file("src/x.rs", "-// old note\n+// updated note\n");
        let result = classify(&files);
        assert!(result.is_trivial);
        assert_eq!(result.confidence, 0.90);
    }

    #[test]
    fn test_docs_only_paths_are_trivial() {
        let files = file("README.md", "-old text\n+new text with more words than before\n");
        let result = classify(&files);
        assert!(result.is_trivial);
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn test_small_diff_across_few_files_is_trivial() {
        let files = file("src/x.rs", "-let a = 1;\n+let a = 2;\n");
        let result = classify(&files);
        assert!(result.is_trivial);
        assert_eq!(result.confidence, 0.70);
    }

    #[test]
    fn test_scenario_s6_readme_fast_path() {
        let files = file("README.md", "-line one\n+line one updated\n+a brand new second line\n");
        let result = classify(&files);
        assert!(result.is_trivial);
        assert_eq!(result.reason, "Change affects only documentation files");
    }

    #[test]
    fn test_large_diff_is_complex() {
        let body: String = (0..20).map(|i| format!("+line {i}\n")).collect();
        let files = file("src/x.rs", &body);
        let result = classify(&files);
        assert!(!result.is_trivial);
        assert_eq!(result.confidence, 0.80);
    }
}
