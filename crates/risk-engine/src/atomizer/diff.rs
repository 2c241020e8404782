// crates/risk-engine/src/atomizer/diff.rs
// Diff Parser (§4.1, L1): turns unified diff text into per-file change
// records. This is the only place in the pipeline allowed to produce file
// paths and line numbers — the LLM extractor (§4.3) never does.

use std::collections::HashMap;

/// How a file changed within a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    pub old_start: i64,
    pub old_count: i64,
    pub new_start: i64,
    pub new_count: i64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub change_type: ChangeType,
    /// Current path. For deletions this is the path that was deleted; for
    /// renames, the new path (§4.1).
    pub file_path: String,
    /// Present for renames and deletions.
    pub old_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// The canonical path this change is keyed under: the old path for a
    /// deletion, the current path otherwise.
    pub fn canonical_path(&self) -> &str {
        match self.change_type {
            ChangeType::Deleted => self.old_path.as_deref().unwrap_or(&self.file_path),
            _ => &self.file_path,
        }
    }
}

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "lock", "mod", "env"];
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "woff", "woff2", "ttf", "so",
    "dylib", "dll", "exe", "bin", "wasm",
];

/// Conservative whitelist: dotfiles, docs, and config/lockfiles are never
/// treated as code (§4.1).
pub fn is_code_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.starts_with('.') {
        return false;
    }
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return false,
    };
    if DOC_EXTENSIONS.contains(&ext.as_str()) || CONFIG_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }
    if is_binary_file(path) {
        return false;
    }
    true
}

pub fn is_binary_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Parse unified diff text into per-file change records (§4.1). Recognizes
/// `diff --git a/.. b/..`, `new file mode`, `deleted file mode`,
/// `rename from`/`rename to`, and `@@ -a,b +c,d @@` hunk headers.
pub fn parse_diff(diff_text: &str) -> HashMap<String, FileChange> {
    let mut files = HashMap::new();
    let lines: Vec<&str> = diff_text.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let (a_path, b_path) = match parse_git_diff_header(rest) {
                Some(p) => p,
                None => {
                    i += 1;
                    continue;
                }
            };

            let mut change_type = ChangeType::Modified;
            let mut old_path: Option<String> = None;
            let mut j = i + 1;
            let mut hunks = Vec::new();

            while j < lines.len() && !lines[j].starts_with("diff --git ") {
                let l = lines[j];
                if l.starts_with("new file mode") {
                    change_type = ChangeType::Added;
                } else if l.starts_with("deleted file mode") {
                    change_type = ChangeType::Deleted;
                } else if let Some(p) = l.strip_prefix("rename from ") {
                    change_type = ChangeType::Renamed;
                    old_path = Some(p.trim().to_string());
                } else if let Some(p) = l.strip_prefix("rename to ") {
                    change_type = ChangeType::Renamed;
                    let _ = p;
                } else if l.starts_with("@@ ") || l.starts_with("@@-") {
                    if let Some((header, consumed)) = parse_hunk_header(l) {
                        let mut body = String::new();
                        let mut k = j + 1;
                        while k < lines.len()
                            && !lines[k].starts_with("@@ ")
                            && !lines[k].starts_with("diff --git ")
                            && !lines[k].starts_with("---")
                            && !lines[k].starts_with("+++")
                        {
                            body.push_str(lines[k]);
                            body.push('\n');
                            k += 1;
                        }
                        hunks.push(Hunk {
                            old_start: header.0,
                            old_count: header.1,
                            new_start: header.2,
                            new_count: header.3,
                            body,
                        });
                        let _ = consumed;
                        j = k;
                        continue;
                    }
                }
                j += 1;
            }

            let file_path = if change_type == ChangeType::Deleted {
                a_path.clone()
            } else {
                b_path
            };

            let old_path = if change_type == ChangeType::Renamed {
                old_path.or(Some(a_path))
            } else if change_type == ChangeType::Deleted {
                Some(a_path)
            } else {
                None
            };

            let key = match change_type {
                ChangeType::Deleted => file_path.clone(),
                _ => file_path.clone(),
            };

            files.insert(
                key,
                FileChange {
                    change_type,
                    file_path,
                    old_path,
                    hunks,
                },
            );

            i = j;
            continue;
        }
        i += 1;
    }

    files
}

fn parse_git_diff_header(rest: &str) -> Option<(String, String)> {
    // "a/path/to/file b/path/to/file" — split at the midpoint " b/" marker.
    let marker = " b/";
    let pos = rest.find(marker)?;
    let a = rest[..pos].strip_prefix("a/").unwrap_or(&rest[..pos]).to_string();
    let b = rest[pos + marker.len()..].to_string();
    Some((a, b))
}

/// Parses `@@ -old_start,old_count +new_start,new_count @@` (counts default
/// to 1 when omitted, matching unified-diff convention).
fn parse_hunk_header(line: &str) -> Option<((i64, i64, i64, i64), usize)> {
    let body = line.strip_prefix("@@ ")?;
    let end = body.find(" @@")?;
    let spec = &body[..end];
    let mut parts = spec.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some(((old_start, old_count, new_start, new_count), end))
}

fn parse_range(s: &str) -> Option<(i64, i64)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// The smallest line span on the new side covering every hunk in a
/// `FileChange` (§4.1). Monotone: adding hunks never shrinks the span (P
/// round-trip law, §8).
pub fn get_line_range(file_change: &FileChange) -> Option<(i64, i64)> {
    if file_change.hunks.is_empty() {
        return None;
    }
    let start = file_change
        .hunks
        .iter()
        .map(|h| h.new_start)
        .min()
        .unwrap_or(1);
    let end = file_change
        .hunks
        .iter()
        .map(|h| h.new_start + h.new_count.max(1) - 1)
        .max()
        .unwrap_or(start);
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "diff --git a/src/auth.ts b/src/auth.ts\n\
index 1234567..89abcde 100644\n\
--- a/src/auth.ts\n\
+++ b/src/auth.ts\n\
@@ -10,3 +10,4 @@ function authUser() {\n\
 context\n\
+added line\n\
 more context\n\
-removed line\n";

    #[test]
    fn test_parse_modified_file() {
        let files = parse_diff(SAMPLE_DIFF);
        let change = files.get("src/auth.ts").unwrap();
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.hunks.len(), 1);
        assert_eq!(change.hunks[0].new_start, 10);
    }

    #[test]
    fn test_parse_new_file() {
        let diff = "diff --git a/src/new.rs b/src/new.rs\n\
new file mode 100644\n\
index 0000000..1111111\n\
--- /dev/null\n\
+++ b/src/new.rs\n\
@@ -0,0 +1,2 @@\n\
+fn foo() {}\n\
+fn bar() {}\n";
        let files = parse_diff(diff);
        let change = files.get("src/new.rs").unwrap();
        assert_eq!(change.change_type, ChangeType::Added);
    }

    #[test]
    fn test_parse_deleted_file() {
        let diff = "diff --git a/src/old.rs b/src/old.rs\n\
deleted file mode 100644\n\
index 1111111..0000000\n\
--- a/src/old.rs\n\
+++ /dev/null\n\
@@ -1,2 +0,0 @@\n\
-fn foo() {}\n\
-fn bar() {}\n";
        let files = parse_diff(diff);
        let change = files.get("src/old.rs").unwrap();
        assert_eq!(change.change_type, ChangeType::Deleted);
        assert_eq!(change.canonical_path(), "src/old.rs");
    }

    #[test]
    fn test_parse_renamed_file() {
        let diff = "diff --git a/src/old_name.rs b/src/new_name.rs\n\
similarity index 95%\n\
rename from src/old_name.rs\n\
rename to src/new_name.rs\n\
index 1111111..2222222 100644\n\
--- a/src/old_name.rs\n\
+++ b/src/new_name.rs\n\
@@ -1,1 +1,1 @@\n\
-fn old_fn() {}\n\
+fn new_fn() {}\n";
        let files = parse_diff(diff);
        let change = files.get("src/new_name.rs").unwrap();
        assert_eq!(change.change_type, ChangeType::Renamed);
        assert_eq!(change.old_path.as_deref(), Some("src/old_name.rs"));
    }

    #[test]
    fn test_get_line_range_is_monotone_under_added_hunks() {
        let mut fc = FileChange {
            change_type: ChangeType::Modified,
            file_path: "a.rs".to_string(),
            old_path: None,
            hunks: vec![Hunk {
                old_start: 1,
                old_count: 1,
                new_start: 10,
                new_count: 2,
                body: String::new(),
            }],
        };
        let (start1, end1) = get_line_range(&fc).unwrap();

        fc.hunks.push(Hunk {
            old_start: 1,
            old_count: 1,
            new_start: 100,
            new_count: 3,
            body: String::new(),
        });
        let (start2, end2) = get_line_range(&fc).unwrap();

        assert!(start2 <= start1);
        assert!(end2 >= end1);
    }

    #[test]
    fn test_is_code_file_whitelist() {
        assert!(is_code_file("src/main.rs"));
        assert!(!is_code_file("README.md"));
        assert!(!is_code_file("package-lock.json"));
        assert!(!is_code_file(".gitignore"));
        assert!(!is_code_file("logo.png"));
    }

    #[test]
    fn test_empty_diff_yields_no_files() {
        assert!(parse_diff("").is_empty());
    }
}
