// crates/risk-engine/src/atomizer/merger.rs
// Chunk Merger & Signature Normalizer (§4.4, L4): collapses events from
// multiple chunks that describe the same (file, block name) into one,
// resolving behavior conflicts by priority and normalizing signatures for
// comparison.

use std::collections::HashMap;

use regex::Regex;

use super::extractor::ChangeEvent;
use crate::db::models::ChangeBehavior;

/// Strip whitespace and canonicalize common type aliases (§4.4). Idempotent:
/// `normalize_signature(normalize_signature(s)) == normalize_signature(s)`.
pub fn normalize_signature(sig: &str) -> String {
    let aliased = rewrite_type_aliases(sig);
    aliased.chars().filter(|c| !c.is_whitespace()).collect()
}

fn rewrite_type_aliases(sig: &str) -> String {
    // Word-boundary replacement so e.g. `instrument` never loses its `str`.
    let pairs: &[(&str, &str)] = &[
        (r"\bint32\b", "int"),
        (r"\bint64\b", "int"),
        (r"\bstr\b", "string"),
        (r"\bbool\b", "boolean"),
    ];
    let mut out = sig.to_string();
    for (pattern, replacement) in pairs {
        if let Ok(re) = Regex::new(pattern) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    out
}

/// Parameter count derived from the outermost `( ... )` (§4.4).
pub fn parameter_count(sig: &str) -> usize {
    let Some(open) = sig.find('(') else {
        return 0;
    };
    let bytes = sig.as_bytes();
    let mut depth = 0i32;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(end) = end else { return 0 };
    let inner = sig[open + 1..end].trim();
    if inner.is_empty() {
        return 0;
    }
    split_top_level_commas(inner).len()
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// Exact match after normalization, or (when `fuzzy`) equal parameter count
/// with edit distance within 20% of the longer normalized string (§4.4).
pub fn signatures_match(a: &str, b: &str, fuzzy: bool) -> bool {
    let na = normalize_signature(a);
    let nb = normalize_signature(b);
    if na == nb {
        return true;
    }
    if !fuzzy {
        return false;
    }
    if parameter_count(&na) != parameter_count(&nb) {
        return false;
    }
    let longer = na.len().max(nb.len());
    if longer == 0 {
        return true;
    }
    levenshtein(&na, &nb) as f64 <= 0.20 * longer as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

const SNIPPET_BOUNDARY: &str = "\n--- \n";

/// Merge events from multiple chunks referring to the same `(file, name)`
/// into one, resolving behavior conflicts by priority (§4.4): `RENAME(4) >
/// MODIFY(3) > CREATE(2) > DELETE(1)`. Import events are never merged
/// across chunks — each is independently meaningful.
pub fn merge_events(events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut groups: HashMap<(String, String), Vec<ChangeEvent>> = HashMap::new();
    let mut standalone = Vec::new();

    for event in events {
        match &event.behavior {
            ChangeBehavior::AddImport | ChangeBehavior::RemoveImport => {
                standalone.push(event);
            }
            _ => {
                let name = event.target_block_name.clone().unwrap_or_default();
                groups
                    .entry((event.file_path.clone(), name))
                    .or_default()
                    .push(event);
            }
        }
    }

    let mut merged: Vec<ChangeEvent> = groups.into_values().map(merge_group).collect();
    merged.extend(standalone);
    merged
}

fn merge_group(mut group: Vec<ChangeEvent>) -> ChangeEvent {
    if group.len() == 1 {
        return group.remove(0);
    }

    group.sort_by_key(|e| std::cmp::Reverse(e.behavior.priority()));
    let winner_idx = 0;

    let first_signature = group[winner_idx]
        .new_version
        .clone()
        .or_else(|| group[winner_idx].old_version.clone());

    if let Some(first_sig) = &first_signature {
        for other in group.iter().skip(1) {
            if let Some(other_sig) = other.new_version.as_ref().or(other.old_version.as_ref())
                && !signatures_match(first_sig, other_sig, false)
            {
                tracing::warn!(
                    block = %group[winner_idx].target_block_name.clone().unwrap_or_default(),
                    "signature mismatch while merging chunk events, keeping first signature"
                );
            }
        }
    }

    let old_versions: Vec<String> = group.iter().filter_map(|e| e.old_version.clone()).collect();
    let new_versions: Vec<String> = group.iter().filter_map(|e| e.new_version.clone()).collect();

    let start_line = group.iter().map(|e| e.start_line).min().unwrap_or(0);
    let end_line = group.iter().map(|e| e.end_line).max().unwrap_or(0);
    let block_type = group.iter().find_map(|e| e.block_type.clone());
    let old_block_name = group.iter().find_map(|e| e.old_block_name.clone());
    let dependency_path = group.iter().find_map(|e| e.dependency_path.clone());

    let winner = group.swap_remove(winner_idx);

    ChangeEvent {
        behavior: winner.behavior,
        target_block_name: winner.target_block_name,
        old_block_name,
        block_type,
        dependency_path,
        old_version: non_empty_join(old_versions),
        new_version: non_empty_join(new_versions),
        file_path: winner.file_path,
        start_line,
        end_line,
    }
}

fn non_empty_join(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(SNIPPET_BOUNDARY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(behavior: ChangeBehavior, name: &str, new_version: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            behavior,
            target_block_name: Some(name.to_string()),
            old_block_name: None,
            block_type: Some("function".to_string()),
            dependency_path: None,
            old_version: None,
            new_version: new_version.map(str::to_string),
            file_path: "src/a.rs".to_string(),
            start_line: 1,
            end_line: 10,
        }
    }

    #[test]
    fn test_normalize_signature_strips_whitespace() {
        assert_eq!(normalize_signature("fn foo( a int32 )"), "fnfoo(aint)");
    }

    #[test]
    fn test_normalize_signature_is_idempotent() {
        let once = normalize_signature("fn foo(a int32, b str)");
        let twice = normalize_signature(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_rewrites_type_aliases() {
        let a = normalize_signature("fn foo(x int64, y bool)");
        let b = normalize_signature("fn foo(x int, y boolean)");
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_count() {
        assert_eq!(parameter_count("fn foo(a, b, c)"), 3);
        assert_eq!(parameter_count("fn foo()"), 0);
        assert_eq!(parameter_count("fn foo(a map[string]int, b int)"), 2);
    }

    #[test]
    fn test_signatures_match_exact() {
        assert!(signatures_match("fn foo(a int32)", "fn foo( a int )", false));
    }

    #[test]
    fn test_signatures_match_fuzzy_within_threshold() {
        assert!(signatures_match("fn fooBar(a int)", "fn fooBaz(a int)", true));
    }

    #[test]
    fn test_signatures_no_match_different_param_count() {
        assert!(!signatures_match("fn foo(a int)", "fn foo(a int, b int)", true));
    }

    #[test]
    fn test_merge_resolves_rename_over_modify() {
        let events = vec![
            event(ChangeBehavior::Modify, "foo", Some("fn foo()")),
            event(ChangeBehavior::Rename, "foo", Some("fn foo()")),
        ];
        let merged = merge_events(events);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].behavior, ChangeBehavior::Rename);
    }

    #[test]
    fn test_merge_concatenates_snippets() {
        let events = vec![
            event(ChangeBehavior::Modify, "foo", Some("fn foo() v1")),
            event(ChangeBehavior::Modify, "foo", Some("fn foo() v1")),
        ];
        let merged = merge_events(events);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].new_version.as_ref().unwrap().contains(SNIPPET_BOUNDARY));
    }

    #[test]
    fn test_merge_is_commutative_over_input_order() {
        let a = event(ChangeBehavior::Modify, "foo", Some("v1"));
        let b = event(ChangeBehavior::Rename, "foo", Some("v1"));
        let merged_ab = merge_events(vec![a.clone(), b.clone()]);
        let merged_ba = merge_events(vec![b, a]);
        assert_eq!(merged_ab[0].behavior, merged_ba[0].behavior);
    }

    #[test]
    fn test_imports_are_never_merged_across_chunks() {
        let mut import1 = event(ChangeBehavior::AddImport, "", None);
        import1.dependency_path = Some("pkg/a".to_string());
        let mut import2 = event(ChangeBehavior::AddImport, "", None);
        import2.dependency_path = Some("pkg/a".to_string());

        let merged = merge_events(vec![import1, import2]);
        assert_eq!(merged.len(), 2);
    }
}
