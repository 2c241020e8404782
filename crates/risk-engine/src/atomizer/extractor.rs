// crates/risk-engine/src/atomizer/extractor.rs
// LLM Extractor (§4.3, L3): submits a chunk + commit message to the LLM and
// parses the closed-schema response into semantic change events. File paths
// and line numbers are never trusted from the LLM — they are attached here
// from the diff parser's output, eliminating a hallucination class (§4.3).

use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use crate::db::models::ChangeBehavior;
use crate::error::{Result, RiskError};
use crate::llm::LlmClient;
use crate::utils::json::parse_json_hardened;

/// The closed schema the LLM must answer in (§4.3). `old_block_name` is not
/// in the spec's literal JSON example but is required by the RENAME_BLOCK
/// event handler in §4.6 and exercised by scenario S2/S3 — treated as part
/// of the same contract, present only for RENAME_BLOCK.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawChangeEvent {
    pub behavior: String,
    pub target_block_name: Option<String>,
    pub old_block_name: Option<String>,
    pub block_type: Option<String>,
    pub dependency_path: Option<String>,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawExtractorOutput {
    pub llm_intent_summary: String,
    #[serde(default)]
    pub mentioned_issues_in_msg: Vec<String>,
    #[serde(default)]
    pub change_events: Vec<RawChangeEvent>,
}

/// A validated, enriched change event — file path and line range attached
/// by the caller, never by the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub behavior: ChangeBehavior,
    pub target_block_name: Option<String>,
    pub old_block_name: Option<String>,
    pub block_type: Option<String>,
    pub dependency_path: Option<String>,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    pub llm_intent_summary: String,
    pub mentioned_issues_in_msg: Vec<String>,
    pub change_events: Vec<ChangeEvent>,
}

const MAX_NAME_LEN: usize = 100;
const DROPPED_BLOCK_TYPES: &[&str] = &["variable", "constant", "text", "documentation"];
const VALID_BLOCK_TYPES: &[&str] = &["function", "method", "class", "component"];

fn parse_behavior(raw: &str) -> Option<ChangeBehavior> {
    match raw {
        "CREATE_BLOCK" => Some(ChangeBehavior::Create),
        "MODIFY_BLOCK" => Some(ChangeBehavior::Modify),
        "DELETE_BLOCK" => Some(ChangeBehavior::Delete),
        "RENAME_BLOCK" => Some(ChangeBehavior::Rename),
        "ADD_IMPORT" => Some(ChangeBehavior::AddImport),
        "REMOVE_IMPORT" => Some(ChangeBehavior::RemoveImport),
        _ => None,
    }
}

/// Validate and normalize a single raw event (§4.3 Validation & filters).
/// Returns `None` for anything that must be dropped silently (a schema
/// violation never bubbles up, §7).
fn validate_event(mut raw: RawChangeEvent) -> Option<RawChangeEvent> {
    let behavior = parse_behavior(&raw.behavior)?;

    let is_import = matches!(behavior, ChangeBehavior::AddImport | ChangeBehavior::RemoveImport);
    if !is_import {
        let name = raw.target_block_name.as_deref().unwrap_or("").trim();
        if name.is_empty() {
            return None;
        }
    }

    if let Some(bt) = raw.block_type.as_deref() {
        let lower = bt.to_ascii_lowercase();
        if DROPPED_BLOCK_TYPES.contains(&lower.as_str()) {
            return None;
        }
        if !VALID_BLOCK_TYPES.contains(&lower.as_str()) {
            raw.block_type = Some("function".to_string());
        } else {
            raw.block_type = Some(lower);
        }
    }

    if let Some(name) = raw.target_block_name.take() {
        let truncated: String = name.chars().take(MAX_NAME_LEN).collect();
        raw.target_block_name = Some(truncated);
    }

    Some(raw)
}

/// A fixed summary returned for the empty-diff / no-code-file short circuit
/// (§4.3, §8 boundary behaviors).
pub fn empty_event_log() -> EventLog {
    EventLog {
        llm_intent_summary: "No code changes detected.".to_string(),
        mentioned_issues_in_msg: Vec::new(),
        change_events: Vec::new(),
    }
}

/// Submit one chunk to the LLM and enrich the resulting events with the
/// chunk's file path and line range (§4.3). `file_paths` lists every file
/// this chunk's events should be distributed across (round-robin when more
/// than one, attached wholesale when exactly one).
pub async fn extract_chunk(
    llm: &dyn LlmClient,
    commit_message: &str,
    chunk: &Chunk,
    file_paths: &[String],
) -> Result<EventLog> {
    if !llm.is_enabled() {
        return Ok(empty_event_log());
    }

    let system = "You are a code-change extractor. Respond with JSON only, matching the \
         given schema. Never invent file paths or line numbers.";
    let user = format!(
        "Commit message:\n{commit_message}\n\nFile: {}\n\nDiff chunk:\n{}",
        chunk.file_header, chunk.content
    );

    let raw_text = llm.complete_json(system, &user).await?;
    if raw_text.trim().is_empty() {
        // §8: an empty completion means "no block changes", not a schema violation.
        return Ok(empty_event_log());
    }
    let raw: RawExtractorOutput = parse_json_hardened(&raw_text)
        .map_err(|e| RiskError::Llm(format!("extractor output did not match schema: {e}")))?;

    Ok(enrich(raw, file_paths, chunk.start_line, chunk.end_line))
}

fn enrich(raw: RawExtractorOutput, file_paths: &[String], start_line: i64, end_line: i64) -> EventLog {
    let validated: Vec<RawChangeEvent> = raw
        .change_events
        .into_iter()
        .filter_map(validate_event)
        .collect();

    let change_events = if file_paths.len() <= 1 {
        let file_path = file_paths.first().cloned().unwrap_or_default();
        validated
            .into_iter()
            .map(|ev| to_change_event(ev, &file_path, start_line, end_line))
            .collect()
    } else {
        validated
            .into_iter()
            .enumerate()
            .map(|(idx, ev)| {
                let file_path = file_paths[idx % file_paths.len()].clone();
                to_change_event(ev, &file_path, start_line, end_line)
            })
            .collect()
    };

    EventLog {
        llm_intent_summary: truncate_summary(&raw.llm_intent_summary),
        mentioned_issues_in_msg: raw.mentioned_issues_in_msg,
        change_events,
    }
}

fn truncate_summary(s: &str) -> String {
    const MAX: usize = 500;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        s.chars().take(MAX).collect()
    }
}

fn to_change_event(raw: RawChangeEvent, file_path: &str, start_line: i64, end_line: i64) -> ChangeEvent {
    ChangeEvent {
        behavior: parse_behavior(&raw.behavior).unwrap_or(ChangeBehavior::Modify),
        target_block_name: raw.target_block_name,
        old_block_name: raw.old_block_name,
        block_type: raw.block_type,
        dependency_path: raw.dependency_path,
        old_version: raw.old_version,
        new_version: raw.new_version,
        file_path: file_path.to_string(),
        start_line,
        end_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_drops_invalid_behavior() {
        let raw = RawChangeEvent {
            behavior: "FROBNICATE_BLOCK".to_string(),
            target_block_name: Some("foo".to_string()),
            ..Default::default()
        };
        assert!(validate_event(raw).is_none());
    }

    #[test]
    fn test_validate_drops_empty_name_for_non_import() {
        let raw = RawChangeEvent {
            behavior: "CREATE_BLOCK".to_string(),
            target_block_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(validate_event(raw).is_none());
    }

    #[test]
    fn test_validate_keeps_import_without_name() {
        let raw = RawChangeEvent {
            behavior: "ADD_IMPORT".to_string(),
            target_block_name: None,
            dependency_path: Some("pkg/foo".to_string()),
            ..Default::default()
        };
        assert!(validate_event(raw).is_some());
    }

    #[test]
    fn test_validate_drops_excluded_block_type() {
        let raw = RawChangeEvent {
            behavior: "CREATE_BLOCK".to_string(),
            target_block_name: Some("x".to_string()),
            block_type: Some("variable".to_string()),
            ..Default::default()
        };
        assert!(validate_event(raw).is_none());
    }

    #[test]
    fn test_validate_normalizes_unknown_block_type() {
        let raw = RawChangeEvent {
            behavior: "CREATE_BLOCK".to_string(),
            target_block_name: Some("x".to_string()),
            block_type: Some("widget".to_string()),
            ..Default::default()
        };
        let validated = validate_event(raw).unwrap();
        assert_eq!(validated.block_type.as_deref(), Some("function"));
    }

    #[test]
    fn test_validate_truncates_long_name() {
        let long_name = "a".repeat(200);
        let raw = RawChangeEvent {
            behavior: "CREATE_BLOCK".to_string(),
            target_block_name: Some(long_name),
            ..Default::default()
        };
        let validated = validate_event(raw).unwrap();
        assert_eq!(validated.target_block_name.unwrap().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_enrich_single_file_attaches_path_to_all_events() {
        let raw = RawExtractorOutput {
            llm_intent_summary: "did stuff".to_string(),
            mentioned_issues_in_msg: vec![],
            change_events: vec![
                RawChangeEvent {
                    behavior: "CREATE_BLOCK".to_string(),
                    target_block_name: Some("foo".to_string()),
                    ..Default::default()
                },
                RawChangeEvent {
                    behavior: "MODIFY_BLOCK".to_string(),
                    target_block_name: Some("bar".to_string()),
                    ..Default::default()
                },
            ],
        };
        let log = enrich(raw, &["src/a.rs".to_string()], 1, 10);
        assert_eq!(log.change_events.len(), 2);
        assert!(log.change_events.iter().all(|e| e.file_path == "src/a.rs"));
    }

    #[test]
    fn test_enrich_round_robins_across_multiple_files() {
        let raw = RawExtractorOutput {
            llm_intent_summary: "did stuff".to_string(),
            mentioned_issues_in_msg: vec![],
            change_events: vec![
                RawChangeEvent {
                    behavior: "CREATE_BLOCK".to_string(),
                    target_block_name: Some("foo".to_string()),
                    ..Default::default()
                },
                RawChangeEvent {
                    behavior: "MODIFY_BLOCK".to_string(),
                    target_block_name: Some("bar".to_string()),
                    ..Default::default()
                },
            ],
        };
        let log = enrich(raw, &["src/a.rs".to_string(), "src/b.rs".to_string()], 1, 10);
        assert_eq!(log.change_events[0].file_path, "src/a.rs");
        assert_eq!(log.change_events[1].file_path, "src/b.rs");
    }

    #[test]
    fn test_empty_event_log_has_fixed_summary() {
        let log = empty_event_log();
        assert!(log.change_events.is_empty());
        assert!(!log.llm_intent_summary.is_empty());
    }
}
