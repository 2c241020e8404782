// crates/risk-engine/src/calculators/ownership.rs
// Ownership Calculator (§4.8, L9): original author, last modifier and
// staleness, and a per-block familiarity map. Runs offline, after ingest,
// reading the relational store and writing aggregates back to it and to
// the graph mirror.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::db::models::{CodeBlock, FamiliarityEntry};
use crate::db::writer::{self, ChangeRow};
use crate::db::DatabasePool;
use crate::error::Result;
use crate::graph::{GraphStore, NodeLabel};
use crate::llm::LlmClient;

const MAX_FAMILIARITY_ENTRIES: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct OwnershipSummary {
    pub blocks_indexed: usize,
    /// Count of blocks missing any of {original_author, last_modifier,
    /// staleness_days} after indexing — `VerifyOwnershipProperties` (§4.8).
    pub incomplete_blocks: usize,
}

/// `CalculateSemanticImportance` classification bands (§4.8, optional LLM
/// call). Defaults to P2 on any error — never blocks the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportanceBand {
    P0,
    P1,
    P2,
}

impl ImportanceBand {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "P0" => Some(Self::P0),
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            _ => None,
        }
    }
}

/// Classify a block's importance from its name, type, and path. Falls back
/// to `P2` whenever the LLM is disabled or returns anything unexpected.
pub async fn calculate_semantic_importance(llm: &dyn LlmClient, block: &CodeBlock) -> ImportanceBand {
    if !llm.is_enabled() {
        return ImportanceBand::P2;
    }
    let system = "Classify code block importance as P0, P1, or P2. Reply with just the label.";
    let user = format!(
        "name: {}\nblock_type: {}\nfile_path: {}",
        block.name, block.block_type, block.file_path
    );
    match llm.complete(system, &user).await {
        Ok(text) => ImportanceBand::parse(&text).unwrap_or(ImportanceBand::P2),
        Err(_) => ImportanceBand::P2,
    }
}

/// Run all three ownership phases for a repository and sync the results to
/// the graph mirror.
pub async fn run_ownership_calculator(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    repo_id: &str,
) -> Result<OwnershipSummary> {
    let blocks = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_all_blocks(conn, &repo_id)
        })
        .await?;
    let changes = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_all_changes(conn, &repo_id)
        })
        .await?;

    let mut changes_by_block: HashMap<String, Vec<&ChangeRow>> = HashMap::new();
    for change in &changes {
        changes_by_block.entry(change.code_block_id.clone()).or_default().push(change);
    }

    let mut summary = OwnershipSummary::default();
    let now = Utc::now();

    for block in &blocks {
        let block_changes = changes_by_block.get(&block.id).cloned().unwrap_or_default();

        let original_author = original_author_for(block, &block_changes);
        let (last_modifier, staleness_days) = last_modifier_and_staleness(block, &block_changes, now);
        let familiarity = familiarity_map(&block_changes);
        let familiarity_json = serde_json::to_string(&familiarity).unwrap_or_else(|_| "[]".to_string());
        let indexed_at = now.to_rfc3339();

        pool.run_with_retry({
            let block_id = block.id.clone();
            let original_author = original_author.clone();
            let last_modifier = last_modifier.clone();
            let familiarity_json = familiarity_json.clone();
            let indexed_at = indexed_at.clone();
            move |conn| {
                writer::mark_ownership_indexed(
                    conn,
                    &block_id,
                    original_author.as_deref(),
                    last_modifier.as_deref(),
                    staleness_days.unwrap_or(0),
                    &familiarity_json,
                    &indexed_at,
                )
            }
        })
        .await?;

        let mut props: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(author) = &original_author {
            props.insert("original_author".to_string(), serde_json::json!(author));
        }
        if let Some(modifier) = &last_modifier {
            props.insert("last_modifier".to_string(), serde_json::json!(modifier));
        }
        if let Some(days) = staleness_days {
            props.insert("staleness_days".to_string(), serde_json::json!(days));
        }
        graph.upsert_node(NodeLabel::CodeBlock, &block.id, props);

        if original_author.is_none() || last_modifier.is_none() || staleness_days.is_none() {
            summary.incomplete_blocks += 1;
        }
        summary.blocks_indexed += 1;
    }

    Ok(summary)
}

fn original_author_for(block: &CodeBlock, changes: &[&ChangeRow]) -> Option<String> {
    changes
        .iter()
        .find(|c| c.commit_sha == block.first_seen_sha)
        .map(|c| c.developer_email.clone())
        .or_else(|| changes.first().map(|c| c.developer_email.clone()))
}

fn last_modifier_and_staleness(
    block: &CodeBlock,
    changes: &[&ChangeRow],
    now: DateTime<Utc>,
) -> (Option<String>, Option<i64>) {
    let most_recent = changes.iter().max_by(|a, b| a.changed_at.cmp(&b.changed_at));

    let Some(most_recent) = most_recent else {
        // No modifications recorded — copy from creation (§4.8 phase 2).
        let author = block.original_author.clone();
        return (author, None);
    };

    let staleness_days = DateTime::parse_from_rfc3339(&most_recent.changed_at)
        .ok()
        .map(|ts| (now - ts.with_timezone(&Utc)).num_days().max(0));

    (Some(most_recent.developer_email.clone()), staleness_days)
}

fn familiarity_map(changes: &[&ChangeRow]) -> Vec<FamiliarityEntry> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for change in changes {
        *counts.entry(change.developer_email.clone()).or_insert(0) += 1;
    }
    let mut entries: Vec<FamiliarityEntry> = counts
        .into_iter()
        .map(|(email, change_count)| FamiliarityEntry { email, change_count })
        .collect();
    entries.sort_by(|a, b| b.change_count.cmp(&a.change_count).then_with(|| a.email.cmp(&b.email)));
    entries.truncate(MAX_FAMILIARITY_ENTRIES);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(block_id: &str, dev: &str, sha: &str, at: &str) -> ChangeRow {
        ChangeRow {
            code_block_id: block_id.to_string(),
            commit_sha: sha.to_string(),
            developer_email: dev.to_string(),
            changed_at: at.to_string(),
        }
    }

    #[test]
    fn test_familiarity_map_keeps_top_ten_sorted_by_edits() {
        let changes = vec![
            change("b1", "a@x.com", "s1", "2026-01-01T00:00:00+00:00"),
            change("b1", "a@x.com", "s2", "2026-01-02T00:00:00+00:00"),
            change("b1", "b@x.com", "s3", "2026-01-03T00:00:00+00:00"),
        ];
        let refs: Vec<&ChangeRow> = changes.iter().collect();
        let map = familiarity_map(&refs);
        assert_eq!(map[0].email, "a@x.com");
        assert_eq!(map[0].change_count, 2);
    }

    #[test]
    fn test_last_modifier_uses_most_recent_change() {
        let block = CodeBlock {
            id: "b1".into(),
            repo_id: "r1".into(),
            file_path: "a.rs".into(),
            canonical_file_path: "a.rs".into(),
            path_at_creation: "a.rs".into(),
            name: "foo".into(),
            block_type: "function".into(),
            language: None,
            start_line: 1,
            end_line: 2,
            signature: "fn foo()".into(),
            historical_block_names: "[]".into(),
            first_seen_sha: "s1".into(),
            last_modified_commit: None,
            deleted: false,
            original_author: Some("a@x.com".into()),
            last_modifier: None,
            staleness_days: None,
            familiarity_map: "[]".into(),
            incident_count: 0,
            last_incident_date: None,
            temporal_summary: None,
            co_change_count: 0,
            avg_coupling_rate: 0.0,
            risk_score: None,
            ownership_indexed_at: None,
            coupling_indexed_at: None,
        };
        let changes = vec![
            change("b1", "a@x.com", "s1", "2026-01-01T00:00:00+00:00"),
            change("b1", "b@x.com", "s2", "2026-01-05T00:00:00+00:00"),
        ];
        let refs: Vec<&ChangeRow> = changes.iter().collect();
        let (modifier, staleness) = last_modifier_and_staleness(&block, &refs, Utc::now());
        assert_eq!(modifier.as_deref(), Some("b@x.com"));
        assert!(staleness.is_some());
    }

    #[test]
    fn test_no_changes_copies_from_creation() {
        let block = CodeBlock {
            id: "b1".into(),
            repo_id: "r1".into(),
            file_path: "a.rs".into(),
            canonical_file_path: "a.rs".into(),
            path_at_creation: "a.rs".into(),
            name: "foo".into(),
            block_type: "function".into(),
            language: None,
            start_line: 1,
            end_line: 2,
            signature: "fn foo()".into(),
            historical_block_names: "[]".into(),
            first_seen_sha: "s1".into(),
            last_modified_commit: None,
            deleted: false,
            original_author: Some("a@x.com".into()),
            last_modifier: None,
            staleness_days: None,
            familiarity_map: "[]".into(),
            incident_count: 0,
            last_incident_date: None,
            temporal_summary: None,
            co_change_count: 0,
            avg_coupling_rate: 0.0,
            risk_score: None,
            ownership_indexed_at: None,
            coupling_indexed_at: None,
        };
        let (modifier, staleness) = last_modifier_and_staleness(&block, &[], Utc::now());
        assert_eq!(modifier.as_deref(), Some("a@x.com"));
        assert_eq!(staleness, None);
    }
}
