// crates/risk-engine/src/calculators/temporal.rs
// Temporal Calculator (§4.10, L11): links issues to the blocks changed by
// the commits that closed or referenced them, then rolls incident counts
// and an optional LLM pattern summary back onto the block.

use std::collections::HashMap;

use crate::db::models::CodeBlock;
use crate::db::writer;
use crate::db::DatabasePool;
use crate::error::Result;
use crate::graph::{EdgeKind, GraphStore, NodeLabel};
use crate::llm::LlmClient;

const TOP_SUMMARY_BLOCKS: i64 = 50;

#[derive(Debug, Clone, Default)]
pub struct TemporalSummary {
    pub incidents_linked: usize,
    pub blocks_summarized: usize,
}

/// Confidence and evidence source pinned by timeline event kind (§4.10, I5).
fn evidence_for(event_type: &str) -> Option<(f64, &'static str)> {
    match event_type {
        "closed" => Some((0.85, "commit_close")),
        "referenced" => Some((0.75, "commit_reference")),
        _ => None,
    }
}

/// First label matching {bug, security, critical} case-insensitively, else
/// the first label, else "unknown" (§4.10).
fn incident_type_from_labels(labels_json: &str) -> String {
    let labels: Vec<String> = serde_json::from_str(labels_json).unwrap_or_default();
    let priority = ["bug", "security", "critical"];
    for wanted in priority {
        if let Some(label) = labels.iter().find(|l| l.eq_ignore_ascii_case(wanted)) {
            return label.clone();
        }
    }
    labels.into_iter().next().unwrap_or_else(|| "unknown".to_string())
}

/// Run the linking pass and the pattern-summary pass for a repository.
pub async fn run_temporal_calculator(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    llm: &dyn LlmClient,
    repo_id: &str,
) -> Result<TemporalSummary> {
    let mut summary = TemporalSummary::default();

    let events = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_linkable_timeline_events(conn, &repo_id)
        })
        .await?;

    for event in &events {
        let Some((confidence, evidence_source)) = evidence_for(&event.event_type) else {
            continue;
        };
        let Some(commit_sha) = &event.source_sha else {
            continue;
        };

        let issue = pool
            .run({
                let repo_id = repo_id.to_string();
                let number = event.issue_number;
                move |conn| writer::load_issue(conn, &repo_id, number)
            })
            .await?;
        // Schema violation: a timeline event referencing an issue we never
        // ingested. Filtered silently per §7.
        let Some(issue) = issue else {
            continue;
        };

        let incident_type = incident_type_from_labels(&issue.labels);
        let incident_date = issue.created_at.clone();
        let resolution_date = issue.closed_at.clone().or_else(|| Some(incident_date.clone()));

        let blocks = pool
            .run({
                let repo_id = repo_id.to_string();
                let commit_sha = commit_sha.clone();
                move |conn| writer::blocks_changed_by_commit(conn, &repo_id, &commit_sha)
            })
            .await?;

        for block_id in blocks {
            let linked = pool
                .run_with_retry({
                    let repo_id = repo_id.to_string();
                    let block_id = block_id.clone();
                    let commit_sha = commit_sha.clone();
                    let incident_date = incident_date.clone();
                    let resolution_date = resolution_date.clone();
                    let incident_type = incident_type.clone();
                    let issue_title = issue.title.clone();
                    let issue_number = issue.number;
                    move |conn| {
                        writer::link_incident(
                            conn,
                            &repo_id,
                            &block_id,
                            issue_number,
                            confidence,
                            evidence_source,
                            &commit_sha,
                            &incident_date,
                            resolution_date.as_deref(),
                            &incident_type,
                            &issue_title,
                        )
                    }
                })
                .await?;

            if !linked {
                continue;
            }
            summary.incidents_linked += 1;

            let block = pool
                .run({
                    let block_id = block_id.clone();
                    move |conn| writer::load_code_block(conn, &block_id)
                })
                .await?;
            if let Some(block) = block {
                sync_block_incident_props(graph, &block);
            }

            let mut edge_props: HashMap<String, serde_json::Value> = HashMap::new();
            edge_props.insert("incident_type".to_string(), serde_json::json!(incident_type));
            edge_props.insert("confidence".to_string(), serde_json::json!(confidence));
            graph.upsert_node(NodeLabel::Issue, &issue.number.to_string(), HashMap::new());
            graph.upsert_edge(
                NodeLabel::Issue,
                &issue.number.to_string(),
                NodeLabel::CodeBlock,
                &block_id,
                EdgeKind::FixedByBlock,
                edge_props,
            );
        }
    }

    let top_blocks = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::top_blocks_by_incident_count(conn, &repo_id, TOP_SUMMARY_BLOCKS)
        })
        .await?;

    if llm.is_enabled() {
        for block in &top_blocks {
            let titles = pool
                .run({
                    let repo_id = repo_id.to_string();
                    let block_id = block.id.clone();
                    move |conn| writer::issue_titles_for_block(conn, &repo_id, &block_id)
                })
                .await?;
            if titles.is_empty() {
                continue;
            }

            let system = "Summarize the recurring failure pattern behind these incidents in one or two sentences.";
            let user = format!("block: {}\nincidents:\n- {}", block.name, titles.join("\n- "));
            let Ok(text) = llm.complete(system, &user).await else {
                continue;
            };

            pool.run_with_retry({
                let block_id = block.id.clone();
                let text = text.clone();
                move |conn| writer::update_temporal_summary(conn, &block_id, Some(&text))
            })
            .await?;

            graph.upsert_node(
                NodeLabel::CodeBlock,
                &block.id,
                HashMap::from([("temporal_summary".to_string(), serde_json::json!(text))]),
            );
            summary.blocks_summarized += 1;
        }
    }

    Ok(summary)
}

fn sync_block_incident_props(graph: &mut GraphStore, block: &CodeBlock) {
    let mut props: HashMap<String, serde_json::Value> = HashMap::new();
    props.insert("incident_count".to_string(), serde_json::json!(block.incident_count));
    if let Some(date) = &block.last_incident_date {
        props.insert("last_incident_date".to_string(), serde_json::json!(date));
    }
    graph.upsert_node(NodeLabel::CodeBlock, &block.id, props);
}
