// crates/risk-engine/src/atomizer/processor.rs
// Event Processor (§4.6, L8): the chronological orchestrator. Commits are
// replayed in ascending `committed_at` order (ties broken by sha, §5);
// each commit is extracted, merged, and dispatched to event handlers that
// write through the relational store and then the graph mirror.

use std::collections::HashMap;
use std::sync::Arc;

use risk_types::CommitData;

use super::chunker::chunk_file;
use super::diff::{is_code_file, parse_diff};
use super::extractor::{extract_chunk, empty_event_log, ChangeEvent};
use super::merger::merge_events;
use super::state_tracker::StateTracker;
use crate::db::models::{ChangeBehavior, CodeBlock, CodeBlockChange};
use crate::db::writer;
use crate::db::DatabasePool;
use crate::error::Result;
use crate::graph::{EdgeKind, GraphStore, NodeLabel};
use crate::llm::LlmClient;

#[derive(Debug, Clone, Default)]
pub struct ProcessSummary {
    pub commits_processed: usize,
    pub commits_skipped_already_atomized: usize,
    pub events_applied: usize,
    pub events_failed: usize,
    pub imports_logged: usize,
    pub commits_skipped_extraction_failed: usize,
}

/// Replay a batch of commits for one repository (§4.6). Commits already
/// marked atomized are skipped entirely (P4: re-running is a no-op on
/// CodeBlock state).
pub async fn process_commits(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    llm: Arc<dyn LlmClient>,
    repo_id: &str,
    mut commits: Vec<CommitData>,
) -> Result<ProcessSummary> {
    commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));

    let existing_blocks = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_existing_blocks(conn, &repo_id)
        })
        .await?;
    let tracker = StateTracker::seed(&existing_blocks);

    let mut summary = ProcessSummary::default();

    for commit in &commits {
        let already_atomized = pool
            .run({
                let repo_id = repo_id.to_string();
                let sha = commit.sha.clone();
                move |conn| writer::is_commit_atomized(conn, &repo_id, &sha)
            })
            .await?;
        if already_atomized {
            summary.commits_skipped_already_atomized += 1;
            continue;
        }

        process_one_commit(pool, graph, llm.as_ref(), &tracker, repo_id, commit, &mut summary).await?;
        summary.commits_processed += 1;
    }

    Ok(summary)
}

async fn process_one_commit(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    llm: &dyn LlmClient,
    tracker: &StateTracker,
    repo_id: &str,
    commit: &CommitData,
    summary: &mut ProcessSummary,
) -> Result<()> {
    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let commit = commit.clone();
        move |conn| {
            writer::upsert_developer(conn, &commit.author_email, None)?;
            writer::upsert_commit(
                conn,
                &repo_id,
                &commit.sha,
                &commit.message,
                &commit.author_email,
                &commit.timestamp.to_rfc3339(),
                commit.additions,
                commit.deletions,
            )
        }
    })
    .await?;

    graph.upsert_node(NodeLabel::Developer, &commit.author_email, HashMap::new());
    graph.upsert_node(NodeLabel::Commit, &commit.sha, HashMap::new());
    graph.upsert_edge(
        NodeLabel::Developer,
        &commit.author_email,
        NodeLabel::Commit,
        &commit.sha,
        EdgeKind::Authored,
        HashMap::new(),
    );

    let event_log = if commit.diff_content.trim().is_empty() {
        empty_event_log()
    } else {
        match extract_commit_events(llm, commit).await {
            Ok(log) => log,
            Err(e) => {
                // §4.6: an LLM extraction failure skips this commit, not the batch.
                // Left unatomized so a later run retries it.
                tracing::warn!(commit = %commit.sha, error = %e, "extraction failed, skipping commit");
                summary.commits_skipped_extraction_failed += 1;
                return Ok(());
            }
        }
    };

    if event_log.change_events.is_empty() {
        // Nothing to apply — the commit is still considered processed (§8
        // boundary behaviors: empty diff -> empty event log, still atomized).
        mark_atomized(pool, repo_id, &commit.sha).await?;
        return Ok(());
    }

    let merged = merge_events(event_log.change_events);
    let changed_at = commit.timestamp.to_rfc3339();

    let mut all_succeeded = true;
    for event in &merged {
        match apply_event(pool, graph, tracker, repo_id, &commit.sha, &changed_at, event).await {
            Ok(applied) => {
                if applied {
                    summary.events_applied += 1;
                } else {
                    summary.imports_logged += 1;
                }
            }
            Err(e) => {
                tracing::warn!(commit = %commit.sha, error = %e, "event handler failed, continuing commit");
                summary.events_failed += 1;
                all_succeeded = false;
            }
        }
    }

    if all_succeeded {
        mark_atomized(pool, repo_id, &commit.sha).await?;
    }

    Ok(())
}

async fn mark_atomized(pool: &DatabasePool, repo_id: &str, sha: &str) -> Result<()> {
    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let sha = sha.to_string();
        move |conn| writer::mark_commit_atomized(conn, &repo_id, &sha)
    })
    .await
}

async fn extract_commit_events(
    llm: &dyn LlmClient,
    commit: &CommitData,
) -> Result<super::extractor::EventLog> {
    let files = parse_diff(&commit.diff_content);
    let code_files: Vec<(&String, &super::diff::FileChange)> = files
        .iter()
        .filter(|(path, _)| is_code_file(path))
        .collect();

    if code_files.is_empty() {
        return Ok(empty_event_log());
    }

    let mut all_events = Vec::new();
    let mut summary = String::new();
    let mut mentioned_issues = Vec::new();

    for (file_path, change) in &code_files {
        let chunk_result = chunk_file(file_path, change);
        for chunk in &chunk_result.chunks {
            let log = extract_chunk(llm, &commit.message, chunk, std::slice::from_ref(*file_path)).await?;
            if summary.is_empty() {
                summary = log.llm_intent_summary;
            }
            mentioned_issues.extend(log.mentioned_issues_in_msg);
            all_events.extend(log.change_events);
        }
    }

    Ok(super::extractor::EventLog {
        llm_intent_summary: summary,
        mentioned_issues_in_msg: mentioned_issues,
        change_events: all_events,
    })
}

/// Dispatch one merged event to its handler (§4.6). Returns `Ok(true)` if a
/// CodeBlockChange row was written, `Ok(false)` for accepted-but-unresolved
/// import events (still counted, never FK'd to a block per I1).
async fn apply_event(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    event: &ChangeEvent,
) -> Result<bool> {
    match event.behavior {
        ChangeBehavior::Create => {
            apply_create(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await?;
            Ok(true)
        }
        ChangeBehavior::Modify => {
            apply_modify(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await?;
            Ok(true)
        }
        ChangeBehavior::Rename => {
            apply_rename(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await?;
            Ok(true)
        }
        ChangeBehavior::Delete => {
            apply_delete(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await
        }
        ChangeBehavior::AddImport | ChangeBehavior::RemoveImport => {
            let repo_id = repo_id.to_string();
            let file_path = event.file_path.clone();
            let commit_sha = commit_sha.to_string();
            let behavior = event.behavior.as_str().to_string();
            let dependency_path = event.dependency_path.clone();
            let changed_at = changed_at.to_string();
            pool.run(move |conn| {
                writer::record_import_event(conn, &repo_id, &file_path, &commit_sha, &behavior, dependency_path.as_deref(), &changed_at)
            })
            .await?;
            tracing::debug!(
                behavior = event.behavior.as_str(),
                path = %event.dependency_path.clone().unwrap_or_default(),
                "import event persisted, not resolved to a block-level edge"
            );
            Ok(false)
        }
    }
}

fn block_signature(event: &ChangeEvent) -> String {
    event
        .new_version
        .clone()
        .unwrap_or_else(|| format!("{}()", event.target_block_name.clone().unwrap_or_default()))
}

async fn apply_create(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    event: &ChangeEvent,
) -> Result<()> {
    let name = event.target_block_name.clone().unwrap_or_default();
    let file_path = event.file_path.clone();

    if let Some(existing_id) = resolve_block_id(pool, tracker, repo_id, &file_path, &name).await? {
        // Already known — §4.6: downgrade CREATE to MODIFY.
        tracing::warn!(file = %file_path, name = %name, "CREATE_BLOCK on known block, downgrading to MODIFY");
        return touch_and_record(
            pool, graph, tracker, repo_id, commit_sha, changed_at, &existing_id, &file_path, &name, event,
            ChangeBehavior::Modify,
        )
        .await;
    }

    let block_type = event.block_type.clone().unwrap_or_else(|| "function".to_string());
    let signature = block_signature(event);
    let block_id = CodeBlock::make_id(repo_id, &file_path, &name);

    let block = CodeBlock {
        id: block_id.clone(),
        repo_id: repo_id.to_string(),
        file_path: file_path.clone(),
        canonical_file_path: file_path.clone(),
        path_at_creation: file_path.clone(),
        name: name.clone(),
        block_type,
        language: None,
        start_line: event.start_line,
        end_line: event.end_line,
        signature,
        historical_block_names: "[]".to_string(),
        first_seen_sha: commit_sha.to_string(),
        last_modified_commit: Some(commit_sha.to_string()),
        deleted: false,
        original_author: None,
        last_modifier: None,
        staleness_days: None,
        familiarity_map: "[]".to_string(),
        incident_count: 0,
        last_incident_date: None,
        temporal_summary: None,
        co_change_count: 0,
        avg_coupling_rate: 0.0,
        risk_score: None,
        ownership_indexed_at: None,
        coupling_indexed_at: None,
    };

    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let block = block.clone();
        let commit_sha = commit_sha.to_string();
        let changed_at = changed_at.to_string();
        move |conn| {
            writer::upsert_file(conn, &repo_id, &block.file_path)?;
            writer::upsert_code_block(conn, &block)?;
            writer::insert_code_block_change(
                conn,
                &CodeBlockChange {
                    repo_id: repo_id.clone(),
                    code_block_id: block.id.clone(),
                    commit_sha: commit_sha.clone(),
                    behavior: ChangeBehavior::Create,
                    old_signature: None,
                    new_signature: Some(block.signature.clone()),
                    lines_added: 0,
                    lines_removed: 0,
                    changed_at: changed_at.clone(),
                },
            )
        }
    })
    .await?;

    tracker.set(&file_path, &name, &block_id);

    graph.upsert_node(NodeLabel::File, &file_path, HashMap::new());
    graph.upsert_node(NodeLabel::CodeBlock, &block_id, HashMap::new());
    graph.upsert_edge(
        NodeLabel::Commit,
        commit_sha,
        NodeLabel::CodeBlock,
        &block_id,
        EdgeKind::CreatedBlock,
        HashMap::new(),
    );
    graph.upsert_edge(
        NodeLabel::File,
        &file_path,
        NodeLabel::CodeBlock,
        &block_id,
        EdgeKind::Contains,
        HashMap::new(),
    );

    Ok(())
}

async fn apply_modify(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    event: &ChangeEvent,
) -> Result<()> {
    let name = event.target_block_name.clone().unwrap_or_default();
    let file_path = event.file_path.clone();

    let Some(block_id) = resolve_block_id(pool, tracker, repo_id, &file_path, &name).await? else {
        tracing::warn!(file = %file_path, name = %name, "MODIFY_BLOCK on unknown block, upgrading to CREATE");
        return apply_create(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await;
    };

    touch_and_record(
        pool, graph, tracker, repo_id, commit_sha, changed_at, &block_id, &file_path, &name, event,
        ChangeBehavior::Modify,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn touch_and_record(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    _tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    block_id: &str,
    _file_path: &str,
    _name: &str,
    event: &ChangeEvent,
    behavior: ChangeBehavior,
) -> Result<()> {
    let signature = block_signature(event);

    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let block_id = block_id.to_string();
        let commit_sha = commit_sha.to_string();
        let changed_at = changed_at.to_string();
        let signature = signature.clone();
        move |conn| {
            writer::touch_code_block(conn, &block_id, &signature, &commit_sha)?;
            writer::insert_code_block_change(
                conn,
                &CodeBlockChange {
                    repo_id,
                    code_block_id: block_id,
                    commit_sha,
                    behavior,
                    old_signature: None,
                    new_signature: Some(signature),
                    lines_added: 0,
                    lines_removed: 0,
                    changed_at,
                },
            )
        }
    })
    .await?;

    graph.upsert_edge(
        NodeLabel::Commit,
        commit_sha,
        NodeLabel::CodeBlock,
        block_id,
        EdgeKind::ModifiedBlock,
        HashMap::new(),
    );

    Ok(())
}

async fn apply_rename(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    event: &ChangeEvent,
) -> Result<()> {
    let new_name = event.target_block_name.clone().unwrap_or_default();
    let file_path = event.file_path.clone();
    let Some(old_name) = event.old_block_name.clone() else {
        tracing::warn!(file = %file_path, "RENAME_BLOCK missing old_block_name, treating as CREATE");
        return apply_create(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await;
    };

    let Some(old_id) = resolve_block_id(pool, tracker, repo_id, &file_path, &old_name).await? else {
        // §4.6 + S3: decompose into DELETE(old)+CREATE(new). The old block
        // never existed so the DELETE half is a no-op (I1 forbids a change
        // row without a matching block) — only the CREATE half is recorded.
        tracing::warn!(file = %file_path, old_name = %old_name, "RENAME_BLOCK source missing, decomposing to CREATE only");
        return apply_create(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await;
    };

    let old_block = pool
        .run({
            let old_id = old_id.clone();
            move |conn| writer::load_code_block(conn, &old_id)
        })
        .await?;
    let Some(old_block) = old_block else {
        return apply_create(pool, graph, tracker, repo_id, commit_sha, changed_at, event).await;
    };

    let new_id = CodeBlock::make_id(repo_id, &file_path, &new_name);
    let signature = block_signature(event);

    let mut historical: Vec<String> = old_block.historical_names();
    historical.push(old_block.name.clone());
    let historical_json = serde_json::to_string(&historical).unwrap_or_else(|_| "[]".to_string());

    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let old_id = old_id.clone();
        let new_id = new_id.clone();
        let file_path = file_path.clone();
        let new_name = new_name.clone();
        let old_name = old_name.clone();
        let signature = signature.clone();
        let historical_json = historical_json.clone();
        let commit_sha = commit_sha.to_string();
        let changed_at = changed_at.to_string();
        move |conn| {
            writer::rename_code_block(
                conn, &old_id, &new_id, &file_path, &new_name, &signature, &historical_json, &commit_sha,
            )?;
            writer::delete_identity(conn, &repo_id, &file_path, &old_name)?;
            writer::upsert_identity(
                conn, &repo_id, &file_path, &new_name, &new_id, &signature, &commit_sha, &changed_at,
            )?;
            writer::insert_code_block_change(
                conn,
                &CodeBlockChange {
                    repo_id,
                    code_block_id: new_id.clone(),
                    commit_sha,
                    behavior: ChangeBehavior::Rename,
                    old_signature: Some(old_block.signature.clone()),
                    new_signature: Some(signature.clone()),
                    lines_added: 0,
                    lines_removed: 0,
                    changed_at,
                },
            )
        }
    })
    .await?;

    tracker.delete(&file_path, &old_name);
    tracker.set(&file_path, &new_name, &new_id);

    graph.upsert_node(NodeLabel::CodeBlock, &new_id, HashMap::new());
    graph.upsert_edge(
        NodeLabel::Commit,
        commit_sha,
        NodeLabel::CodeBlock,
        &new_id,
        EdgeKind::RenamedBlock,
        HashMap::new(),
    );
    graph.upsert_edge(
        NodeLabel::File,
        &file_path,
        NodeLabel::CodeBlock,
        &new_id,
        EdgeKind::Contains,
        HashMap::new(),
    );

    Ok(())
}

async fn apply_delete(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    tracker: &StateTracker,
    repo_id: &str,
    commit_sha: &str,
    changed_at: &str,
    event: &ChangeEvent,
) -> Result<bool> {
    let name = event.target_block_name.clone().unwrap_or_default();
    let file_path = event.file_path.clone();

    let Some(block_id) = resolve_block_id(pool, tracker, repo_id, &file_path, &name).await? else {
        tracing::warn!(file = %file_path, name = %name, "DELETE_BLOCK on unknown block, ignoring");
        return Ok(false);
    };

    pool.run_with_retry({
        let repo_id = repo_id.to_string();
        let block_id = block_id.clone();
        let commit_sha = commit_sha.to_string();
        let changed_at = changed_at.to_string();
        move |conn| {
            writer::mark_code_block_deleted(conn, &block_id, &commit_sha)?;
            writer::insert_code_block_change(
                conn,
                &CodeBlockChange {
                    repo_id,
                    code_block_id: block_id,
                    commit_sha,
                    behavior: ChangeBehavior::Delete,
                    old_signature: None,
                    new_signature: None,
                    lines_added: 0,
                    lines_removed: 0,
                    changed_at,
                },
            )
        }
    })
    .await?;

    tracker.delete(&file_path, &name);

    graph.upsert_edge(
        NodeLabel::Commit,
        commit_sha,
        NodeLabel::CodeBlock,
        &block_id,
        EdgeKind::DeletedBlock,
        HashMap::new(),
    );

    Ok(true)
}

async fn resolve_block_id(
    pool: &DatabasePool,
    tracker: &StateTracker,
    repo_id: &str,
    file_path: &str,
    name: &str,
) -> Result<Option<String>> {
    if let Some(id) = tracker.get(file_path, name) {
        return Ok(Some(id));
    }
    let found = pool
        .run({
            let repo_id = repo_id.to_string();
            let file_path = file_path.to_string();
            let name = name.to_string();
            move |conn| writer::find_code_block_by_name(conn, &repo_id, &file_path, &name)
        })
        .await?;
    if let Some(block) = &found {
        tracker.set(file_path, name, &block.id);
    }
    Ok(found.map(|b| b.id))
}
