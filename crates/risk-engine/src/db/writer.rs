// crates/risk-engine/src/db/writer.rs
// Relational Writer (§4.7 L6): per-event CRUD against the entities in §3,
// idempotent under replay per invariants I1-I6. All functions here are
// synchronous and meant to be run inside a `DatabasePool::run`/`run_with_retry`
// closure — they never touch the async runtime themselves.

use super::models::{ChangeBehavior, CodeBlock, CodeBlockChange, CodeBlockCoupling};
use rusqlite::{Connection, OptionalExtension, Result, params};

/// Ensure a Repository row exists (I1: unique by owner/name).
pub fn upsert_repository(conn: &Connection, id: &str, owner: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO repositories (id, owner, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO NOTHING",
        params![id, owner, name],
    )?;
    Ok(())
}

/// Ensure a Developer row exists, keyed by email (I1).
pub fn upsert_developer(conn: &Connection, email: &str, name: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO developers (email, name) VALUES (?1, ?2)
         ON CONFLICT(email) DO UPDATE SET name = COALESCE(excluded.name, developers.name)",
        params![email, name],
    )?;
    Ok(())
}

/// Ensure a File row exists for (repo_id, path).
pub fn upsert_file(conn: &Connection, repo_id: &str, path: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO files (repo_id, path) VALUES (?1, ?2)
         ON CONFLICT(repo_id, path) DO NOTHING",
        params![repo_id, path],
    )?;
    Ok(())
}

/// Insert or update a Commit row. `atomized` starts false and is flipped by
/// [`mark_commit_atomized`] only after every event of its diff has been
/// processed without error (§4.6 / §5 failure policy).
pub fn upsert_commit(
    conn: &Connection,
    repo_id: &str,
    sha: &str,
    message: &str,
    author_email: &str,
    authored_at: &str,
    additions: i64,
    deletions: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO commits (repo_id, sha, message, author_email, authored_at, additions, deletions, atomized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(repo_id, sha) DO UPDATE SET
            message = excluded.message,
            additions = excluded.additions,
            deletions = excluded.deletions",
        params![repo_id, sha, message, author_email, authored_at, additions, deletions],
    )?;
    Ok(())
}

pub fn mark_commit_atomized(conn: &Connection, repo_id: &str, sha: &str) -> Result<()> {
    conn.execute(
        "UPDATE commits SET atomized = 1 WHERE repo_id = ?1 AND sha = ?2",
        params![repo_id, sha],
    )?;
    Ok(())
}

pub fn is_commit_atomized(conn: &Connection, repo_id: &str, sha: &str) -> Result<bool> {
    conn.query_row(
        "SELECT atomized FROM commits WHERE repo_id = ?1 AND sha = ?2",
        params![repo_id, sha],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.unwrap_or(0) != 0)
}

const CODE_BLOCK_COLUMNS: &str = "id, repo_id, file_path, canonical_file_path, path_at_creation, name,
    block_type, language, start_line, end_line, signature, historical_block_names,
    first_seen_sha, last_modified_commit, deleted, original_author, last_modifier,
    staleness_days, familiarity_map, incident_count, last_incident_date, temporal_summary,
    co_change_count, avg_coupling_rate, risk_score, ownership_indexed_at, coupling_indexed_at";

/// Create or update a CodeBlock, keyed by its natural id (I1). Used for
/// CREATE/MODIFY/RENAME behaviors (§4.6) — callers resolve the target id
/// via the state tracker before calling this.
pub fn upsert_code_block(conn: &Connection, block: &CodeBlock) -> Result<()> {
    conn.execute(
        "INSERT INTO code_blocks
            (id, repo_id, file_path, canonical_file_path, path_at_creation, name,
             block_type, language, start_line, end_line, signature, historical_block_names,
             first_seen_sha, last_modified_commit, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
            file_path = excluded.file_path,
            name = excluded.name,
            block_type = excluded.block_type,
            language = excluded.language,
            start_line = excluded.start_line,
            end_line = excluded.end_line,
            signature = excluded.signature,
            historical_block_names = excluded.historical_block_names,
            last_modified_commit = excluded.last_modified_commit,
            deleted = excluded.deleted",
        params![
            block.id,
            block.repo_id,
            block.file_path,
            block.canonical_file_path,
            block.path_at_creation,
            block.name,
            block.block_type,
            block.language,
            block.start_line,
            block.end_line,
            block.signature,
            block.historical_block_names,
            block.first_seen_sha,
            block.last_modified_commit,
            block.deleted as i64,
        ],
    )?;
    Ok(())
}

/// Mark a CodeBlock as deleted without removing its row — history (changes,
/// couplings, incidents) must survive a DELETE event (§4.6).
pub fn mark_code_block_deleted(
    conn: &Connection,
    code_block_id: &str,
    last_modified_commit: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET deleted = 1, last_modified_commit = ?2 WHERE id = ?1",
        params![code_block_id, last_modified_commit],
    )?;
    Ok(())
}

/// Touch a CodeBlock's mutable fields on a MODIFY event: signature and
/// last-modified pointer advance, history is untouched.
pub fn touch_code_block(
    conn: &Connection,
    code_block_id: &str,
    new_signature: &str,
    last_modified_commit: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET signature = ?2, last_modified_commit = ?3 WHERE id = ?1",
        params![code_block_id, new_signature, last_modified_commit],
    )?;
    Ok(())
}

/// Re-key a CodeBlock's id/file_path/name for a RENAME event, appending the
/// old name to `historical_block_names` and updating the signature. The
/// identity map row is updated by the caller separately (§4.6).
pub fn rename_code_block(
    conn: &Connection,
    old_id: &str,
    new_id: &str,
    new_file_path: &str,
    new_name: &str,
    new_signature: &str,
    historical_names_json: &str,
    last_modified_commit: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET
            id = ?1, file_path = ?2, name = ?3, signature = ?4,
            historical_block_names = ?5, last_modified_commit = ?6
         WHERE id = ?7",
        params![
            new_id,
            new_file_path,
            new_name,
            new_signature,
            historical_names_json,
            last_modified_commit,
            old_id
        ],
    )?;
    Ok(())
}

pub fn load_code_block(conn: &Connection, id: &str) -> Result<Option<CodeBlock>> {
    conn.query_row(
        &format!("SELECT {CODE_BLOCK_COLUMNS} FROM code_blocks WHERE id = ?1"),
        params![id],
        row_to_code_block,
    )
    .optional()
}

pub fn find_code_block_by_name(
    conn: &Connection,
    repo_id: &str,
    canonical_file_path: &str,
    name: &str,
) -> Result<Option<CodeBlock>> {
    conn.query_row(
        &format!(
            "SELECT {CODE_BLOCK_COLUMNS} FROM code_blocks
             WHERE repo_id = ?1 AND canonical_file_path = ?2 AND name = ?3"
        ),
        params![repo_id, canonical_file_path, name],
        row_to_code_block,
    )
    .optional()
}

/// Load every non-deleted CodeBlock for a repository — used to seed the
/// state tracker (§4.5) on startup.
pub fn load_existing_blocks(conn: &Connection, repo_id: &str) -> Result<Vec<CodeBlock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_BLOCK_COLUMNS} FROM code_blocks WHERE repo_id = ?1 AND deleted = 0"
    ))?;
    let rows = stmt
        .query_map(params![repo_id], row_to_code_block)?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn load_all_blocks(conn: &Connection, repo_id: &str) -> Result<Vec<CodeBlock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_BLOCK_COLUMNS} FROM code_blocks WHERE repo_id = ?1"
    ))?;
    let rows = stmt
        .query_map(params![repo_id], row_to_code_block)?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_code_block(row: &rusqlite::Row<'_>) -> Result<CodeBlock> {
    Ok(CodeBlock {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        file_path: row.get(2)?,
        canonical_file_path: row.get(3)?,
        path_at_creation: row.get(4)?,
        name: row.get(5)?,
        block_type: row.get(6)?,
        language: row.get(7)?,
        start_line: row.get(8)?,
        end_line: row.get(9)?,
        signature: row.get(10)?,
        historical_block_names: row.get(11)?,
        first_seen_sha: row.get(12)?,
        last_modified_commit: row.get(13)?,
        deleted: row.get::<_, i64>(14)? != 0,
        original_author: row.get(15)?,
        last_modifier: row.get(16)?,
        staleness_days: row.get(17)?,
        familiarity_map: row.get(18)?,
        incident_count: row.get(19)?,
        last_incident_date: row.get(20)?,
        temporal_summary: row.get(21)?,
        co_change_count: row.get(22)?,
        avg_coupling_rate: row.get(23)?,
        risk_score: row.get(24)?,
        ownership_indexed_at: row.get(25)?,
        coupling_indexed_at: row.get(26)?,
    })
}

/// Record a CodeBlockChange. Idempotent per I2: a replay of the same
/// (code_block_id, commit_sha) pair is a no-op.
pub fn insert_code_block_change(conn: &Connection, change: &CodeBlockChange) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO code_block_changes
            (repo_id, code_block_id, commit_sha, behavior, old_signature, new_signature,
             lines_added, lines_removed, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(repo_id, code_block_id, commit_sha) DO NOTHING",
        params![
            change.repo_id,
            change.code_block_id,
            change.commit_sha,
            change.behavior.as_str(),
            change.old_signature,
            change.new_signature,
            change.lines_added,
            change.lines_removed,
            change.changed_at,
        ],
    )?;
    Ok(affected > 0)
}

pub fn count_changes_for_block(conn: &Connection, code_block_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM code_block_changes WHERE code_block_id = ?1",
        params![code_block_id],
        |row| row.get(0),
    )
}

/// Persists an ADD_IMPORT/REMOVE_IMPORT event to the change log (§9). These
/// events never resolve to a block, so they live in their own table rather
/// than `code_block_changes`, whose `code_block_id` is NOT NULL.
pub fn record_import_event(
    conn: &Connection,
    repo_id: &str,
    file_path: &str,
    commit_sha: &str,
    behavior: &str,
    dependency_path: Option<&str>,
    changed_at: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO import_events
            (repo_id, file_path, commit_sha, behavior, dependency_path, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(repo_id, file_path, commit_sha, behavior, dependency_path) DO NOTHING",
        params![repo_id, file_path, commit_sha, behavior, dependency_path, changed_at],
    )?;
    Ok(affected > 0)
}

pub struct ChangeRow {
    pub code_block_id: String,
    pub commit_sha: String,
    pub developer_email: String,
    pub changed_at: String,
}

/// All changes for a repository, used by the Coupling and Ownership
/// calculators (§4.8, §4.9) to aggregate per-block and per-commit history
/// without N+1 queries.
pub fn load_all_changes(conn: &Connection, repo_id: &str) -> Result<Vec<ChangeRow>> {
    let mut stmt = conn.prepare(
        "SELECT cbc.code_block_id, cbc.commit_sha, c.author_email, cbc.changed_at
         FROM code_block_changes cbc
         JOIN commits c ON c.repo_id = cbc.repo_id AND c.sha = cbc.commit_sha
         WHERE cbc.repo_id = ?1
         ORDER BY cbc.changed_at ASC",
    )?;
    let rows = stmt
        .query_map(params![repo_id], |row| {
            Ok(ChangeRow {
                code_block_id: row.get(0)?,
                commit_sha: row.get(1)?,
                developer_email: row.get(2)?,
                changed_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Persist a coupling edge. Rows below the configured co-change-rate
/// threshold are never written (I3) — callers filter before calling this.
pub fn upsert_coupling(conn: &Connection, coupling: &CodeBlockCoupling) -> Result<()> {
    let (a, b) = CodeBlockCoupling::canonical_pair(&coupling.block_a_id, &coupling.block_b_id);
    conn.execute(
        "INSERT INTO code_block_coupling
            (repo_id, block_a_id, block_b_id, co_change_count, co_change_rate, rationale, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(repo_id, block_a_id, block_b_id) DO UPDATE SET
            co_change_count = excluded.co_change_count,
            co_change_rate = excluded.co_change_rate,
            rationale = COALESCE(excluded.rationale, code_block_coupling.rationale),
            updated_at = excluded.updated_at",
        params![
            coupling.repo_id,
            a,
            b,
            coupling.co_change_count,
            coupling.co_change_rate,
            coupling.rationale,
            coupling.updated_at,
        ],
    )?;
    Ok(())
}

/// Remove a coupling edge once its co-change rate drops below the
/// threshold (I3 is a floor, not a one-way ratchet).
pub fn delete_coupling_below_threshold(
    conn: &Connection,
    repo_id: &str,
    block_a_id: &str,
    block_b_id: &str,
) -> Result<()> {
    let (a, b) = CodeBlockCoupling::canonical_pair(block_a_id, block_b_id);
    conn.execute(
        "DELETE FROM code_block_coupling WHERE repo_id = ?1 AND block_a_id = ?2 AND block_b_id = ?3",
        params![repo_id, a, b],
    )?;
    Ok(())
}

pub fn load_couplings(conn: &Connection, repo_id: &str) -> Result<Vec<CodeBlockCoupling>> {
    let mut stmt = conn.prepare(
        "SELECT repo_id, block_a_id, block_b_id, co_change_count, co_change_rate, rationale, updated_at
         FROM code_block_coupling WHERE repo_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![repo_id], |row| {
            Ok(CodeBlockCoupling {
                repo_id: row.get(0)?,
                block_a_id: row.get(1)?,
                block_b_id: row.get(2)?,
                co_change_count: row.get(3)?,
                co_change_rate: row.get(4)?,
                rationale: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn couplings_for_block(
    conn: &Connection,
    repo_id: &str,
    code_block_id: &str,
) -> Result<Vec<CodeBlockCoupling>> {
    let mut stmt = conn.prepare(
        "SELECT repo_id, block_a_id, block_b_id, co_change_count, co_change_rate, rationale, updated_at
         FROM code_block_coupling
         WHERE repo_id = ?1 AND (block_a_id = ?2 OR block_b_id = ?2)",
    )?;
    let rows = stmt
        .query_map(params![repo_id, code_block_id], |row| {
            Ok(CodeBlockCoupling {
                repo_id: row.get(0)?,
                block_a_id: row.get(1)?,
                block_b_id: row.get(2)?,
                co_change_count: row.get(3)?,
                co_change_rate: row.get(4)?,
                rationale: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Link an incident (closing issue) to a CodeBlock. Idempotent per §3
/// uniqueness `(block_id, issue_id)`: the same pair links at most once.
pub fn link_incident(
    conn: &Connection,
    repo_id: &str,
    code_block_id: &str,
    issue_number: i64,
    confidence: f64,
    evidence_source: &str,
    commit_sha: &str,
    incident_date: &str,
    resolution_date: Option<&str>,
    incident_type: &str,
    evidence_text: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO code_block_incidents
            (repo_id, code_block_id, issue_number, confidence, evidence_source, commit_sha,
             incident_date, resolution_date, incident_type, evidence_text, linked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?7)
         ON CONFLICT(repo_id, code_block_id, issue_number) DO NOTHING",
        params![
            repo_id,
            code_block_id,
            issue_number,
            confidence,
            evidence_source,
            commit_sha,
            incident_date,
            resolution_date,
            incident_type,
            evidence_text,
        ],
    )?;
    if affected > 0 {
        conn.execute(
            "UPDATE code_blocks SET
                incident_count = incident_count + 1,
                last_incident_date = MAX(COALESCE(last_incident_date, ''), ?2)
             WHERE id = ?1",
            params![code_block_id, incident_date],
        )?;
    }
    Ok(affected > 0)
}

pub fn count_incidents_for_block(conn: &Connection, code_block_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM code_block_incidents WHERE code_block_id = ?1",
        params![code_block_id],
        |row| row.get(0),
    )
}

/// Titles of issues linked to a block's incidents, most recent first. Feeds
/// the Temporal calculator's pattern-summary prompt (§4.10).
pub fn issue_titles_for_block(conn: &Connection, repo_id: &str, code_block_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT i.title FROM code_block_incidents b
         JOIN issues i ON i.repo_id = b.repo_id AND i.number = b.issue_number
         WHERE b.repo_id = ?1 AND b.code_block_id = ?2
         ORDER BY b.incident_date DESC",
    )?;
    let rows = stmt
        .query_map(params![repo_id, code_block_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Flip `ownership_indexed_at` after the Ownership calculator (L9) runs for
/// a block, and persist the derived fields it computed.
pub fn mark_ownership_indexed(
    conn: &Connection,
    code_block_id: &str,
    original_author: Option<&str>,
    last_modifier: Option<&str>,
    staleness_days: i64,
    familiarity_map_json: &str,
    indexed_at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET
            original_author = COALESCE(?2, original_author),
            last_modifier = COALESCE(?3, last_modifier),
            staleness_days = ?4,
            familiarity_map = ?5,
            ownership_indexed_at = ?6
         WHERE id = ?1",
        params![
            code_block_id,
            original_author,
            last_modifier,
            staleness_days,
            familiarity_map_json,
            indexed_at
        ],
    )?;
    Ok(())
}

/// Flip `coupling_indexed_at` after the Coupling calculator (L10) runs.
pub fn mark_coupling_indexed(
    conn: &Connection,
    code_block_id: &str,
    co_change_count: i64,
    avg_coupling_rate: f64,
    risk_score: f64,
    indexed_at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET
            co_change_count = ?2,
            avg_coupling_rate = ?3,
            risk_score = ?4,
            coupling_indexed_at = ?5
         WHERE id = ?1",
        params![code_block_id, co_change_count, avg_coupling_rate, risk_score, indexed_at],
    )?;
    Ok(())
}

pub fn update_temporal_summary(
    conn: &Connection,
    code_block_id: &str,
    temporal_summary: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE code_blocks SET temporal_summary = COALESCE(?2, temporal_summary) WHERE id = ?1",
        params![code_block_id, temporal_summary],
    )?;
    Ok(())
}

/// Top-N blocks by incident count, for the Temporal calculator's summary
/// pass (§4.10: "top 50 blocks by incident_count").
pub fn top_blocks_by_incident_count(
    conn: &Connection,
    repo_id: &str,
    limit: i64,
) -> Result<Vec<CodeBlock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_BLOCK_COLUMNS} FROM code_blocks
         WHERE repo_id = ?1 AND incident_count > 0
         ORDER BY incident_count DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![repo_id, limit], row_to_code_block)?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Resolve an identity-map entry for the state tracker (§4.5).
pub fn resolve_identity(
    conn: &Connection,
    repo_id: &str,
    file_path: &str,
    block_name: &str,
) -> Result<Option<String>> {
    conn.query_row(
        "SELECT code_block_id FROM function_identity_map
         WHERE repo_id = ?1 AND file_path = ?2 AND block_name = ?3",
        params![repo_id, file_path, block_name],
        |row| row.get(0),
    )
    .optional()
}

pub fn upsert_identity(
    conn: &Connection,
    repo_id: &str,
    file_path: &str,
    block_name: &str,
    code_block_id: &str,
    signature: &str,
    commit_sha: &str,
    rename_date: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO function_identity_map
            (repo_id, file_path, block_name, code_block_id, signature, commit_sha, rename_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(repo_id, file_path, block_name) DO UPDATE SET
            code_block_id = excluded.code_block_id,
            signature = excluded.signature,
            commit_sha = excluded.commit_sha,
            rename_date = excluded.rename_date",
        params![repo_id, file_path, block_name, code_block_id, signature, commit_sha, rename_date],
    )?;
    Ok(())
}

pub fn delete_identity(conn: &Connection, repo_id: &str, file_path: &str, block_name: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM function_identity_map WHERE repo_id = ?1 AND file_path = ?2 AND block_name = ?3",
        params![repo_id, file_path, block_name],
    )?;
    Ok(())
}

pub fn count_active_blocks(conn: &Connection, repo_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM code_blocks WHERE repo_id = ?1 AND deleted = 0",
        params![repo_id],
        |row| row.get(0),
    )
}

/// Upsert an ingested Issue row (upstream GitHub ingester product, §6).
pub fn upsert_issue(
    conn: &Connection,
    repo_id: &str,
    number: i64,
    title: &str,
    labels_json: &str,
    created_at: &str,
    closed_at: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO issues (repo_id, number, title, labels, created_at, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(repo_id, number) DO UPDATE SET
            title = excluded.title, labels = excluded.labels, closed_at = excluded.closed_at",
        params![repo_id, number, title, labels_json, created_at, closed_at],
    )?;
    Ok(())
}

pub struct IssueRow {
    pub number: i64,
    pub title: String,
    pub labels: String,
    pub created_at: String,
    pub closed_at: Option<String>,
}

pub fn load_issue(conn: &Connection, repo_id: &str, number: i64) -> Result<Option<IssueRow>> {
    conn.query_row(
        "SELECT number, title, labels, created_at, closed_at FROM issues WHERE repo_id = ?1 AND number = ?2",
        params![repo_id, number],
        |row| {
            Ok(IssueRow {
                number: row.get(0)?,
                title: row.get(1)?,
                labels: row.get(2)?,
                created_at: row.get(3)?,
                closed_at: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Upsert a TimelineEvent row. Append-only in spirit, but a re-ingest of
/// the same event is harmless noise, so no uniqueness is enforced here.
pub fn insert_timeline_event(
    conn: &Connection,
    repo_id: &str,
    issue_number: i64,
    event_type: &str,
    source_sha: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO timeline_events (repo_id, issue_number, event_type, source_sha, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![repo_id, issue_number, event_type, source_sha, created_at],
    )?;
    Ok(())
}

pub struct TimelineEventRow {
    pub issue_number: i64,
    pub event_type: String,
    pub source_sha: Option<String>,
}

/// Timeline events of kind `closed`/`referenced` carrying a `source_sha`,
/// for the Temporal calculator's incident linking pass (§4.10).
pub fn load_linkable_timeline_events(conn: &Connection, repo_id: &str) -> Result<Vec<TimelineEventRow>> {
    let mut stmt = conn.prepare(
        "SELECT issue_number, event_type, source_sha FROM timeline_events
         WHERE repo_id = ?1 AND source_sha IS NOT NULL AND event_type IN ('closed', 'referenced')",
    )?;
    let rows = stmt
        .query_map(params![repo_id], |row| {
            Ok(TimelineEventRow {
                issue_number: row.get(0)?,
                event_type: row.get(1)?,
                source_sha: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Code blocks touched by a given commit — used to join timeline events to
/// blocks (§4.10 Linking).
pub fn blocks_changed_by_commit(conn: &Connection, repo_id: &str, commit_sha: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT code_block_id FROM code_block_changes WHERE repo_id = ?1 AND commit_sha = ?2",
    )?;
    let rows = stmt
        .query_map(params![repo_id, commit_sha], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn seed_repo(conn: &Connection) {
        run_all_migrations(conn).unwrap();
        upsert_repository(conn, "r1", "acme", "widgets").unwrap();
        upsert_developer(conn, "dev@acme.com", Some("Dev")).unwrap();
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    fn sample_block(repo_id: &str, file: &str, name: &str) -> CodeBlock {
        CodeBlock {
            id: CodeBlock::make_id(repo_id, file, name),
            repo_id: repo_id.to_string(),
            file_path: file.to_string(),
            canonical_file_path: file.to_string(),
            path_at_creation: file.to_string(),
            name: name.to_string(),
            block_type: "function".to_string(),
            language: Some("rust".to_string()),
            start_line: 1,
            end_line: 10,
            signature: format!("fn {name}()"),
            historical_block_names: "[]".to_string(),
            first_seen_sha: "sha1".to_string(),
            last_modified_commit: None,
            deleted: false,
            original_author: Some("dev@acme.com".to_string()),
            last_modifier: Some("dev@acme.com".to_string()),
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
        }
    }

    #[test]
    fn test_upsert_code_block_is_idempotent() {
        let conn = test_conn();
        seed_repo(&conn);
        let block = sample_block("r1", "a.rs", "foo");
        upsert_code_block(&conn, &block).unwrap();
        upsert_code_block(&conn, &block).unwrap();
        assert_eq!(count_active_blocks(&conn, "r1").unwrap(), 1);
    }

    #[test]
    fn test_insert_code_block_change_replay_is_noop() {
        let conn = test_conn();
        seed_repo(&conn);
        let block = sample_block("r1", "a.rs", "foo");
        upsert_code_block(&conn, &block).unwrap();
        upsert_commit(&conn, "r1", "sha1", "msg", "dev@acme.com", "2026-01-01T00:00:00Z", 5, 1).unwrap();

        let change = CodeBlockChange {
            repo_id: "r1".to_string(),
            code_block_id: block.id.clone(),
            commit_sha: "sha1".to_string(),
            behavior: ChangeBehavior::Modify,
            old_signature: Some("fn foo()".to_string()),
            new_signature: Some("fn foo()".to_string()),
            lines_added: 2,
            lines_removed: 1,
            changed_at: "2026-01-01T00:00:00Z".to_string(),
        };
        assert!(insert_code_block_change(&conn, &change).unwrap());
        assert!(!insert_code_block_change(&conn, &change).unwrap());
        assert_eq!(count_changes_for_block(&conn, &block.id).unwrap(), 1);
    }

    #[test]
    fn test_mark_code_block_deleted_preserves_history() {
        let conn = test_conn();
        seed_repo(&conn);
        let block = sample_block("r1", "a.rs", "foo");
        upsert_code_block(&conn, &block).unwrap();
        mark_code_block_deleted(&conn, &block.id, "sha2").unwrap();

        let loaded = load_code_block(&conn, &block.id).unwrap().unwrap();
        assert!(loaded.deleted);
        assert_eq!(count_active_blocks(&conn, "r1").unwrap(), 0);
    }

    #[test]
    fn test_link_incident_is_idempotent_and_bumps_count() {
        let conn = test_conn();
        seed_repo(&conn);
        let block = sample_block("r1", "a.rs", "foo");
        upsert_code_block(&conn, &block).unwrap();
        upsert_issue(&conn, "r1", 42, "bug", "[\"bug\"]", "2026-01-01", None).unwrap();

        assert!(
            link_incident(&conn, "r1", &block.id, 42, 0.85, "commit_close", "sha1", "2026-01-02", None, "bug", "fixed it").unwrap()
        );
        assert!(
            !link_incident(&conn, "r1", &block.id, 42, 0.85, "commit_close", "sha1", "2026-01-02", None, "bug", "fixed it").unwrap()
        );

        let loaded = load_code_block(&conn, &block.id).unwrap().unwrap();
        assert_eq!(loaded.incident_count, 1);
    }

    #[test]
    fn test_coupling_canonicalized_regardless_of_insert_order() {
        let conn = test_conn();
        seed_repo(&conn);
        let a = sample_block("r1", "a.rs", "a");
        let b = sample_block("r1", "a.rs", "b");
        upsert_code_block(&conn, &a).unwrap();
        upsert_code_block(&conn, &b).unwrap();

        let coupling = CodeBlockCoupling {
            repo_id: "r1".to_string(),
            block_a_id: b.id.clone(),
            block_b_id: a.id.clone(),
            co_change_count: 3,
            co_change_rate: 0.6,
            rationale: None,
            updated_at: "2026-01-01".to_string(),
        };
        upsert_coupling(&conn, &coupling).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM code_block_coupling", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_load_existing_blocks_excludes_deleted() {
        let conn = test_conn();
        seed_repo(&conn);
        let live = sample_block("r1", "a.rs", "live");
        let gone = sample_block("r1", "a.rs", "gone");
        upsert_code_block(&conn, &live).unwrap();
        upsert_code_block(&conn, &gone).unwrap();
        mark_code_block_deleted(&conn, &gone.id, "sha2").unwrap();

        let blocks = load_existing_blocks(&conn, "r1").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].id, live.id);
    }

    #[test]
    fn test_rename_code_block_rekeys_and_preserves_changes() {
        let conn = test_conn();
        seed_repo(&conn);
        let block = sample_block("r1", "a.rs", "authUser");
        upsert_code_block(&conn, &block).unwrap();
        upsert_commit(&conn, "r1", "sha1", "msg", "dev@acme.com", "2026-01-01T00:00:00Z", 1, 0).unwrap();
        insert_code_block_change(
            &conn,
            &CodeBlockChange {
                repo_id: "r1".to_string(),
                code_block_id: block.id.clone(),
                commit_sha: "sha1".to_string(),
                behavior: ChangeBehavior::Create,
                old_signature: None,
                new_signature: Some(block.signature.clone()),
                lines_added: 3,
                lines_removed: 0,
                changed_at: "2026-01-01T00:00:00Z".to_string(),
            },
        )
        .unwrap();

        let new_id = CodeBlock::make_id("r1", "a.rs", "authenticateUser");
        rename_code_block(
            &conn,
            &block.id,
            &new_id,
            "a.rs",
            "authenticateUser",
            "fn authenticateUser()",
            "[\"authUser\"]",
            "sha2",
        )
        .unwrap();

        let loaded = load_code_block(&conn, &new_id).unwrap().unwrap();
        assert_eq!(loaded.name, "authenticateUser");
        assert_eq!(loaded.historical_names(), vec!["authUser".to_string()]);
        assert_eq!(count_changes_for_block(&conn, &new_id).unwrap(), 1);
    }
}
