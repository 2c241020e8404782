// crates/risk-engine/src/query/collector.rs
// Phase-1 Collector (§4.11, L12): runs the query library for the primary
// changed file and assembles `Phase1Data`. Each query carries its own
// timeout budget; a timeout or query error on its own is graceful
// degradation — log a warning and leave that field at its zero value. Only
// when every relational query fails at once does the phase itself fail
// (see `run_phase1_collector`).

use std::time::Duration;

use chrono::Utc;

use crate::db::DatabasePool;
use crate::error::{Result, RiskError};
use crate::graph::GraphStore;
use crate::query::library::{
    blast_radius, co_change_partners, incident_history, ownership_top_owners, recent_commits, BlastRadiusResult,
    CoChangePartner, FileOwner, IncidentCommit, RecentCommit,
};

/// Per-query timeout budgets (§4.11: "3-15s"). Graph walks are cheap and
/// in-process; relational joins get the longer end of the budget.
const DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(3);
const BLAST_RADIUS_TIMEOUT: Duration = Duration::from_secs(5);
const RELATIONAL_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// A diff-line cap past which complexity saturates at 1.0. The
/// specification leaves the exact normalization undefined beyond
/// "+/- line counts, normalized 0..1".
const COMPLEXITY_LINE_CAP: f64 = 200.0;

#[derive(Debug, Clone, Default)]
pub struct Phase1Data {
    pub complexity: f64,
    pub dependency_count: usize,
    pub blast_radius: BlastRadiusResult,
    pub co_change_partners: Vec<CoChangePartner>,
    pub top_owners: Vec<FileOwner>,
    pub incident_history: Vec<IncidentCommit>,
    pub recent_commits: Vec<RecentCommit>,
}

/// Normalize `(additions, deletions)` to a 0..1 complexity estimate.
pub fn diff_complexity(additions: i64, deletions: i64) -> f64 {
    let changed = (additions + deletions).max(0) as f64;
    (changed / COMPLEXITY_LINE_CAP).min(1.0)
}

/// Run the query library for `file_path` with graceful degradation on any
/// individual query failure or timeout. Only errors out when every single
/// relational query failed — that pattern points at a systemic problem
/// (pool exhausted, connection gone) rather than sparse data, and the
/// caller surfaces it as a Phase-1 failure (§7 "best-effort report ...
/// before Phase 3 synthesis") instead of returning a misleadingly
/// all-zero `Phase1Data`.
pub async fn run_phase1_collector(
    pool: &DatabasePool,
    graph: &GraphStore,
    repo_id: &str,
    file_path: &str,
    diff_additions: i64,
    diff_deletions: i64,
) -> Result<Phase1Data> {
    let mut data = Phase1Data {
        complexity: diff_complexity(diff_additions, diff_deletions),
        ..Default::default()
    };

    match tokio::time::timeout(DEPENDENCY_TIMEOUT, async { crate::query::library::dependency_count(graph, file_path) }).await {
        Ok(count) => data.dependency_count = count,
        Err(_) => tracing::warn!(file_path, "DependencyCount timed out, leaving at zero"),
    }

    match tokio::time::timeout(BLAST_RADIUS_TIMEOUT, async { blast_radius(graph, file_path) }).await {
        Ok(result) => data.blast_radius = result,
        Err(_) => tracing::warn!(file_path, "BlastRadius timed out, leaving at zero"),
    }

    let now = Utc::now();
    let mut relational_failures = 0;
    const RELATIONAL_QUERY_COUNT: usize = 4;

    match run_relational(pool, repo_id, file_path, move |conn, repo_id, file_path| {
        co_change_partners(conn, repo_id, file_path, now)
    })
    .await
    {
        Some(rows) => data.co_change_partners = rows,
        None => {
            relational_failures += 1;
            tracing::warn!(file_path, "CoChangePartners failed or timed out, leaving empty");
        }
    }

    match run_relational(pool, repo_id, file_path, ownership_top_owners).await {
        Some(rows) => data.top_owners = rows,
        None => {
            relational_failures += 1;
            tracing::warn!(file_path, "Ownership query failed or timed out, leaving empty");
        }
    }

    match run_relational(pool, repo_id, file_path, move |conn, repo_id, file_path| {
        incident_history(conn, repo_id, file_path, now)
    })
    .await
    {
        Some(rows) => data.incident_history = rows,
        None => {
            relational_failures += 1;
            tracing::warn!(file_path, "IncidentHistory failed or timed out, leaving empty");
        }
    }

    match run_relational(pool, repo_id, file_path, recent_commits).await {
        Some(rows) => data.recent_commits = rows,
        None => {
            relational_failures += 1;
            tracing::warn!(file_path, "RecentCommits failed or timed out, leaving empty");
        }
    }

    if relational_failures == RELATIONAL_QUERY_COUNT {
        return Err(RiskError::Other(format!(
            "all relational queries failed for {file_path}, collection phase cannot proceed"
        )));
    }

    Ok(data)
}

async fn run_relational<F, R>(pool: &DatabasePool, repo_id: &str, file_path: &str, query: F) -> Option<Vec<R>>
where
    F: FnOnce(&rusqlite::Connection, &str, &str) -> rusqlite::Result<Vec<R>> + Send + 'static,
    R: Send + 'static,
{
    let repo_id = repo_id.to_string();
    let file_path = file_path.to_string();
    let call = pool.run(move |conn| query(conn, &repo_id, &file_path));
    match tokio::time::timeout(RELATIONAL_QUERY_TIMEOUT, call).await {
        Ok(Ok(rows)) => Some(rows),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "query library call failed");
            None
        }
        Err(_) => None,
    }
}
