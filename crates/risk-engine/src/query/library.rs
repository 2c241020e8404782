// crates/risk-engine/src/query/library.rs
// Query Library (§4.11, L12): the named, repo-scoped queries the Phase-1
// Collector and the specialist agents read from. `DependencyCount` and
// `BlastRadius` walk the graph mirror; the rest read the relational store
// directly, since the file/commit/developer joins they need have no graph
// counterpart yet (import resolution is an open question, §9).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, Result};

use crate::graph::{EdgeKind, GraphStore, NodeLabel};

/// `DependencyCount`: upstream dependents of a file, `DEPENDS_ON` depth 1..2.
pub fn dependency_count(graph: &GraphStore, file_path: &str) -> usize {
    bfs_dependents(graph, file_path, 2).len()
}

#[derive(Debug, Clone, Default)]
pub struct BlastRadiusResult {
    pub total: usize,
    pub sample: Vec<String>,
}

const BLAST_RADIUS_SAMPLE_CAP: usize = 20;

/// `BlastRadius`: the full dependent set, `DEPENDS_ON` depth 1..3, sampled
/// to at most 20 paths for the report.
pub fn blast_radius(graph: &GraphStore, file_path: &str) -> BlastRadiusResult {
    let dependents = bfs_dependents(graph, file_path, 3);
    let total = dependents.len();
    let sample = dependents.into_iter().take(BLAST_RADIUS_SAMPLE_CAP).collect();
    BlastRadiusResult { total, sample }
}

fn bfs_dependents(graph: &GraphStore, file_path: &str, max_depth: usize) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier = vec![file_path.to_string()];
    for _ in 0..max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            for neighbor in graph.neighbors_via(NodeLabel::File, node, EdgeKind::DependsOn) {
                if neighbor != file_path && visited.insert(neighbor.clone()) {
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    visited.into_iter().collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoChangePartner {
    pub file_path: String,
    pub rate: f64,
}

const CO_CHANGE_WINDOW_DAYS: i64 = 90;
const CO_CHANGE_MIN_RATE: f64 = 0.5;
const CO_CHANGE_TOP_N: i64 = 10;

/// `CoChangePartners`: files co-changing with `file_path`, windowed to the
/// last 90 days, rate > 0.5, top 10 by rate.
pub fn co_change_partners(conn: &Connection, repo_id: &str, file_path: &str, now: DateTime<Utc>) -> Result<Vec<CoChangePartner>> {
    let since = (now - chrono::Duration::days(CO_CHANGE_WINDOW_DAYS)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT other.file_path, MAX(c.co_change_rate) AS rate
         FROM code_block_coupling c
         JOIN code_blocks a ON a.id = c.block_a_id AND a.repo_id = c.repo_id
         JOIN code_blocks b ON b.id = c.block_b_id AND b.repo_id = c.repo_id
         JOIN code_blocks other ON other.id = CASE WHEN a.file_path = ?2 THEN c.block_b_id ELSE c.block_a_id END
         WHERE c.repo_id = ?1
           AND c.co_change_rate > ?4
           AND c.updated_at >= ?3
           AND (a.file_path = ?2 OR b.file_path = ?2)
           AND other.file_path != ?2
         GROUP BY other.file_path
         ORDER BY rate DESC
         LIMIT ?5",
    )?;
    let rows = stmt
        .query_map(params![repo_id, file_path, since, CO_CHANGE_MIN_RATE, CO_CHANGE_TOP_N], |row| {
            Ok(CoChangePartner {
                file_path: row.get(0)?,
                rate: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOwner {
    pub developer_email: String,
    pub commit_count: i64,
    pub last_commit_at: String,
}

const OWNERSHIP_TOP_N: usize = 3;

/// `Ownership`: top 3 owners of a file by commit count, with their last
/// commit timestamp.
pub fn ownership_top_owners(conn: &Connection, repo_id: &str, file_path: &str) -> Result<Vec<FileOwner>> {
    let mut stmt = conn.prepare(
        "SELECT m.author_email, COUNT(DISTINCT m.sha) AS commit_count, MAX(m.authored_at) AS last_commit_at
         FROM commits m
         JOIN code_block_changes ch ON ch.repo_id = m.repo_id AND ch.commit_sha = m.sha
         JOIN code_blocks cb ON cb.id = ch.code_block_id
         WHERE m.repo_id = ?1 AND cb.file_path = ?2
         GROUP BY m.author_email
         ORDER BY commit_count DESC, last_commit_at DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![repo_id, file_path, OWNERSHIP_TOP_N as i64], |row| {
            Ok(FileOwner {
                developer_email: row.get(0)?,
                commit_count: row.get(1)?,
                last_commit_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentCommit {
    pub sha: String,
    pub message: String,
    pub authored_at: String,
}

const INCIDENT_HISTORY_WINDOW_DAYS: i64 = 180;

fn matches_incident_pattern(message: &str) -> bool {
    match Regex::new(r"(?i)(fix|bug|hotfix|patch)") {
        Ok(re) => re.is_match(message),
        Err(_) => false,
    }
}

/// `IncidentHistory`: bug-fix commits on a file within the last 180 days,
/// matched by commit message against `(fix|bug|hotfix|patch)`.
pub fn incident_history(conn: &Connection, repo_id: &str, file_path: &str, now: DateTime<Utc>) -> Result<Vec<IncidentCommit>> {
    let since = (now - chrono::Duration::days(INCIDENT_HISTORY_WINDOW_DAYS)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.sha, m.message, m.authored_at
         FROM commits m
         JOIN code_block_changes ch ON ch.repo_id = m.repo_id AND ch.commit_sha = m.sha
         JOIN code_blocks cb ON cb.id = ch.code_block_id
         WHERE m.repo_id = ?1 AND cb.file_path = ?2 AND m.authored_at >= ?3
         ORDER BY m.authored_at DESC",
    )?;
    let rows = stmt
        .query_map(params![repo_id, file_path, since], |row| {
            Ok(IncidentCommit {
                sha: row.get(0)?,
                message: row.get(1)?,
                authored_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|c| matches_incident_pattern(&c.message))
        .collect();
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentCommit {
    pub sha: String,
    pub author_email: String,
    pub authored_at: String,
}

const RECENT_COMMITS_LIMIT: i64 = 5;

/// `RecentCommits`: the last 5 commits that authored or modified a block in
/// this file.
pub fn recent_commits(conn: &Connection, repo_id: &str, file_path: &str) -> Result<Vec<RecentCommit>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.sha, m.author_email, m.authored_at
         FROM commits m
         JOIN code_block_changes ch ON ch.repo_id = m.repo_id AND ch.commit_sha = m.sha
         JOIN code_blocks cb ON cb.id = ch.code_block_id
         WHERE m.repo_id = ?1 AND cb.file_path = ?2
         ORDER BY m.authored_at DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![repo_id, file_path, RECENT_COMMITS_LIMIT], |row| {
            Ok(RecentCommit {
                sha: row.get(0)?,
                author_email: row.get(1)?,
                authored_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// `CommitsForPaths`: distinct commits that modified a block in any of the
/// given paths — used to follow history across a rename.
pub fn commits_for_paths(conn: &Connection, repo_id: &str, paths: &[String]) -> Result<Vec<String>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (0..paths.len()).map(|i| format!("?{}", i + 2)).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT DISTINCT ch.commit_sha
         FROM code_block_changes ch
         JOIN code_blocks cb ON cb.id = ch.code_block_id
         WHERE ch.repo_id = ?1 AND cb.file_path IN ({placeholders})
         ORDER BY ch.commit_sha"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&repo_id];
    for path in paths {
        bound.push(path);
    }
    let rows = stmt
        .query_map(bound.as_slice(), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_message_pattern_matches_known_keywords() {
        assert!(matches_incident_pattern("Fix null pointer crash"));
        assert!(matches_incident_pattern("HOTFIX for regression"));
        assert!(!matches_incident_pattern("Add new feature flag"));
    }

    #[test]
    fn test_bfs_dependents_stops_at_max_depth() {
        let mut graph = GraphStore::new();
        graph.upsert_node(NodeLabel::File, "a.rs", Default::default());
        graph.upsert_node(NodeLabel::File, "b.rs", Default::default());
        graph.upsert_node(NodeLabel::File, "c.rs", Default::default());
        graph.upsert_edge(NodeLabel::File, "a.rs", NodeLabel::File, "b.rs", EdgeKind::DependsOn, Default::default());
        graph.upsert_edge(NodeLabel::File, "b.rs", NodeLabel::File, "c.rs", EdgeKind::DependsOn, Default::default());

        let one_hop = bfs_dependents(&graph, "a.rs", 1);
        assert_eq!(one_hop, vec!["b.rs".to_string()]);

        let two_hop = bfs_dependents(&graph, "a.rs", 2);
        let mut sorted = two_hop;
        sorted.sort();
        assert_eq!(sorted, vec!["b.rs".to_string(), "c.rs".to_string()]);
    }

    #[test]
    fn test_blast_radius_samples_at_cap() {
        let mut graph = GraphStore::new();
        graph.upsert_node(NodeLabel::File, "root.rs", Default::default());
        for i in 0..30 {
            let name = format!("dep{i}.rs");
            graph.upsert_node(NodeLabel::File, &name, Default::default());
            graph.upsert_edge(NodeLabel::File, "root.rs", NodeLabel::File, &name, EdgeKind::DependsOn, Default::default());
        }
        let result = blast_radius(&graph, "root.rs");
        assert_eq!(result.total, 30);
        assert_eq!(result.sample.len(), BLAST_RADIUS_SAMPLE_CAP);
    }
}
