// crates/risk-types/src/lib.rs

//! Shared data contracts between the risk engine and its upstream producers.
//!
//! This crate provides the plain data types that cross the engine's outer
//! boundary: a scoped repository reference, and the batches handed in by the
//! Git/GitHub ingesters that the engine treats as collaborators rather than
//! as subsystems it owns (see the engine's non-goals). Keeping these in a
//! separate crate lets callers depend on the wire shapes without pulling in
//! `rusqlite`/`tokio`/`reqwest`.

use serde::{Deserialize, Serialize};

// ===================================================
// REPOSITORY SCOPING
// ===================================================

/// Identifies the tenant every other row is scoped under.
///
/// Mirrors the `Repository(id, owner, name)` entity: every repository-scoped
/// query and write carries `repo_id` (I6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// The persistent database id for this repository. Use this for all foreign keys.
    pub id: i64,
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

// ===================================================
// UPSTREAM INGEST CONTRACTS
// ===================================================

/// A single commit as handed in by the upstream Git ingester, already
/// carrying its unified diff. The engine never shells out to `git` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: String,
    pub message: String,
    pub diff_content: String,
    pub author_email: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
}

/// An issue as handed in by the upstream GitHub ingester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A pull request as handed in by the upstream GitHub ingester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub merged_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A timeline event on an issue or PR. Only `closed` and `referenced` events
/// that carry a `source_sha` are meaningful to the Temporal Calculator (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub issue_id: i64,
    pub event_type: TimelineEventType,
    pub source_sha: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Closed,
    Referenced,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_ref_slug() {
        let repo = RepositoryRef {
            id: 1,
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        };
        assert_eq!(repo.slug(), "acme/widgets");
    }

    #[test]
    fn test_repository_ref_round_trip() {
        let json = r#"{"id": 42, "owner": "acme", "name": "widgets"}"#;
        let repo: RepositoryRef = serde_json::from_str(json).unwrap();
        assert_eq!(repo.id, 42);
        assert_eq!(repo.owner, "acme");
    }

    #[test]
    fn test_timeline_event_type_serde() {
        let json = r#""closed""#;
        let kind: TimelineEventType = serde_json::from_str(json).unwrap();
        assert_eq!(kind, TimelineEventType::Closed);
    }
}
