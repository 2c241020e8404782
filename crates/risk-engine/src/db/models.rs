// crates/risk-engine/src/db/models.rs
// Row types mirroring the entities in §3. These are the engine's internal
// representation — distinct from the ingest contracts in `risk_types`,
// which model what arrives from the host application.

use serde::{Deserialize, Serialize};
#[cfg(test)]
use serde_json as _serde_json_for_tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Function,
    Method,
    Class,
    Component,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Function => "function",
            BlockType::Method => "method",
            BlockType::Class => "class",
            BlockType::Component => "component",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "function" => Some(BlockType::Function),
            "method" => Some(BlockType::Method),
            "class" => Some(BlockType::Class),
            "component" => Some(BlockType::Component),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub id: String,
    pub repo_id: String,
    pub file_path: String,
    pub canonical_file_path: String,
    pub path_at_creation: String,
    pub name: String,
    pub block_type: String,
    pub language: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub signature: String,
    /// JSON-encoded `Vec<String>` of prior names, oldest first (§3).
    pub historical_block_names: String,
    pub first_seen_sha: String,
    pub last_modified_commit: Option<String>,
    pub deleted: bool,
    pub original_author: Option<String>,
    pub last_modifier: Option<String>,
    pub staleness_days: Option<i64>,
    pub familiarity_map: String,
    pub incident_count: i64,
    pub last_incident_date: Option<String>,
    pub temporal_summary: Option<String>,
    pub co_change_count: i64,
    pub avg_coupling_rate: f64,
    pub risk_score: Option<f64>,
    pub ownership_indexed_at: Option<String>,
    pub coupling_indexed_at: Option<String>,
}

impl CodeBlock {
    /// The natural key used as primary key (§3): `{repo_id}:codeblock:{file_path}:{name}`.
    pub fn make_id(repo_id: &str, file_path: &str, name: &str) -> String {
        format!("{repo_id}:codeblock:{file_path}:{name}")
    }

    pub fn historical_names(&self) -> Vec<String> {
        serde_json::from_str(&self.historical_block_names).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamiliarityEntry {
    pub email: String,
    pub change_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeBehavior {
    Create,
    Modify,
    Rename,
    Delete,
    AddImport,
    RemoveImport,
}

impl ChangeBehavior {
    /// Conflict-resolution priority within a single merged chunk group
    /// (§4.4): RENAME > MODIFY > CREATE > DELETE.
    pub fn priority(&self) -> u8 {
        match self {
            ChangeBehavior::Rename => 4,
            ChangeBehavior::Modify => 3,
            ChangeBehavior::Create => 2,
            ChangeBehavior::Delete => 1,
            ChangeBehavior::AddImport => 0,
            ChangeBehavior::RemoveImport => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeBehavior::Create => "create",
            ChangeBehavior::Modify => "modify",
            ChangeBehavior::Rename => "rename",
            ChangeBehavior::Delete => "delete",
            ChangeBehavior::AddImport => "add_import",
            ChangeBehavior::RemoveImport => "remove_import",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeBehavior::Create),
            "modify" => Some(ChangeBehavior::Modify),
            "rename" => Some(ChangeBehavior::Rename),
            "delete" => Some(ChangeBehavior::Delete),
            "add_import" => Some(ChangeBehavior::AddImport),
            "remove_import" => Some(ChangeBehavior::RemoveImport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlockChange {
    pub repo_id: String,
    pub code_block_id: String,
    pub commit_sha: String,
    pub behavior: ChangeBehavior,
    pub old_signature: Option<String>,
    pub new_signature: Option<String>,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub changed_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlockCoupling {
    pub repo_id: String,
    pub block_a_id: String,
    pub block_b_id: String,
    pub co_change_count: i64,
    pub co_change_rate: f64,
    pub rationale: Option<String>,
    pub updated_at: String,
}

impl CodeBlockCoupling {
    /// Canonicalize a pair so (a,b) and (b,a) collapse onto the same row (I3).
    pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if a < b { (a, b) } else { (b, a) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlockIncident {
    pub repo_id: String,
    pub code_block_id: String,
    pub issue_number: i64,
    pub linked_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRow {
    pub repo_id: String,
    pub sha: String,
    pub message: String,
    pub author_email: String,
    pub authored_at: String,
    pub additions: i64,
    pub deletions: i64,
    pub atomized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_id_matches_natural_key_format() {
        assert_eq!(
            CodeBlock::make_id("r1", "src/a.rs", "foo"),
            "r1:codeblock:src/a.rs:foo"
        );
    }

    #[test]
    fn test_behavior_priority_ordering() {
        assert!(ChangeBehavior::Rename.priority() > ChangeBehavior::Modify.priority());
        assert!(ChangeBehavior::Modify.priority() > ChangeBehavior::Create.priority());
        assert!(ChangeBehavior::Create.priority() > ChangeBehavior::Delete.priority());
    }

    #[test]
    fn test_behavior_round_trip() {
        for b in [
            ChangeBehavior::Create,
            ChangeBehavior::Modify,
            ChangeBehavior::Rename,
            ChangeBehavior::Delete,
            ChangeBehavior::AddImport,
            ChangeBehavior::RemoveImport,
        ] {
            assert_eq!(ChangeBehavior::from_str(b.as_str()), Some(b));
        }
    }

    #[test]
    fn test_canonical_pair_is_order_independent() {
        assert_eq!(
            CodeBlockCoupling::canonical_pair("b", "a"),
            CodeBlockCoupling::canonical_pair("a", "b")
        );
    }
}
