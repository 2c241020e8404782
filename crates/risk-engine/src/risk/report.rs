// crates/risk-engine/src/risk/report.rs
// Risk report shapes (§6 External Interfaces): the orchestrator's output
// contract. Durations are serialized as fractional seconds rather than
// `std::time::Duration`'s internal representation.

use serde::{Deserialize, Serialize};

use crate::query::Phase1Data;
use crate::risk::heuristic::HeuristicResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bands from the Phase-5 aggregation formula (§4.12): `≥0.90 CRITICAL,
    /// ≥0.75 HIGH, ≥0.50 MEDIUM, else LOW`.
    pub fn from_score(score: f64, critical: f64, high: f64, medium: f64) -> Self {
        if score >= critical {
            RiskLevel::Critical
        } else if score >= high {
            RiskLevel::High
        } else if score >= medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub agent_name: String,
    pub signal_type: String,
    pub severity: String,
    pub confidence: f64,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub impact: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mitigation: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub duration: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub confidence: f64,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub risk_signals: Vec<RiskSignal>,
    pub coordination_needed: Vec<String>,
    pub forgotten_updates: Vec<String>,
    pub phase_results: Vec<PhaseResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heuristic_result: Option<HeuristicResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phase1_data: Option<Phase1DataView>,
    pub total_duration: f64,
    pub cache_hit: bool,
    pub fast_path_taken: bool,
    pub timestamp: String,
    pub file_path: String,
    pub commit_sha: String,
    pub branch: String,
}

/// A serializable projection of `Phase1Data` for the report boundary — the
/// internal type carries borrowed-free owned rows already, this just gives
/// it the derive the report needs without coupling the query module to serde.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Phase1DataView {
    pub complexity: f64,
    pub dependency_count: usize,
    pub blast_radius_total: usize,
    pub blast_radius_sample: Vec<String>,
    pub co_change_partner_count: usize,
    pub top_owner_count: usize,
    pub incident_history_count: usize,
    pub recent_commit_count: usize,
}

impl From<&Phase1Data> for Phase1DataView {
    fn from(data: &Phase1Data) -> Self {
        Self {
            complexity: data.complexity,
            dependency_count: data.dependency_count,
            blast_radius_total: data.blast_radius.total,
            blast_radius_sample: data.blast_radius.sample.clone(),
            co_change_partner_count: data.co_change_partners.len(),
            top_owner_count: data.top_owners.len(),
            incident_history_count: data.incident_history.len(),
            recent_commit_count: data.recent_commits.len(),
        }
    }
}

impl RiskReport {
    /// A best-effort report for when the chain fails before synthesis (§7
    /// "User-visible failure"): reduced confidence, populated `error` via
    /// the first phase result, but still one of the four report levels.
    pub fn degraded(file_path: &str, commit_sha: &str, branch: &str, reason: &str, total_duration: f64) -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            risk_score: 0.5,
            confidence: 0.2,
            summary: format!("Analysis incomplete: {reason}"),
            recommendations: vec!["Review manually; automated analysis did not complete".to_string()],
            risk_signals: Vec::new(),
            coordination_needed: Vec::new(),
            forgotten_updates: Vec::new(),
            phase_results: Vec::new(),
            heuristic_result: None,
            phase1_data: None,
            total_duration,
            cache_hit: false,
            fast_path_taken: false,
            timestamp: String::new(),
            file_path: file_path.to_string(),
            commit_sha: commit_sha.to_string(),
            branch: branch.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_score(0.95, 0.90, 0.75, 0.50), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.80, 0.90, 0.75, 0.50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.60, 0.90, 0.75, 0.50), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.10, 0.90, 0.75, 0.50), RiskLevel::Low);
    }

    #[test]
    fn test_risk_level_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }

    #[test]
    fn test_degraded_report_has_reduced_confidence_and_no_fast_path() {
        let report = RiskReport::degraded("a.rs", "sha1", "main", "LLM timeout", 1.5);
        assert_eq!(report.confidence, 0.2);
        assert!(!report.fast_path_taken);
        assert!(report.risk_signals.is_empty());
    }
}
