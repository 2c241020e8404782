// crates/risk-engine/src/risk/orchestrator.rs
// Chain Orchestrator (§4.12, L13): Phase 0 heuristic fast path, then the
// Phase 1-4 chain (Collection -> Agent Chain -> Synthesis -> Validation)
// over a shared `AgentContext`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::atomizer::diff::parse_diff;
use crate::config::RiskWeights;
use crate::db::DatabasePool;
use crate::graph::GraphStore;
use crate::llm::LlmClient;
use crate::query::run_phase1_collector;
use crate::risk::agents::{run_agent_chain, AgentContext, CancellationToken};
use crate::risk::heuristic::classify;
use crate::risk::report::{PhaseResult, Phase1DataView, RiskLevel, RiskReport};

/// The six synthesis factors in weight order (§4.12 Aggregation), each
/// keyed by the `signal_type` the agent chain tags its signal with.
fn weighted_factors(weights: &RiskWeights) -> [(&'static str, f64); 6] {
    [
        ("blast_radius", weights.synthesis_blast_radius),
        ("test_coverage", weights.synthesis_test_coverage),
        ("ownership", weights.synthesis_ownership),
        ("temporal", weights.synthesis_temporal),
        ("centrality", weights.synthesis_centrality),
        ("incident", weights.synthesis_incident),
    ]
}

pub struct ChainOrchestrator {
    pool: Arc<DatabasePool>,
    llm: Arc<dyn LlmClient>,
    weights: RiskWeights,
}

impl ChainOrchestrator {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<dyn LlmClient>, weights: RiskWeights) -> Self {
        Self { pool, llm, weights }
    }

    /// Run the full chain for a single file changed at `commit_sha`. `diff_text`
    /// is the unified diff of the whole commit (needed for the heuristic
    /// filter's whitespace/comment/docs-only checks).
    pub async fn assess(
        &self,
        graph: &GraphStore,
        repo_id: &str,
        file_path: &str,
        commit_sha: &str,
        branch: &str,
        diff_text: &str,
        diff_additions: i64,
        diff_deletions: i64,
    ) -> RiskReport {
        let start = Instant::now();
        let timestamp = Utc::now().to_rfc3339();
        let files = parse_diff(diff_text);

        let heuristic_result = classify(&files);
        if heuristic_result.is_trivial {
            return RiskReport {
                risk_level: RiskLevel::Low,
                risk_score: 0.1,
                confidence: heuristic_result.confidence,
                summary: heuristic_result.reason.clone(),
                recommendations: Vec::new(),
                risk_signals: Vec::new(),
                coordination_needed: Vec::new(),
                forgotten_updates: Vec::new(),
                phase_results: Vec::new(),
                heuristic_result: Some(heuristic_result),
                phase1_data: None,
                total_duration: start.elapsed().as_secs_f64(),
                cache_hit: false,
                fast_path_taken: true,
                timestamp,
                file_path: file_path.to_string(),
                commit_sha: commit_sha.to_string(),
                branch: branch.to_string(),
            };
        }

        let mut phase_results = Vec::new();

        let phase1_start = Instant::now();
        let phase1 = match run_phase1_collector(&self.pool, graph, repo_id, file_path, diff_additions, diff_deletions).await {
            Ok(data) => data,
            Err(e) => {
                // §7: the chain fails before Phase 3 synthesis — return a
                // best-effort report with reduced confidence rather than an
                // always-success chain over misleadingly empty data.
                tracing::warn!(file_path, error = %e, "collection phase failed, returning degraded report");
                return RiskReport::degraded(
                    file_path,
                    commit_sha,
                    branch,
                    &format!("Collection phase failed: {e}"),
                    start.elapsed().as_secs_f64(),
                );
            }
        };
        phase_results.push(PhaseResult {
            phase_name: "Collection".to_string(),
            duration: phase1_start.elapsed().as_secs_f64(),
            success: true,
            error: None,
            confidence: 0.9,
        });

        let agent_start = Instant::now();
        let cancel = CancellationToken::new();
        let mut ctx = AgentContext::new(file_path, phase1.clone());
        run_agent_chain(&mut ctx, &cancel);
        phase_results.push(PhaseResult {
            phase_name: "Agent Chain".to_string(),
            duration: agent_start.elapsed().as_secs_f64(),
            success: true,
            error: None,
            confidence: 0.8,
        });

        let synthesis_start = Instant::now();
        let (risk_score, top_factors) = synthesize(&ctx.risk_signals, &self.weights);
        let risk_level = RiskLevel::from_score(
            risk_score,
            self.weights.band_critical,
            self.weights.band_high,
            self.weights.band_medium,
        );
        let recommendations = recommendations_for(&top_factors, &ctx.risk_signals);
        let summary = summarize(file_path, risk_level, risk_score, &top_factors);
        phase_results.push(PhaseResult {
            phase_name: "Synthesis".to_string(),
            duration: synthesis_start.elapsed().as_secs_f64(),
            success: true,
            error: None,
            confidence: 0.75,
        });

        let validation_start = Instant::now();
        let confidence = validate(&ctx.risk_signals);
        phase_results.push(PhaseResult {
            phase_name: "Validation".to_string(),
            duration: validation_start.elapsed().as_secs_f64(),
            success: true,
            error: None,
            confidence,
        });

        let touched: HashSet<&str> = files.keys().map(|s| s.as_str()).collect();
        let forgotten_updates = phase1
            .co_change_partners
            .iter()
            .filter(|p| p.rate >= 0.5 && !touched.contains(p.file_path.as_str()))
            .map(|p| p.file_path.clone())
            .collect();
        let coordination_needed = phase1.top_owners.iter().map(|o| o.developer_email.clone()).collect();

        let llm_enabled = self.llm.is_enabled();
        tracing::debug!(llm_enabled, "chain orchestrator synthesis complete");

        RiskReport {
            risk_level,
            risk_score,
            confidence,
            summary,
            recommendations,
            risk_signals: ctx.risk_signals,
            coordination_needed,
            forgotten_updates,
            phase_results,
            heuristic_result: Some(heuristic_result),
            phase1_data: Some(Phase1DataView::from(&phase1)),
            total_duration: start.elapsed().as_secs_f64(),
            cache_hit: false,
            fast_path_taken: false,
            timestamp,
            file_path: file_path.to_string(),
            commit_sha: commit_sha.to_string(),
            branch: branch.to_string(),
        }
    }
}

/// Weighted sum over the six synthesis factors; returns the overall score
/// and up to the top 3 contributing factor names (§4.12: "Top 3 factors
/// are retained").
fn synthesize(signals: &[crate::risk::report::RiskSignal], weights: &RiskWeights) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut contributions: Vec<(String, f64)> = Vec::new();
    for (key, weight) in weighted_factors(weights) {
        let factor_score = signals.iter().find(|s| s.signal_type == key).map(|s| s.score).unwrap_or(0.0);
        let contribution = factor_score * weight;
        score += contribution;
        contributions.push((key.to_string(), contribution));
    }
    contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_factors = contributions.into_iter().filter(|(_, c)| *c > 0.0).take(3).map(|(name, _)| name).collect();
    (score.min(1.0), top_factors)
}

fn recommendations_for(top_factors: &[String], signals: &[crate::risk::report::RiskSignal]) -> Vec<String> {
    top_factors
        .iter()
        .filter_map(|factor| signals.iter().find(|s| &s.signal_type == factor))
        .filter_map(|s| s.mitigation.clone())
        .collect()
}

fn summarize(file_path: &str, level: RiskLevel, score: f64, top_factors: &[String]) -> String {
    if top_factors.is_empty() {
        return format!("{file_path} shows no elevated risk signals");
    }
    format!(
        "{file_path} assessed at {level:?} ({score:.2}); driven by {}",
        top_factors.join(", ")
    )
}

/// Phase 4 Validation: confidence is the mean of the agents' own
/// confidences, reduced when no agent produced a signal at all.
fn validate(signals: &[crate::risk::report::RiskSignal]) -> f64 {
    if signals.is_empty() {
        return 0.5;
    }
    let sum: f64 = signals.iter().map(|s| s.confidence).sum();
    (sum / signals.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::report::RiskSignal;

    fn signal(signal_type: &str, score: f64, confidence: f64) -> RiskSignal {
        RiskSignal {
            agent_name: "Test".to_string(),
            signal_type: signal_type.to_string(),
            severity: "medium".to_string(),
            confidence,
            description: String::new(),
            evidence: Vec::new(),
            impact: String::new(),
            mitigation: Some("do something".to_string()),
            score,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_synthesize_weights_blast_radius_highest() {
        let weights = RiskWeights::default();
        let signals = vec![signal("blast_radius", 1.0, 0.9), signal("incident", 1.0, 0.9)];
        let (score, top) = synthesize(&signals, &weights);
        assert!((score - 0.40).abs() < 1e-9);
        assert_eq!(top[0], "blast_radius");
    }

    #[test]
    fn test_validate_returns_neutral_confidence_with_no_signals() {
        assert_eq!(validate(&[]), 0.5);
    }

    #[test]
    fn test_validate_averages_confidences() {
        let signals = vec![signal("blast_radius", 1.0, 0.8), signal("incident", 1.0, 0.4)];
        assert!((validate(&signals) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_risk_level_from_default_bands() {
        let weights = RiskWeights::default();
        assert_eq!(
            RiskLevel::from_score(0.95, weights.band_critical, weights.band_high, weights.band_medium),
            RiskLevel::Critical
        );
    }
}
