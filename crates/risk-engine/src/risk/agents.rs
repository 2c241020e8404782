// crates/risk-engine/src/risk/agents.rs
// Phase 2: the ordered specialist agent chain (§4.12, §9 "coroutine-style
// chaining"). Each agent is a pure function over a shared `AgentContext`
// that may block on I/O and must honor a cancellation token; it either
// pushes a `RiskSignal` or leaves the context untouched.
//
// `signal_type` on each emitted signal names the synthesis factor it feeds
// (§4.12 aggregation weights): Incident -> "incident", BlastRadius ->
// "blast_radius", CoChange -> "centrality", Ownership -> "ownership",
// Quality -> "test_coverage", Patterns -> "temporal". The specification
// pins the six factor weights but not which agent feeds which; this
// mapping is the resolution recorded in DESIGN.md.

pub use tokio_util::sync::CancellationToken;

use crate::query::Phase1Data;
use crate::risk::report::RiskSignal;

/// Shared state threaded through the agent chain. `phase1` is read-only;
/// agents append to `risk_signals`.
pub struct AgentContext {
    pub file_path: String,
    pub phase1: Phase1Data,
    pub risk_signals: Vec<RiskSignal>,
}

impl AgentContext {
    pub fn new(file_path: &str, phase1: Phase1Data) -> Self {
        Self {
            file_path: file_path.to_string(),
            phase1,
            risk_signals: Vec::new(),
        }
    }
}

fn severity_for(score: f64) -> &'static str {
    if score >= 0.75 {
        "high"
    } else if score >= 0.4 {
        "medium"
    } else {
        "low"
    }
}

/// Incident agent: recent bug-fix history on this file.
pub fn incident_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    let count = ctx.phase1.incident_history.len();
    if count == 0 {
        return;
    }
    let score = (count as f64 / 5.0).min(1.0);
    ctx.risk_signals.push(RiskSignal {
        agent_name: "Incident".to_string(),
        signal_type: "incident".to_string(),
        severity: severity_for(score).to_string(),
        confidence: 0.8,
        description: format!("{count} bug-fix commit(s) touched this file in the last 180 days"),
        evidence: ctx.phase1.incident_history.iter().map(|c| format!("{}: {}", c.sha, c.message)).collect(),
        impact: "Recurring incidents suggest this area is failure-prone".to_string(),
        mitigation: Some("Add regression tests covering the prior incidents".to_string()),
        score,
        metadata: serde_json::json!({ "incident_count": count }),
    });
}

/// BlastRadius agent: how many files transitively depend on this one.
pub fn blast_radius_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    let total = ctx.phase1.blast_radius.total;
    if total == 0 {
        return;
    }
    let score = (total as f64 / 20.0).min(1.0);
    ctx.risk_signals.push(RiskSignal {
        agent_name: "BlastRadius".to_string(),
        signal_type: "blast_radius".to_string(),
        severity: severity_for(score).to_string(),
        confidence: 0.7,
        description: format!("{total} file(s) transitively depend on this file"),
        evidence: ctx.phase1.blast_radius.sample.clone(),
        impact: "A regression here can propagate to many dependents".to_string(),
        mitigation: None,
        score,
        metadata: serde_json::json!({ "dependency_count": ctx.phase1.dependency_count }),
    });
}

/// CoChange agent: files that historically change alongside this one,
/// folded into the "centrality" synthesis factor.
pub fn co_change_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    if ctx.phase1.co_change_partners.is_empty() {
        return;
    }
    let max_rate = ctx.phase1.co_change_partners.iter().map(|p| p.rate).fold(0.0_f64, f64::max);
    ctx.risk_signals.push(RiskSignal {
        agent_name: "CoChange".to_string(),
        signal_type: "centrality".to_string(),
        severity: severity_for(max_rate).to_string(),
        confidence: 0.6,
        description: format!("{} file(s) consistently change alongside this one", ctx.phase1.co_change_partners.len()),
        evidence: ctx.phase1.co_change_partners.iter().map(|p| format!("{} (rate {:.2})", p.file_path, p.rate)).collect(),
        impact: "Forgetting a coupled file risks an incomplete change".to_string(),
        mitigation: Some("Check the coupled files before merging".to_string()),
        score: max_rate,
        metadata: serde_json::json!({ "partner_count": ctx.phase1.co_change_partners.len() }),
    });
}

/// Ownership agent: whether the file has a clear, recent owner.
pub fn ownership_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    let Some(top_owner) = ctx.phase1.top_owners.first() else {
        ctx.risk_signals.push(RiskSignal {
            agent_name: "Ownership".to_string(),
            signal_type: "ownership".to_string(),
            severity: "medium".to_string(),
            confidence: 0.5,
            description: "No commit history found for an ownership judgment".to_string(),
            evidence: Vec::new(),
            impact: "Reviewers may lack context on this file's history".to_string(),
            mitigation: Some("Route review to a team familiar with this area".to_string()),
            score: 0.5,
            metadata: serde_json::json!({}),
        });
        return;
    };
    let owner_count = ctx.phase1.top_owners.len();
    let score = if owner_count <= 1 { 0.6 } else { 0.2 };
    ctx.risk_signals.push(RiskSignal {
        agent_name: "Ownership".to_string(),
        signal_type: "ownership".to_string(),
        severity: severity_for(score).to_string(),
        confidence: 0.7,
        description: format!("Top owner {} with {} commits", top_owner.developer_email, top_owner.commit_count),
        evidence: ctx.phase1.top_owners.iter().map(|o| format!("{} ({} commits)", o.developer_email, o.commit_count)).collect(),
        impact: if owner_count <= 1 {
            "Single owner; a departure would leave this file unfamiliar to the team".to_string()
        } else {
            "Multiple familiar contributors".to_string()
        },
        mitigation: None,
        score,
        metadata: serde_json::json!({ "owner_count": owner_count }),
    });
}

/// Quality agent: a coverage proxy, folded into the "test_coverage" factor
/// (inverted — low estimated coverage raises risk). No upstream test
/// coverage source exists in the domain model, so this infers from path
/// convention: a file under a `test`/`tests`/`spec` directory or with a
/// `_test`/`.test` suffix is assumed well covered.
pub fn quality_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    let looks_tested = is_test_path(&ctx.file_path);
    let score = if looks_tested { 0.1 } else { 0.6 };
    ctx.risk_signals.push(RiskSignal {
        agent_name: "Quality".to_string(),
        signal_type: "test_coverage".to_string(),
        severity: severity_for(score).to_string(),
        confidence: 0.4,
        description: if looks_tested {
            "File path convention suggests this is test code".to_string()
        } else {
            "No direct evidence of test coverage for this file".to_string()
        },
        evidence: Vec::new(),
        impact: "Untested changes are more likely to regress silently".to_string(),
        mitigation: if looks_tested { None } else { Some("Add or extend tests covering this change".to_string()) },
        score,
        metadata: serde_json::json!({ "path_looks_tested": looks_tested }),
    });
}

fn is_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.split('/').any(|seg| seg == "test" || seg == "tests" || seg == "spec" || seg == "__tests__")
        || lower.ends_with("_test.rs")
        || lower.ends_with(".test.ts")
        || lower.ends_with(".spec.ts")
}

/// Patterns agent: recurring incident pattern, folded into the "temporal"
/// factor. Derives only from already-collected incident history; the LLM
/// pattern summary lives on the block row (Temporal calculator, §4.10) and
/// is out of scope for a live per-commit pass.
pub fn patterns_agent(ctx: &mut AgentContext, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    if ctx.phase1.incident_history.len() < 2 {
        return;
    }
    let score = (ctx.phase1.incident_history.len() as f64 / 5.0).min(1.0);
    ctx.risk_signals.push(RiskSignal {
        agent_name: "Patterns".to_string(),
        signal_type: "temporal".to_string(),
        severity: severity_for(score).to_string(),
        confidence: 0.5,
        description: "Multiple bug-fix commits cluster on this file over time".to_string(),
        evidence: ctx.phase1.incident_history.iter().take(3).map(|c| c.message.clone()).collect(),
        impact: "A recurring pattern rather than a one-off incident".to_string(),
        mitigation: None,
        score,
        metadata: serde_json::json!({}),
    });
}

/// The full ordered chain (§4.12 Phase 2).
pub fn run_agent_chain(ctx: &mut AgentContext, cancel: &CancellationToken) {
    incident_agent(ctx, cancel);
    blast_radius_agent(ctx, cancel);
    co_change_agent(ctx, cancel);
    ownership_agent(ctx, cancel);
    quality_agent(ctx, cancel);
    patterns_agent(ctx, cancel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CoChangePartner, FileOwner, IncidentCommit};

    fn phase1_with_incidents(n: usize) -> Phase1Data {
        Phase1Data {
            incident_history: (0..n)
                .map(|i| IncidentCommit {
                    sha: format!("sha{i}"),
                    message: format!("fix bug {i}"),
                    authored_at: "2026-01-01T00:00:00+00:00".to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_incident_agent_emits_nothing_with_no_history() {
        let mut ctx = AgentContext::new("a.rs", Phase1Data::default());
        incident_agent(&mut ctx, &CancellationToken::new());
        assert!(ctx.risk_signals.is_empty());
    }

    #[test]
    fn test_incident_agent_emits_signal_with_history() {
        let mut ctx = AgentContext::new("a.rs", phase1_with_incidents(3));
        incident_agent(&mut ctx, &CancellationToken::new());
        assert_eq!(ctx.risk_signals.len(), 1);
        assert_eq!(ctx.risk_signals[0].signal_type, "incident");
    }

    #[test]
    fn test_cancellation_short_circuits_agent() {
        let mut ctx = AgentContext::new("a.rs", phase1_with_incidents(3));
        let token = CancellationToken::new();
        token.cancel();
        incident_agent(&mut ctx, &token);
        assert!(ctx.risk_signals.is_empty());
    }

    #[test]
    fn test_patterns_agent_requires_at_least_two_incidents() {
        let mut ctx = AgentContext::new("a.rs", phase1_with_incidents(1));
        patterns_agent(&mut ctx, &CancellationToken::new());
        assert!(ctx.risk_signals.is_empty());

        let mut ctx = AgentContext::new("a.rs", phase1_with_incidents(2));
        patterns_agent(&mut ctx, &CancellationToken::new());
        assert_eq!(ctx.risk_signals.len(), 1);
        assert_eq!(ctx.risk_signals[0].signal_type, "temporal");
    }

    #[test]
    fn test_quality_agent_treats_test_paths_as_lower_risk() {
        let mut ctx = AgentContext::new("src/foo_test.rs", Phase1Data::default());
        quality_agent(&mut ctx, &CancellationToken::new());
        assert_eq!(ctx.risk_signals[0].score, 0.1);
    }

    #[test]
    fn test_ownership_agent_flags_single_owner() {
        let mut ctx = AgentContext::new(
            "a.rs",
            Phase1Data {
                top_owners: vec![FileOwner {
                    developer_email: "solo@x.com".to_string(),
                    commit_count: 5,
                    last_commit_at: "2026-01-01T00:00:00+00:00".to_string(),
                }],
                ..Default::default()
            },
        );
        ownership_agent(&mut ctx, &CancellationToken::new());
        assert_eq!(ctx.risk_signals[0].score, 0.6);
    }

    #[test]
    fn test_co_change_agent_uses_max_rate_as_score() {
        let mut ctx = AgentContext::new(
            "a.rs",
            Phase1Data {
                co_change_partners: vec![
                    CoChangePartner { file_path: "b.rs".to_string(), rate: 0.6 },
                    CoChangePartner { file_path: "c.rs".to_string(), rate: 0.9 },
                ],
                ..Default::default()
            },
        );
        co_change_agent(&mut ctx, &CancellationToken::new());
        assert_eq!(ctx.risk_signals[0].score, 0.9);
    }
}
