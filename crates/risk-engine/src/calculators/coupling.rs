// crates/risk-engine/src/calculators/coupling.rs
// Coupling Calculator (§4.9, L10): discovers code blocks that change
// together, persists rows above the co-change-rate floor (I3), aggregates
// per-block coupling, and rolls everything into the composite risk score.
// Pair discovery here mirrors the teacher's file-level co-change detector
// but at block granularity and with the rate formula the specification
// pins (co_change_count / total_changes_a, not a Jaccard union).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::RiskWeights;
use crate::db::models::{CodeBlock, CodeBlockCoupling};
use crate::db::writer;
use crate::db::DatabasePool;
use crate::error::Result;
use crate::graph::{GraphStore, NodeLabel};
use crate::llm::LlmClient;

const TOP_RATIONALE_PAIRS: usize = 10;
const RATIONALE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct CouplingSummary {
    pub pairs_persisted: usize,
    pub pairs_dropped_below_threshold: usize,
}

struct PairAggregate {
    co_change_count: i64,
    last_co_changed_at: String,
    a_changes: i64,
}

/// Step 1: discover unordered block pairs co-modified by the same commit
/// and compute `co_change_rate = co_change_count / total_changes_a` (§4.9).
fn discover_pairs(
    changes: &[writer::ChangeRow],
    weights: &RiskWeights,
) -> HashMap<(String, String), CodeBlockCoupling> {
    let mut blocks_by_commit: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut total_changes: HashMap<&str, i64> = HashMap::new();

    for change in changes {
        blocks_by_commit
            .entry(&change.commit_sha)
            .or_default()
            .insert(&change.code_block_id);
        *total_changes.entry(&change.code_block_id).or_insert(0) += 1;
    }

    let mut commit_times: HashMap<&str, &str> = HashMap::new();
    for change in changes {
        let latest = commit_times.entry(change.commit_sha.as_str()).or_insert(change.changed_at.as_str());
        if change.changed_at.as_str() > *latest {
            *latest = change.changed_at.as_str();
        }
    }

    let mut pairs: HashMap<(String, String), PairAggregate> = HashMap::new();
    for (commit_sha, blocks) in &blocks_by_commit {
        let mut sorted: Vec<&&str> = blocks.iter().collect();
        sorted.sort();
        let changed_at = commit_times.get(commit_sha).copied().unwrap_or_default();
        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let (a, b) = CodeBlockCoupling::canonical_pair(sorted[i], sorted[j]);
                let entry = pairs.entry((a.to_string(), b.to_string())).or_insert(PairAggregate {
                    co_change_count: 0,
                    last_co_changed_at: changed_at.to_string(),
                    a_changes: *total_changes.get(a).unwrap_or(&0),
                });
                entry.co_change_count += 1;
                if changed_at > entry.last_co_changed_at {
                    entry.last_co_changed_at = changed_at.to_string();
                }
            }
        }
    }

    let mut result = HashMap::new();
    for ((a, b), aggregate) in pairs {
        if aggregate.a_changes == 0 {
            continue;
        }
        let rate = aggregate.co_change_count as f64 / aggregate.a_changes as f64;
        if rate < weights.coupling_rate_threshold {
            continue;
        }
        result.insert(
            (a.clone(), b.clone()),
            CodeBlockCoupling {
                repo_id: String::new(),
                block_a_id: a,
                block_b_id: b,
                co_change_count: aggregate.co_change_count,
                co_change_rate: rate,
                rationale: None,
                updated_at: aggregate.last_co_changed_at,
            },
        );
    }
    result
}

/// Run the full coupling pipeline for a repository: pair discovery, graph
/// sync, optional LLM rationale for the top pairs, block-level aggregates,
/// and the composite risk score (§4.9 steps 1-5).
pub async fn run_coupling_calculator(
    pool: &DatabasePool,
    graph: &mut GraphStore,
    llm: &dyn LlmClient,
    repo_id: &str,
    weights: &RiskWeights,
) -> Result<CouplingSummary> {
    let changes = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_all_changes(conn, &repo_id)
        })
        .await?;

    let existing = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_couplings(conn, &repo_id)
        })
        .await?;

    let mut qualifying = discover_pairs(&changes, weights);
    for (_, coupling) in qualifying.iter_mut() {
        coupling.repo_id = repo_id.to_string();
    }

    let mut summary = CouplingSummary::default();

    for old in &existing {
        let key = (old.block_a_id.clone(), old.block_b_id.clone());
        if !qualifying.contains_key(&key) {
            pool.run_with_retry({
                let repo_id = repo_id.to_string();
                let a = old.block_a_id.clone();
                let b = old.block_b_id.clone();
                move |conn| writer::delete_coupling_below_threshold(conn, &repo_id, &a, &b)
            })
            .await?;
            summary.pairs_dropped_below_threshold += 1;
        }
    }

    // Step 3: LLM rationale for the top pairs by rate, rate-limited.
    let mut by_rate: Vec<&mut CodeBlockCoupling> = qualifying.values_mut().collect();
    by_rate.sort_by(|a, b| b.co_change_rate.partial_cmp(&a.co_change_rate).unwrap_or(std::cmp::Ordering::Equal));
    if llm.is_enabled() {
        for coupling in by_rate.into_iter().take(TOP_RATIONALE_PAIRS) {
            let prompt = format!(
                "Given these two code blocks, {} and {}, explain in 1-2 sentences why they likely change together.",
                coupling.block_a_id, coupling.block_b_id
            );
            if let Ok(text) = llm
                .complete("You are a software change-pattern analyst.", &prompt)
                .await
            {
                coupling.rationale = Some(text);
            }
            tokio::time::sleep(RATIONALE_INTERVAL).await;
        }
    }

    for coupling in qualifying.values() {
        pool.run_with_retry({
            let coupling = coupling.clone();
            move |conn| writer::upsert_coupling(conn, &coupling)
        })
        .await?;
        graph.upsert_co_change_edge(
            &coupling.block_a_id,
            &coupling.block_b_id,
            coupling.co_change_count,
            coupling.co_change_rate,
            &coupling.updated_at,
        );
        summary.pairs_persisted += 1;
    }

    // Step 4: block-level aggregates from the surviving edge set.
    let mut co_change_count: HashMap<String, i64> = HashMap::new();
    let mut rate_sum: HashMap<String, f64> = HashMap::new();
    let mut edge_count: HashMap<String, i64> = HashMap::new();
    for coupling in qualifying.values() {
        for block_id in [&coupling.block_a_id, &coupling.block_b_id] {
            *co_change_count.entry(block_id.clone()).or_insert(0) += 1;
            *rate_sum.entry(block_id.clone()).or_insert(0.0) += coupling.co_change_rate;
            *edge_count.entry(block_id.clone()).or_insert(0) += 1;
        }
    }

    let all_blocks = pool
        .run({
            let repo_id = repo_id.to_string();
            move |conn| writer::load_all_blocks(conn, &repo_id)
        })
        .await?;

    let now = Utc::now();
    let raw_scores: HashMap<String, f64> = all_blocks
        .iter()
        .map(|b| {
            let count = *co_change_count.get(&b.id).unwrap_or(&0);
            let avg_rate = edge_count
                .get(&b.id)
                .filter(|&&n| n > 0)
                .map(|&n| rate_sum.get(&b.id).copied().unwrap_or(0.0) / n as f64)
                .unwrap_or(0.0);
            (b.id.clone(), composite_raw_score(b, count, avg_rate, weights, now))
        })
        .collect();

    let max_raw = raw_scores.values().cloned().fold(0.0_f64, f64::max);

    for block in &all_blocks {
        let count = *co_change_count.get(&block.id).unwrap_or(&0);
        let avg_rate = edge_count
            .get(&block.id)
            .filter(|&&n| n > 0)
            .map(|&n| rate_sum.get(&block.id).copied().unwrap_or(0.0) / n as f64)
            .unwrap_or(0.0);
        let raw = raw_scores.get(&block.id).copied().unwrap_or(0.0);
        let risk_score = if max_raw > 0.0 { raw / max_raw * 100.0 } else { 0.0 };

        pool.run_with_retry({
            let block_id = block.id.clone();
            let indexed_at = now.to_rfc3339();
            move |conn| writer::mark_coupling_indexed(conn, &block_id, count, avg_rate, risk_score, &indexed_at)
        })
        .await?;

        let mut props = HashMap::new();
        props.insert("co_change_count".to_string(), serde_json::json!(count));
        props.insert("avg_coupling_rate".to_string(), serde_json::json!(avg_rate));
        props.insert("risk_score".to_string(), serde_json::json!(risk_score));
        graph.upsert_node(NodeLabel::CodeBlock, &block.id, props);
    }

    Ok(summary)
}

/// `complexity_estimate` is approximated from the block's own span — the
/// specification leaves its derivation open; line count is the cheapest
/// proxy available without a language-aware parser.
fn complexity_estimate(block: &CodeBlock) -> f64 {
    let lines = (block.end_line - block.start_line + 1).max(1) as f64;
    (lines / 50.0).min(1.0)
}

fn recency_multiplier(block: &CodeBlock, weights: &RiskWeights, now: DateTime<Utc>) -> f64 {
    let Some(last_incident) = &block.last_incident_date else {
        return 0.0;
    };
    let Ok(ts) = DateTime::parse_from_rfc3339(last_incident) else {
        return weights.recency_old_multiplier;
    };
    let days = (now - ts.with_timezone(&Utc)).num_days();
    if days <= weights.recency_recent_days {
        weights.recency_recent_multiplier
    } else if days <= weights.recency_stale_days {
        weights.recency_stale_multiplier
    } else {
        weights.recency_old_multiplier
    }
}

fn composite_raw_score(
    block: &CodeBlock,
    co_change_count: i64,
    avg_coupling_rate: f64,
    weights: &RiskWeights,
    now: DateTime<Utc>,
) -> f64 {
    let temporal = if block.incident_count == 0 {
        0.0
    } else {
        block.incident_count as f64 * recency_multiplier(block, weights, now)
    };
    let ownership = (block.staleness_days.unwrap_or(0) as f64 / 365.0) * complexity_estimate(block);
    let coupling = co_change_count as f64 * avg_coupling_rate;

    weights.composite_temporal * temporal
        + weights.composite_ownership * ownership
        + weights.composite_coupling * coupling
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(block_id: &str, sha: &str, at: &str) -> writer::ChangeRow {
        writer::ChangeRow {
            code_block_id: block_id.to_string(),
            commit_sha: sha.to_string(),
            developer_email: "dev@acme.com".to_string(),
            changed_at: at.to_string(),
        }
    }

    #[test]
    fn test_scenario_s4_co_change_discovery() {
        // Three commits modify {A,B} together; A alone is modified once more.
        let changes = vec![
            change("A", "c1", "2026-01-01T00:00:00Z"),
            change("B", "c1", "2026-01-01T00:00:00Z"),
            change("A", "c2", "2026-01-02T00:00:00Z"),
            change("B", "c2", "2026-01-02T00:00:00Z"),
            change("A", "c3", "2026-01-03T00:00:00Z"),
            change("B", "c3", "2026-01-03T00:00:00Z"),
            change("A", "c4", "2026-01-04T00:00:00Z"),
        ];
        let weights = RiskWeights::default();
        let pairs = discover_pairs(&changes, &weights);
        let pair = pairs.get(&("A".to_string(), "B".to_string())).unwrap();
        assert_eq!(pair.co_change_count, 3);
        assert!((pair.co_change_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_pairs_below_threshold_are_dropped() {
        let changes = vec![
            change("A", "c1", "2026-01-01T00:00:00Z"),
            change("B", "c1", "2026-01-01T00:00:00Z"),
            change("A", "c2", "2026-01-02T00:00:00Z"),
            change("A", "c3", "2026-01-03T00:00:00Z"),
            change("A", "c4", "2026-01-04T00:00:00Z"),
        ];
        let weights = RiskWeights::default();
        let pairs = discover_pairs(&changes, &weights);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_canonical_pair_ordering_is_enforced() {
        let changes = vec![
            change("zzz", "c1", "2026-01-01T00:00:00Z"),
            change("aaa", "c1", "2026-01-01T00:00:00Z"),
        ];
        let weights = RiskWeights {
            coupling_rate_threshold: 0.0,
            ..RiskWeights::default()
        };
        let pairs = discover_pairs(&changes, &weights);
        assert!(pairs.contains_key(&("aaa".to_string(), "zzz".to_string())));
    }
}
