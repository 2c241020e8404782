// crates/risk-engine/src/risk/mod.rs
// The risk chain (§4.12, L13): Phase-0 heuristic filter, the Phase 1-4
// agent chain, and the report shapes the orchestrator returns.

pub mod agents;
pub mod heuristic;
pub mod orchestrator;
pub mod report;

pub use agents::{run_agent_chain, AgentContext, CancellationToken};
pub use heuristic::{classify, HeuristicResult};
pub use orchestrator::ChainOrchestrator;
pub use report::{PhaseResult, Phase1DataView, RiskLevel, RiskReport, RiskSignal};
