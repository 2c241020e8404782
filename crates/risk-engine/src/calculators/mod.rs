// crates/risk-engine/src/calculators/mod.rs
// Offline aggregate calculators (§4.8-4.10, L9-L11): ownership, coupling,
// and temporal incident linking. Each runs after ingest, reading the
// relational store and syncing its results back to it and the graph mirror.

pub mod coupling;
pub mod ownership;
pub mod temporal;

pub use coupling::{run_coupling_calculator, CouplingSummary};
pub use ownership::{calculate_semantic_importance, run_ownership_calculator, ImportanceBand, OwnershipSummary};
pub use temporal::{run_temporal_calculator, TemporalSummary};
