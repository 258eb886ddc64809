//! Convergence Controller
//! The per-product loop: source planning, fetching, gating, consensus,
//! and the decision to keep digging or stop.

pub mod controller;
pub mod planner;
pub mod stop;
pub mod summary;

pub use controller::{ControllerDeps, ConvergenceController, ProductRunArtifacts};
pub use planner::{plan_queries, rerank_hits, select_tier, PlannedQuery, RoundTier};
pub use stop::{uber_stop_decision, StopDecision, StopInputs};
pub use summary::{
    build_normalized_spec, build_run_summary, summarize_round, traffic_map, RoundSummary,
};
