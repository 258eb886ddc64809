//! HarvestBot Backend Library
//!
//! The per-product extraction convergence loop: polite fetching through a
//! tiered fetcher hierarchy, identity gating, weighted field consensus,
//! and frontier/domain-intel bookkeeping.

pub mod config;
pub mod consensus;
pub mod convergence;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod identity;
pub mod intel;
pub mod llm;
pub mod models;
pub mod robots;
pub mod search;
pub mod storage;

// Re-export the wiring surface for binaries and tests
pub use config::Config;
pub use convergence::{ControllerDeps, ConvergenceController, ProductRunArtifacts};
pub use storage::FileStorage;
