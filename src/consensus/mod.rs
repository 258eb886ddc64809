//! Consensus & Variance Engine
//! Weighted per-field merging of candidates into accepted values.

pub mod engine;
pub mod units;
pub mod variance;

pub use engine::{run_consensus, ConsensusInput, ConsensusOutcome, FieldOutcome};
pub use units::{convert, parse_quantity, to_canonical, ParsedQuantity};
pub use variance::VarianceVerdict;
