//! Domain Intel & Learning
//! What each domain has earned: trust rates, yield matrices, and the
//! promotion/demotion suggestions the review surface consumes.

pub mod review;
pub mod stats;

pub use review::{
    brand_expansion_plans, build_delta, coverage_report, demotion_suggestions,
    promotion_suggestions, BrandExpansionPlan, CoverageReport, DemotionSuggestion, IntelDelta,
    PromotionSuggestion,
};
pub use stats::{DomainCounters, DomainIntelStore, IntelState};
