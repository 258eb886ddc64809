//! Variance Policies
//! How far an observed value may drift from a reference before it stops
//! counting, per field rule.

use serde::{Deserialize, Serialize};

use crate::models::VariancePolicy;

/// Authoritative values within this relative band still score 0.9
const NEAR_EXACT_BAND: f64 = 0.05;

/// Range policy tolerance
const RANGE_BAND: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceVerdict {
    /// Contribution multiplier in [0, 1]
    pub score: f64,
    /// True when the pair breaks the policy and needs human/AI review
    pub violation: bool,
}

impl VarianceVerdict {
    fn full() -> Self {
        Self {
            score: 1.0,
            violation: false,
        }
    }
}

impl VariancePolicy {
    /// Compare an observed numeric value against a reference
    pub fn compare(&self, observed: f64, reference: f64) -> VarianceVerdict {
        let rel = relative_diff(observed, reference);

        match self {
            VariancePolicy::Authoritative | VariancePolicy::OverrideAllowed => {
                if rel < 1e-9 {
                    VarianceVerdict::full()
                } else if rel <= NEAR_EXACT_BAND {
                    VarianceVerdict {
                        score: 0.9,
                        violation: false,
                    }
                } else {
                    // Graduated falloff; far-off values stop contributing
                    VarianceVerdict {
                        score: (0.9 - rel).max(0.0),
                        violation: rel > 0.25,
                    }
                }
            }
            VariancePolicy::UpperBound => {
                if observed <= reference {
                    VarianceVerdict::full()
                } else {
                    VarianceVerdict {
                        score: if observed > 0.0 { reference / observed } else { 0.0 },
                        violation: true,
                    }
                }
            }
            VariancePolicy::LowerBound => {
                if observed >= reference {
                    VarianceVerdict::full()
                } else {
                    VarianceVerdict {
                        score: if reference > 0.0 { observed / reference } else { 0.0 },
                        violation: true,
                    }
                }
            }
            VariancePolicy::Range => {
                if rel <= RANGE_BAND {
                    VarianceVerdict::full()
                } else {
                    VarianceVerdict {
                        score: (1.0 - (rel - RANGE_BAND) * 2.0).max(0.0),
                        violation: true,
                    }
                }
            }
        }
    }

    /// Whether two observed values belong in the same cluster
    pub fn compatible(&self, a: f64, b: f64) -> bool {
        match self {
            VariancePolicy::Authoritative | VariancePolicy::OverrideAllowed => {
                relative_diff(a, b) <= NEAR_EXACT_BAND
            }
            // Bounded policies cluster anything on the allowed side together
            VariancePolicy::UpperBound | VariancePolicy::LowerBound => true,
            VariancePolicy::Range => relative_diff(a, b) <= RANGE_BAND,
        }
    }
}

fn relative_diff(observed: f64, reference: f64) -> f64 {
    let denom = reference.abs().max(1e-12);
    (observed - reference).abs() / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authoritative_bands() {
        let p = VariancePolicy::Authoritative;
        assert_eq!(p.compare(100.0, 100.0).score, 1.0);

        let near = p.compare(103.0, 100.0);
        assert!((near.score - 0.9).abs() < 1e-9);
        assert!(!near.violation);

        let far = p.compare(150.0, 100.0);
        assert!(far.score < 0.5);
        assert!(far.violation);
    }

    #[test]
    fn upper_bound_allows_below_reference() {
        let p = VariancePolicy::UpperBound;

        // A sensor rated to 18000 dpi may be shipped capped at 16000
        let under = p.compare(16000.0, 18000.0);
        assert_eq!(under.score, 1.0);
        assert!(!under.violation);

        let over = p.compare(20000.0, 18000.0);
        assert!((over.score - 0.9).abs() < 1e-9);
        assert!(over.violation);
    }

    #[test]
    fn lower_bound_mirrors_upper() {
        let p = VariancePolicy::LowerBound;
        assert_eq!(p.compare(120.0, 100.0).score, 1.0);

        let under = p.compare(50.0, 100.0);
        assert!((under.score - 0.5).abs() < 1e-9);
        assert!(under.violation);
    }

    #[test]
    fn range_tolerates_ten_percent() {
        let p = VariancePolicy::Range;
        assert_eq!(p.compare(108.0, 100.0).score, 1.0);
        assert!(p.compare(130.0, 100.0).violation);
    }

    #[test]
    fn override_allowed_tracks_authoritative() {
        let a = VariancePolicy::Authoritative.compare(104.0, 100.0);
        let o = VariancePolicy::OverrideAllowed.compare(104.0, 100.0);
        assert_eq!(a, o);
    }

    #[test]
    fn clustering_compatibility() {
        assert!(VariancePolicy::Authoritative.compatible(100.0, 103.0));
        assert!(!VariancePolicy::Authoritative.compatible(100.0, 120.0));
        assert!(VariancePolicy::UpperBound.compatible(16000.0, 18000.0));
        assert!(VariancePolicy::Range.compatible(100.0, 109.0));
    }
}
