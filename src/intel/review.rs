//! Promotion, Demotion & Coverage Review
//! Daily suggestions derived from the intel counters, plus the
//! domain-by-field yield matrix and its gap report.

use serde::{Deserialize, Serialize};

use crate::intel::stats::{DomainCounters, IntelState};
use crate::models::{DomainTierMap, FieldRuleSet};

/// Promotion thresholds: a candidate domain earns approval only with a
/// long clean record
const PROMOTE_MIN_PRODUCTS: u32 = 20;
const PROMOTE_MIN_IDENTITY_RATE: f64 = 0.98;
const PROMOTE_MIN_FIELDS_ACCEPTED: u32 = 10;
const PROMOTE_MIN_CRITICAL_ACCEPTED: u32 = 1;

/// Demotion thresholds
const DEMOTE_MIN_ATTEMPTS: u32 = 8;
const DEMOTE_IDENTITY_RATE: f64 = 0.50;
const DEMOTE_HTTP_OK_RATE: f64 = 0.30;
const DEMOTE_CONFLICT_RATE: f64 = 0.40;
const DEMOTE_REWARD_STRENGTH: f64 = -0.30;

/// A field is weak when its best domain yields below this
const WEAK_YIELD: f64 = 0.30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionSuggestion {
    pub domain: String,
    pub products_seen: u32,
    pub identity_match_rate: f64,
    pub fields_accepted: u32,
    pub critical_fields_accepted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemotionSuggestion {
    pub domain: String,
    pub attempts: u32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandExpansionPlan {
    pub brand: String,
    pub domain: String,
    pub planner_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Fields no domain has ever yielded
    pub gaps: Vec<String>,
    /// Fields carried by a single domain or with thin yield
    pub weak: Vec<String>,
}

/// The dated intel artifact the review surface consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelDelta {
    pub date: String,
    pub category: String,
    pub promotion_suggestions: Vec<PromotionSuggestion>,
    pub demotion_suggestions: Vec<DemotionSuggestion>,
    pub brand_expansion_plans: Vec<BrandExpansionPlan>,
    pub coverage: CoverageReport,
}

fn qualifies_for_promotion(counters: &DomainCounters) -> bool {
    counters.products_seen >= PROMOTE_MIN_PRODUCTS
        && counters.identity_match_rate() >= PROMOTE_MIN_IDENTITY_RATE
        && counters.major_anchor_conflict == 0
        && counters.fields_accepted >= PROMOTE_MIN_FIELDS_ACCEPTED
        && counters.critical_fields_accepted >= PROMOTE_MIN_CRITICAL_ACCEPTED
}

pub fn promotion_suggestions(
    state: &IntelState,
    tier_map: &DomainTierMap,
) -> Vec<PromotionSuggestion> {
    let mut out: Vec<PromotionSuggestion> = state
        .domains
        .iter()
        .filter(|(domain, _)| !tier_map.is_approved(domain) && !tier_map.is_denied(domain))
        .filter(|(_, counters)| qualifies_for_promotion(counters))
        .map(|(domain, counters)| PromotionSuggestion {
            domain: domain.clone(),
            products_seen: counters.products_seen,
            identity_match_rate: counters.identity_match_rate(),
            fields_accepted: counters.fields_accepted,
            critical_fields_accepted: counters.critical_fields_accepted,
        })
        .collect();
    out.sort_by(|a, b| a.domain.cmp(&b.domain));
    out
}

pub fn demotion_suggestions(state: &IntelState) -> Vec<DemotionSuggestion> {
    let mut out: Vec<DemotionSuggestion> = state
        .domains
        .iter()
        .filter(|(_, c)| c.attempts >= DEMOTE_MIN_ATTEMPTS)
        .filter_map(|(domain, c)| {
            let mut reasons = Vec::new();
            if c.identity_match_rate() < DEMOTE_IDENTITY_RATE {
                reasons.push("identity_match_rate".to_string());
            }
            if c.http_ok_rate() < DEMOTE_HTTP_OK_RATE {
                reasons.push("http_ok_rate".to_string());
            }
            if c.anchor_conflict_rate() > DEMOTE_CONFLICT_RATE {
                reasons.push("anchor_conflict_rate".to_string());
            }
            if c.field_reward_strength() < DEMOTE_REWARD_STRENGTH {
                reasons.push("field_reward_strength".to_string());
            }
            if reasons.is_empty() {
                None
            } else {
                Some(DemotionSuggestion {
                    domain: domain.clone(),
                    attempts: c.attempts,
                    reasons,
                })
            }
        })
        .collect();
    out.sort_by(|a, b| a.domain.cmp(&b.domain));
    out
}

/// Brand-partitioned domains worth adding to a brand's source plan
pub fn brand_expansion_plans(
    state: &IntelState,
    tier_map: &DomainTierMap,
) -> Vec<BrandExpansionPlan> {
    let mut out: Vec<BrandExpansionPlan> = state
        .brands
        .iter()
        .filter_map(|(key, counters)| {
            let (brand, domain) = key.split_once('|')?;
            if tier_map.is_approved(domain) || tier_map.is_denied(domain) {
                return None;
            }
            if counters.products_seen >= 5 && counters.identity_match_rate() >= 0.90 {
                Some(BrandExpansionPlan {
                    brand: brand.to_string(),
                    domain: domain.to_string(),
                    planner_score: counters.planner_score(),
                })
            } else {
                None
            }
        })
        .collect();
    out.sort_by(|a, b| (a.brand.as_str(), a.domain.as_str()).cmp(&(b.brand.as_str(), b.domain.as_str())));
    out
}

/// Gap report over the domain-by-field yield matrix
pub fn coverage_report(state: &IntelState, rules: &FieldRuleSet) -> CoverageReport {
    let mut gaps = Vec::new();
    let mut weak = Vec::new();

    for rule in &rules.rules {
        let mut contributing = 0usize;
        let mut best_yield = 0.0f64;

        for (domain, fields) in &state.field_matrix {
            if let Some(count) = fields.get(&rule.key) {
                if *count > 0 {
                    contributing += 1;
                    if let Some(counters) = state.domains.get(domain) {
                        let domain_yield = if counters.products_seen == 0 {
                            0.0
                        } else {
                            *count as f64 / counters.products_seen as f64
                        };
                        best_yield = best_yield.max(domain_yield);
                    }
                }
            }
        }

        if contributing == 0 {
            gaps.push(rule.key.clone());
        } else if contributing == 1 || best_yield < WEAK_YIELD {
            weak.push(rule.key.clone());
        }
    }

    CoverageReport { gaps, weak }
}

/// Assemble the dated delta artifact
pub fn build_delta(
    state: &IntelState,
    rules: &FieldRuleSet,
    tier_map: &DomainTierMap,
    category: &str,
    date: &str,
) -> IntelDelta {
    IntelDelta {
        date: date.to_string(),
        category: category.to_string(),
        promotion_suggestions: promotion_suggestions(state, tier_map),
        demotion_suggestions: demotion_suggestions(state),
        brand_expansion_plans: brand_expansion_plans(state, tier_map),
        coverage: coverage_report(state, rules),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldRule, FieldType};
    use std::collections::HashMap;

    fn clean_counters(products: u32, fields_accepted: u32, critical: u32) -> DomainCounters {
        DomainCounters {
            attempts: products,
            http_ok: products,
            identity_match: products,
            major_anchor_conflict: 0,
            fields_accepted,
            fields_contributed: fields_accepted,
            critical_fields_accepted: critical,
            field_helpfulness: HashMap::new(),
            products_seen: products,
            recent_products: Vec::new(),
        }
    }

    #[test]
    fn promotion_requires_every_threshold() {
        let mut state = IntelState::default();
        state
            .domains
            .insert("clean.com".to_string(), clean_counters(25, 40, 3));
        // One product short
        state
            .domains
            .insert("young.com".to_string(), clean_counters(19, 40, 3));
        // No critical field ever accepted
        state
            .domains
            .insert("shallow.com".to_string(), clean_counters(25, 40, 0));
        // One anchor conflict disqualifies
        let mut conflicted = clean_counters(25, 40, 3);
        conflicted.major_anchor_conflict = 1;
        state.domains.insert("conflicted.com".to_string(), conflicted);

        let suggestions = promotion_suggestions(&state, &DomainTierMap::default());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].domain, "clean.com");
    }

    #[test]
    fn approved_domains_never_suggested_again() {
        let mut state = IntelState::default();
        state
            .domains
            .insert("razer.com".to_string(), clean_counters(25, 40, 3));

        let tier_map = DomainTierMap {
            approved: vec!["razer.com".to_string()],
            ..DomainTierMap::default()
        };
        assert!(promotion_suggestions(&state, &tier_map).is_empty());
    }

    #[test]
    fn demotion_triggers_on_any_bad_rate() {
        let mut state = IntelState::default();

        let mut flaky = DomainCounters {
            attempts: 10,
            http_ok: 2,
            identity_match: 8,
            ..DomainCounters::default()
        };
        flaky.products_seen = 10;
        state.domains.insert("flaky.com".to_string(), flaky);

        // Too few attempts to judge
        let young = DomainCounters {
            attempts: 3,
            http_ok: 0,
            ..DomainCounters::default()
        };
        state.domains.insert("young.com".to_string(), young);

        let suggestions = demotion_suggestions(&state);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].domain, "flaky.com");
        assert!(suggestions[0]
            .reasons
            .contains(&"http_ok_rate".to_string()));
    }

    #[test]
    fn coverage_gaps_and_weak_fields() {
        let rules = FieldRuleSet {
            category: "mice".to_string(),
            rules: vec![
                FieldRule::new("dpi", FieldType::Integer),
                FieldRule::new("weight", FieldType::Number),
                FieldRule::new("cable_type", FieldType::String),
            ],
        };

        let mut state = IntelState::default();
        state
            .domains
            .insert("razer.com".to_string(), clean_counters(10, 20, 2));
        state
            .domains
            .insert("rtings.com".to_string(), clean_counters(10, 20, 2));

        // dpi yielded by two domains, weight by one, cable_type by none
        state.field_matrix.insert(
            "razer.com".to_string(),
            [("dpi".to_string(), 8), ("weight".to_string(), 7)]
                .into_iter()
                .collect(),
        );
        state.field_matrix.insert(
            "rtings.com".to_string(),
            [("dpi".to_string(), 9)].into_iter().collect(),
        );

        let report = coverage_report(&state, &rules);
        assert_eq!(report.gaps, vec!["cable_type"]);
        assert_eq!(report.weak, vec!["weight"]);
    }
}
