//! Source Planner
//! Deterministic query templates per round tier, plus SERP rerank by
//! domain track record. The LLM planner only ever adds to this.

use serde::{Deserialize, Serialize};

use crate::frontier::{root_domain, FrontierStore};
use crate::intel::DomainIntelStore;
use crate::models::{DomainTierMap, FieldRuleSet, IdentityLock};
use crate::search::SearchHit;

/// Round depth tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundTier {
    Tier0,
    Tier1,
    Tier2,
    Tier3,
}

impl RoundTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundTier::Tier0 => "tier0",
            RoundTier::Tier1 => "tier1",
            RoundTier::Tier2 => "tier2",
            RoundTier::Tier3 => "tier3",
        }
    }
}

/// Tier selection: seeds first, planned queries next, then expansion;
/// the deepest tier only unlocks when progress has stalled with
/// required/critical fields still missing.
pub fn select_tier(
    round: u32,
    required_or_critical_missing: bool,
    no_progress_rounds: u32,
    no_progress_limit: u32,
) -> RoundTier {
    match round {
        0 => RoundTier::Tier0,
        1 => RoundTier::Tier1,
        2 => RoundTier::Tier2,
        _ => {
            if required_or_critical_missing && no_progress_rounds >= no_progress_limit {
                RoundTier::Tier3
            } else {
                RoundTier::Tier2
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedQuery {
    pub query: String,
    pub fields: Vec<String>,
}

/// Deterministic query templates for a round
pub fn plan_queries(
    lock: &IdentityLock,
    rules: &FieldRuleSet,
    missing_fields: &[String],
    tier: RoundTier,
    top_domains: &[String],
    max_queries: usize,
) -> Vec<PlannedQuery> {
    let mut out: Vec<PlannedQuery> = Vec::new();
    let name = match &lock.variant {
        Some(variant) => format!("{} {} {}", lock.brand, lock.model, variant),
        None => format!("{} {}", lock.brand, lock.model),
    };

    if tier == RoundTier::Tier0 {
        // Seed URLs only; no queries dispatched
        return out;
    }

    out.push(PlannedQuery {
        query: format!("{} specs", name),
        fields: missing_fields.to_vec(),
    });
    out.push(PlannedQuery {
        query: format!("{} specifications", name),
        fields: missing_fields.to_vec(),
    });

    if let Some(sku) = &lock.sku {
        out.push(PlannedQuery {
            query: format!("{} {}", lock.brand, sku),
            fields: missing_fields.to_vec(),
        });
    }

    if matches!(tier, RoundTier::Tier2 | RoundTier::Tier3) {
        out.push(PlannedQuery {
            query: format!("{} review", name),
            fields: missing_fields.to_vec(),
        });

        // Field-targeted queries for what is still missing
        for field in missing_fields {
            let label = rules
                .get(field)
                .map(|r| r.key.replace('_', " "))
                .unwrap_or_else(|| field.replace('_', " "));
            out.push(PlannedQuery {
                query: format!("{} {}", name, label),
                fields: vec![field.clone()],
            });
        }

        // Site-scoped probes on domains that have earned trust
        for domain in top_domains.iter().take(3) {
            out.push(PlannedQuery {
                query: format!("site:{} {}", domain, name),
                fields: missing_fields.to_vec(),
            });
        }
    }

    if tier == RoundTier::Tier3 {
        out.push(PlannedQuery {
            query: format!("{} spec sheet", name),
            fields: missing_fields.to_vec(),
        });
        out.push(PlannedQuery {
            query: format!("\"{}\" datasheet", name),
            fields: missing_fields.to_vec(),
        });
    }

    out.truncate(max_queries);
    out
}

/// Deterministic SERP rerank: domain track record, credibility tier, and
/// frontier penalties. Denied domains drop out entirely.
pub fn rerank_hits(
    hits: Vec<SearchHit>,
    intel: &DomainIntelStore,
    frontier: &FrontierStore,
    tier_map: &DomainTierMap,
) -> Vec<SearchHit> {
    let mut scored: Vec<(f64, SearchHit)> = hits
        .into_iter()
        .filter_map(|hit| {
            let root = root_domain(&hit.host);
            if tier_map.is_denied(&root) {
                return None;
            }

            let tier_boost = match tier_map.tier_for(&root) {
                1 => 0.5,
                2 => 0.35,
                3 => 0.15,
                _ => 0.0,
            };
            let score = intel.planner_score(&root)
                + tier_boost
                + 0.5 * frontier.rank_penalty_for_url(&hit.url)
                - 0.02 * hit.rank as f64;
            Some((score, hit))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.rank.cmp(&b.1.rank))
            .then_with(|| a.1.url.cmp(&b.1.url))
    });
    scored.into_iter().map(|(_, hit)| hit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontierConfig;
    use crate::models::{DomainAssignment, SourceRole};
    use crate::storage::FileStorage;

    #[test]
    fn tier_selection_follows_round_table() {
        assert_eq!(select_tier(0, true, 0, 2), RoundTier::Tier0);
        assert_eq!(select_tier(1, true, 0, 2), RoundTier::Tier1);
        assert_eq!(select_tier(2, true, 0, 2), RoundTier::Tier2);
        // Stalled with required fields missing: deepest tier
        assert_eq!(select_tier(3, true, 2, 2), RoundTier::Tier3);
        // Still making progress: stay on tier2
        assert_eq!(select_tier(3, true, 1, 2), RoundTier::Tier2);
        // Only expected fields missing: tier2 even when stalled
        assert_eq!(select_tier(4, false, 2, 2), RoundTier::Tier2);
    }

    #[test]
    fn tier0_plans_no_queries() {
        let lock = IdentityLock::new("p1", "Razer", "Viper V3");
        let rules = FieldRuleSet::default();
        let queries = plan_queries(&lock, &rules, &[], RoundTier::Tier0, &[], 12);
        assert!(queries.is_empty());
    }

    #[test]
    fn deeper_tiers_add_targeted_queries() {
        let lock = IdentityLock::new("p1", "Razer", "Viper V3").with_sku("RZ01-0512");
        let rules = FieldRuleSet::default();
        let missing = vec!["polling_rate".to_string()];

        let tier1 = plan_queries(&lock, &rules, &missing, RoundTier::Tier1, &[], 12);
        let tier2 = plan_queries(
            &lock,
            &rules,
            &missing,
            RoundTier::Tier2,
            &["rtings.com".to_string()],
            12,
        );

        assert!(tier1.len() < tier2.len());
        assert!(tier2
            .iter()
            .any(|q| q.query == "Razer Viper V3 polling rate"));
        assert!(tier2
            .iter()
            .any(|q| q.query.starts_with("site:rtings.com")));
        // Every tier keeps the sku probe
        assert!(tier1.iter().any(|q| q.query == "Razer RZ01-0512"));
    }

    #[test]
    fn query_budget_is_respected() {
        let lock = IdentityLock::new("p1", "Razer", "Viper V3");
        let rules = FieldRuleSet::default();
        let missing: Vec<String> = (0..20).map(|i| format!("field_{}", i)).collect();

        let queries = plan_queries(&lock, &rules, &missing, RoundTier::Tier3, &[], 10);
        assert_eq!(queries.len(), 10);
    }

    #[test]
    fn rerank_prefers_trusted_domains_and_drops_denied() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let frontier = FrontierStore::open(
            storage.clone(),
            "mice",
            FrontierConfig {
                query_cooldown_secs: 21600,
                cooldown_404_secs: 259200,
                cooldown_404_repeat_secs: 1209600,
                cooldown_410_secs: 7776000,
                cooldown_timeout_secs: 21600,
                cooldown_403_base_secs: 1800,
                cooldown_429_base_secs: 900,
                path_penalty_notfound_threshold: 3,
            },
        )
        .unwrap();
        let intel = DomainIntelStore::open(storage, "mice").unwrap();

        let tier_map = DomainTierMap {
            assignments: vec![DomainAssignment {
                domain: "razer.com".to_string(),
                tier: 1,
                role: SourceRole::Manufacturer,
            }],
            approved: vec!["razer.com".to_string()],
            denied: vec!["spamreviews.biz".to_string()],
        };

        let hit = |url: &str, host: &str, rank: u32| SearchHit {
            url: url.to_string(),
            title: "t".to_string(),
            snippet: "s".to_string(),
            host: host.to_string(),
            rank,
        };

        let hits = vec![
            hit("https://spamreviews.biz/viper", "spamreviews.biz", 1),
            hit("https://randomblog.net/viper", "randomblog.net", 2),
            hit("https://razer.com/viper-v3", "www.razer.com", 3),
        ];

        let ranked = rerank_hits(hits, &intel, &frontier, &tier_map);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].url.contains("razer.com"));
    }
}
