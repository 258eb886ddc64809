//! Domain Intel Counters
//! Per (category, domain) learning: how often a domain resolves, matches
//! identity, and actually feeds accepted fields. Brand-partitioned too.

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::FileStorage;

/// Recent products remembered per domain
const MAX_RECENT_PRODUCTS: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainCounters {
    pub attempts: u32,
    pub http_ok: u32,
    pub identity_match: u32,
    pub major_anchor_conflict: u32,
    pub fields_accepted: u32,
    pub fields_contributed: u32,
    pub critical_fields_accepted: u32,
    /// field -> running helpfulness (+1 accepted, -1 conflicted)
    pub field_helpfulness: HashMap<String, f64>,
    pub products_seen: u32,
    pub recent_products: Vec<String>,
}

impl DomainCounters {
    pub fn http_ok_rate(&self) -> f64 {
        rate(self.http_ok, self.attempts)
    }

    pub fn identity_match_rate(&self) -> f64 {
        rate(self.identity_match, self.attempts)
    }

    pub fn anchor_conflict_rate(&self) -> f64 {
        rate(self.major_anchor_conflict, self.attempts)
    }

    pub fn acceptance_yield(&self) -> f64 {
        rate(self.fields_accepted, self.fields_contributed)
    }

    /// Mean helpfulness across contributed fields, in [-1, 1]
    pub fn field_reward_strength(&self) -> f64 {
        if self.field_helpfulness.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.field_helpfulness.values().sum();
        (sum / self.field_helpfulness.len() as f64).clamp(-1.0, 1.0)
    }

    pub fn planner_score(&self) -> f64 {
        0.5 * self.identity_match_rate()
            + 0.2 * (1.0 - self.anchor_conflict_rate())
            + 0.1 * self.http_ok_rate()
            + 0.2 * (10.0 * self.acceptance_yield()).min(1.0)
    }

    fn note_product(&mut self, product_id: &str) {
        if !self.recent_products.iter().any(|p| p == product_id) {
            self.products_seen += 1;
            self.recent_products.push(product_id.to_string());
            if self.recent_products.len() > MAX_RECENT_PRODUCTS {
                self.recent_products.remove(0);
            }
        }
    }
}

fn rate(num: u32, denom: u32) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntelState {
    pub domains: HashMap<String, DomainCounters>,
    /// Keyed "brand|domain"
    pub brands: HashMap<String, DomainCounters>,
    /// (domain, field) -> accepted yield count
    pub field_matrix: HashMap<String, HashMap<String, u32>>,
}

/// Durable per-category domain intel. Updates land between rounds;
/// reads happen during planning.
pub struct DomainIntelStore {
    state: Mutex<IntelState>,
    storage: FileStorage,
    key: String,
}

impl DomainIntelStore {
    pub fn open(storage: FileStorage, category: &str) -> Result<Self> {
        let key = format!("intel/{}.json", category);
        let state: IntelState = storage.read_json(&key)?.unwrap_or_default();
        info!(category = %category, domains = state.domains.len(), "Domain intel loaded");
        Ok(Self {
            state: Mutex::new(state),
            storage,
            key,
        })
    }

    pub fn save(&self) -> Result<()> {
        let state = self.state.lock();
        self.storage.write_json(&self.key, &*state)
    }

    pub fn record_attempt(&self, domain: &str, brand: &str, product_id: &str, http_ok: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for counters in [
            state.domains.entry(domain.to_string()).or_default(),
            state
                .brands
                .entry(brand_key(brand, domain))
                .or_default(),
        ] {
            counters.attempts += 1;
            if http_ok {
                counters.http_ok += 1;
            }
            counters.note_product(product_id);
        }
    }

    pub fn record_identity(
        &self,
        domain: &str,
        brand: &str,
        matched: bool,
        anchor_conflict: bool,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for counters in [
            state.domains.entry(domain.to_string()).or_default(),
            state
                .brands
                .entry(brand_key(brand, domain))
                .or_default(),
        ] {
            if matched {
                counters.identity_match += 1;
            }
            if anchor_conflict {
                counters.major_anchor_conflict += 1;
            }
        }
    }

    pub fn record_field_contribution(
        &self,
        domain: &str,
        brand: &str,
        field: &str,
        accepted: bool,
        critical: bool,
        conflicted: bool,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for counters in [
            state.domains.entry(domain.to_string()).or_default(),
            state
                .brands
                .entry(brand_key(brand, domain))
                .or_default(),
        ] {
            counters.fields_contributed += 1;
            if accepted {
                counters.fields_accepted += 1;
                if critical {
                    counters.critical_fields_accepted += 1;
                }
            }
            let delta = if accepted {
                1.0
            } else if conflicted {
                -1.0
            } else {
                0.0
            };
            *counters
                .field_helpfulness
                .entry(field.to_string())
                .or_default() += delta;
        }

        if accepted {
            *state
                .field_matrix
                .entry(domain.to_string())
                .or_default()
                .entry(field.to_string())
                .or_default() += 1;
        }
    }

    pub fn planner_score(&self, domain: &str) -> f64 {
        let state = self.state.lock();
        state
            .domains
            .get(domain)
            .map(|c| c.planner_score())
            .unwrap_or(0.25)
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&IntelState) -> T) -> T {
        let state = self.state.lock();
        f(&state)
    }
}

fn brand_key(brand: &str, domain: &str) -> String {
    format!("{}|{}", brand.to_lowercase(), domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (DomainIntelStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let store = DomainIntelStore::open(storage, "mice").unwrap();
        (store, dir)
    }

    #[test]
    fn rates_derive_from_counters() {
        let (store, _dir) = store();

        for i in 0..10 {
            store.record_attempt("razer.com", "Razer", &format!("p{}", i), i < 8);
            store.record_identity("razer.com", "Razer", i < 9, false);
        }

        store.with_state(|state| {
            let c = &state.domains["razer.com"];
            assert!((c.http_ok_rate() - 0.8).abs() < 1e-9);
            assert!((c.identity_match_rate() - 0.9).abs() < 1e-9);
            assert_eq!(c.products_seen, 10);
        });
    }

    #[test]
    fn planner_score_rewards_clean_domains() {
        let (store, _dir) = store();

        for i in 0..10 {
            store.record_attempt("good.com", "Razer", &format!("p{}", i), true);
            store.record_identity("good.com", "Razer", true, false);
            store.record_field_contribution("good.com", "Razer", "dpi", true, true, false);

            store.record_attempt("bad.com", "Razer", &format!("p{}", i), i < 3);
            store.record_identity("bad.com", "Razer", i < 2, i >= 5);
        }

        assert!(store.planner_score("good.com") > store.planner_score("bad.com"));
        // Unknown domains get a neutral prior
        assert!((store.planner_score("new.com") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn recent_products_deduplicate() {
        let (store, _dir) = store();

        store.record_attempt("razer.com", "Razer", "p1", true);
        store.record_attempt("razer.com", "Razer", "p1", true);

        store.with_state(|state| {
            assert_eq!(state.domains["razer.com"].products_seen, 1);
            assert_eq!(state.domains["razer.com"].attempts, 2);
        });
    }

    #[test]
    fn save_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        {
            let store = DomainIntelStore::open(storage.clone(), "mice").unwrap();
            store.record_attempt("razer.com", "Razer", "p1", true);
            store.save().unwrap();
        }

        let store = DomainIntelStore::open(storage, "mice").unwrap();
        store.with_state(|state| {
            assert_eq!(state.domains["razer.com"].attempts, 1);
        });
    }
}
