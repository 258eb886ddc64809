//! Search Providers
//! SERP access behind one trait, with per-provider kill switches so a
//! degraded provider cannot stall the planner.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::storage::FileStorage;

const MIN_LATENCY_SAMPLES: usize = 20;
const LATENCY_WINDOW: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub host: String,
    pub rank: u32,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Per-provider kill switch: consecutive failures or a latency p95 blowout
/// take the provider out of rotation for the rest of the run.
struct ProviderHealth {
    enabled: bool,
    kill_triggered: bool,
    failure_threshold: u32,
    latency_threshold_ms: f64,
    consecutive_failures: u32,
    latencies_ms: VecDeque<f64>,
}

impl ProviderHealth {
    fn new(failure_threshold: u32, latency_threshold_ms: f64) -> Self {
        Self {
            enabled: true,
            kill_triggered: false,
            failure_threshold,
            latency_threshold_ms,
            consecutive_failures: 0,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.kill_triggered
    }

    fn record_success(&mut self, latency_ms: f64) {
        self.consecutive_failures = 0;
        self.latencies_ms.push_back(latency_ms);
        if self.latencies_ms.len() > LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        if let Some(p95) = self.p95_latency() {
            if p95 > self.latency_threshold_ms {
                self.kill_triggered = true;
            }
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            self.kill_triggered = true;
        }
    }

    fn p95_latency(&self) -> Option<f64> {
        if self.latencies_ms.len() < MIN_LATENCY_SAMPLES {
            return None;
        }
        let mut samples: Vec<f64> = self.latencies_ms.iter().copied().collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        samples.get(index).copied()
    }
}

/// Routes queries to the first healthy provider
pub struct SearchService {
    providers: Vec<Arc<dyn SearchProvider>>,
    health: Mutex<HashMap<&'static str, ProviderHealth>>,
}

impl SearchService {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>) -> Self {
        let health = providers
            .iter()
            .map(|p| (p.name(), ProviderHealth::new(4, 15_000.0)))
            .collect();
        Self {
            providers,
            health: Mutex::new(health),
        }
    }

    /// Name of the provider that served the hits, plus the hits
    pub async fn search(&self, query: &str, limit: usize) -> Option<(String, Vec<SearchHit>)> {
        for provider in &self.providers {
            let active = self
                .health
                .lock()
                .get(provider.name())
                .map(|h| h.is_active())
                .unwrap_or(false);
            if !active {
                continue;
            }

            let start = Instant::now();
            match provider.search(query, limit).await {
                Ok(hits) => {
                    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                    if let Some(h) = self.health.lock().get_mut(provider.name()) {
                        h.record_success(elapsed);
                    }
                    debug!(provider = provider.name(), query = %query, hits = hits.len(), "search served");
                    return Some((provider.name().to_string(), hits));
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "🛑 search provider failed");
                    if let Some(h) = self.health.lock().get_mut(provider.name()) {
                        h.record_failure();
                    }
                }
            }
        }
        None
    }
}

/// Fixture-backed provider for dry runs and tests
pub struct FixtureSearchProvider {
    storage: FileStorage,
}

impl FixtureSearchProvider {
    pub fn new(storage: FileStorage) -> Self {
        Self { storage }
    }

    pub fn fixture_key(query: &str) -> String {
        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("serp/{}.json", hex::encode(&hasher.finalize()[..8]))
    }

    pub fn put_fixture(&self, query: &str, hits: &[SearchHit]) -> Result<()> {
        self.storage.write_json(&Self::fixture_key(query), &hits)
    }
}

#[async_trait]
impl SearchProvider for FixtureSearchProvider {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let hits: Vec<SearchHit> = self
            .storage
            .read_json(&Self::fixture_key(query))?
            .unwrap_or_default();
        Ok(hits.into_iter().take(limit).collect())
    }
}
