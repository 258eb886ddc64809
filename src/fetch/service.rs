//! Dynamic Crawler Service
//! Owns the active fetcher, per-host policy resolution, retry/backoff,
//! and the one-way fallback chain. Forced per-host modes never fall back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};
use url::Url;

use crate::config::{FetcherConfig, HostPolicyMap};
use crate::fetch::result::FetchResult;
use crate::fetch::{FetchMode, FetchSource, Fetcher};
use crate::robots::{HostScheduler, RobotsPolicy};

/// Service lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Active,
    Degraded,
    Stopped,
}

/// Per-host crawl policy after merging overrides onto defaults
#[derive(Debug, Clone)]
pub struct CrawlerPolicy {
    pub min_delay_ms: u64,
    pub timeout_ms: u64,
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
    pub forced_mode: Option<FetchMode>,
}

pub struct DynamicCrawlerService {
    fetchers: HashMap<FetchMode, Arc<dyn Fetcher>>,
    active_mode: Mutex<FetchMode>,
    state: Mutex<ServiceState>,
    robots: Option<Arc<RobotsPolicy>>,
    scheduler: Arc<HostScheduler>,
    cfg: FetcherConfig,
    host_policies: HostPolicyMap,
    user_agent: String,
}

impl DynamicCrawlerService {
    pub fn new(
        cfg: FetcherConfig,
        host_policies: HostPolicyMap,
        user_agent: &str,
        robots: Option<Arc<RobotsPolicy>>,
        scheduler: Arc<HostScheduler>,
    ) -> Self {
        Self {
            fetchers: HashMap::new(),
            active_mode: Mutex::new(cfg.mode),
            state: Mutex::new(ServiceState::Starting),
            robots,
            scheduler,
            cfg,
            host_policies,
            user_agent: user_agent.to_string(),
        }
    }

    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.mode(), fetcher);
    }

    pub fn active_mode(&self) -> FetchMode {
        *self.active_mode.lock()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub async fn start(&self) -> Result<()> {
        let mode = self.active_mode();
        if let Some(fetcher) = self.fetchers.get(&mode) {
            fetcher.start().await?;
        }
        *self.state.lock() = ServiceState::Active;
        info!(mode = mode.as_str(), "🕷️ crawler service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        for fetcher in self.fetchers.values() {
            fetcher.stop().await?;
        }
        *self.state.lock() = ServiceState::Stopped;
        info!("crawler service stopped");
        Ok(())
    }

    /// Defaults merged with the host's policy-file overrides
    pub fn resolve_policy(&self, host: &str) -> CrawlerPolicy {
        let overrides = self.host_policies.get(host);
        CrawlerPolicy {
            min_delay_ms: overrides
                .and_then(|o| o.min_delay_ms)
                .unwrap_or(self.cfg.per_host_min_delay_ms),
            timeout_ms: overrides
                .and_then(|o| o.goto_timeout_ms)
                .unwrap_or(self.cfg.page_goto_timeout_ms),
            retry_budget: overrides
                .and_then(|o| o.retry_budget)
                .unwrap_or(self.cfg.retry_budget),
            retry_backoff_ms: overrides
                .and_then(|o| o.retry_backoff_ms)
                .unwrap_or(self.cfg.retry_backoff_ms),
            forced_mode: overrides
                .and_then(|o| o.forced_mode.as_deref())
                .and_then(FetchMode::parse),
        }
    }

    /// Fetch one source. Errors fold into the result; callers never see Err.
    pub async fn fetch(&self, source: &FetchSource) -> FetchResult {
        let Some(host) = Url::parse(&source.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
        else {
            return FetchResult::error_result(&source.url, "unparseable URL");
        };

        let policy = self.resolve_policy(&host);
        let active = self.active_mode();
        let mode = policy.forced_mode.unwrap_or(active);

        // Fixtures are offline; everything else asks robots first
        if mode != FetchMode::Dryrun {
            if let Some(robots) = &self.robots {
                match robots.can_fetch(&source.url, &self.user_agent).await {
                    Ok(decision) if !decision.allowed => {
                        counter!("fetch_blocked_by_robots_total", 1);
                        return FetchResult::blocked_result(&source.url, &decision.reason);
                    }
                    Err(e) => {
                        warn!(url = %source.url, error = %e, "robots check errored, proceeding");
                    }
                    _ => {}
                }
            }
        }

        let Some(fetcher) = self.fetchers.get(&mode).cloned() else {
            return FetchResult::error_result(
                &source.url,
                &format!("no fetcher registered for mode {}", mode.as_str()),
            );
        };

        self.scheduler.wait_for_slot(&host).await;

        let mut result = self.fetch_with_retries(&*fetcher, source, &policy).await;

        // A dead transport (timeout / no result) degrades down the chain,
        // one way, never for forced modes
        if result.status == 0 && policy.forced_mode.is_none() {
            if let Some(next) = fallback_target(mode) {
                if let Some(fallback) = self.fetchers.get(&next).cloned() {
                    self.switch_to(mode, next, "no_result");
                    self.scheduler.wait_for_slot(&host).await;
                    result = fallback.fetch(source).await;
                }
            }
        }

        counter!("fetch_requests_total", 1, "status" => status_bucket(result.status));
        histogram!("fetch_elapsed_ms", result.elapsed_ms as f64);
        result
    }

    async fn fetch_with_retries(
        &self,
        fetcher: &dyn Fetcher,
        source: &FetchSource,
        policy: &CrawlerPolicy,
    ) -> FetchResult {
        let attempts = 1 + policy.retry_budget;
        let mut last = FetchResult::error_result(&source.url, "not attempted");

        for attempt in 1..=attempts {
            last = fetcher.fetch(source).await;

            let retryable = last.status == 429 || (500..600).contains(&last.status);
            if retryable && attempt < attempts {
                let backoff = policy.retry_backoff_ms * attempt as u64;
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                warn!(
                    url = %source.url,
                    status = last.status,
                    attempt,
                    "transient status, backing off {}ms",
                    backoff + jitter
                );
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                continue;
            }
            break;
        }
        last
    }

    fn switch_to(&self, from: FetchMode, to: FetchMode, reason: &str) {
        let mut active = self.active_mode.lock();
        // Another task may have already degraded us past `from`
        if *active != from {
            return;
        }
        *active = to;
        *self.state.lock() = ServiceState::Degraded;

        counter!(
            "dynamic_fetcher_mode_switched",
            1,
            "from" => from.as_str(),
            "to" => to.as_str()
        );
        info!(
            from = from.as_str(),
            to = to.as_str(),
            reason,
            "🔀 fetcher mode switched"
        );
    }
}

/// One-way degradation chain
fn fallback_target(mode: FetchMode) -> Option<FetchMode> {
    match mode {
        FetchMode::BrowserCrawler => Some(FetchMode::BrowserFull),
        FetchMode::BrowserFull => Some(FetchMode::Http),
        FetchMode::Http | FetchMode::Dryrun => None,
    }
}

fn status_bucket(status: u16) -> &'static str {
    match status {
        0 => "timeout",
        200..=299 => "2xx",
        300..=399 => "3xx",
        404 => "404",
        403 | 429 | 451 => "blocked",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
