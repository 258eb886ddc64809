//! Robots Cache & Per-Host Pacing
//! One robots.txt fetch per origin with in-flight coalescing, and a
//! scheduler that keeps us under every host's minimum delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::robots::parser::{parse, RobotsRules};

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict for one prospective fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsDecision {
    pub allowed: bool,
    pub reason: String,
    pub robots_url: String,
    pub matched_rule: Option<String>,
    pub status: u16,
}

#[derive(Debug, Clone)]
struct CachedRobots {
    rules: Option<RobotsRules>,
    status: u16,
}

/// In-process robots.txt policy, cached per origin
pub struct RobotsPolicy {
    client: Client,
    cache: parking_lot::Mutex<HashMap<String, Arc<OnceCell<CachedRobots>>>>,
}

impl RobotsPolicy {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .user_agent(user_agent.to_string())
            .build()
            .context("Failed to build robots HTTP client")?;

        Ok(Self {
            client,
            cache: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub async fn can_fetch(&self, url: &str, user_agent: &str) -> Result<RobotsDecision> {
        let parsed = Url::parse(url).with_context(|| format!("Unparseable URL: {}", url))?;
        let origin = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        let robots_url = format!("{}/robots.txt", origin);
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };

        // One slot per origin; concurrent callers share the same fill
        let slot = {
            let mut cache = self.cache.lock();
            cache.entry(origin.clone()).or_default().clone()
        };

        let cached = slot
            .get_or_init(|| self.fetch_robots(robots_url.clone()))
            .await;

        let decision = decide(cached, user_agent, &path, &robots_url);
        debug!(
            url = %url,
            allowed = decision.allowed,
            reason = %decision.reason,
            "robots verdict"
        );
        Ok(decision)
    }

    async fn fetch_robots(&self, robots_url: String) -> CachedRobots {
        match self.client.get(&robots_url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    match response.text().await {
                        Ok(body) => CachedRobots {
                            rules: Some(parse(&body)),
                            status,
                        },
                        Err(e) => {
                            warn!(url = %robots_url, error = %e, "robots body read failed");
                            CachedRobots {
                                rules: None,
                                status,
                            }
                        }
                    }
                } else {
                    CachedRobots {
                        rules: None,
                        status,
                    }
                }
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots fetch failed");
                CachedRobots {
                    rules: None,
                    status: 0,
                }
            }
        }
    }
}

/// Pure decision from cached robots state
fn decide(
    cached: &CachedRobots,
    user_agent: &str,
    path: &str,
    robots_url: &str,
) -> RobotsDecision {
    match &cached.rules {
        Some(rules) => {
            let m = rules.is_allowed(user_agent, path);
            RobotsDecision {
                allowed: m.allowed,
                reason: if m.allowed {
                    "robots_allow".to_string()
                } else {
                    "robots_disallow".to_string()
                },
                robots_url: robots_url.to_string(),
                matched_rule: m.matched_rule,
                status: cached.status,
            }
        }
        None => RobotsDecision {
            allowed: true,
            reason: "robots_missing_or_unavailable".to_string(),
            robots_url: robots_url.to_string(),
            matched_rule: None,
            status: cached.status,
        },
    }
}

/// Per-host fetch pacing. A claim on a host slot records the access time,
/// so concurrent claimers serialize without a global lock across the wait.
pub struct HostScheduler {
    last_access: parking_lot::Mutex<HashMap<String, Instant>>,
    default_min_delay: Duration,
    overrides: HashMap<String, Duration>,
}

impl HostScheduler {
    pub fn new(default_min_delay_ms: u64) -> Self {
        Self {
            last_access: parking_lot::Mutex::new(HashMap::new()),
            default_min_delay: Duration::from_millis(default_min_delay_ms),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, host: &str, min_delay_ms: u64) -> Self {
        self.overrides
            .insert(host.to_string(), Duration::from_millis(min_delay_ms));
        self
    }

    pub fn min_delay_for(&self, host: &str) -> Duration {
        self.overrides
            .get(host)
            .copied()
            .unwrap_or(self.default_min_delay)
    }

    /// Wait until this host's slot is free, then claim it
    pub async fn wait_for_slot(&self, host: &str) {
        let min_delay = self.min_delay_for(host);
        loop {
            let wait = {
                let mut guard = self.last_access.lock();
                match guard.get(host) {
                    Some(last) if last.elapsed() < min_delay => min_delay - last.elapsed(),
                    _ => {
                        guard.insert(host.to_string(), Instant::now());
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_robots_allows_with_reason() {
        let cached = CachedRobots {
            rules: None,
            status: 404,
        };
        let d = decide(&cached, "harvestbot", "/anything", "https://x.com/robots.txt");
        assert!(d.allowed);
        assert_eq!(d.reason, "robots_missing_or_unavailable");
        assert_eq!(d.status, 404);
    }

    #[test]
    fn disallow_surfaces_matched_rule() {
        let cached = CachedRobots {
            rules: Some(parse("User-agent: *\nDisallow: /private/\n")),
            status: 200,
        };
        let d = decide(&cached, "harvestbot", "/private/page", "https://x.com/robots.txt");
        assert!(!d.allowed);
        assert_eq!(d.reason, "robots_disallow");
        assert_eq!(d.matched_rule.as_deref(), Some("Disallow: /private/"));
    }

    #[tokio::test]
    async fn host_scheduler_spaces_claims() {
        let scheduler = HostScheduler::new(50);

        let start = Instant::now();
        scheduler.wait_for_slot("example.com").await;
        scheduler.wait_for_slot("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(50));

        // A different host is not delayed
        let start = Instant::now();
        scheduler.wait_for_slot("other.com").await;
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn host_override_applies() {
        let scheduler = HostScheduler::new(1000).with_override("fast.com", 10);

        let start = Instant::now();
        scheduler.wait_for_slot("fast.com").await;
        scheduler.wait_for_slot("fast.com").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(500));
    }
}
