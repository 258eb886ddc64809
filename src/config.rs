//! Runtime Configuration
//! Mission: Every knob from the environment, sane defaults everywhere

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetch::FetchMode;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Fetcher hierarchy knobs
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub mode: FetchMode,
    pub page_goto_timeout_ms: u64,
    pub page_network_idle_timeout_ms: u64,
    pub per_host_min_delay_ms: u64,
    pub post_load_wait_ms: u64,
    pub auto_scroll_enabled: bool,
    pub auto_scroll_passes: u32,
    pub graphql_replay_enabled: bool,
    pub max_graphql_replays: u32,
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
    pub max_json_bytes: usize,
    pub screenshot_max_bytes: usize,
    pub max_concurrent_fetches: usize,
}

/// Frontier cooldown policy values (seconds)
#[derive(Debug, Clone)]
pub struct FrontierConfig {
    pub query_cooldown_secs: i64,
    pub cooldown_404_secs: i64,
    pub cooldown_404_repeat_secs: i64,
    pub cooldown_410_secs: i64,
    pub cooldown_timeout_secs: i64,
    pub cooldown_403_base_secs: i64,
    pub cooldown_429_base_secs: i64,
    pub path_penalty_notfound_threshold: u32,
}

/// Convergence controller bounds
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    pub max_rounds: u32,
    pub no_progress_limit: u32,
    pub max_dispatch_queries: usize,
    pub max_target_fields: usize,
    pub low_quality_confidence: f64,
    pub max_ms: u64,
}

/// Consensus acceptance thresholds
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub auto_accept_score: f64,
    pub flag_review_score: f64,
}

/// LLM assistance; the pipeline must fully degrade without it
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub fallback_api_key: Option<String>,
    pub per_product_budget_usd: f64,
    pub monthly_budget_usd: f64,
}

/// Per-host crawl-policy override, loaded from the policy TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostPolicy {
    pub min_delay_ms: Option<u64>,
    pub goto_timeout_ms: Option<u64>,
    pub retry_budget: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    /// Forced modes are never replaced by the fallback chain
    pub forced_mode: Option<String>,
}

pub type HostPolicyMap = HashMap<String, HostPolicy>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HostPolicyFile {
    #[serde(default)]
    hosts: HostPolicyMap,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub events_db_path: PathBuf,
    pub category: String,
    pub user_agent: String,
    pub fetcher: FetcherConfig,
    pub frontier: FrontierConfig,
    pub convergence: ConvergenceConfig,
    pub consensus: ConsensusConfig,
    pub llm: LlmConfig,
    pub host_policies: HostPolicyMap,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let data_dir = PathBuf::from(
            env::var("DATA_DIR").unwrap_or_else(|_| "./harvest-data".to_string()),
        );
        let events_db_path = env::var("EVENTS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("run_events.db"));

        let category = env::var("CATEGORY").unwrap_or_else(|_| "mice".to_string());

        let user_agent = env::var("USER_AGENT")
            .unwrap_or_else(|_| "HarvestBot/1.0 (Spec Harvester)".to_string());

        let mode = env::var("MODE")
            .ok()
            .and_then(|v| FetchMode::parse(&v))
            .unwrap_or(FetchMode::Http);

        let fetcher = FetcherConfig {
            mode,
            page_goto_timeout_ms: env_u64("PAGE_GOTO_TIMEOUT_MS", 30_000),
            page_network_idle_timeout_ms: env_u64("PAGE_NETWORK_IDLE_TIMEOUT_MS", 10_000),
            per_host_min_delay_ms: env_u64("PER_HOST_MIN_DELAY_MS", 2_000),
            post_load_wait_ms: env_u64("POST_LOAD_WAIT_MS", 1_500),
            auto_scroll_enabled: env_bool("AUTO_SCROLL_ENABLED", true),
            auto_scroll_passes: env_u32("AUTO_SCROLL_PASSES", 3),
            graphql_replay_enabled: env_bool("GRAPHQL_REPLAY_ENABLED", true),
            max_graphql_replays: env_u32("MAX_GRAPHQL_REPLAYS", 5),
            retry_budget: env_u32("DYNAMIC_FETCH_RETRY_BUDGET", 2),
            retry_backoff_ms: env_u64("DYNAMIC_FETCH_RETRY_BACKOFF_MS", 750),
            max_json_bytes: env_usize("MAX_JSON_BYTES", 262_144),
            screenshot_max_bytes: env_usize("SCREENSHOT_MAX_BYTES", 2_097_152),
            max_concurrent_fetches: env_usize("MAX_CONCURRENT_FETCHES", 4),
        };

        let frontier = FrontierConfig {
            query_cooldown_secs: env_i64("FRONTIER_QUERY_COOLDOWN_SECONDS", 6 * 3600),
            cooldown_404_secs: env_i64("FRONTIER_COOLDOWN_404_SECONDS", 72 * 3600),
            cooldown_404_repeat_secs: env_i64(
                "FRONTIER_COOLDOWN_404_REPEAT_SECONDS",
                14 * 24 * 3600,
            ),
            cooldown_410_secs: env_i64("FRONTIER_COOLDOWN_410_SECONDS", 90 * 24 * 3600),
            cooldown_timeout_secs: env_i64("FRONTIER_COOLDOWN_TIMEOUT_SECONDS", 6 * 3600),
            cooldown_403_base_secs: env_i64("FRONTIER_COOLDOWN_403_BASE_SECONDS", 30 * 60),
            cooldown_429_base_secs: env_i64("FRONTIER_COOLDOWN_429_BASE_SECONDS", 15 * 60),
            path_penalty_notfound_threshold: env_u32(
                "FRONTIER_PATH_PENALTY_NOTFOUND_THRESHOLD",
                3,
            ),
        };

        let convergence = ConvergenceConfig {
            max_rounds: env_u32("CONVERGENCE_MAX_ROUNDS", 8),
            no_progress_limit: env_u32("CONVERGENCE_NO_PROGRESS_LIMIT", 2),
            max_dispatch_queries: env_usize("CONVERGENCE_MAX_DISPATCH_QUERIES", 12),
            max_target_fields: env_usize("CONVERGENCE_MAX_TARGET_FIELDS", 24),
            low_quality_confidence: env_f64("LOW_QUALITY_CONFIDENCE", 0.40),
            max_ms: env_u64("CONVERGENCE_MAX_MS", 10 * 60 * 1000),
        };

        let consensus = ConsensusConfig {
            auto_accept_score: env_f64("AUTO_ACCEPT_SCORE", 0.95),
            flag_review_score: env_f64("FLAG_REVIEW_SCORE", 0.65),
        };

        let llm = LlmConfig {
            enabled: env_bool("LLM_ENABLED", false),
            api_key: env::var("LLM_API_KEY").ok(),
            fallback_api_key: env::var("LLM_FALLBACK_API_KEY").ok(),
            per_product_budget_usd: env_f64("LLM_PER_PRODUCT_BUDGET_USD", 0.50),
            monthly_budget_usd: env_f64("LLM_MONTHLY_BUDGET_USD", 100.0),
        };

        let host_policies = match env::var("HOST_POLICY_PATH") {
            Ok(path) => load_host_policies(&path)?,
            Err(_) => HostPolicyMap::new(),
        };

        Ok(Self {
            data_dir,
            events_db_path,
            category,
            user_agent,
            fetcher,
            frontier,
            convergence,
            consensus,
            llm,
            host_policies,
        })
    }

    pub fn host_policy(&self, host: &str) -> Option<&HostPolicy> {
        self.host_policies.get(host)
    }
}

fn load_host_policies(path: &str) -> Result<HostPolicyMap> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read host policy file {}", path))?;
    let file: HostPolicyFile =
        toml::from_str(&raw).with_context(|| format!("Failed to parse host policy file {}", path))?;

    for (host, policy) in &file.hosts {
        if let Some(forced) = &policy.forced_mode {
            if FetchMode::parse(forced).is_none() {
                warn!(host = %host, mode = %forced, "Unknown forced_mode in host policy, ignoring");
            }
        }
    }

    info!("Loaded {} host policy overrides from {}", file.hosts.len(), path);
    Ok(file.hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_policy_file_parses() {
        let raw = r#"
            [hosts."razer.com"]
            min_delay_ms = 5000
            forced_mode = "browser-full"

            [hosts."api.example.com"]
            retry_budget = 4
        "#;

        let file: HostPolicyFile = toml::from_str(raw).unwrap();
        assert_eq!(file.hosts.len(), 2);
        assert_eq!(file.hosts["razer.com"].min_delay_ms, Some(5000));
        assert_eq!(
            file.hosts["razer.com"].forced_mode.as_deref(),
            Some("browser-full")
        );
        assert_eq!(file.hosts["api.example.com"].retry_budget, Some(4));
    }
}
