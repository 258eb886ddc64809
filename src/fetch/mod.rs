//! Fetcher Hierarchy
//! Tiered fetchers behind one capability contract: dry-run fixtures for
//! tests, raw HTTP for cheap pages, browser tiers injected where rendering
//! is required. The dynamic crawler service owns retry and fallback.

pub mod dryrun;
pub mod http;
pub mod result;
pub mod service;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dryrun::{fixture_key, DryRunFetcher, Fixture};
pub use http::HttpFetcher;
pub use result::{
    classify_response, redact, sanitize_replay_body, screenshot_selectors, truncate_utf8,
    FetchResult, RecordedResponse, ResponseClass, Screenshot,
};
pub use service::{CrawlerPolicy, DynamicCrawlerService, ServiceState};

/// Fetcher tiers, cheapest capability last in the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    Dryrun,
    Http,
    BrowserCrawler,
    BrowserFull,
}

impl FetchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dryrun" | "dry-run" => Some(FetchMode::Dryrun),
            "http" => Some(FetchMode::Http),
            "crawlee" | "browser-crawler" => Some(FetchMode::BrowserCrawler),
            "playwright" | "browser-full" => Some(FetchMode::BrowserFull),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Dryrun => "dryrun",
            FetchMode::Http => "http",
            FetchMode::BrowserCrawler => "browser-crawler",
            FetchMode::BrowserFull => "browser-full",
        }
    }
}

/// One planned fetch
#[derive(Debug, Clone)]
pub struct FetchSource {
    pub url: String,
    pub product_id: String,
    /// Endpoint-miner proposals are discovery-only; they still pass the
    /// identity gate before contributing candidates
    pub discovery_only: bool,
}

impl FetchSource {
    pub fn new(url: &str, product_id: &str) -> Self {
        Self {
            url: url.to_string(),
            product_id: product_id.to_string(),
            discovery_only: false,
        }
    }

    pub fn discovery(url: &str, product_id: &str) -> Self {
        Self {
            url: url.to_string(),
            product_id: product_id.to_string(),
            discovery_only: true,
        }
    }
}

/// Capability contract every fetcher tier implements
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn fetch(&self, source: &FetchSource) -> FetchResult;
    fn mode(&self) -> FetchMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_accepts_aliases() {
        assert_eq!(FetchMode::parse("dryrun"), Some(FetchMode::Dryrun));
        assert_eq!(FetchMode::parse("HTTP"), Some(FetchMode::Http));
        assert_eq!(FetchMode::parse("crawlee"), Some(FetchMode::BrowserCrawler));
        assert_eq!(
            FetchMode::parse("browser-crawler"),
            Some(FetchMode::BrowserCrawler)
        );
        assert_eq!(FetchMode::parse("playwright"), Some(FetchMode::BrowserFull));
        assert_eq!(FetchMode::parse("browser-full"), Some(FetchMode::BrowserFull));
        assert_eq!(FetchMode::parse("carrier-pigeon"), None);
    }
}
