//! Dry-Run Fetcher
//! Serves fixture pages from storage. Integration tests and offline
//! development run the whole pipeline through this tier.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::fetch::result::{FetchResult, RecordedResponse};
use crate::fetch::{FetchMode, FetchSource, Fetcher};
use crate::frontier::canonicalize;
use crate::storage::FileStorage;

/// On-disk fixture document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub recorded_responses: Vec<RecordedResponse>,
}

impl Fixture {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.to_string(),
            final_url: None,
            recorded_responses: Vec::new(),
        }
    }

    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
            final_url: None,
            recorded_responses: Vec::new(),
        }
    }
}

/// Storage key for a URL's fixture
pub fn fixture_key(url: &str) -> String {
    let canonical = canonicalize(url)
        .map(|c| c.canonical_url)
        .unwrap_or_else(|_| url.to_string());
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..8]);

    let host = url::Url::parse(&canonical)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    format!("fixtures/{}/{}.json", host, digest)
}

pub struct DryRunFetcher {
    storage: FileStorage,
}

impl DryRunFetcher {
    pub fn new(storage: FileStorage) -> Self {
        Self { storage }
    }

    /// Seed a fixture for a URL; used by tests and recorders
    pub fn put_fixture(&self, url: &str, fixture: &Fixture) -> Result<()> {
        self.storage.write_json(&fixture_key(url), fixture)
    }
}

#[async_trait]
impl Fetcher for DryRunFetcher {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch(&self, source: &FetchSource) -> FetchResult {
        let key = fixture_key(&source.url);
        let fixture: Option<Fixture> = match self.storage.read_json(&key) {
            Ok(f) => f,
            Err(e) => {
                return FetchResult::error_result(&source.url, &format!("fixture read: {}", e))
            }
        };

        match fixture {
            Some(fixture) => {
                debug!(url = %source.url, key = %key, "fixture served");
                let final_url = fixture.final_url.unwrap_or_else(|| source.url.clone());
                let bytes = fixture.body.len();
                FetchResult {
                    url: source.url.clone(),
                    final_url,
                    status: fixture.status,
                    content_type: fixture.content_type,
                    body: fixture.body,
                    bytes,
                    elapsed_ms: 1,
                    error: None,
                    blocked_by_robots: false,
                    fetched_at: Utc::now(),
                    recorded_responses: fixture.recorded_responses,
                    screenshot: None,
                }
            }
            None => {
                debug!(url = %source.url, key = %key, "no fixture, serving 404");
                let mut result = FetchResult::error_result(&source.url, "no fixture");
                result.status = 404;
                result.error = None;
                result
            }
        }
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Dryrun
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_fixture_and_defaults_to_404() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let fetcher = DryRunFetcher::new(storage);

        let url = "https://www.example.com/product/viper?utm_source=x";
        fetcher
            .put_fixture(url, &Fixture::html("<html><body>Viper V3</body></html>"))
            .unwrap();

        // Tracking params do not change the fixture identity
        let source = FetchSource::new("https://example.com/product/viper", "p1");
        let result = fetcher.fetch(&source).await;
        assert_eq!(result.status, 200);
        assert!(result.body.contains("Viper V3"));
        assert!(result.should_extract());

        let missing = FetchSource::new("https://example.com/other", "p1");
        let result = fetcher.fetch(&missing).await;
        assert_eq!(result.status, 404);
        assert!(result.dead());
    }
}
