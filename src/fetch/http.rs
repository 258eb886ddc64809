//! Raw HTTP Fetcher
//! The cheapest real tier: no rendering, JSON-aware response recording.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use crate::fetch::result::{FetchResult, RecordedResponse};
use crate::fetch::{FetchMode, FetchSource, Fetcher};

pub struct HttpFetcher {
    client: Client,
    max_json_bytes: usize,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64, max_json_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(user_agent.to_string())
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            client,
            max_json_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch(&self, source: &FetchSource) -> FetchResult {
        let start = Instant::now();

        let response = match self.client.get(&source.url).send().await {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "network" };
                debug!(url = %source.url, error = %e, "HTTP fetch failed");
                let mut result =
                    FetchResult::error_result(&source.url, &format!("{}: {}", kind, e));
                result.elapsed_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                let mut result =
                    FetchResult::error_result(&source.url, &format!("body read: {}", e));
                result.status = status;
                result.final_url = final_url;
                result.elapsed_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        // JSON endpoints double as their own recorded response, so the
        // network extractor sees them the same way as browser captures
        let mut recorded_responses = Vec::new();
        let is_json = content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        if is_json && !body.is_empty() {
            recorded_responses.push(RecordedResponse::new(
                &final_url,
                "GET",
                &body,
                self.max_json_bytes,
            ));
        }

        let bytes = body.len();
        FetchResult {
            url: source.url.clone(),
            final_url,
            status,
            content_type,
            body,
            bytes,
            elapsed_ms: start.elapsed().as_millis() as u64,
            error: None,
            blocked_by_robots: false,
            fetched_at: Utc::now(),
            recorded_responses,
            screenshot: None,
        }
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Http
    }
}
