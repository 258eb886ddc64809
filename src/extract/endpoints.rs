//! Endpoint Miner
//! Normalizes captured request paths into signatures, scores them by what
//! their payloads carried, and proposes next-best URLs for later rounds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetch::{RecordedResponse, ResponseClass};
use crate::frontier::root_domain;

/// Signatures kept per miner; oldest-scoring drop out of proposals only
const MAX_PROPOSALS: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointStat {
    pub signature: String,
    pub method: String,
    pub root_domain: String,
    pub normalized_path: String,
    pub hits: u32,
    pub score: f64,
    pub field_hints: Vec<String>,
    /// A concrete URL that matched this signature, replayable next round
    pub sample_url: String,
}

/// A proposed fetch for the next round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointProposal {
    pub url: String,
    pub signature: String,
    pub score: f64,
    pub field_hints: Vec<String>,
}

#[derive(Debug, Default)]
pub struct EndpointMiner {
    stats: HashMap<String, EndpointStat>,
}

impl EndpointMiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one captured response into the per-signature stats
    pub fn observe(&mut self, response: &RecordedResponse, field_hints: &[String]) {
        let Ok(parsed) = Url::parse(&response.url) else {
            return;
        };
        let Some(host) = parsed.host_str() else {
            return;
        };
        let root = root_domain(host);
        let normalized_path = normalize_path(parsed.path());
        let signature = format!("{} {}{}", response.method, root, normalized_path);

        let stat = self
            .stats
            .entry(signature.clone())
            .or_insert_with(|| EndpointStat {
                signature,
                method: response.method.clone(),
                root_domain: root,
                normalized_path,
                sample_url: response.url.clone(),
                ..EndpointStat::default()
            });

        stat.hits += 1;
        stat.score += class_weight(response.class) + body_hint_bonus(&response.body);
        for hint in field_hints {
            if !stat.field_hints.contains(hint) {
                stat.field_hints.push(hint.clone());
            }
        }
    }

    /// Top signatures with field hints become next-round discovery sources
    pub fn next_best_urls(&self) -> Vec<EndpointProposal> {
        let mut ranked: Vec<&EndpointStat> = self
            .stats
            .values()
            .filter(|s| !s.field_hints.is_empty())
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.signature.cmp(&b.signature))
        });

        ranked
            .into_iter()
            .take(MAX_PROPOSALS)
            .map(|s| EndpointProposal {
                url: s.sample_url.clone(),
                signature: s.signature.clone(),
                score: s.score,
                field_hints: s.field_hints.clone(),
            })
            .collect()
    }

    pub fn stats(&self) -> impl Iterator<Item = &EndpointStat> {
        self.stats.values()
    }
}

/// Replace volatile path segments with placeholders
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if seg.chars().all(|c| c.is_ascii_digit()) {
                ":num".to_string()
            } else if seg.len() >= 6 && seg.chars().all(|c| c.is_ascii_hexdigit()) {
                ":hex".to_string()
            } else if seg.len() >= 16
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                ":token".to_string()
            } else {
                seg.to_lowercase()
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn class_weight(class: ResponseClass) -> f64 {
    match class {
        ResponseClass::Specs => 3.0,
        ResponseClass::ProductPayload => 2.5,
        ResponseClass::VariantMatrix => 2.0,
        ResponseClass::GraphqlReplay => 1.5,
        ResponseClass::Pricing => 1.0,
        ResponseClass::FetchJson => 0.8,
        ResponseClass::Reviews => 0.4,
        ResponseClass::Unknown => 0.2,
    }
}

/// Body keys that smell like specification data
fn body_hint_bonus(body: &str) -> f64 {
    let mut bonus = 0.0;
    for key in ["\"dpi\"", "\"weight\"", "\"dimensions\"", "\"sensor\"", "\"specs\""] {
        if body.contains(key) {
            bonus += 0.3;
        }
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, body: &str) -> RecordedResponse {
        RecordedResponse::new(url, "GET", body, 65536)
    }

    #[test]
    fn path_normalization_masks_ids() {
        assert_eq!(normalize_path("/api/products/12345"), "/api/products/:num");
        assert_eq!(normalize_path("/api/p/deadbeef99"), "/api/p/:hex");
        assert_eq!(
            normalize_path("/session/a1b2c3d4e5f6g7h8i9j0k1l2"),
            "/session/:token"
        );
        assert_eq!(normalize_path("/api/Specs"), "/api/specs");
    }

    #[test]
    fn repeated_signatures_aggregate() {
        let mut miner = EndpointMiner::new();
        let hints = vec!["dpi".to_string()];

        miner.observe(
            &response(
                "https://api.shop.com/products/111/specs",
                r#"{"specs":{"dpi":30000}}"#,
            ),
            &hints,
        );
        miner.observe(
            &response(
                "https://api.shop.com/products/222/specs",
                r#"{"specs":{"dpi":26000}}"#,
            ),
            &hints,
        );

        let stats: Vec<_> = miner.stats().collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].hits, 2);
        assert_eq!(stats[0].signature, "GET shop.com/products/:num/specs");
    }

    #[test]
    fn proposals_ranked_by_score_and_require_hints() {
        let mut miner = EndpointMiner::new();

        // Spec endpoint with hints: proposable
        miner.observe(
            &response("https://api.shop.com/products/111/specs", r#"{"specs":{}}"#),
            &["dpi".to_string()],
        );
        // Review endpoint, no field hints: never proposed
        miner.observe(
            &response("https://api.shop.com/reviews/111", r#"{"reviews":[]}"#),
            &[],
        );

        let proposals = miner.next_best_urls();
        assert_eq!(proposals.len(), 1);
        assert!(proposals[0].signature.contains("/products/:num/specs"));
        assert_eq!(proposals[0].field_hints, vec!["dpi"]);
    }
}
