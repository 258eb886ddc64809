//! URL & Query Frontier
//! Mission: Never fetch what we should already know is dead, cold, or useless
//!
//! URL lifecycle: unknown -> live -> sleeping (cooldown) -> live again,
//! except 410/451 which tombstone the record permanently. Records are
//! never deleted; they are the audit trail.

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::FrontierConfig;
use crate::frontier::canonical::{canonicalize, CanonicalUrl};
use crate::frontier::cooldown::{cooldown_for, Cooldown};
use crate::storage::FileStorage;

/// Max SERP results kept per query record
const MAX_QUERY_RESULTS: usize = 25;

/// Max snippet length kept per result
const MAX_SNIPPET_CHARS: usize = 400;

/// Max live cooldowns returned in a product snapshot
const MAX_SNAPSHOT_COOLDOWNS: usize = 200;

/// Rank penalty clamp
const RANK_PENALTY_MIN: f64 = -1.5;
const RANK_PENALTY_MAX: f64 = 0.5;

/// Domain mean confidence above which a slight boost applies
const CONFIDENT_DOMAIN_MEAN: f64 = 0.6;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlRecord {
    pub canonical_url: String,
    pub domain: String,
    pub path_sig: String,
    pub fetch_count: u32,
    pub ok_count: u32,
    pub redirect_count: u32,
    pub notfound_count: u32,
    pub gone_count: u32,
    pub blocked_count: u32,
    pub server_error_count: u32,
    pub timeout_count: u32,
    pub fields_found: Vec<String>,
    pub avg_confidence: f64,
    pub confidence_samples: u32,
    pub conflict_count: u32,
    pub cooldown: Option<Cooldown>,
    pub tombstoned: bool,
    pub last_status: u16,
    pub last_fetch_ts: i64,
    /// Dedup key of the last applied fetch: status|ts|content_hash
    pub last_fetch_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rank: u32,
    pub url: String,
    pub title: String,
    pub host: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_hash: String,
    pub product_id: String,
    pub query: String,
    pub attempts: u32,
    pub first_ts: i64,
    pub last_ts: i64,
    pub provider: String,
    pub fields: Vec<String>,
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldEntry {
    pub url: String,
    pub field: String,
    pub value_hash: String,
    pub confidence: f64,
    pub conflict: bool,
    pub ts: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathStat {
    pub notfound_count: u32,
    pub ok_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontierState {
    pub urls: HashMap<String, UrlRecord>,
    pub queries: HashMap<String, QueryRecord>,
    pub yields: Vec<YieldEntry>,
    /// Keyed by "domain|path_sig"
    pub path_stats: HashMap<String, PathStat>,
}

/// Verdict for a prospective URL fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipVerdict {
    pub skip: bool,
    pub reason: Option<String>,
    pub next_retry_ts: Option<i64>,
}

impl SkipVerdict {
    fn allow() -> Self {
        Self {
            skip: false,
            reason: None,
            next_retry_ts: None,
        }
    }

    fn deny(reason: &str, next_retry_ts: Option<i64>) -> Self {
        Self {
            skip: true,
            reason: Some(reason.to_string()),
            next_retry_ts,
        }
    }
}

/// One fetch outcome to be folded into the frontier
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub status: u16,
    pub ts: i64,
    pub content_hash: Option<String>,
    pub redirected: bool,
    pub blocked_by_robots: bool,
    pub fields_found: Vec<String>,
    pub confidence: Option<f64>,
}

/// Per-product frontier snapshot for planner input and operator inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub product_id: String,
    pub query_count: usize,
    pub total_query_attempts: u32,
    pub distinct_url_count: usize,
    pub field_yield_counts: HashMap<String, u32>,
    pub live_cooldowns: Vec<(String, String, i64)>,
}

/// Durable frontier store for one category. A single mutex serializes
/// writers; `save()` persists with atomic temp-plus-rename semantics.
pub struct FrontierStore {
    state: Mutex<FrontierState>,
    storage: FileStorage,
    key: String,
    cfg: FrontierConfig,
}

impl FrontierStore {
    pub fn open(storage: FileStorage, category: &str, cfg: FrontierConfig) -> Result<Self> {
        let key = format!("frontier/{}.json", category);
        let state: FrontierState = storage.read_json(&key)?.unwrap_or_default();
        info!(
            category = %category,
            urls = state.urls.len(),
            queries = state.queries.len(),
            "Frontier loaded"
        );

        Ok(Self {
            state: Mutex::new(state),
            storage,
            key,
            cfg,
        })
    }

    pub fn save(&self) -> Result<()> {
        let state = self.state.lock();
        self.storage.write_json(&self.key, &*state)
    }

    pub fn canonicalize(&self, url: &str) -> Result<CanonicalUrl> {
        canonicalize(url)
    }

    /// True when this query was dispatched inside the cooldown window.
    /// `force` always wins.
    pub fn should_skip_query(&self, product_id: &str, query: &str, now_ts: i64, force: bool) -> bool {
        if force {
            return false;
        }
        let hash = query_hash(product_id, query);
        let state = self.state.lock();
        match state.queries.get(&hash) {
            Some(record) => now_ts - record.last_ts < self.cfg.query_cooldown_secs,
            None => false,
        }
    }

    pub fn record_query(
        &self,
        product_id: &str,
        query: &str,
        provider: &str,
        fields: &[String],
        results: Vec<QueryResult>,
        now_ts: i64,
    ) {
        let hash = query_hash(product_id, query);
        let mut state = self.state.lock();

        let mut bounded = results;
        bounded.truncate(MAX_QUERY_RESULTS);
        for r in &mut bounded {
            if r.snippet.chars().count() > MAX_SNIPPET_CHARS {
                r.snippet = r.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
            }
        }

        let record = state.queries.entry(hash.clone()).or_insert_with(|| QueryRecord {
            query_hash: hash,
            product_id: product_id.to_string(),
            query: query.to_string(),
            attempts: 0,
            first_ts: now_ts,
            last_ts: now_ts,
            provider: provider.to_string(),
            fields: Vec::new(),
            results: Vec::new(),
        });

        record.attempts += 1;
        record.last_ts = now_ts;
        record.provider = provider.to_string();
        for field in fields {
            if !record.fields.contains(field) {
                record.fields.push(field.clone());
            }
        }
        record.results = bounded;
    }

    /// Skip verdict for a URL: tombstones and live cooldowns always skip,
    /// dead path patterns skip until the path ever yields an OK fetch.
    pub fn should_skip_url(&self, url: &str, now_ts: i64, force: bool) -> Result<SkipVerdict> {
        let canonical = canonicalize(url)?;
        if force {
            return Ok(SkipVerdict::allow());
        }

        let state = self.state.lock();
        if let Some(record) = state.urls.get(&canonical.canonical_url) {
            if record.tombstoned {
                return Ok(SkipVerdict::deny("tombstoned", None));
            }
            if let Some(cooldown) = &record.cooldown {
                if cooldown.active_at(now_ts) {
                    return Ok(SkipVerdict::deny(&cooldown.reason, Some(cooldown.next_retry_ts)));
                }
            }
        }

        let path_key = format!("{}|{}", canonical.domain, canonical.path_sig);
        if let Some(stat) = state.path_stats.get(&path_key) {
            if stat.notfound_count >= self.cfg.path_penalty_notfound_threshold && stat.ok_count == 0
            {
                return Ok(SkipVerdict::deny("dead_path_pattern", None));
            }
        }

        Ok(SkipVerdict::allow())
    }

    /// Fold one fetch outcome into the record. Idempotent under retry:
    /// a repeated (url, status, ts, content_hash) tuple only bumps the
    /// monotonic fetch_count.
    pub fn record_fetch(&self, fetch: FetchRecord) -> Result<()> {
        let canonical = canonicalize(&fetch.url)?;
        let mut state = self.state.lock();

        let record = state
            .urls
            .entry(canonical.canonical_url.clone())
            .or_insert_with(|| UrlRecord {
                canonical_url: canonical.canonical_url.clone(),
                domain: canonical.domain.clone(),
                path_sig: canonical.path_sig.clone(),
                ..UrlRecord::default()
            });

        record.fetch_count += 1;

        let fetch_key = format!(
            "{}|{}|{}",
            fetch.status,
            fetch.ts,
            fetch.content_hash.as_deref().unwrap_or("-")
        );
        if record.last_fetch_key.as_deref() == Some(&fetch_key) {
            debug!(url = %canonical.canonical_url, "duplicate record_fetch, counters unchanged");
            return Ok(());
        }
        record.last_fetch_key = Some(fetch_key);
        record.last_status = fetch.status;
        record.last_fetch_ts = fetch.ts;

        match fetch.status {
            200..=299 => record.ok_count += 1,
            300..=399 => record.redirect_count += 1,
            404 => record.notfound_count += 1,
            410 => record.gone_count += 1,
            451 => record.blocked_count += 1,
            403 | 429 => record.blocked_count += 1,
            500..=599 => record.server_error_count += 1,
            0 => record.timeout_count += 1,
            _ => record.server_error_count += 1,
        }
        if fetch.redirected {
            record.redirect_count += 1;
        }

        for field in &fetch.fields_found {
            if !record.fields_found.contains(field) {
                record.fields_found.push(field.clone());
            }
        }

        if let Some(confidence) = fetch.confidence {
            // Running mean
            record.confidence_samples += 1;
            record.avg_confidence +=
                (confidence - record.avg_confidence) / record.confidence_samples as f64;
        }

        match cooldown_for(
            fetch.status,
            record.fetch_count,
            record.notfound_count,
            &self.cfg,
        ) {
            Some((seconds, reason)) => {
                record.cooldown = Some(Cooldown {
                    next_retry_ts: fetch.ts + seconds,
                    reason: reason.to_string(),
                    seconds,
                });
            }
            None => record.cooldown = None,
        }

        if matches!(fetch.status, 410 | 451) {
            record.tombstoned = true;
        }

        let path_key = format!("{}|{}", canonical.domain, canonical.path_sig);
        let stat = state.path_stats.entry(path_key).or_default();
        match fetch.status {
            200..=399 => stat.ok_count += 1,
            404 => stat.notfound_count += 1,
            _ => {}
        }

        Ok(())
    }

    pub fn record_yield(
        &self,
        url: &str,
        field: &str,
        value_hash: &str,
        confidence: f64,
        conflict: bool,
        now_ts: i64,
    ) -> Result<()> {
        let canonical = canonicalize(url)?;
        let mut state = self.state.lock();

        state.yields.push(YieldEntry {
            url: canonical.canonical_url.clone(),
            field: field.to_string(),
            value_hash: value_hash.to_string(),
            confidence,
            conflict,
            ts: now_ts,
        });

        if conflict {
            if let Some(record) = state.urls.get_mut(&canonical.canonical_url) {
                record.conflict_count += 1;
            }
        }
        Ok(())
    }

    pub fn snapshot_for_product(&self, product_id: &str, now_ts: i64) -> FrontierSnapshot {
        let state = self.state.lock();

        let queries: Vec<&QueryRecord> = state
            .queries
            .values()
            .filter(|q| q.product_id == product_id)
            .collect();
        let total_query_attempts = queries.iter().map(|q| q.attempts).sum();

        let mut field_yield_counts: HashMap<String, u32> = HashMap::new();
        for y in &state.yields {
            *field_yield_counts.entry(y.field.clone()).or_default() += 1;
        }

        let mut live_cooldowns: Vec<(String, String, i64)> = state
            .urls
            .values()
            .filter_map(|r| {
                r.cooldown.as_ref().and_then(|c| {
                    c.active_at(now_ts)
                        .then(|| (r.canonical_url.clone(), c.reason.clone(), c.next_retry_ts))
                })
            })
            .collect();
        live_cooldowns.sort_by_key(|(_, _, ts)| *ts);
        live_cooldowns.truncate(MAX_SNAPSHOT_COOLDOWNS);

        FrontierSnapshot {
            product_id: product_id.to_string(),
            query_count: queries.len(),
            total_query_attempts,
            distinct_url_count: state.urls.len(),
            field_yield_counts,
            live_cooldowns,
        }
    }

    /// Penalty in [-1.5, +0.5] for source planning. Dead and conflict-heavy
    /// URLs sink; URLs on domains with a confident track record float.
    pub fn rank_penalty_for_url(&self, url: &str) -> f64 {
        let Ok(canonical) = canonicalize(url) else {
            return RANK_PENALTY_MIN;
        };
        let state = self.state.lock();

        let mut penalty = 0.0;
        if let Some(record) = state.urls.get(&canonical.canonical_url) {
            penalty -= 0.3 * record.notfound_count.min(3) as f64;
            if record.gone_count > 0 {
                penalty -= 0.75;
            }
            penalty -= 0.15 * record.blocked_count.min(4) as f64;
            penalty -= 0.25 * record.conflict_count.min(4) as f64;
        }

        let (mut weighted_sum, mut samples) = (0.0, 0u32);
        for record in state.urls.values() {
            if record.domain == canonical.domain && record.confidence_samples > 0 {
                weighted_sum += record.avg_confidence * record.confidence_samples as f64;
                samples += record.confidence_samples;
            }
        }
        if samples > 0 && weighted_sum / samples as f64 > CONFIDENT_DOMAIN_MEAN {
            penalty += 0.25;
        }

        penalty.clamp(RANK_PENALTY_MIN, RANK_PENALTY_MAX)
    }
}

/// Stable hash of (product, normalized query)
pub fn query_hash(product_id: &str, query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(product_id.as_bytes());
    hasher.update(b"||");
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable hash for candidate values in the yields ledger
pub fn value_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_lowercase().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontierConfig;

    fn test_cfg() -> FrontierConfig {
        FrontierConfig {
            query_cooldown_secs: 6 * 3600,
            cooldown_404_secs: 72 * 3600,
            cooldown_404_repeat_secs: 14 * 24 * 3600,
            cooldown_410_secs: 90 * 24 * 3600,
            cooldown_timeout_secs: 6 * 3600,
            cooldown_403_base_secs: 30 * 60,
            cooldown_429_base_secs: 15 * 60,
            path_penalty_notfound_threshold: 3,
        }
    }

    fn test_store() -> (FrontierStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let store = FrontierStore::open(storage, "mice", test_cfg()).unwrap();
        (store, dir)
    }

    fn not_found(url: &str, ts: i64) -> FetchRecord {
        FetchRecord {
            url: url.to_string(),
            status: 404,
            ts,
            content_hash: None,
            redirected: false,
            blocked_by_robots: false,
            fields_found: vec![],
            confidence: None,
        }
    }

    #[test]
    fn notfound_cooldown_window() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;
        let url = "https://example.com/product/foo";

        store.record_fetch(not_found(url, t0)).unwrap();

        // One hour later: still cooling down
        let verdict = store.should_skip_url(url, t0 + 3600, false).unwrap();
        assert!(verdict.skip);
        assert_eq!(verdict.reason.as_deref(), Some("404_not_found"));

        // 73 hours later: window expired
        let verdict = store.should_skip_url(url, t0 + 73 * 3600, false).unwrap();
        assert!(!verdict.skip);
    }

    #[test]
    fn force_overrides_cooldown() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;
        let url = "https://example.com/product/foo";

        store.record_fetch(not_found(url, t0)).unwrap();
        let verdict = store.should_skip_url(url, t0 + 60, true).unwrap();
        assert!(!verdict.skip);
    }

    #[test]
    fn gone_tombstones_forever() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;
        let url = "https://example.com/old-product";

        store
            .record_fetch(FetchRecord {
                status: 410,
                ..not_found(url, t0)
            })
            .unwrap();

        // Even far beyond the cooldown window
        let far_future = t0 + 400 * 24 * 3600;
        let verdict = store.should_skip_url(url, far_future, false).unwrap();
        assert!(verdict.skip);
        assert_eq!(verdict.reason.as_deref(), Some("tombstoned"));
    }

    #[test]
    fn dead_path_pattern_blocks_siblings() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;

        // Three distinct numeric product pages under the same signature 404
        for i in 0..3 {
            let url = format!("https://shop.example.com/product/{}", 1000 + i);
            store.record_fetch(not_found(&url, t0)).unwrap();
        }

        // A fourth sibling is skipped without ever being fetched
        let verdict = store
            .should_skip_url("https://shop.example.com/product/9999", t0 + 1, false)
            .unwrap();
        assert!(verdict.skip);
        assert_eq!(verdict.reason.as_deref(), Some("dead_path_pattern"));

        // An OK fetch on the pattern lifts the penalty
        store
            .record_fetch(FetchRecord {
                status: 200,
                ..not_found("https://shop.example.com/product/5", t0 + 2)
            })
            .unwrap();
        let verdict = store
            .should_skip_url("https://shop.example.com/product/9999", t0 + 3, false)
            .unwrap();
        assert!(!verdict.skip);
    }

    #[test]
    fn query_cooldown_and_force() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;

        store.record_query("p1", "razer viper v3 specs", "fixture", &[], vec![], t0);

        assert!(store.should_skip_query("p1", "Razer  Viper V3 SPECS", t0 + 60, false));
        assert!(!store.should_skip_query("p1", "razer viper v3 specs", t0 + 7 * 3600, false));
        // force always dispatches
        assert!(!store.should_skip_query("p1", "razer viper v3 specs", t0 + 60, true));
    }

    #[test]
    fn record_fetch_is_idempotent_except_fetch_count() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;
        let url = "https://example.com/product/foo";

        let fetch = FetchRecord {
            content_hash: Some("abc123".to_string()),
            ..not_found(url, t0)
        };
        store.record_fetch(fetch.clone()).unwrap();
        store.record_fetch(fetch).unwrap();

        let state = store.state.lock();
        let record = &state.urls["https://example.com/product/foo"];
        assert_eq!(record.fetch_count, 2);
        assert_eq!(record.notfound_count, 1);
    }

    #[test]
    fn query_results_bounded() {
        let (store, _dir) = test_store();
        let results: Vec<QueryResult> = (0..40)
            .map(|i| QueryResult {
                rank: i,
                url: format!("https://example.com/{}", i),
                title: "t".to_string(),
                host: "example.com".to_string(),
                snippet: "x".repeat(1000),
            })
            .collect();

        store.record_query("p1", "q", "fixture", &[], results, 0);

        let state = store.state.lock();
        let record = state.queries.values().next().unwrap();
        assert_eq!(record.results.len(), 25);
        assert_eq!(record.results[0].snippet.chars().count(), 400);
    }

    #[test]
    fn rank_penalty_stays_in_range() {
        let (store, _dir) = test_store();
        let t0 = 1_700_000_000;
        let url = "https://example.com/product/foo";

        for i in 0..6 {
            store.record_fetch(not_found(url, t0 + i)).unwrap();
        }
        store.record_yield(url, "dpi", "h", 0.2, true, t0).unwrap();
        store.record_yield(url, "dpi", "h", 0.2, true, t0).unwrap();

        let penalty = store.rank_penalty_for_url(url);
        assert!((RANK_PENALTY_MIN..=RANK_PENALTY_MAX).contains(&penalty));
        assert!(penalty < 0.0);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let t0 = 1_700_000_000;

        {
            let store = FrontierStore::open(storage.clone(), "mice", test_cfg()).unwrap();
            store
                .record_fetch(not_found("https://example.com/a", t0))
                .unwrap();
            store.save().unwrap();
        }

        let store = FrontierStore::open(storage, "mice", test_cfg()).unwrap();
        let verdict = store
            .should_skip_url("https://example.com/a", t0 + 60, false)
            .unwrap();
        assert!(verdict.skip);
    }
}
