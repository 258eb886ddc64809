//! Candidate Extractors
//! DOM tables, JSON-LD, embedded SPA state, captured network payloads,
//! and temporal hints — all funneled into one candidate shape.

pub mod dom;
pub mod embedded;
pub mod endpoints;
pub mod jsonld;
pub mod network;
pub mod temporal;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::fetch::FetchResult;
use crate::frontier::root_domain;
use crate::models::{
    Candidate, CandidateValue, ComponentDb, DomainTierMap, Evidence, ExtractionMethod, FieldRule,
    FieldRuleSet, FieldType, IdentityLock, SourceRole,
};

pub use endpoints::{EndpointMiner, EndpointProposal};
pub use temporal::{DatePrecision, TemporalHint};

/// Maximum candidates any single extractor may emit for one page
const MAX_CANDIDATES_PER_EXTRACTOR: usize = 64;

/// Maximum JSON nesting depth mined for field candidates
const MAX_MINE_DEPTH: usize = 8;

static CANDIDATE_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn next_candidate_id() -> u64 {
    CANDIDATE_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Everything the extractors need to know about the rules in force
pub struct ExtractionContext<'a> {
    pub rules: &'a FieldRuleSet,
    pub components: &'a ComponentDb,
    pub lock: &'a IdentityLock,
    pub tier_map: &'a DomainTierMap,
}

/// Source attributes shared by every candidate from one page
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,
    pub final_url: String,
    pub host: String,
    pub root_domain: String,
    pub role: SourceRole,
    pub tier: u8,
    pub retrieved_at: DateTime<Utc>,
}

impl PageContext {
    pub fn from_result(result: &FetchResult, tier_map: &DomainTierMap) -> Option<Self> {
        let host = url::Url::parse(&result.final_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))?;
        let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
        let root = root_domain(&host);

        Some(Self {
            url: result.url.clone(),
            final_url: result.final_url.clone(),
            host,
            role: tier_map.role_for(&root),
            tier: tier_map.tier_for(&root),
            root_domain: root,
            retrieved_at: result.fetched_at,
        })
    }

    fn evidence(&self, quote: Option<(&str, Option<(usize, usize)>)>) -> Evidence {
        let mut evidence = Evidence::new(&self.url, self.retrieved_at);
        if self.final_url != self.url {
            evidence.final_url = Some(self.final_url.clone());
        }
        if let Some((quote, span)) = quote {
            evidence = evidence.with_quote(quote, span);
        }
        evidence
    }

    /// Build a candidate for a matched rule, shaping the value by field type
    pub fn candidate(
        &self,
        rule: &FieldRule,
        raw_value: &str,
        method: ExtractionMethod,
        quote: Option<(&str, Option<(usize, usize)>)>,
        score: f64,
    ) -> Candidate {
        let value = shape_value(rule, raw_value);
        Candidate {
            id: next_candidate_id(),
            field: rule.key.clone(),
            value,
            source_url: self.url.clone(),
            host: self.host.clone(),
            root_domain: self.root_domain.clone(),
            role: self.role,
            tier: self.tier,
            method,
            evidence: self.evidence(quote),
            score,
        }
    }
}

/// Shape a raw string into the tagged value for the rule's type
fn shape_value(rule: &FieldRule, raw: &str) -> CandidateValue {
    if rule.field_type == FieldType::ComponentRef {
        let component_type = rule.component_type.as_deref().unwrap_or("component");
        return CandidateValue::component(component_type, raw);
    }
    if rule.is_list {
        let values: Vec<String> = raw
            .split(|c| c == ',' || c == '/' || c == ';')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if values.len() > 1 {
            return CandidateValue::List { values };
        }
    }
    CandidateValue::scalar(raw)
}

/// Normalize a label or key into comparable tokens
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut prev_underscore = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            // Break camelCase into separate tokens
            if c.is_ascii_uppercase() && !prev_underscore && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Find the rule a label refers to: exact key, alias, or token overlap
pub fn match_field<'a>(rules: &'a FieldRuleSet, label: &str) -> Option<&'a FieldRule> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }

    for rule in &rules.rules {
        if normalize_label(&rule.key) == normalized {
            return Some(rule);
        }
    }
    for rule in &rules.rules {
        if rule
            .aliases
            .iter()
            .any(|a| normalize_label(a) == normalized)
        {
            return Some(rule);
        }
    }

    // Token-overlap fallback for verbose labels ("Maximum DPI" -> dpi)
    let label_tokens: Vec<&str> = normalized.split('_').collect();
    for rule in &rules.rules {
        let key_norm = normalize_label(&rule.key);
        let key_tokens: Vec<&str> = key_norm.split('_').collect();
        let overlap = key_tokens
            .iter()
            .filter(|t| label_tokens.contains(t))
            .count();
        if !key_tokens.is_empty() && overlap == key_tokens.len() {
            return Some(rule);
        }
    }
    None
}

/// Recursively mine a JSON document for rule-keyed scalar values
pub fn mine_json(
    value: &Value,
    ctx: &ExtractionContext,
    page: &PageContext,
    method: ExtractionMethod,
    out: &mut Vec<Candidate>,
) {
    mine_json_inner(value, ctx, page, method, out, 0);
}

fn mine_json_inner(
    value: &Value,
    ctx: &ExtractionContext,
    page: &PageContext,
    method: ExtractionMethod,
    out: &mut Vec<Candidate>,
    depth: usize,
) {
    if depth > MAX_MINE_DEPTH || out.len() >= MAX_CANDIDATES_PER_EXTRACTOR {
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if !s.is_empty() => {
                        emit_if_matched(key, s, ctx, page, method, out);
                    }
                    Value::Number(n) => {
                        emit_if_matched(key, &n.to_string(), ctx, page, method, out);
                    }
                    Value::Bool(b) => {
                        emit_if_matched(key, if *b { "true" } else { "false" }, ctx, page, method, out);
                    }
                    _ => mine_json_inner(child, ctx, page, method, out, depth + 1),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mine_json_inner(item, ctx, page, method, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn emit_if_matched(
    key: &str,
    raw: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    method: ExtractionMethod,
    out: &mut Vec<Candidate>,
) {
    if out.len() >= MAX_CANDIDATES_PER_EXTRACTOR {
        return;
    }
    if let Some(rule) = match_field(ctx.rules, key) {
        let quote = format!("\"{}\": {}", key, raw);
        out.push(page.candidate(rule, raw, method, Some((&quote, None)), 0.6));
    }
}

/// Run every extractor over one fetched page. Individual extractor
/// failures are tolerated; the page can still contribute elsewhere.
pub fn extract_all(result: &FetchResult, ctx: &ExtractionContext) -> Vec<Candidate> {
    debug_assert!(result.should_extract());

    let Some(page) = PageContext::from_result(result, ctx.tier_map) else {
        debug!(url = %result.url, "no host, skipping extraction");
        return Vec::new();
    };

    let mut candidates = Vec::new();
    candidates.extend(dom::extract(&result.body, ctx, &page));
    candidates.extend(jsonld::extract(&result.body, ctx, &page));
    candidates.extend(embedded::extract(&result.body, ctx, &page));
    candidates.extend(network::extract(&result.recorded_responses, ctx, &page));
    candidates.extend(temporal::extract(result, ctx, &page));

    debug!(
        url = %result.url,
        count = candidates.len(),
        "extraction complete"
    );
    candidates
}
