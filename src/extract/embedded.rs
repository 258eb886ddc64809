//! Embedded State Extractor
//! SPA hydration payloads: __NEXT_DATA__, __NUXT__, __APOLLO_STATE__,
//! window.__INITIAL_STATE__. Only strict-JSON assignments are harvested.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::extract::{mine_json, ExtractionContext, PageContext};
use crate::models::{Candidate, ExtractionMethod};

lazy_static! {
    /// window.__X__ = { ... start of a state assignment
    static ref STATE_ASSIGN_START: Regex = Regex::new(
        r#"(?:window\.)?(__NUXT__|__APOLLO_STATE__|__INITIAL_STATE__)\s*=\s*\{"#
    ).unwrap();
}

pub fn extract(html: &str, ctx: &ExtractionContext, page: &PageContext) -> Vec<Candidate> {
    let mut out = Vec::new();

    extract_next_data(html, ctx, page, &mut out);
    extract_window_assignments(html, ctx, page, &mut out);

    out
}

/// Next.js embeds a full JSON document in a dedicated script tag
fn extract_next_data(
    html: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse(r#"script#__NEXT_DATA__"#) else {
        return;
    };

    for script in doc.select(&sel) {
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                // Page props carry the product payload; skip the router internals
                let target = value
                    .pointer("/props/pageProps")
                    .unwrap_or(&value);
                mine_json(target, ctx, page, ExtractionMethod::EmbeddedState, out);
            }
            Err(e) => debug!(url = %page.url, error = %e, "bad __NEXT_DATA__ block"),
        }
    }
}

/// Nuxt/Apollo/vanilla stores assigned onto window
fn extract_window_assignments(
    html: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    for caps in STATE_ASSIGN_START.captures_iter(html) {
        let name = &caps[1];
        let open = caps.get(0).map(|m| m.end() - 1).unwrap_or(0);
        let Some(raw) = balanced_object(html, open) else {
            continue;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                mine_json(&value, ctx, page, ExtractionMethod::EmbeddedState, out);
            }
            // Function-wrapped or otherwise non-JSON state; not worth a JS parser
            Err(_) => debug!(url = %page.url, state = name, "embedded state is not strict JSON"),
        }
    }
}

/// Slice from an opening brace through its balanced close, string-aware
fn balanced_object(text: &str, open: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, FieldType, IdentityLock, SourceRole,
    };
    use chrono::Utc;

    fn fixtures() -> (FieldRuleSet, ComponentDb, IdentityLock, DomainTierMap) {
        (
            FieldRuleSet {
                category: "mice".to_string(),
                rules: vec![
                    FieldRule::new("dpi", FieldType::Integer),
                    FieldRule::new("polling_rate", FieldType::Integer).with_canonical_unit("hz"),
                ],
            },
            ComponentDb::default(),
            IdentityLock::new("p1", "Razer", "Viper V3"),
            DomainTierMap::default(),
        )
    }

    fn page() -> PageContext {
        PageContext {
            url: "https://shop.example.com/viper".to_string(),
            final_url: "https://shop.example.com/viper".to_string(),
            host: "shop.example.com".to_string(),
            root_domain: "example.com".to_string(),
            role: SourceRole::Retail,
            tier: 3,
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn next_data_page_props_mined() {
        let (rules, components, lock, tier_map) = fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = r#"
        <script id="__NEXT_DATA__" type="application/json">
        {"props":{"pageProps":{"product":{"dpi":30000,"pollingRate":8000}}},"page":"/p"}
        </script>
        "#;

        let candidates = extract(html, &ctx, &page());
        assert_eq!(candidates.len(), 2);
        assert!(candidates
            .iter()
            .any(|c| c.field == "dpi" && c.value.as_scalar() == Some("30000")));
        assert!(candidates
            .iter()
            .all(|c| c.method == ExtractionMethod::EmbeddedState));
    }

    #[test]
    fn window_state_assignment_mined() {
        let (rules, components, lock, tier_map) = fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = r#"<script>window.__INITIAL_STATE__ = {"specs":{"dpi":26000}};</script>"#;
        let candidates = extract(html, &ctx, &page());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field, "dpi");
    }

    #[test]
    fn non_json_state_tolerated() {
        let (rules, components, lock, tier_map) = fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = r#"<script>window.__NUXT__ = {data: function(){return 1}};</script>"#;
        let candidates = extract(html, &ctx, &page());
        assert!(candidates.is_empty());
    }
}
