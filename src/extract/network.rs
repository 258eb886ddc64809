//! Network Response Extractor
//! Mines the recorder's captured JSON payloads by key-name similarity.

use serde_json::Value;
use tracing::debug;

use crate::extract::{mine_json, ExtractionContext, PageContext};
use crate::fetch::{RecordedResponse, ResponseClass};
use crate::models::{Candidate, ExtractionMethod};

pub fn extract(
    responses: &[RecordedResponse],
    ctx: &ExtractionContext,
    page: &PageContext,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for response in responses {
        // Review payloads are opinion, not specification
        if response.class == ResponseClass::Reviews {
            continue;
        }

        let Ok(value) = serde_json::from_str::<Value>(&response.body) else {
            debug!(url = %response.url, "captured payload is not valid JSON");
            continue;
        };
        mine_json(&value, ctx, page, ExtractionMethod::NetworkPayload, &mut out);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, FieldType, IdentityLock, SourceRole,
    };
    use chrono::Utc;

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
    fn mines_spec_payloads_and_skips_reviews() {
        let rules = FieldRuleSet {
            category: "mice".to_string(),
            rules: vec![
                FieldRule::new("dpi", FieldType::Integer),
                FieldRule::new("weight", FieldType::Number).with_canonical_unit("g"),
            ],
        };
        let components = ComponentDb::default();
        let lock = IdentityLock::new("p1", "Razer", "Viper V3");
        let tier_map = DomainTierMap::default();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let responses = vec![
            RecordedResponse::new(
                "https://shop.example.com/api/specs",
                "GET",
                r#"{"product":{"dpi":30000,"weight":54.5}}"#,
                65536,
            ),
            RecordedResponse::new(
                "https://shop.example.com/api/reviews",
                "GET",
                r#"{"reviews":[{"dpi":99999}]}"#,
                65536,
            ),
        ];

        let candidates = extract(&responses, &ctx, &page());
        assert_eq!(candidates.len(), 2);
        assert!(candidates
            .iter()
            .all(|c| c.method == ExtractionMethod::NetworkPayload));
        assert!(candidates
            .iter()
            .any(|c| c.field == "dpi" && c.value.as_scalar() == Some("30000")));
    }
}
