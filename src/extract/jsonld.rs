//! JSON-LD Extractor
//! Product/Offer structured data out of ld+json script blocks.

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::extract::{match_field, ExtractionContext, PageContext};
use crate::models::{Candidate, ExtractionMethod};

/// Schema.org types worth walking
const PRODUCT_TYPES: &[&str] = &["Product", "Offer", "AggregateOffer", "ProductModel"];

pub fn extract(html: &str, ctx: &ExtractionContext, page: &PageContext) -> Vec<Candidate> {
    let doc = Html::parse_document(html);
    let Ok(script_sel) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for script in doc.select(&script_sel) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            debug!(url = %page.url, "unparseable ld+json block");
            continue;
        };
        walk(&value, ctx, page, &mut out);
    }
    out
}

fn walk(value: &Value, ctx: &ExtractionContext, page: &PageContext, out: &mut Vec<Candidate>) {
    match value {
        Value::Array(items) => {
            for item in items {
                walk(item, ctx, page, out);
            }
        }
        Value::Object(map) => {
            // @graph wraps a list of nodes
            if let Some(graph) = map.get("@graph") {
                walk(graph, ctx, page, out);
            }

            if is_product_node(value) {
                emit_product_fields(map, ctx, page, out);
            }

            // Offers and nested models hang off the product node
            for key in ["offers", "model", "isVariantOf"] {
                if let Some(nested) = map.get(key) {
                    walk(nested, ctx, page, out);
                }
            }
        }
        _ => {}
    }
}

fn is_product_node(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => PRODUCT_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| PRODUCT_TYPES.contains(&t)),
        _ => false,
    }
}

fn emit_product_fields(
    map: &serde_json::Map<String, Value>,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    for (key, value) in map {
        if key.starts_with('@') {
            continue;
        }
        match value {
            Value::String(s) if !s.is_empty() => emit(key, s, ctx, page, out),
            Value::Number(n) => emit(key, &n.to_string(), ctx, page, out),
            Value::Bool(b) => emit(key, if *b { "true" } else { "false" }, ctx, page, out),
            Value::Object(obj) => {
                // QuantitativeValue: {"value": 54, "unitCode"/"unitText": "g"}
                if let Some(inner) = obj.get("value") {
                    let unit = obj
                        .get("unitText")
                        .or_else(|| obj.get("unitCode"))
                        .and_then(|u| u.as_str())
                        .unwrap_or("");
                    let rendered = match inner {
                        Value::Number(n) => format!("{} {}", n, unit).trim().to_string(),
                        Value::String(s) => format!("{} {}", s, unit).trim().to_string(),
                        _ => continue,
                    };
                    emit(key, &rendered, ctx, page, out);
                } else if let Some(name) = obj.get("name").and_then(|n| n.as_str()) {
                    // Nested entity like {"@type": "Brand", "name": "Razer"}
                    emit(key, name, ctx, page, out);
                }
            }
            Value::Array(items) if key == "additionalProperty" => {
                for item in items {
                    let (Some(name), Some(val)) = (
                        item.get("name").and_then(|n| n.as_str()),
                        item.get("value"),
                    ) else {
                        continue;
                    };
                    let rendered = match val {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => continue,
                    };
                    emit(name, &rendered, ctx, page, out);
                }
            }
            _ => {}
        }
    }
}

fn emit(
    key: &str,
    raw: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    if let Some(rule) = match_field(ctx.rules, key) {
        let quote = format!("\"{}\": \"{}\"", key, raw);
        out.push(page.candidate(rule, raw, ExtractionMethod::JsonLd, Some((&quote, None)), 0.75));
    }
}
