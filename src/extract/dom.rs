//! DOM Field Extractor
//! Spec tables and labeled key/value pairs out of rendered HTML.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::extract::{match_field, ExtractionContext, PageContext};
use crate::models::{Candidate, ExtractionMethod};

lazy_static! {
    /// "Label: value" inline pairs in list items and short paragraphs
    static ref INLINE_PAIR: Regex =
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /()\-]{1,40}?)\s*[:：]\s*(\S.{0,120})$").unwrap();
}

pub fn extract(html: &str, ctx: &ExtractionContext, page: &PageContext) -> Vec<Candidate> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();

    extract_tables(&doc, html, ctx, page, &mut out);
    extract_definition_lists(&doc, html, ctx, page, &mut out);
    extract_inline_pairs(&doc, html, ctx, page, &mut out);

    out
}

fn extract_tables(
    doc: &Html,
    body: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    let Ok(table_sel) = Selector::parse("table") else {
        return;
    };
    let Ok(row_sel) = Selector::parse("tr") else {
        return;
    };
    let Ok(cell_sel) = Selector::parse("th, td") else {
        return;
    };

    for table in doc.select(&table_sel) {
        for row in table.select(&row_sel) {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
            if cells.len() != 2 {
                continue;
            }
            let label = element_text(&cells[0]);
            let value = element_text(&cells[1]);
            if label.is_empty() || value.is_empty() {
                continue;
            }

            if let Some(rule) = match_field(ctx.rules, &label) {
                let quote = format!("{}: {}", label, value);
                let span = span_of(body, &value);
                out.push(page.candidate(
                    rule,
                    &value,
                    ExtractionMethod::DomTable,
                    Some((&quote, span)),
                    0.8,
                ));
            }
        }
    }
}

fn extract_definition_lists(
    doc: &Html,
    body: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    let Ok(dl_sel) = Selector::parse("dl") else {
        return;
    };
    let Ok(dt_sel) = Selector::parse("dt") else {
        return;
    };
    let Ok(dd_sel) = Selector::parse("dd") else {
        return;
    };

    for dl in doc.select(&dl_sel) {
        let labels: Vec<String> = dl.select(&dt_sel).map(|e| element_text(&e)).collect();
        let values: Vec<String> = dl.select(&dd_sel).map(|e| element_text(&e)).collect();

        for (label, value) in labels.iter().zip(values.iter()) {
            if label.is_empty() || value.is_empty() {
                continue;
            }
            if let Some(rule) = match_field(ctx.rules, label) {
                let quote = format!("{}: {}", label, value);
                let span = span_of(body, value);
                out.push(page.candidate(
                    rule,
                    value,
                    ExtractionMethod::DomTable,
                    Some((&quote, span)),
                    0.8,
                ));
            }
        }
    }
}

fn extract_inline_pairs(
    doc: &Html,
    body: &str,
    ctx: &ExtractionContext,
    page: &PageContext,
    out: &mut Vec<Candidate>,
) {
    let Ok(item_sel) = Selector::parse("li, p, span") else {
        return;
    };

    for element in doc.select(&item_sel) {
        let text = element_text(&element);
        let Some(caps) = INLINE_PAIR.captures(&text) else {
            continue;
        };
        let label = caps[1].trim();
        let value = caps[2].trim();

        if let Some(rule) = match_field(ctx.rules, label) {
            // Tables already claimed this pair if it lives inside one
            if element_within_table(&element) {
                continue;
            }
            let quote = format!("{}: {}", label, value);
            let span = span_of(body, value);
            out.push(page.candidate(
                rule,
                value,
                ExtractionMethod::DomInline,
                Some((&quote, span)),
                0.65,
            ));
        }
    }
}

fn element_within_table(element: &ElementRef) -> bool {
    let mut node = element.parent();
    while let Some(parent) = node {
        if let Some(el) = ElementRef::wrap(parent) {
            let name = el.value().name();
            if name == "table" || name == "dl" {
                return true;
            }
        }
        node = parent.parent();
    }
    false
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn span_of(body: &str, needle: &str) -> Option<(usize, usize)> {
    body.find(needle).map(|start| (start, start + needle.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, FieldType, IdentityLock, SourceRole,
    };
    use chrono::Utc;

    fn context_fixtures() -> (FieldRuleSet, ComponentDb, IdentityLock, DomainTierMap) {
        let rules = FieldRuleSet {
            category: "mice".to_string(),
            rules: vec![
                FieldRule::new("dpi", FieldType::Integer),
                FieldRule::new("weight", FieldType::Number).with_canonical_unit("g"),
                FieldRule::new("sensor", FieldType::ComponentRef).with_component_type("sensor"),
                FieldRule {
                    aliases: vec!["connectivity".to_string()],
                    ..FieldRule::new("connection", FieldType::Enum)
                },
            ],
        };
        (
            rules,
            ComponentDb::default(),
            IdentityLock::new("p1", "Razer", "Viper V3"),
            DomainTierMap::default(),
        )
    }

    fn page() -> PageContext {
        PageContext {
            url: "https://razer.com/viper-v3".to_string(),
            final_url: "https://razer.com/viper-v3".to_string(),
            host: "razer.com".to_string(),
            root_domain: "razer.com".to_string(),
            role: SourceRole::Manufacturer,
            tier: 1,
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn spec_table_rows_become_candidates() {
        let (rules, components, lock, tier_map) = context_fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = r#"
            <html><body>
            <table class="specs">
              <tr><th>DPI</th><td>35000</td></tr>
              <tr><th>Weight</th><td>54 g</td></tr>
              <tr><th>Sensor</th><td>Focus Pro 30K</td></tr>
              <tr><th>Cable length</th><td>1.8 m</td></tr>
            </table>
            </body></html>
        "#;

        let candidates = extract(html, &ctx, &page());
        assert_eq!(candidates.len(), 3);

        let dpi = candidates.iter().find(|c| c.field == "dpi").unwrap();
        assert_eq!(dpi.method, ExtractionMethod::DomTable);
        assert_eq!(dpi.value.as_scalar(), Some("35000"));
        assert_eq!(dpi.evidence.quote.as_deref(), Some("DPI: 35000"));
        assert!(dpi.evidence.quote_span.is_some());

        let sensor = candidates.iter().find(|c| c.field == "sensor").unwrap();
        assert!(sensor.is_component_field());
    }

    #[test]
    fn inline_pairs_matched_outside_tables_only() {
        let (rules, components, lock, tier_map) = context_fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = r#"
            <html><body>
            <ul>
              <li>Connectivity: Wireless</li>
              <li>Just some marketing copy with no colon structure at all</li>
            </ul>
            </body></html>
        "#;

        let candidates = extract(html, &ctx, &page());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field, "connection");
        assert_eq!(candidates[0].method, ExtractionMethod::DomInline);
        assert_eq!(candidates[0].value.as_scalar(), Some("Wireless"));
    }

    #[test]
    fn definition_lists_pair_dt_with_dd() {
        let (rules, components, lock, tier_map) = context_fixtures();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let html = "<dl><dt>Weight</dt><dd>58g</dd><dt>DPI</dt><dd>26000</dd></dl>";
        let candidates = extract(html, &ctx, &page());
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|c| c.field == "weight"));
        assert!(candidates.iter().any(|c| c.field == "dpi"));
    }
}
