//! Temporal Signal Extractor
//! Dated hints from titles, URLs, body text, and captured payloads,
//! ranked by precision (day > month > year) then source weight.
//! Feeds release-date inference.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::{ExtractionContext, PageContext};
use crate::fetch::FetchResult;
use crate::models::{Candidate, ExtractionMethod, FieldType};

lazy_static! {
    static ref ISO_DATE: Regex = Regex::new(r"\b(20[0-3][0-9])-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])\b").unwrap();
    static ref MONTH_NAME_DATE: Regex = Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+(\d{1,2}),?\s+(20[0-3][0-9])\b"
    ).unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+(20[0-3][0-9])\b"
    ).unwrap();
    static ref RELEASE_CONTEXT: Regex =
        Regex::new(r"(?i)\b(released?|launch(?:ed)?|available|announced|introduc\w+)\b").unwrap();
}

/// Most precise wins, all else equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalHint {
    pub date: NaiveDate,
    pub precision: DatePrecision,
    pub source_weight: f64,
    pub quote: String,
}

/// Collect dated hints from every surface of a fetched page
pub fn hints(result: &FetchResult) -> Vec<TemporalHint> {
    let mut out = Vec::new();

    // URL path segments carry dates on review sites
    scan_text(&result.final_url, 0.6, &mut out);

    // Body text near release language is the strongest signal
    scan_release_context(&result.body, 0.9, &mut out);

    for response in &result.recorded_responses {
        scan_text(&response.body, 0.7, &mut out);
    }

    // Precision beats weight; weight breaks ties
    out.sort_by(|a, b| {
        b.precision
            .cmp(&a.precision)
            .then(b.source_weight.partial_cmp(&a.source_weight).unwrap_or(std::cmp::Ordering::Equal))
    });
    out
}

/// Emit a release-date candidate when the rules ask for one
pub fn extract(
    result: &FetchResult,
    ctx: &ExtractionContext,
    page: &PageContext,
) -> Vec<Candidate> {
    let date_rule = ctx
        .rules
        .rules
        .iter()
        .find(|r| r.field_type == FieldType::Date);
    let Some(rule) = date_rule else {
        return Vec::new();
    };

    let hints = hints(result);
    let Some(best) = hints.first() else {
        return Vec::new();
    };

    let rendered = match best.precision {
        DatePrecision::Day => best.date.format("%Y-%m-%d").to_string(),
        DatePrecision::Month => best.date.format("%Y-%m").to_string(),
        DatePrecision::Year => best.date.format("%Y").to_string(),
    };

    vec![page.candidate(
        rule,
        &rendered,
        ExtractionMethod::Temporal,
        Some((&best.quote, None)),
        0.4 + 0.2 * best.source_weight,
    )]
}

fn scan_release_context(text: &str, weight: f64, out: &mut Vec<TemporalHint>) {
    // Only lines that talk about release/launch; avoids copyright years
    for line in text.lines() {
        if RELEASE_CONTEXT.is_match(line) {
            scan_text(line, weight, out);
        }
    }
}

fn scan_text(text: &str, weight: f64, out: &mut Vec<TemporalHint>) {
    for caps in ISO_DATE.captures_iter(text) {
        let (y, m, d) = (
            caps[1].parse().unwrap_or(2000),
            caps[2].parse().unwrap_or(1),
            caps[3].parse().unwrap_or(1),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            out.push(TemporalHint {
                date,
                precision: DatePrecision::Day,
                source_weight: weight,
                quote: caps[0].to_string(),
            });
        }
    }

    for caps in MONTH_NAME_DATE.captures_iter(text) {
        let (Some(month), Ok(day), Ok(year)) = (
            month_number(&caps[1]),
            caps[2].parse::<u32>(),
            caps[3].parse::<i32>(),
        ) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            out.push(TemporalHint {
                date,
                precision: DatePrecision::Day,
                source_weight: weight,
                quote: caps[0].to_string(),
            });
        }
    }

    for caps in MONTH_YEAR.captures_iter(text) {
        let (Some(month), Ok(year)) = (month_number(&caps[1]), caps[2].parse::<i32>()) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
            // A month-day match on the same text already covers this
            if out
                .iter()
                .any(|h| h.precision == DatePrecision::Day && h.date.format("%Y-%m").to_string() == date.format("%Y-%m").to_string())
            {
                continue;
            }
            out.push(TemporalHint {
                date,
                precision: DatePrecision::Month,
                source_weight: weight,
                quote: caps[0].to_string(),
            });
        }
    }
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.trim_end_matches('.').to_lowercase();
    let month = match name.as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, IdentityLock, SourceRole,
    };
    use chrono::Utc;

    fn page() -> PageContext {
        PageContext {
            url: "https://lab.example.com/reviews/viper-v3".to_string(),
            final_url: "https://lab.example.com/reviews/viper-v3".to_string(),
            host: "lab.example.com".to_string(),
            root_domain: "example.com".to_string(),
            role: SourceRole::LabReview,
            tier: 2,
            retrieved_at: Utc::now(),
        }
    }

    fn result_with_body(body: &str) -> FetchResult {
        let mut r = FetchResult::error_result("https://lab.example.com/reviews/viper-v3", "");
        r.status = 200;
        r.error = None;
        r.body = body.to_string();
        r
    }

    #[test]
    fn day_precision_outranks_year() {
        let result = result_with_body(
            "The mouse was released on September 12, 2023.\nCopyright Sep 2024.",
        );
        let hints = hints(&result);
        assert!(!hints.is_empty());
        assert_eq!(hints[0].precision, DatePrecision::Day);
        assert_eq!(
            hints[0].date,
            NaiveDate::from_ymd_opt(2023, 9, 12).unwrap()
        );
    }

    #[test]
    fn emits_release_date_candidate_when_rule_present() {
        let rules = FieldRuleSet {
            category: "mice".to_string(),
            rules: vec![FieldRule::new("release_date", FieldType::Date)],
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

        let result = result_with_body("Launched 2023-09-12 worldwide.");
        let candidates = extract(&result, &ctx, &page());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field, "release_date");
        assert_eq!(candidates[0].value.as_scalar(), Some("2023-09-12"));
        assert_eq!(candidates[0].method, ExtractionMethod::Temporal);
    }

    #[test]
    fn no_date_rule_means_no_candidates() {
        let rules = FieldRuleSet::default();
        let components = ComponentDb::default();
        let lock = IdentityLock::new("p1", "Razer", "Viper V3");
        let tier_map = DomainTierMap::default();
        let ctx = ExtractionContext {
            rules: &rules,
            components: &components,
            lock: &lock,
            tier_map: &tier_map,
        };

        let result = result_with_body("Released 2023-09-12.");
        assert!(extract(&result, &ctx, &page()).is_empty());
    }
}
