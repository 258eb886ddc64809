//! Per-Page Identity Gate
//! Deterministic scoring of one fetched page against the identity lock.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::identity::tokens::{
    connection_class, coverage, numeric_tokens, token_set, tokenize, ConnectionClass,
};
use crate::models::{Ambiguity, Candidate, IdentityLock};

/// Model-token coverage that confirms a model match on its own
const MODEL_OVERLAP_STRONG: f64 = 0.72;

/// Lower coverage accepted when the numeric tokens also line up
const MODEL_OVERLAP_WITH_NUMERIC: f64 = 0.55;

const BASE_THRESHOLD: f64 = 0.80;
const THRESHOLD_MIN: f64 = 0.62;
const THRESHOLD_MAX: f64 = 0.92;

/// Per-page identity decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageDecision {
    Confirmed,
    Warning,
    Quarantine,
    Rejected,
}

impl PageDecision {
    pub fn as_str(&self) -> &str {
        match self {
            PageDecision::Confirmed => "CONFIRMED",
            PageDecision::Warning => "WARNING",
            PageDecision::Quarantine => "QUARANTINE",
            PageDecision::Rejected => "REJECTED",
        }
    }

    /// Only confirmed and warning pages may contribute candidates
    pub fn admits_candidates(&self) -> bool {
        matches!(self, PageDecision::Confirmed | PageDecision::Warning)
    }
}

/// Outcome of scoring one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageIdentity {
    pub url: String,
    pub score: f64,
    pub threshold: f64,
    pub decision: PageDecision,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub critical_conflicts: Vec<String>,
    pub connection: Option<ConnectionClass>,
    pub hard_id_match: bool,
}

/// What the gate reads off a page before scoring
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub url: String,
    pub title: String,
    pub text_sample: String,
    /// sku/mpn/gtin values surfaced by the extractors
    pub hard_ids: Vec<String>,
}

impl PageSignals {
    /// Assemble signals from raw HTML plus this page's candidates
    pub fn gather(url: &str, html: &str, candidates: &[Candidate]) -> Self {
        let doc = Html::parse_document(html);
        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default();

        let hard_ids = candidates
            .iter()
            .filter(|c| matches!(c.field.as_str(), "sku" | "mpn" | "gtin" | "model_number"))
            .filter_map(|c| c.value.as_scalar().map(|s| s.to_string()))
            .collect();

        // A bounded slice of visible text is enough for token work
        let body_sel = Selector::parse("body").ok();
        let text_sample = body_sel
            .and_then(|sel| {
                doc.select(&sel)
                    .next()
                    .map(|b| b.text().collect::<Vec<_>>().join(" "))
            })
            .unwrap_or_default()
            .chars()
            .take(20_000)
            .collect();

        Self {
            url: url.to_string(),
            title: title.trim().to_string(),
            text_sample,
            hard_ids,
        }
    }
}

/// Score one page against the lock. Pure and deterministic.
pub fn evaluate_page(lock: &IdentityLock, signals: &PageSignals) -> PageIdentity {
    let mut score = 0.0;
    let mut reasons = Vec::new();
    let mut critical_conflicts = Vec::new();

    let scope = format!("{} {} {}", signals.title, signals.url, signals.text_sample);
    let scope_tokens = token_set(&scope);
    let title_url_tokens = token_set(&format!("{} {}", signals.title, signals.url));

    // Brand presence in title/URL/candidates
    let brand_tokens: Vec<String> = tokenize(&lock.brand);
    if coverage(&brand_tokens, &scope_tokens) >= 1.0 {
        score += 0.35;
        reasons.push("brand_match".to_string());
    }

    // Model token coverage, with a numeric-token assist for siblings
    let model_tokens: Vec<String> = tokenize(&lock.model);
    let model_coverage = coverage(&model_tokens, &title_url_tokens);
    let numeric: Vec<&String> = numeric_tokens(&model_tokens);
    let numeric_ok =
        !numeric.is_empty() && numeric.iter().all(|t| title_url_tokens.contains(*t));

    // A model with numeric tokens ("V3", "2") is only matched when those
    // tokens are on the page; siblings differ by exactly that numeral
    let model_match = if numeric.is_empty() {
        model_coverage >= MODEL_OVERLAP_STRONG
    } else {
        numeric_ok && model_coverage >= MODEL_OVERLAP_WITH_NUMERIC
    };
    if model_match {
        score += 0.35;
        reasons.push("model_match".to_string());
    } else if !numeric.is_empty() && !numeric_ok {
        critical_conflicts.push("model_numeric_mismatch".to_string());
    }

    // Variant connection class
    let page_connection = connection_class(&scope);
    if let Some(variant) = &lock.variant {
        if let (Some(wanted), Some(found)) = (connection_class(variant), page_connection) {
            if found.covers(wanted) || wanted.covers(found) {
                score += 0.15;
                reasons.push("variant_connection_match".to_string());
            } else {
                critical_conflicts.push("variant_connection_conflict".to_string());
            }
        }
    }

    // Hard identifiers: exact match locks it in, mismatch is fatal
    let mut hard_id_match = false;
    let mut hard_id_mismatch = false;
    let locked_ids: Vec<&String> = [&lock.sku, &lock.mpn, &lock.gtin]
        .into_iter()
        .flatten()
        .collect();
    if !locked_ids.is_empty() && !signals.hard_ids.is_empty() {
        for candidate_id in &signals.hard_ids {
            if locked_ids
                .iter()
                .any(|l| hard_ids_equal(l, candidate_id))
            {
                hard_id_match = true;
            }
        }
        if !hard_id_match {
            hard_id_mismatch = true;
            critical_conflicts.push("hard_id_mismatch".to_string());
        }
    }
    if hard_id_match {
        score += 0.15;
        reasons.push("hard_id_match".to_string());
    }

    // Negative tokens disqualify the page outright
    let negative_hit = lock
        .negative_tokens
        .iter()
        .any(|t| scope_tokens.contains(t));
    if negative_hit {
        critical_conflicts.push("negative_token_present".to_string());
    }

    let threshold = match_threshold(lock);

    let decision = if hard_id_mismatch || negative_hit {
        PageDecision::Rejected
    } else if score >= threshold && critical_conflicts.is_empty() {
        PageDecision::Confirmed
    } else if score >= 0.85 {
        PageDecision::Confirmed
    } else if score >= 0.60 {
        PageDecision::Warning
    } else if score >= 0.40 {
        PageDecision::Quarantine
    } else {
        PageDecision::Rejected
    };

    let confidence = if hard_id_match { 1.0 } else { score.min(1.0) };

    PageIdentity {
        url: signals.url.clone(),
        score,
        threshold,
        decision,
        confidence,
        reasons,
        critical_conflicts,
        connection: page_connection,
        hard_id_match,
    }
}

/// Ambiguity-adjusted match threshold, clamped to [0.62, 0.92]
fn match_threshold(lock: &IdentityLock) -> f64 {
    let mut threshold = BASE_THRESHOLD;

    threshold += match lock.ambiguity {
        Ambiguity::Easy => {
            if lock.variant.is_none() {
                -0.15
            } else {
                -0.10
            }
        }
        Ambiguity::Medium => 0.0,
        Ambiguity::Hard => 0.03,
        Ambiguity::VeryHard => 0.05,
        Ambiguity::ExtraHard => 0.08,
    };

    if !lock.has_strong_id() {
        threshold -= 0.05;
    }

    threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX)
}

/// Hard IDs compare case-insensitively, ignoring separators
fn hard_ids_equal(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    let (a, b) = (norm(a), norm(b));
    // One side may carry a longer regional suffix (RZ01-0512 vs RZ01-0512-B3U1)
    !a.is_empty() && (a == b || a.starts_with(&b) || b.starts_with(&a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ambiguity;

    fn viper_lock() -> IdentityLock {
        IdentityLock::new("p1", "Razer", "Viper V3").with_sku("RZ01-0512")
    }

    #[test]
    fn exact_identity_confirms() {
        let lock = viper_lock();
        let signals = PageSignals {
            url: "https://razer.com/gaming-mice/razer-viper-v3".to_string(),
            title: "Razer Viper V3 Pro - Wireless Esports Mouse".to_string(),
            text_sample: "The Razer Viper V3 sets the bar.".to_string(),
            hard_ids: vec!["RZ01-0512-B3U1".to_string()],
        };

        let identity = evaluate_page(&lock, &signals);
        assert!(identity.score >= 0.85, "score was {}", identity.score);
        assert_eq!(identity.decision, PageDecision::Confirmed);
        assert!(identity.hard_id_match);
        assert!((identity.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sibling_model_without_numeric_token_downgraded() {
        // Product is "G Pro X 2"; the page is the original G Pro X
        let lock = IdentityLock::new("p2", "Logitech", "G Pro X 2");
        let signals = PageSignals {
            url: "https://logitech.com/mice/g-pro-x".to_string(),
            title: "Logitech G Pro X Gaming Mouse".to_string(),
            text_sample: "G Pro X superlight performance.".to_string(),
            hard_ids: vec![],
        };

        let identity = evaluate_page(&lock, &signals);
        assert!(
            matches!(identity.decision, PageDecision::Warning | PageDecision::Rejected),
            "decision was {:?}",
            identity.decision
        );
        assert!(identity
            .critical_conflicts
            .contains(&"model_numeric_mismatch".to_string()));
        assert!(!identity.reasons.contains(&"model_match".to_string()));
    }

    #[test]
    fn hard_id_mismatch_rejects() {
        let lock = viper_lock();
        let signals = PageSignals {
            url: "https://razer.com/gaming-mice/razer-viper-v3".to_string(),
            title: "Razer Viper V3".to_string(),
            text_sample: String::new(),
            hard_ids: vec!["RZ01-9999".to_string()],
        };

        let identity = evaluate_page(&lock, &signals);
        assert_eq!(identity.decision, PageDecision::Rejected);
        assert!(identity
            .critical_conflicts
            .contains(&"hard_id_mismatch".to_string()));
    }

    #[test]
    fn negative_token_rejects() {
        let lock = viper_lock().with_negative_tokens(&["refurbished"]);
        let signals = PageSignals {
            url: "https://shop.example.com/razer-viper-v3-refurbished".to_string(),
            title: "Razer Viper V3 (Refurbished)".to_string(),
            text_sample: String::new(),
            hard_ids: vec![],
        };

        let identity = evaluate_page(&lock, &signals);
        assert_eq!(identity.decision, PageDecision::Rejected);
    }

    #[test]
    fn threshold_scales_with_ambiguity() {
        let easy = IdentityLock::new("p", "Brand", "Model").with_ambiguity(Ambiguity::Easy);
        let hard = IdentityLock::new("p", "Brand", "Model")
            .with_ambiguity(Ambiguity::ExtraHard)
            .with_sku("S1");

        // Easy, no variant, no strong id: 0.80 - 0.15 - 0.05
        assert!((match_threshold(&easy) - 0.60_f64.max(THRESHOLD_MIN)).abs() < 1e-9);
        // Extra hard with strong id: 0.80 + 0.08
        assert!((match_threshold(&hard) - 0.88).abs() < 1e-9);
    }

    #[test]
    fn decision_is_deterministic() {
        let lock = viper_lock();
        let signals = PageSignals {
            url: "https://review.example.com/viper-v3".to_string(),
            title: "Razer Viper V3 review".to_string(),
            text_sample: "wireless mouse review".to_string(),
            hard_ids: vec![],
        };

        let a = evaluate_page(&lock, &signals);
        let b = evaluate_page(&lock, &signals);
        assert_eq!(a.decision, b.decision);
        assert!((a.score - b.score).abs() < 1e-12);
    }
}
