//! Cross-Page Identity Reconciliation
//! One manufacturer anchor plus independent corroboration, with aggregate
//! contradiction checks across everything the round accepted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::identity::gate::{PageDecision, PageIdentity};
use crate::identity::tokens::{overlap, token_set, ConnectionClass};
use crate::models::SourceRole;

/// Dimension spread beyond which two pages describe different hardware (mm)
const DIMENSION_CONFLICT_MM: f64 = 3.0;

/// Sensor-name token overlap below which families conflict
const SENSOR_OVERLAP_MIN: f64 = 0.6;

/// Overall identity status for the product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityStatus {
    Confirmed,
    LowConfidence,
    IdentityConflict,
    IdentityFailed,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IdentityStatus::Confirmed => "CONFIRMED",
            IdentityStatus::LowConfidence => "LOW_CONFIDENCE",
            IdentityStatus::IdentityConflict => "IDENTITY_CONFLICT",
            IdentityStatus::IdentityFailed => "IDENTITY_FAILED",
        }
    }

    /// Per-field confidence cap the consensus engine applies
    pub fn max_field_confidence(&self) -> f64 {
        match self {
            IdentityStatus::Confirmed => 1.0,
            IdentityStatus::LowConfidence => 0.85,
            IdentityStatus::IdentityConflict => 0.50,
            IdentityStatus::IdentityFailed => 0.40,
        }
    }
}

/// Everything reconciliation needs to know about one gated page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEvidence {
    pub identity: PageIdentity,
    pub root_domain: String,
    pub role: SourceRole,
    pub tier: u8,
    pub approved: bool,
    pub connection: Option<ConnectionClass>,
    pub sensors: Vec<String>,
    pub skus: Vec<String>,
    /// Dimension field -> value in mm
    pub dimensions_mm: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityReport {
    pub status: IdentityStatus,
    pub confirmed_pages: usize,
    pub confirmed_domains: usize,
    pub manufacturer_anchor: bool,
    pub contradictions: Vec<String>,
}

/// Reconcile all gated pages into one product-level identity verdict
pub fn reconcile(pages: &[PageEvidence]) -> IdentityReport {
    let confirmed: Vec<&PageEvidence> = pages
        .iter()
        .filter(|p| p.identity.decision == PageDecision::Confirmed)
        .collect();

    let manufacturer_anchor = confirmed
        .iter()
        .any(|p| p.role == SourceRole::Manufacturer && p.tier == 1);

    let corroborating: HashSet<&str> = confirmed
        .iter()
        .filter(|p| !(p.role == SourceRole::Manufacturer && p.tier == 1))
        .filter(|p| p.tier <= 2)
        .map(|p| p.root_domain.as_str())
        .collect();

    let helper_present = confirmed.iter().any(|p| p.role == SourceRole::Helper);
    let corroborated =
        corroborating.len() >= 2 || (!corroborating.is_empty() && helper_present);

    let contradictions = find_contradictions(pages);

    let confirmed_domains: HashSet<&str> =
        confirmed.iter().map(|p| p.root_domain.as_str()).collect();

    let status = if !contradictions.is_empty() {
        IdentityStatus::IdentityConflict
    } else if manufacturer_anchor && corroborated {
        IdentityStatus::Confirmed
    } else if !confirmed.is_empty()
        || pages
            .iter()
            .any(|p| p.identity.decision == PageDecision::Warning)
    {
        IdentityStatus::LowConfidence
    } else {
        IdentityStatus::IdentityFailed
    };

    IdentityReport {
        status,
        confirmed_pages: confirmed.len(),
        confirmed_domains: confirmed_domains.len(),
        manufacturer_anchor,
        contradictions,
    }
}

/// Aggregate contradictions across admitted pages
fn find_contradictions(pages: &[PageEvidence]) -> Vec<String> {
    let admitted: Vec<&PageEvidence> = pages
        .iter()
        .filter(|p| p.identity.decision.admits_candidates())
        .collect();

    let mut out = Vec::new();

    // Connection classes: wired vs wireless conflicts unless dual covers both
    let classes: HashSet<ConnectionClass> =
        admitted.iter().filter_map(|p| p.connection).collect();
    if classes.contains(&ConnectionClass::Wired)
        && classes.contains(&ConnectionClass::Wireless)
        && !classes.contains(&ConnectionClass::Dual)
    {
        out.push("connection_class_conflict".to_string());
    }

    // Sensor families must share most of their tokens
    let sensors: Vec<HashSet<String>> = admitted
        .iter()
        .flat_map(|p| p.sensors.iter())
        .map(|s| token_set(s))
        .collect();
    'outer: for (i, a) in sensors.iter().enumerate() {
        for b in sensors.iter().skip(i + 1) {
            if overlap(a, b) < SENSOR_OVERLAP_MIN {
                out.push("sensor_family_conflict".to_string());
                break 'outer;
            }
        }
    }

    // SKU segment sets with no shared segment at all
    let sku_segments: Vec<HashSet<String>> = admitted
        .iter()
        .flat_map(|p| p.skus.iter())
        .map(|s| {
            s.to_lowercase()
                .split(['-', '_', ' '])
                .filter(|seg| !seg.is_empty())
                .map(|seg| seg.to_string())
                .collect()
        })
        .collect();
    'sku: for (i, a) in sku_segments.iter().enumerate() {
        for b in sku_segments.iter().skip(i + 1) {
            if !a.is_empty() && !b.is_empty() && a.intersection(b).count() == 0 {
                out.push("sku_conflict".to_string());
                break 'sku;
            }
        }
    }

    // Physical dimensions cannot drift more than a few millimetres
    let mut dims: HashMap<&str, (f64, f64)> = HashMap::new();
    for page in &admitted {
        for (field, value) in &page.dimensions_mm {
            let entry = dims.entry(field.as_str()).or_insert((*value, *value));
            entry.0 = entry.0.min(*value);
            entry.1 = entry.1.max(*value);
        }
    }
    for (field, (min, max)) in dims {
        if max - min > DIMENSION_CONFLICT_MM {
            out.push(format!("dimension_conflict:{}", field));
        }
    }

    out.sort();
    out
}
