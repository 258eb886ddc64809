//! Round & Run Summaries
//! What got accepted, what is still missing, and the final validation
//! verdict a run ships with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusOutcome;
use crate::identity::IdentityStatus;
use crate::models::{FieldRuleSet, FieldStatus, NormalizedSpec, RunSummary};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub accepted_fields: Vec<String>,
    pub flagged_fields: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_critical: Vec<String>,
    pub missing_expected: Vec<String>,
    pub mean_confidence: f64,
    pub coverage_percent: f64,
    /// Accepted fields that were not accepted before this round
    pub new_accepted_fields: usize,
    /// Sources that newly yielded an accepted field this round
    pub new_high_yield_sources: usize,
}

pub fn summarize_round(
    outcome: &ConsensusOutcome,
    rules: &FieldRuleSet,
    previous: Option<&RoundSummary>,
    round: u32,
    new_high_yield_sources: usize,
) -> RoundSummary {
    let accepted_fields: Vec<String> = outcome
        .fields
        .values()
        .filter(|f| f.status == FieldStatus::Accepted)
        .map(|f| f.field.clone())
        .collect();
    let flagged_fields: Vec<String> = outcome
        .fields
        .values()
        .filter(|f| f.status == FieldStatus::FlaggedForReview)
        .map(|f| f.field.clone())
        .collect();

    let is_satisfied =
        |field: &str| accepted_fields.iter().any(|f| f == field);

    let missing_required: Vec<String> = rules
        .required_fields()
        .into_iter()
        .filter(|f| !is_satisfied(f))
        .map(|f| f.to_string())
        .collect();
    let missing_critical: Vec<String> = rules
        .critical_fields()
        .into_iter()
        .filter(|f| !is_satisfied(f))
        .map(|f| f.to_string())
        .collect();
    let missing_expected: Vec<String> = rules
        .expected_fields()
        .into_iter()
        .filter(|f| !is_satisfied(f))
        .map(|f| f.to_string())
        .collect();

    let resolved: Vec<f64> = outcome
        .fields
        .values()
        .filter(|f| f.value.is_some())
        .map(|f| f.confidence)
        .collect();
    let mean_confidence = if resolved.is_empty() {
        0.0
    } else {
        resolved.iter().sum::<f64>() / resolved.len() as f64
    };

    let coverage_percent = if rules.rules.is_empty() {
        0.0
    } else {
        100.0 * accepted_fields.len() as f64 / rules.rules.len() as f64
    };

    let new_accepted_fields = match previous {
        Some(prev) => accepted_fields
            .iter()
            .filter(|f| !prev.accepted_fields.contains(f))
            .count(),
        None => accepted_fields.len(),
    };

    RoundSummary {
        round,
        accepted_fields,
        flagged_fields,
        missing_required,
        missing_critical,
        missing_expected,
        mean_confidence,
        coverage_percent,
        new_accepted_fields,
        new_high_yield_sources,
    }
}

/// Final verdict: a run validates only when required coverage is complete,
/// critical fields meet their pass targets, and identity is locked.
pub fn build_run_summary(
    product_id: &str,
    run_id: &str,
    outcome: &ConsensusOutcome,
    last_round: &RoundSummary,
    rules: &FieldRuleSet,
    identity_status: IdentityStatus,
    rounds: u32,
    stop_reason: &str,
) -> RunSummary {
    let critical_below_target: Vec<String> = rules
        .critical_fields()
        .into_iter()
        .filter(|field| {
            outcome
                .fields
                .get(*field)
                .map(|f| !f.meets_pass_target)
                .unwrap_or(true)
        })
        .map(|f| f.to_string())
        .collect();

    let required_total = rules.required_fields().len();
    let completeness_required_percent = if required_total == 0 {
        100.0
    } else {
        100.0 * (required_total - last_round.missing_required.len()) as f64
            / required_total as f64
    };

    let (validated, validated_reason) = if identity_status == IdentityStatus::IdentityConflict {
        (false, "IDENTITY_CONFLICT")
    } else if identity_status == IdentityStatus::IdentityFailed {
        (false, "IDENTITY_FAILED")
    } else if !last_round.missing_required.is_empty() {
        (false, "BELOW_REQUIRED_COMPLETENESS")
    } else if !critical_below_target.is_empty() {
        (false, "CRITICAL_BELOW_PASS_TARGET")
    } else if identity_status != IdentityStatus::Confirmed {
        (false, "IDENTITY_NOT_CONFIRMED")
    } else {
        (true, "OK")
    };

    RunSummary {
        product_id: product_id.to_string(),
        run_id: run_id.to_string(),
        validated,
        validated_reason: validated_reason.to_string(),
        confidence: last_round.mean_confidence,
        completeness_required_percent,
        coverage_overall_percent: last_round.coverage_percent,
        critical_fields_below_pass_target: critical_below_target,
        missing_required_fields: last_round.missing_required.clone(),
        missing_expected_fields: last_round.missing_expected.clone(),
        rounds,
        stop_reason: stop_reason.to_string(),
    }
}

/// Normalized spec artifact: only fields that independently passed their
/// pass target are written.
pub fn build_normalized_spec(product_id: &str, outcome: &ConsensusOutcome) -> NormalizedSpec {
    let mut spec = NormalizedSpec {
        product_id: product_id.to_string(),
        ..NormalizedSpec::default()
    };

    for field in outcome.fields.values() {
        if field.status != FieldStatus::Accepted || !field.meets_pass_target {
            continue;
        }
        let Some(value) = &field.value else { continue };
        spec.fields.insert(field.field.clone(), value.clone());
        if let Some(unit) = &field.unit {
            spec.units.insert(field.field.clone(), unit.clone());
        }
        spec.confidence.insert(field.field.clone(), field.confidence);
    }

    spec
}

/// Per-field traffic lights keyed by field name
pub fn traffic_map(
    outcome: &ConsensusOutcome,
) -> BTreeMap<String, crate::models::TrafficLight> {
    outcome
        .fields
        .iter()
        .map(|(k, f)| (k.clone(), f.traffic.clone()))
        .collect()
}
