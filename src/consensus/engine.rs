//! Consensus & Variance Engine
//! Merges candidates per field: weighted tier/role/method scoring,
//! variance-policy clustering, winner selection, acceptance thresholds.
//! CPU-only; the controller feeds it and persists what comes out.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::json;
use tracing::debug;

use crate::consensus::units::to_canonical;
use crate::identity::IdentityStatus;
use crate::models::{
    Candidate, CandidateValue, ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, FieldStatus,
    FieldType, ExtractionMethod, ProvenanceEvidence, SourceRole, TrafficColor, TrafficLight,
    VariancePolicy,
};

/// Clusters scoring at least this fraction of the winner count as conflict
const CONFLICT_CLUSTER_RATIO: f64 = 0.25;

fn tier_weight(tier: u8) -> f64 {
    match tier {
        1 => 1.0,
        2 => 0.8,
        3 => 0.55,
        _ => 0.35,
    }
}

fn role_weight(role: SourceRole) -> f64 {
    match role {
        SourceRole::Manufacturer => 1.0,
        SourceRole::LabReview => 0.9,
        SourceRole::Database => 0.8,
        SourceRole::Retail => 0.7,
        SourceRole::Helper => 0.6,
        SourceRole::Other => 0.5,
    }
}

fn method_weight(method: ExtractionMethod) -> f64 {
    match method {
        ExtractionMethod::DomTable => 1.0,
        ExtractionMethod::JsonLd => 0.95,
        ExtractionMethod::EmbeddedState => 0.9,
        ExtractionMethod::NetworkPayload => 0.85,
        ExtractionMethod::DomInline => 0.75,
        ExtractionMethod::Temporal => 0.6,
    }
}

/// Rank penalty in [-1.5, +0.5] becomes a positive weight multiplier
fn rank_multiplier(penalty: f64) -> f64 {
    (1.0 + penalty).max(0.05)
}

/// Everything the engine needs besides the candidates themselves
pub struct ConsensusInput<'a> {
    pub rules: &'a FieldRuleSet,
    pub components: &'a ComponentDb,
    pub tier_map: &'a DomainTierMap,
    pub identity_status: IdentityStatus,
    /// Canonical URLs of pages the identity gate confirmed
    pub confirmed_urls: &'a HashSet<String>,
    pub rank_penalties: &'a HashMap<String, f64>,
    pub auto_accept: f64,
    pub flag_review: f64,
}

/// Consensus result for one field
#[derive(Debug, Clone)]
pub struct FieldOutcome {
    pub field: String,
    pub value: Option<serde_json::Value>,
    pub unit: Option<String>,
    pub confidence: f64,
    pub status: FieldStatus,
    pub traffic: TrafficLight,
    pub confirmations: usize,
    pub approved_confirmations: usize,
    pub pass_target: f64,
    pub meets_pass_target: bool,
    pub needs_ai_review: bool,
    pub cluster_count: usize,
    pub conflict: bool,
    pub evidence: Vec<ProvenanceEvidence>,
    pub reason: Option<String>,
    /// Compare key of the winning cluster, for the yields ledger
    pub value_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConsensusOutcome {
    pub fields: BTreeMap<String, FieldOutcome>,
}

impl ConsensusOutcome {
    pub fn accepted_fields(&self) -> impl Iterator<Item = &FieldOutcome> {
        self.fields
            .values()
            .filter(|f| f.status == FieldStatus::Accepted)
    }
}

struct Member<'a> {
    candidate: &'a Candidate,
    weight: f64,
    partial: f64,
    violation: bool,
}

struct Cluster<'a> {
    key: String,
    display: serde_json::Value,
    numeric: Option<f64>,
    unit: Option<String>,
    members: Vec<Member<'a>>,
}

impl<'a> Cluster<'a> {
    fn score(&self) -> f64 {
        self.members.iter().map(|m| m.weight * m.partial).sum()
    }

    fn tier1_confirmations(&self, confirmed: &HashSet<String>) -> usize {
        self.members
            .iter()
            .filter(|m| m.candidate.tier == 1 && confirmed.contains(&m.candidate.source_url))
            .count()
    }

    fn earliest_span(&self) -> usize {
        self.members
            .iter()
            .filter_map(|m| m.candidate.evidence.quote_span.map(|(s, _)| s))
            .min()
            .unwrap_or(usize::MAX)
    }

    fn min_candidate_id(&self) -> u64 {
        self.members
            .iter()
            .map(|m| m.candidate.id)
            .min()
            .unwrap_or(u64::MAX)
    }
}

/// Numeric reference a field is checked against (from the component DB)
struct Reference {
    value: f64,
    policy: VariancePolicy,
}

/// Merge candidates into per-field outcomes. Commutative over candidate
/// order: same multiset of candidates, same result.
pub fn run_consensus(candidates: &[Candidate], input: &ConsensusInput) -> ConsensusOutcome {
    let mut by_field: HashMap<&str, Vec<&Candidate>> = HashMap::new();
    for candidate in candidates {
        by_field
            .entry(candidate.field.as_str())
            .or_default()
            .push(candidate);
    }
    // Deterministic regardless of arrival order
    for list in by_field.values_mut() {
        list.sort_by_key(|c| c.id);
    }

    let mut outcome = ConsensusOutcome::default();

    // Component fields resolve first; their DB entries provide references
    // for the scalar fields that describe them
    let mut references: HashMap<String, Reference> = HashMap::new();
    for rule in &input.rules.rules {
        if rule.field_type != FieldType::ComponentRef {
            continue;
        }
        let field_candidates = by_field.get(rule.key.as_str()).cloned().unwrap_or_default();
        let field_outcome = resolve_field(rule, &field_candidates, input, &references);

        if let (Some(serde_json::Value::String(name)), Some(component_type)) =
            (&field_outcome.value, &rule.component_type)
        {
            if let Some(entry) = input.components.lookup(component_type, name) {
                for (prop, value) in &entry.properties {
                    if let Some(numeric) = value.as_f64() {
                        let policy = entry
                            .variance_policies
                            .get(prop)
                            .copied()
                            .unwrap_or(VariancePolicy::Authoritative);
                        references.insert(
                            prop.clone(),
                            Reference {
                                value: numeric,
                                policy,
                            },
                        );
                    }
                }
            }
        }
        outcome.fields.insert(rule.key.clone(), field_outcome);
    }

    for rule in &input.rules.rules {
        if rule.field_type == FieldType::ComponentRef {
            continue;
        }
        let field_candidates = by_field.get(rule.key.as_str()).cloned().unwrap_or_default();
        let field_outcome = resolve_field(rule, &field_candidates, input, &references);
        outcome.fields.insert(rule.key.clone(), field_outcome);
    }

    outcome
}

fn resolve_field(
    rule: &FieldRule,
    candidates: &[&Candidate],
    input: &ConsensusInput,
    references: &HashMap<String, Reference>,
) -> FieldOutcome {
    if candidates.is_empty() {
        return empty_outcome(rule);
    }

    let reference = references.get(&rule.key);
    let clusters = build_clusters(rule, candidates, input, reference);
    if clusters.is_empty() {
        return empty_outcome(rule);
    }

    // Winner: score, then tier-1 confirmations, then earliest quote,
    // then candidate id order
    let winner = clusters
        .iter()
        .max_by(|a, b| {
            a.score()
                .partial_cmp(&b.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.tier1_confirmations(input.confirmed_urls)
                        .cmp(&b.tier1_confirmations(input.confirmed_urls))
                })
                .then_with(|| b.earliest_span().cmp(&a.earliest_span()))
                .then_with(|| b.min_candidate_id().cmp(&a.min_candidate_id()))
        })
        .expect("non-empty clusters");

    let winner_score = winner.score();
    let significant = clusters
        .iter()
        .filter(|c| c.score() >= winner_score * CONFLICT_CLUSTER_RATIO)
        .count();
    let conflict = significant > 1;

    let raw_confidence = (winner_score / rule.pass_target).min(1.0);
    let confidence = raw_confidence.min(input.identity_status.max_field_confidence());

    let has_confirmed_member = winner
        .members
        .iter()
        .any(|m| input.confirmed_urls.contains(&m.candidate.source_url));
    let needs_ai_review = winner.members.iter().any(|m| m.violation);

    let status = if confidence >= input.auto_accept && has_confirmed_member {
        FieldStatus::Accepted
    } else if confidence >= input.flag_review {
        FieldStatus::FlaggedForReview
    } else {
        FieldStatus::Unresolved
    };

    let mut reason_codes = Vec::new();
    let color = match status {
        FieldStatus::Accepted => {
            reason_codes.push("consensus".to_string());
            if needs_ai_review {
                reason_codes.push("variance_violation".to_string());
            }
            TrafficColor::Green
        }
        FieldStatus::FlaggedForReview => {
            reason_codes.push("below_auto_accept".to_string());
            if conflict {
                reason_codes.push("conflicting_clusters".to_string());
            }
            if needs_ai_review {
                reason_codes.push("variance_violation".to_string());
            }
            TrafficColor::Yellow
        }
        FieldStatus::Unresolved => {
            reason_codes.push("insufficient_consensus".to_string());
            TrafficColor::Red
        }
    };

    let evidence: Vec<ProvenanceEvidence> = winner
        .members
        .iter()
        .map(|m| ProvenanceEvidence {
            url: m.candidate.source_url.clone(),
            host: m.candidate.host.clone(),
            root_domain: m.candidate.root_domain.clone(),
            tier: m.candidate.tier,
            method: m.candidate.method,
            quote: m.candidate.evidence.quote.clone(),
            quote_span: m.candidate.evidence.quote_span,
            retrieved_at: m.candidate.evidence.retrieved_at,
        })
        .collect();

    let approved_confirmations = winner
        .members
        .iter()
        .filter(|m| input.tier_map.is_approved(&m.candidate.root_domain))
        .count();

    debug!(
        field = %rule.key,
        clusters = clusters.len(),
        score = winner_score,
        confidence,
        "field resolved"
    );

    FieldOutcome {
        field: rule.key.clone(),
        value: Some(winner.display.clone()),
        unit: winner
            .unit
            .clone()
            .or_else(|| rule.canonical_unit.clone()),
        confidence,
        status,
        traffic: TrafficLight {
            color,
            status,
            reason_codes,
        },
        confirmations: winner.members.len(),
        approved_confirmations,
        pass_target: rule.pass_target,
        meets_pass_target: winner_score >= rule.pass_target,
        needs_ai_review,
        cluster_count: clusters.len(),
        conflict,
        evidence,
        reason: None,
        value_key: Some(winner.key.clone()),
    }
}

fn empty_outcome(rule: &FieldRule) -> FieldOutcome {
    FieldOutcome {
        field: rule.key.clone(),
        value: None,
        unit: rule.canonical_unit.clone(),
        confidence: 0.0,
        status: FieldStatus::Unresolved,
        traffic: TrafficLight {
            color: TrafficColor::Gray,
            status: FieldStatus::Unresolved,
            reason_codes: vec!["not_found_after_search".to_string()],
        },
        confirmations: 0,
        approved_confirmations: 0,
        pass_target: rule.pass_target,
        meets_pass_target: false,
        needs_ai_review: false,
        cluster_count: 0,
        conflict: false,
        evidence: Vec::new(),
        reason: Some("not_found_after_search".to_string()),
        value_key: None,
    }
}

fn build_clusters<'a>(
    rule: &FieldRule,
    candidates: &[&'a Candidate],
    input: &ConsensusInput,
    reference: Option<&Reference>,
) -> Vec<Cluster<'a>> {
    let mut clusters: Vec<Cluster<'a>> = Vec::new();

    for &candidate in candidates {
        let penalty = input
            .rank_penalties
            .get(&candidate.source_url)
            .copied()
            .unwrap_or(0.0);
        let weight = tier_weight(candidate.tier)
            * role_weight(candidate.role)
            * method_weight(candidate.method)
            * rank_multiplier(penalty);

        match &candidate.value {
            CandidateValue::Component { name, .. } => {
                let canonical = rule
                    .component_type
                    .as_deref()
                    .and_then(|t| input.components.lookup(t, name))
                    .map(|e| e.canonical_name.clone())
                    .unwrap_or_else(|| name.trim().to_string());
                let key = canonical.to_lowercase();

                join_text_cluster(&mut clusters, key, json!(canonical), candidate, weight);
            }
            CandidateValue::List { values } => {
                let mut sorted = values.clone();
                sorted.sort();
                let key = sorted.join("|").to_lowercase();
                join_text_cluster(&mut clusters, key, json!(values), candidate, weight);
            }
            CandidateValue::Scalar { raw } => match rule.field_type {
                FieldType::Number | FieldType::Integer => {
                    let Some(value) =
                        to_canonical(raw, rule.canonical_unit.as_deref())
                    else {
                        debug!(field = %rule.key, raw = %raw, "unparseable numeric candidate");
                        continue;
                    };
                    let value = if rule.field_type == FieldType::Integer {
                        value.round()
                    } else {
                        value
                    };
                    join_numeric_cluster(
                        &mut clusters,
                        rule,
                        value,
                        candidate,
                        weight,
                        reference,
                    );
                }
                _ => {
                    let (key, display) = canonical_text(rule, raw);
                    join_text_cluster(&mut clusters, key, display, candidate, weight);
                }
            },
        }
    }

    clusters
}

fn join_text_cluster<'a>(
    clusters: &mut Vec<Cluster<'a>>,
    key: String,
    display: serde_json::Value,
    candidate: &'a Candidate,
    weight: f64,
) {
    let member = Member {
        candidate,
        weight,
        partial: 1.0,
        violation: false,
    };
    if let Some(cluster) = clusters.iter_mut().find(|c| c.key == key) {
        cluster.members.push(member);
    } else {
        clusters.push(Cluster {
            key,
            display,
            numeric: None,
            unit: None,
            members: vec![member],
        });
    }
}

fn join_numeric_cluster<'a>(
    clusters: &mut Vec<Cluster<'a>>,
    rule: &FieldRule,
    value: f64,
    candidate: &'a Candidate,
    weight: f64,
    reference: Option<&Reference>,
) {
    // A component-DB reference overrides the rule's own policy
    let policy = reference.map(|r| r.policy).unwrap_or(rule.variance_policy);

    let (partial, violation) = match reference {
        Some(r) => {
            let verdict = policy.compare(value, r.value);
            (verdict.score, verdict.violation)
        }
        None => (1.0, false),
    };

    let member = Member {
        candidate,
        weight,
        partial,
        violation,
    };

    if let Some(cluster) = clusters
        .iter_mut()
        .filter(|c| c.numeric.is_some())
        .find(|c| policy.compatible(value, c.numeric.unwrap_or(f64::NAN)))
    {
        cluster.members.push(member);
        return;
    }

    let display = if rule.field_type == FieldType::Integer {
        json!(value as i64)
    } else {
        json!(value)
    };
    clusters.push(Cluster {
        key: format!("{}", value),
        display,
        numeric: Some(value),
        unit: rule.canonical_unit.clone(),
        members: vec![member],
    });
}

/// Enum aliases collapse onto the declared enum value; other text is
/// compared case-insensitively
fn canonical_text(rule: &FieldRule, raw: &str) -> (String, serde_json::Value) {
    let trimmed = raw.trim();

    if rule.field_type == FieldType::Boolean {
        let truthy = matches!(
            trimmed.to_lowercase().as_str(),
            "true" | "yes" | "1" | "y"
        );
        return (truthy.to_string(), json!(truthy));
    }

    if rule.field_type == FieldType::Enum {
        let lowered = trimmed.to_lowercase();
        for value in &rule.enum_values {
            if value.to_lowercase() == lowered {
                return (value.to_lowercase(), json!(value));
            }
        }
        for alias in &rule.aliases {
            if alias.to_lowercase() == lowered {
                // Alias lists pair with enum values positionally elsewhere;
                // here an alias hit still clusters under its own token
                return (lowered.clone(), json!(trimmed));
            }
        }
        return (lowered, json!(trimmed));
    }

    (trimmed.to_lowercase(), json!(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentEntry, Evidence, FieldRuleSet};
    use chrono::Utc;

    fn candidate(
        id: u64,
        field: &str,
        raw: &str,
        url: &str,
        role: SourceRole,
        tier: u8,
        method: ExtractionMethod,
    ) -> Candidate {
        Candidate {
            id,
            field: field.to_string(),
            value: CandidateValue::scalar(raw),
            source_url: url.to_string(),
            host: "h".to_string(),
            root_domain: url
                .trim_start_matches("https://")
                .split('/')
                .next()
                .unwrap_or("x")
                .to_string(),
            role,
            tier,
            method,
            evidence: Evidence::new(url, Utc::now()),
            score: 0.8,
        }
    }

    fn component_candidate(id: u64, field: &str, name: &str, url: &str, tier: u8) -> Candidate {
        let mut c = candidate(id, field, name, url, SourceRole::Manufacturer, tier, ExtractionMethod::DomTable);
        c.value = CandidateValue::component("sensor", name);
        c
    }

    fn rules() -> FieldRuleSet {
        FieldRuleSet {
            category: "mice".to_string(),
            rules: vec![
                FieldRule::new("dpi", FieldType::Integer)
                    .with_canonical_unit("dpi")
                    .critical(),
                FieldRule::new("weight", FieldType::Number)
                    .with_canonical_unit("g")
                    .required(),
                FieldRule::new("connection", FieldType::Enum)
                    .with_enum_values(&["wired", "wireless", "dual"]),
                FieldRule::new("sensor", FieldType::ComponentRef).with_component_type("sensor"),
            ],
        }
    }

    fn components() -> ComponentDb {
        ComponentDb {
            entries: vec![ComponentEntry {
                component_type: "sensor".to_string(),
                canonical_name: "PMW3389".to_string(),
                maker: Some("PixArt".to_string()),
                aliases: vec!["PixArt PMW3389".to_string()],
                properties: [("dpi".to_string(), json!(18000.0))].into_iter().collect(),
                variance_policies: [("dpi".to_string(), VariancePolicy::UpperBound)]
                    .into_iter()
                    .collect(),
            }],
        }
    }

    fn input_with<'a>(
        rules: &'a FieldRuleSet,
        components: &'a ComponentDb,
        tier_map: &'a DomainTierMap,
        confirmed: &'a HashSet<String>,
        penalties: &'a HashMap<String, f64>,
    ) -> ConsensusInput<'a> {
        ConsensusInput {
            rules,
            components,
            tier_map,
            identity_status: IdentityStatus::Confirmed,
            confirmed_urls: confirmed,
            rank_penalties: penalties,
            auto_accept: 0.95,
            flag_review: 0.65,
        }
    }

    #[test]
    fn unit_converted_values_cluster_together() {
        let rules = rules();
        let components = components();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> = ["https://razer.com/p", "https://rtings.com/p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let candidates = vec![
            candidate(1, "weight", "54 g", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable),
            candidate(2, "weight", "1.9 oz", "https://rtings.com/p", SourceRole::LabReview, 2, ExtractionMethod::DomTable),
        ];

        let outcome = run_consensus(&candidates, &input);
        let weight = &outcome.fields["weight"];
        // 1.9 oz is ~53.86 g: same cluster under the 5% authoritative band
        assert_eq!(weight.cluster_count, 1);
        assert_eq!(weight.confirmations, 2);
        assert!(!weight.conflict);
    }

    #[test]
    fn upper_bound_reference_from_component_db() {
        let rules = rules();
        let components = components();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> =
            [
                "https://razer.com/p",
                "https://rtings.com/p",
                "https://db.example.com/p",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let candidates = vec![
            component_candidate(1, "sensor", "PixArt PMW3389", "https://razer.com/p", 1),
            // Product ships capped below the sensor's rated maximum
            candidate(2, "dpi", "16000", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable),
            candidate(3, "dpi", "16000 dpi", "https://rtings.com/p", SourceRole::LabReview, 2, ExtractionMethod::DomTable),
            candidate(4, "dpi", "16000", "https://db.example.com/p", SourceRole::Database, 2, ExtractionMethod::NetworkPayload),
        ];

        let outcome = run_consensus(&candidates, &input);

        let sensor = &outcome.fields["sensor"];
        assert_eq!(sensor.value, Some(json!("PMW3389")));

        let dpi = &outcome.fields["dpi"];
        assert_eq!(dpi.value, Some(json!(16000)));
        // 16000 <= 18000: full partial score, no review flag
        assert!(!dpi.needs_ai_review);
        assert_eq!(dpi.status, FieldStatus::Accepted);
        assert!((dpi.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn value_above_upper_bound_flags_review() {
        let rules = rules();
        let components = components();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> = ["https://razer.com/p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let candidates = vec![
            component_candidate(1, "sensor", "PMW3389", "https://razer.com/p", 1),
            candidate(2, "dpi", "20000", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable),
        ];

        let outcome = run_consensus(&candidates, &input);
        let dpi = &outcome.fields["dpi"];
        assert!(dpi.needs_ai_review);
    }

    #[test]
    fn higher_weighted_cluster_wins() {
        let rules = rules();
        let components = ComponentDb::default();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> = ["https://razer.com/p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let candidates = vec![
            candidate(1, "weight", "54 g", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable),
            candidate(2, "weight", "95 g", "https://forum.example.com/t", SourceRole::Other, 4, ExtractionMethod::DomInline),
            candidate(3, "weight", "95 g", "https://blog.example.net/r", SourceRole::Other, 4, ExtractionMethod::DomInline),
        ];

        let outcome = run_consensus(&candidates, &input);
        let weight = &outcome.fields["weight"];
        assert_eq!(weight.value, Some(json!(54.0)));
        // Two live clusters: the losing one is strong enough to flag conflict
        assert_eq!(weight.cluster_count, 2);
        assert!(weight.conflict);
    }

    #[test]
    fn enum_values_canonicalize_before_clustering() {
        let rules = rules();
        let components = ComponentDb::default();
        let tier_map = DomainTierMap::default();
        let confirmed = HashSet::new();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let candidates = vec![
            candidate(1, "connection", "Wireless", "https://a.com/p", SourceRole::Retail, 3, ExtractionMethod::DomTable),
            candidate(2, "connection", "wireless", "https://b.com/p", SourceRole::Retail, 3, ExtractionMethod::JsonLd),
        ];

        let outcome = run_consensus(&candidates, &input);
        let connection = &outcome.fields["connection"];
        assert_eq!(connection.cluster_count, 1);
        assert_eq!(connection.value, Some(json!("wireless")));
    }

    #[test]
    fn identity_cap_limits_confidence() {
        let rules = rules();
        let components = ComponentDb::default();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> = ["https://razer.com/p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let mut input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);
        input.identity_status = IdentityStatus::LowConfidence;

        let candidates = vec![candidate(
            1, "weight", "54 g", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable,
        )];

        let outcome = run_consensus(&candidates, &input);
        let weight = &outcome.fields["weight"];
        assert!(weight.confidence <= 0.85 + 1e-9);
        // Capped below auto-accept: flagged, not accepted
        assert_eq!(weight.status, FieldStatus::FlaggedForReview);
    }

    #[test]
    fn missing_field_is_gray_with_reason() {
        let rules = rules();
        let components = ComponentDb::default();
        let tier_map = DomainTierMap::default();
        let confirmed = HashSet::new();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let outcome = run_consensus(&[], &input);
        let weight = &outcome.fields["weight"];
        assert!(weight.value.is_none());
        assert_eq!(weight.traffic.color, TrafficColor::Gray);
        assert_eq!(weight.reason.as_deref(), Some("not_found_after_search"));
    }

    #[test]
    fn consensus_is_order_independent() {
        let rules = rules();
        let components = ComponentDb::default();
        let tier_map = DomainTierMap::default();
        let confirmed: HashSet<String> = ["https://razer.com/p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let penalties = HashMap::new();
        let input = input_with(&rules, &components, &tier_map, &confirmed, &penalties);

        let mut candidates = vec![
            candidate(1, "weight", "54 g", "https://razer.com/p", SourceRole::Manufacturer, 1, ExtractionMethod::DomTable),
            candidate(2, "weight", "95 g", "https://forum.example.com/t", SourceRole::Other, 4, ExtractionMethod::DomInline),
            candidate(3, "weight", "54.1 g", "https://rtings.com/p", SourceRole::LabReview, 2, ExtractionMethod::DomTable),
        ];

        let forward = run_consensus(&candidates, &input);
        candidates.reverse();
        let backward = run_consensus(&candidates, &input);

        let f = &forward.fields["weight"];
        let b = &backward.fields["weight"];
        assert_eq!(f.value, b.value);
        assert!((f.confidence - b.confidence).abs() < 1e-12);
        assert_eq!(f.cluster_count, b.cluster_count);
    }
}
