//! Shared Domain Types
//! Mission: One vetted spec per product, with evidence to back every value

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How hard the product is to tell apart from its siblings.
/// Drives the identity match threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ambiguity {
    Easy,
    Medium,
    Hard,
    VeryHard,
    ExtraHard,
}

impl Ambiguity {
    pub fn as_str(&self) -> &str {
        match self {
            Ambiguity::Easy => "easy",
            Ambiguity::Medium => "medium",
            Ambiguity::Hard => "hard",
            Ambiguity::VeryHard => "very_hard",
            Ambiguity::ExtraHard => "extra_hard",
        }
    }
}

/// Immutable product identity for the duration of a run.
/// Every fetched page is reconciled against this lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLock {
    pub product_id: String,
    pub brand: String,
    pub model: String,
    pub variant: Option<String>,
    pub sku: Option<String>,
    pub mpn: Option<String>,
    pub gtin: Option<String>,
    /// Tokens that disqualify a source outright (lowercased)
    #[serde(default)]
    pub negative_tokens: Vec<String>,
    /// Brand + model tokens every credible source must cover (lowercased)
    #[serde(default)]
    pub required_tokens: Vec<String>,
    pub ambiguity: Ambiguity,
}

impl IdentityLock {
    pub fn new(product_id: &str, brand: &str, model: &str) -> Self {
        let mut required_tokens: Vec<String> = Vec::new();
        for token in brand.split_whitespace().chain(model.split_whitespace()) {
            let token = token.to_lowercase();
            if !token.is_empty() && !required_tokens.contains(&token) {
                required_tokens.push(token);
            }
        }

        Self {
            product_id: product_id.to_string(),
            brand: brand.to_string(),
            model: model.to_string(),
            variant: None,
            sku: None,
            mpn: None,
            gtin: None,
            negative_tokens: Vec::new(),
            required_tokens,
            ambiguity: Ambiguity::Medium,
        }
    }

    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_string());
        self
    }

    pub fn with_sku(mut self, sku: &str) -> Self {
        self.sku = Some(sku.to_string());
        self
    }

    pub fn with_mpn(mut self, mpn: &str) -> Self {
        self.mpn = Some(mpn.to_string());
        self
    }

    pub fn with_gtin(mut self, gtin: &str) -> Self {
        self.gtin = Some(gtin.to_string());
        self
    }

    pub fn with_ambiguity(mut self, ambiguity: Ambiguity) -> Self {
        self.ambiguity = ambiguity;
        self
    }

    pub fn with_negative_tokens(mut self, tokens: &[&str]) -> Self {
        self.negative_tokens = tokens.iter().map(|t| t.to_lowercase()).collect();
        self
    }

    /// True when at least one hard identifier (sku/mpn/gtin) is present
    pub fn has_strong_id(&self) -> bool {
        self.sku.is_some() || self.mpn.is_some() || self.gtin.is_some()
    }
}

/// Field value type from the compiled field-rule workbook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Integer,
    String,
    Enum,
    Boolean,
    ComponentRef,
    Date,
}

/// How an observed value may differ from a reference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariancePolicy {
    #[default]
    Authoritative,
    UpperBound,
    LowerBound,
    Range,
    OverrideAllowed,
}

impl VariancePolicy {
    pub fn as_str(&self) -> &str {
        match self {
            VariancePolicy::Authoritative => "authoritative",
            VariancePolicy::UpperBound => "upper_bound",
            VariancePolicy::LowerBound => "lower_bound",
            VariancePolicy::Range => "range",
            VariancePolicy::OverrideAllowed => "override_allowed",
        }
    }
}

fn default_pass_target() -> f64 {
    1.0
}

/// Per-field extraction rule, loaded once per category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub unit: Option<String>,
    pub canonical_unit: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub variance_policy: VariancePolicy,
    /// Component type for component_ref fields (e.g. "sensor", "switch")
    pub component_type: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub required: bool,
    /// Minimum weighted confirmations before the field is accepted
    #[serde(default = "default_pass_target")]
    pub pass_target: f64,
    #[serde(default)]
    pub is_list: bool,
}

impl FieldRule {
    pub fn new(key: &str, field_type: FieldType) -> Self {
        Self {
            key: key.to_string(),
            field_type,
            unit: None,
            canonical_unit: None,
            aliases: Vec::new(),
            enum_values: Vec::new(),
            variance_policy: VariancePolicy::Authoritative,
            component_type: None,
            critical: false,
            required: false,
            pass_target: 1.0,
            is_list: false,
        }
    }

    pub fn with_canonical_unit(mut self, unit: &str) -> Self {
        self.canonical_unit = Some(unit.to_string());
        self
    }

    pub fn with_enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_variance_policy(mut self, policy: VariancePolicy) -> Self {
        self.variance_policy = policy;
        self
    }

    pub fn with_component_type(mut self, component_type: &str) -> Self {
        self.component_type = Some(component_type.to_string());
        self.field_type = FieldType::ComponentRef;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self.required = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// The compiled rule set for the active category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRuleSet {
    pub category: String,
    pub rules: Vec<FieldRule>,
}

impl FieldRuleSet {
    pub fn get(&self, key: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.key == key)
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.required)
            .map(|r| r.key.as_str())
            .collect()
    }

    pub fn critical_fields(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.critical)
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Fields that are neither required nor critical; nice-to-have coverage
    pub fn expected_fields(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| !r.required && !r.critical)
            .map(|r| r.key.as_str())
            .collect()
    }
}

/// Read-only component database entry (sensors, switches, encoders...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub component_type: String,
    pub canonical_name: String,
    pub maker: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub variance_policies: HashMap<String, VariancePolicy>,
}

impl ComponentEntry {
    /// Case-insensitive match on the canonical name or any alias
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if self.canonical_name.to_lowercase() == name {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase() == name)
    }

    pub fn numeric_property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(|v| v.as_f64())
    }
}

/// Component DB for the active category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentDb {
    pub entries: Vec<ComponentEntry>,
}

impl ComponentDb {
    pub fn lookup(&self, component_type: &str, name: &str) -> Option<&ComponentEntry> {
        self.entries
            .iter()
            .filter(|e| e.component_type == component_type)
            .find(|e| e.matches_name(name))
    }

    pub fn of_type<'a>(
        &'a self,
        component_type: &'a str,
    ) -> impl Iterator<Item = &'a ComponentEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.component_type == component_type)
    }
}

/// Functional role of a source host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Manufacturer,
    LabReview,
    Retail,
    Database,
    Helper,
    Other,
}

impl SourceRole {
    pub fn as_str(&self) -> &str {
        match self {
            SourceRole::Manufacturer => "manufacturer",
            SourceRole::LabReview => "lab_review",
            SourceRole::Retail => "retail",
            SourceRole::Database => "database",
            SourceRole::Helper => "helper",
            SourceRole::Other => "other",
        }
    }
}

/// How a candidate was pulled out of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    DomTable,
    DomInline,
    JsonLd,
    EmbeddedState,
    NetworkPayload,
    Temporal,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ExtractionMethod::DomTable => "dom_table",
            ExtractionMethod::DomInline => "dom_inline",
            ExtractionMethod::JsonLd => "jsonld",
            ExtractionMethod::EmbeddedState => "embedded_state",
            ExtractionMethod::NetworkPayload => "network_payload",
            ExtractionMethod::Temporal => "temporal",
        }
    }
}

/// Where a candidate value came from.
/// `quote` is required for scalar candidates with textual provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub url: String,
    pub final_url: Option<String>,
    pub quote: Option<String>,
    pub quote_span: Option<(usize, usize)>,
    pub retrieved_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(url: &str, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            url: url.to_string(),
            final_url: None,
            quote: None,
            quote_span: None,
            retrieved_at,
        }
    }

    pub fn with_quote(mut self, quote: &str, span: Option<(usize, usize)>) -> Self {
        self.quote = Some(quote.to_string());
        self.quote_span = span;
        self
    }
}

/// Extracted value, tagged by shape so downstream code never sniffs strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateValue {
    Scalar { raw: String },
    Component { component_type: String, name: String },
    List { values: Vec<String> },
}

impl CandidateValue {
    pub fn scalar(raw: &str) -> Self {
        CandidateValue::Scalar {
            raw: raw.trim().to_string(),
        }
    }

    pub fn component(component_type: &str, name: &str) -> Self {
        CandidateValue::Component {
            component_type: component_type.to_string(),
            name: name.trim().to_string(),
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            CandidateValue::Scalar { raw } => Some(raw),
            _ => None,
        }
    }
}

/// A single (field, value, evidence) observation from one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Assignment-order id; the final consensus tie-break
    pub id: u64,
    pub field: String,
    pub value: CandidateValue,
    pub source_url: String,
    pub host: String,
    pub root_domain: String,
    pub role: SourceRole,
    pub tier: u8,
    pub method: ExtractionMethod,
    pub evidence: Evidence,
    /// Raw extractor confidence before consensus weighting
    pub score: f64,
}

impl Candidate {
    pub fn is_component_field(&self) -> bool {
        matches!(self.value, CandidateValue::Component { .. })
    }

    pub fn is_list_field(&self) -> bool {
        matches!(self.value, CandidateValue::List { .. })
    }
}

/// Catalog entry for the target product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCatalogEntry {
    pub product_id: String,
    pub brand: String,
    pub model: String,
    pub variant: Option<String>,
    pub sku: Option<String>,
    pub mpn: Option<String>,
    pub gtin: Option<String>,
    #[serde(default)]
    pub seed_urls: Vec<String>,
    #[serde(default)]
    pub ambiguity: Option<Ambiguity>,
    #[serde(default)]
    pub negative_tokens: Vec<String>,
}

impl ProductCatalogEntry {
    pub fn to_identity_lock(&self) -> IdentityLock {
        let mut lock = IdentityLock::new(&self.product_id, &self.brand, &self.model);
        if let Some(variant) = &self.variant {
            lock = lock.with_variant(variant);
        }
        if let Some(sku) = &self.sku {
            lock = lock.with_sku(sku);
        }
        if let Some(mpn) = &self.mpn {
            lock = lock.with_mpn(mpn);
        }
        if let Some(gtin) = &self.gtin {
            lock = lock.with_gtin(gtin);
        }
        if let Some(ambiguity) = self.ambiguity {
            lock = lock.with_ambiguity(ambiguity);
        }
        lock.negative_tokens = self
            .negative_tokens
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        lock
    }
}

/// Per-domain trust assignment for the active category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAssignment {
    pub domain: String,
    pub tier: u8,
    pub role: SourceRole,
}

/// Approved/denied domain lists plus the tier map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainTierMap {
    #[serde(default)]
    pub assignments: Vec<DomainAssignment>,
    #[serde(default)]
    pub approved: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

impl DomainTierMap {
    /// Tier for a domain; unverified domains land in tier 4
    pub fn tier_for(&self, domain: &str) -> u8 {
        self.assignments
            .iter()
            .find(|a| a.domain == domain)
            .map(|a| a.tier)
            .unwrap_or(4)
    }

    pub fn role_for(&self, domain: &str) -> SourceRole {
        self.assignments
            .iter()
            .find(|a| a.domain == domain)
            .map(|a| a.role)
            .unwrap_or(SourceRole::Other)
    }

    pub fn is_approved(&self, domain: &str) -> bool {
        self.approved.iter().any(|d| d == domain)
    }

    pub fn is_denied(&self, domain: &str) -> bool {
        self.denied.iter().any(|d| d == domain)
    }
}

/// Per-field acceptance state after consensus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Accepted,
    FlaggedForReview,
    Unresolved,
}

/// Review surface color for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficColor {
    Green,
    Yellow,
    Red,
    Gray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficLight {
    pub color: TrafficColor,
    pub status: FieldStatus,
    pub reason_codes: Vec<String>,
}

/// One evidence reference inside a provenance artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEvidence {
    pub url: String,
    pub host: String,
    pub root_domain: String,
    pub tier: u8,
    pub method: ExtractionMethod,
    pub quote: Option<String>,
    pub quote_span: Option<(usize, usize)>,
    pub retrieved_at: DateTime<Utc>,
}

/// Per-field provenance emitted alongside the normalized spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub value: Option<serde_json::Value>,
    pub confirmations: usize,
    pub approved_confirmations: usize,
    pub pass_target: f64,
    pub meets_pass_target: bool,
    pub confidence: f64,
    pub evidence: Vec<ProvenanceEvidence>,
    #[serde(default)]
    pub needs_ai_review: bool,
}

/// The normalized spec artifact for one product
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedSpec {
    pub product_id: String,
    pub fields: HashMap<String, serde_json::Value>,
    pub units: HashMap<String, String>,
    pub confidence: HashMap<String, f64>,
}

/// Validation outcome for a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub product_id: String,
    pub run_id: String,
    pub validated: bool,
    pub validated_reason: String,
    pub confidence: f64,
    pub completeness_required_percent: f64,
    pub coverage_overall_percent: f64,
    pub critical_fields_below_pass_target: Vec<String>,
    pub missing_required_fields: Vec<String>,
    pub missing_expected_fields: Vec<String>,
    pub rounds: u32,
    pub stop_reason: String,
}
