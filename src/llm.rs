//! LLM Router
//! Optional planning/validation assistance behind circuit breakers and
//! budget gates. The pipeline must run fully without it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

/// Failures before a provider's breaker opens
const BREAKER_THRESHOLD: u32 = 3;

/// How long an open breaker stays open before a probe is allowed
const BREAKER_COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    Plan,
    Extract,
    Validate,
    Write,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::Plan => "plan",
            LlmRole::Extract => "extract",
            LlmRole::Validate => "validate",
            LlmRole::Write => "write",
        }
    }

    /// Essential roles abort the round when budget blocks them;
    /// the rest are silently dropped
    pub fn is_essential(&self) -> bool {
        matches!(self, LlmRole::Validate)
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn call(
        &self,
        role: LlmRole,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<Value>;
    /// Rough pre-call cost estimate in USD
    fn estimate_cost_usd(&self, system: &str, user: &str) -> f64;
}

struct Breaker {
    failures: u32,
    open_until: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            failures: 0,
            open_until: None,
        }
    }

    fn is_open(&self) -> bool {
        self.open_until.map(|t| Instant::now() < t).unwrap_or(false)
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.open_until = None;
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= BREAKER_THRESHOLD {
            self.open_until = Some(Instant::now() + BREAKER_COOLDOWN);
        }
    }
}

#[derive(Debug, Default)]
struct CostLedger {
    product_spent_usd: f64,
    month_spent_usd: f64,
}

/// Routes role-based JSON calls across providers with failover.
pub struct LlmRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    breakers: Mutex<HashMap<&'static str, Breaker>>,
    costs: Mutex<CostLedger>,
    per_product_budget_usd: f64,
    monthly_budget_usd: f64,
    enabled: bool,
}

impl LlmRouter {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        per_product_budget_usd: f64,
        monthly_budget_usd: f64,
    ) -> Self {
        let enabled = !providers.is_empty();
        let breakers = providers.iter().map(|p| (p.name(), Breaker::new())).collect();
        Self {
            providers,
            breakers: Mutex::new(breakers),
            costs: Mutex::new(CostLedger::default()),
            per_product_budget_usd,
            monthly_budget_usd,
            enabled,
        }
    }

    /// A router with no providers: every call degrades to None
    pub fn disabled() -> Self {
        Self::new(Vec::new(), 0.0, 0.0)
    }

    pub fn reset_product_budget(&self) {
        self.costs.lock().product_spent_usd = 0.0;
    }

    /// Call the first healthy provider. `Ok(None)` means the pipeline
    /// continues without assistance; `Err` only for essential roles
    /// blocked by budget.
    pub async fn call(
        &self,
        role: LlmRole,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<Option<Value>> {
        if !self.enabled {
            return Ok(None);
        }

        // Budget gate before any provider is touched
        let estimate = self
            .providers
            .first()
            .map(|p| p.estimate_cost_usd(system, user))
            .unwrap_or(0.0);
        {
            let costs = self.costs.lock();
            let over_product =
                costs.product_spent_usd + estimate > self.per_product_budget_usd;
            let over_month = costs.month_spent_usd + estimate > self.monthly_budget_usd;
            if over_product || over_month {
                if role.is_essential() {
                    bail!("llm_budget_exceeded for essential role {}", role.as_str());
                }
                debug!(role = role.as_str(), "budget gate dropped non-essential call");
                return Ok(None);
            }
        }

        for provider in &self.providers {
            let open = self
                .breakers
                .lock()
                .get(provider.name())
                .map(|b| b.is_open())
                .unwrap_or(false);
            if open {
                continue;
            }

            match provider.call(role, system, user, schema).await {
                Ok(value) => {
                    if let Some(b) = self.breakers.lock().get_mut(provider.name()) {
                        b.record_success();
                    }
                    let mut costs = self.costs.lock();
                    costs.product_spent_usd += estimate;
                    costs.month_spent_usd += estimate;
                    return Ok(Some(value));
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        role = role.as_str(),
                        error = %e,
                        "⚡ LLM provider failed, trying fallback"
                    );
                    if let Some(b) = self.breakers.lock().get_mut(provider.name()) {
                        b.record_failure();
                    }
                }
            }
        }

        warn!(role = role.as_str(), "all LLM providers failed; continuing without assistance");
        Ok(None)
    }
}

/// Generic JSON-endpoint provider: POSTs the role-shaped request and
/// expects a JSON document back. Vendor specifics stay outside the core.
pub struct HttpJsonProvider {
    name: &'static str,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpJsonProvider {
    pub fn new(name: &'static str, endpoint: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Ok(Self {
            name,
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl LlmProvider for HttpJsonProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(
        &self,
        role: LlmRole,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<Value> {
        let body = serde_json::json!({
            "role": role.as_str(),
            "system": system,
            "user": user,
            "schema": schema,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("LLM endpoint returned {}", response.status());
        }
        Ok(response.json().await?)
    }

    fn estimate_cost_usd(&self, system: &str, user: &str) -> f64 {
        // Rough: chars/4 as tokens at a conservative blended rate
        let tokens = (system.len() + user.len()) as f64 / 4.0;
        tokens * 8e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        fail: bool,
        cost: f64,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn call(
            &self,
            _role: LlmRole,
            _system: &str,
            _user: &str,
            _schema: &Value,
        ) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider error")
            }
            Ok(json!({"ok": true, "provider": self.name}))
        }
        fn estimate_cost_usd(&self, _system: &str, _user: &str) -> f64 {
            self.cost
        }
    }

    fn provider(name: &'static str, fail: bool, cost: f64) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            name,
            fail,
            cost,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn disabled_router_degrades_quietly() {
        let router = LlmRouter::disabled();
        let result = router
            .call(LlmRole::Plan, "sys", "user", &json!({}))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn failover_to_fallback_provider() {
        let primary = provider("primary", true, 0.01);
        let fallback = provider("fallback", false, 0.01);
        let router = LlmRouter::new(vec![primary.clone(), fallback.clone()], 1.0, 10.0);

        let result = router
            .call(LlmRole::Plan, "sys", "user", &json!({}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["provider"], "fallback");
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_failures() {
        let primary = provider("primary", true, 0.01);
        let fallback = provider("fallback", false, 0.01);
        let router = LlmRouter::new(vec![primary.clone(), fallback.clone()], 10.0, 100.0);

        for _ in 0..5 {
            router
                .call(LlmRole::Plan, "sys", "user", &json!({}))
                .await
                .unwrap();
        }

        // Breaker opened after 3 failures; primary is skipped afterwards
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn budget_gate_drops_or_aborts_by_role() {
        let expensive = provider("expensive", false, 5.0);
        let router = LlmRouter::new(vec![expensive.clone()], 1.0, 100.0);

        // Non-essential: silently dropped
        let result = router
            .call(LlmRole::Plan, "sys", "user", &json!({}))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(expensive.calls.load(Ordering::SeqCst), 0);

        // Essential: recoverable error
        let err = router
            .call(LlmRole::Validate, "sys", "user", &json!({}))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn per_product_budget_resets() {
        let p = provider("p", false, 0.6);
        let router = LlmRouter::new(vec![p.clone()], 1.0, 100.0);

        assert!(router
            .call(LlmRole::Plan, "s", "u", &json!({}))
            .await
            .unwrap()
            .is_some());
        // Second call would exceed the per-product budget
        assert!(router
            .call(LlmRole::Plan, "s", "u", &json!({}))
            .await
            .unwrap()
            .is_none());

        router.reset_product_budget();
        assert!(router
            .call(LlmRole::Plan, "s", "u", &json!({}))
            .await
            .unwrap()
            .is_some());
    }
}
