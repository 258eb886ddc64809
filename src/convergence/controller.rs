//! Convergence Controller
//! Drives per-product rounds: plan, fetch, extract, gate, merge, decide.
//! One product at a time; per-host politeness inside each round.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::consensus::{run_consensus, ConsensusInput, ConsensusOutcome};
use crate::convergence::planner::{plan_queries, rerank_hits, select_tier, PlannedQuery, RoundTier};
use crate::convergence::stop::{uber_stop_decision, StopDecision, StopInputs};
use crate::convergence::summary::{
    build_normalized_spec, build_run_summary, summarize_round, traffic_map, RoundSummary,
};
use crate::events::{EventLog, RunEvent};
use crate::extract::{extract_all, EndpointMiner, ExtractionContext, PageContext};
use crate::fetch::{DynamicCrawlerService, FetchResult, FetchSource};
use crate::frontier::{canonicalize, root_domain, value_hash, FetchRecord, FrontierStore, QueryResult};
use crate::identity::{
    evaluate_page, reconcile, IdentityReport, PageDecision, PageEvidence, PageSignals,
};
use crate::intel::{build_delta, DomainIntelStore};
use crate::llm::{LlmRole, LlmRouter};
use crate::models::{
    Candidate, CandidateValue, ComponentDb, DomainTierMap, FieldProvenance, FieldRuleSet,
    FieldStatus, IdentityLock, NormalizedSpec, ProductCatalogEntry, RunSummary, TrafficLight,
};
use crate::search::SearchService;
use crate::storage::FileStorage;

/// Sources dispatched per round, after dedup and skip filtering
const MAX_SOURCES_PER_ROUND: usize = 12;

/// SERP hits taken per dispatched query after rerank
const HITS_PER_QUERY: usize = 5;

/// Everything the controller needs, wired once at startup
pub struct ControllerDeps {
    pub config: Config,
    pub storage: FileStorage,
    pub frontier: Arc<FrontierStore>,
    pub intel: Arc<DomainIntelStore>,
    pub crawler: Arc<DynamicCrawlerService>,
    pub search: Arc<SearchService>,
    pub llm: Arc<LlmRouter>,
    pub events: Arc<EventLog>,
    pub rules: Arc<ArcSwap<FieldRuleSet>>,
    pub components: Arc<ArcSwap<ComponentDb>>,
    pub tier_map: DomainTierMap,
}

/// What a finished (or cancelled) run hands back
#[derive(Debug, Clone)]
pub struct ProductRunArtifacts {
    pub summary: RunSummary,
    pub spec: NormalizedSpec,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub traffic: BTreeMap<String, TrafficLight>,
    pub identity: IdentityReport,
}

pub struct ConvergenceController {
    deps: ControllerDeps,
    cancel: watch::Receiver<bool>,
}

impl ConvergenceController {
    pub fn new(deps: ControllerDeps, cancel: watch::Receiver<bool>) -> Self {
        Self { deps, cancel }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run the convergence loop for one product to completion or cancel.
    pub async fn run_product(
        &self,
        entry: &ProductCatalogEntry,
    ) -> Result<ProductRunArtifacts> {
        let run_id = Uuid::new_v4().to_string();
        let lock = entry.to_identity_lock();
        let rules = self.deps.rules.load_full();
        let components = self.deps.components.load_full();
        let start = Instant::now();
        let max_rounds = self.deps.config.convergence.max_rounds;

        self.deps.llm.reset_product_budget();
        info!(
            product = %lock.product_id,
            run = %run_id,
            brand = %lock.brand,
            model = %lock.model,
            "🎯 convergence run started"
        );

        let mut all_candidates: Vec<Candidate> = Vec::new();
        let mut pages: Vec<PageEvidence> = Vec::new();
        let mut fetched_this_run: HashSet<String> = HashSet::new();
        let mut high_yield_urls: HashSet<String> = HashSet::new();
        let mut recorded_candidates: HashSet<u64> = HashSet::new();
        let mut previous_summary: Option<RoundSummary> = None;
        let mut no_new_fields_rounds = 0u32;
        let mut no_new_high_yield_rounds = 0u32;
        let mut endpoint_miner = EndpointMiner::new();
        let mut outcome = ConsensusOutcome::default();
        let mut identity_report = reconcile(&[]);
        let mut stop = StopDecision {
            stop: false,
            reason: "continue".to_string(),
        };

        let mut round = 0u32;
        loop {
            if self.cancelled() {
                stop = StopDecision {
                    stop: true,
                    reason: "cancelled".to_string(),
                };
                break;
            }

            let missing = self.missing_fields(&rules, previous_summary.as_ref());
            let required_or_critical_missing = previous_summary
                .as_ref()
                .map(|s| !s.missing_required.is_empty() || !s.missing_critical.is_empty())
                .unwrap_or(true);
            let tier = select_tier(
                round,
                required_or_critical_missing,
                no_new_fields_rounds,
                self.deps.config.convergence.no_progress_limit,
            );

            self.emit(&lock, &run_id, "round_started", Some(round), json!({
                "tier": tier.as_str(),
                "missing_fields": missing.len(),
            }));

            // 1. Plan sources for this round
            let sources = self
                .plan_sources(
                    &lock,
                    &rules,
                    entry,
                    &missing,
                    tier,
                    &endpoint_miner,
                    &fetched_this_run,
                )
                .await;

            // 2. Fetch concurrently under the global cap
            let results = self.fetch_batch(sources).await;

            // 3. Extract and gate per page
            for (_, result) in &results {
                self.absorb_result(
                    &lock,
                    &run_id,
                    round,
                    &rules,
                    &components,
                    result,
                    &mut all_candidates,
                    &mut pages,
                    &mut endpoint_miner,
                    &mut fetched_this_run,
                )?;
            }

            // 4. Cross-page reconciliation
            let had_contradictions = !identity_report.contradictions.is_empty();
            identity_report = reconcile(&pages);
            if !had_contradictions && !identity_report.contradictions.is_empty() {
                // Newly surfaced anchor conflicts count against every
                // domain that fed the contradiction
                let admitted: HashSet<String> = pages
                    .iter()
                    .filter(|p| p.identity.decision.admits_candidates())
                    .map(|p| p.root_domain.clone())
                    .collect();
                for domain in admitted {
                    self.deps
                        .intel
                        .record_identity(&domain, &lock.brand, false, true);
                }
            }

            // 5. Consensus over everything admitted so far
            let confirmed_urls: HashSet<String> = pages
                .iter()
                .filter(|p| p.identity.decision == PageDecision::Confirmed)
                .map(|p| p.identity.url.clone())
                .collect();
            let rank_penalties: HashMap<String, f64> = all_candidates
                .iter()
                .map(|c| c.source_url.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .map(|url| {
                    let penalty = self.deps.frontier.rank_penalty_for_url(&url);
                    (url, penalty)
                })
                .collect();

            let input = ConsensusInput {
                rules: &rules,
                components: &components,
                tier_map: &self.deps.tier_map,
                identity_status: identity_report.status,
                confirmed_urls: &confirmed_urls,
                rank_penalties: &rank_penalties,
                auto_accept: self.deps.config.consensus.auto_accept_score,
                flag_review: self.deps.config.consensus.flag_review_score,
            };
            outcome = run_consensus(&all_candidates, &input);

            // 6. Feed the ledgers
            let new_high_yield = self.record_round_learning(
                &lock,
                &rules,
                &outcome,
                &all_candidates,
                &mut recorded_candidates,
                &mut high_yield_urls,
            )?;

            let summary = summarize_round(
                &outcome,
                &rules,
                previous_summary.as_ref(),
                round,
                new_high_yield,
            );
            if summary.new_accepted_fields == 0 {
                no_new_fields_rounds += 1;
            } else {
                no_new_fields_rounds = 0;
            }
            if summary.new_high_yield_sources == 0 {
                no_new_high_yield_rounds += 1;
            } else {
                no_new_high_yield_rounds = 0;
            }

            // 7. Decide
            let stop_inputs = StopInputs {
                round,
                elapsed_ms: start.elapsed().as_millis() as u64,
                max_ms: self.deps.config.convergence.max_ms,
                max_rounds,
                required_missing: summary.missing_required.len(),
                critical_missing: summary.missing_critical.len(),
                no_new_high_yield_rounds,
                no_new_fields_rounds,
                no_progress_limit: self.deps.config.convergence.no_progress_limit,
            };
            stop = uber_stop_decision(&stop_inputs);

            self.emit(&lock, &run_id, "stop_decision", Some(round), json!({
                "stop": stop.stop,
                "reason": stop.reason,
                "accepted": summary.accepted_fields.len(),
                "missing_required": summary.missing_required.len(),
                "mean_confidence": summary.mean_confidence,
            }));
            info!(
                product = %lock.product_id,
                round,
                tier = tier.as_str(),
                fetched = results.len(),
                accepted = summary.accepted_fields.len(),
                stop = stop.stop,
                reason = %stop.reason,
                "round complete"
            );

            previous_summary = Some(summary);
            if stop.stop {
                break;
            }
            round += 1;
        }

        // Flush state even on cancel; partial data is still data
        self.deps.frontier.save().context("frontier flush failed")?;
        self.deps.intel.save().context("intel flush failed")?;

        let last_summary = previous_summary.unwrap_or_default();
        let summary = build_run_summary(
            &lock.product_id,
            &run_id,
            &outcome,
            &last_summary,
            &rules,
            identity_report.status,
            round + 1,
            &stop.reason,
        );

        let artifacts = ProductRunArtifacts {
            spec: build_normalized_spec(&lock.product_id, &outcome),
            provenance: provenance_map(&outcome),
            traffic: traffic_map(&outcome),
            identity: identity_report,
            summary,
        };
        self.persist_artifacts(&lock, &rules, &artifacts)?;

        self.emit(&lock, &run_id, "run_finished", None, json!({
            "validated": artifacts.summary.validated,
            "reason": artifacts.summary.validated_reason,
            "rounds": artifacts.summary.rounds,
            "stop_reason": artifacts.summary.stop_reason,
        }));
        info!(
            product = %lock.product_id,
            validated = artifacts.summary.validated,
            reason = %artifacts.summary.validated_reason,
            "🏁 convergence run finished"
        );

        Ok(artifacts)
    }

    /// Fields still worth hunting, bounded by the target cap
    fn missing_fields(
        &self,
        rules: &FieldRuleSet,
        previous: Option<&RoundSummary>,
    ) -> Vec<String> {
        let mut missing: Vec<String> = match previous {
            Some(summary) => summary
                .missing_critical
                .iter()
                .chain(summary.missing_required.iter())
                .chain(summary.missing_expected.iter())
                .cloned()
                .collect(),
            None => rules.rules.iter().map(|r| r.key.clone()).collect(),
        };
        missing.dedup();
        missing.truncate(self.deps.config.convergence.max_target_fields);
        missing
    }

    /// Assemble this round's fetch list: seeds, reranked SERP hits, and
    /// endpoint-miner proposals, minus everything the frontier vetoes.
    #[allow(clippy::too_many_arguments)]
    async fn plan_sources(
        &self,
        lock: &IdentityLock,
        rules: &FieldRuleSet,
        entry: &ProductCatalogEntry,
        missing: &[String],
        tier: RoundTier,
        endpoint_miner: &EndpointMiner,
        fetched_this_run: &HashSet<String>,
    ) -> Vec<FetchSource> {
        let now_ts = Utc::now().timestamp();
        let mut raw: Vec<FetchSource> = Vec::new();

        if tier == RoundTier::Tier0 {
            for url in &entry.seed_urls {
                raw.push(FetchSource::new(url, &lock.product_id));
            }
        } else {
            let top_domains = self.top_domains();
            let mut queries = plan_queries(
                lock,
                rules,
                missing,
                tier,
                &top_domains,
                self.deps.config.convergence.max_dispatch_queries,
            );
            if tier == RoundTier::Tier3 {
                queries.extend(self.llm_planned_queries(lock, missing).await);
                queries.truncate(self.deps.config.convergence.max_dispatch_queries);
            }

            for planned in queries {
                if self.deps.frontier.should_skip_query(
                    &lock.product_id,
                    &planned.query,
                    now_ts,
                    false,
                ) {
                    debug!(query = %planned.query, "query under cooldown, skipped");
                    continue;
                }

                let Some((provider, hits)) =
                    self.deps.search.search(&planned.query, 10).await
                else {
                    continue;
                };

                let results: Vec<QueryResult> = hits
                    .iter()
                    .map(|h| QueryResult {
                        rank: h.rank,
                        url: h.url.clone(),
                        title: h.title.clone(),
                        host: h.host.clone(),
                        snippet: h.snippet.clone(),
                    })
                    .collect();
                self.deps.frontier.record_query(
                    &lock.product_id,
                    &planned.query,
                    &provider,
                    &planned.fields,
                    results,
                    now_ts,
                );

                let ranked = rerank_hits(
                    hits,
                    &self.deps.intel,
                    &self.deps.frontier,
                    &self.deps.tier_map,
                );
                for hit in ranked.into_iter().take(HITS_PER_QUERY) {
                    raw.push(FetchSource::new(&hit.url, &lock.product_id));
                }
            }

            if matches!(tier, RoundTier::Tier2 | RoundTier::Tier3) {
                for proposal in endpoint_miner.next_best_urls() {
                    raw.push(FetchSource::discovery(&proposal.url, &lock.product_id));
                }
            }
        }

        // Frontier veto, denied domains, in-run dedup
        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        for source in raw {
            let Ok(canonical) = canonicalize(&source.url) else {
                continue;
            };
            if !seen.insert(canonical.canonical_url.clone())
                || fetched_this_run.contains(&canonical.canonical_url)
            {
                continue;
            }

            let root = root_domain(&canonical.domain);
            if self.deps.tier_map.is_denied(&root) {
                // Denied domains count as policy blocks, never fetched
                let blocked = FetchResult::blocked_result(&source.url, "denied_domain");
                let _ = self.deps.frontier.record_fetch(FetchRecord {
                    url: source.url.clone(),
                    status: blocked.status,
                    ts: now_ts,
                    content_hash: None,
                    redirected: false,
                    blocked_by_robots: true,
                    fields_found: vec![],
                    confidence: None,
                });
                continue;
            }

            match self.deps.frontier.should_skip_url(&source.url, now_ts, false) {
                Ok(verdict) if verdict.skip => {
                    debug!(
                        url = %source.url,
                        reason = verdict.reason.as_deref().unwrap_or("-"),
                        "frontier skipped source"
                    );
                }
                Ok(_) => sources.push(source),
                Err(e) => warn!(url = %source.url, error = %e, "skip check failed"),
            }

            if sources.len() >= MAX_SOURCES_PER_ROUND {
                break;
            }
        }
        sources
    }

    /// Approved domains ranked by what they have historically yielded
    fn top_domains(&self) -> Vec<String> {
        let mut domains: Vec<(String, f64)> = self
            .deps
            .tier_map
            .approved
            .iter()
            .map(|d| (d.clone(), self.deps.intel.planner_score(d)))
            .collect();
        domains.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        domains.into_iter().map(|(d, _)| d).collect()
    }

    /// Optional LLM-planned queries; absence of the router costs nothing
    async fn llm_planned_queries(
        &self,
        lock: &IdentityLock,
        missing: &[String],
    ) -> Vec<PlannedQuery> {
        let schema = json!({
            "type": "object",
            "properties": {
                "queries": {"type": "array", "items": {"type": "string"}}
            }
        });
        let user = format!(
            "Product: {} {} ({}). Missing fields: {}. Propose up to 4 web search queries.",
            lock.brand,
            lock.model,
            lock.variant.as_deref().unwrap_or("base"),
            missing.join(", ")
        );

        match self
            .deps
            .llm
            .call(LlmRole::Plan, "You plan product-spec searches.", &user, &schema)
            .await
        {
            Ok(Some(value)) => value["queries"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|q| q.as_str())
                        .take(4)
                        .map(|q| PlannedQuery {
                            query: q.to_string(),
                            fields: missing.to_vec(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "LLM planner unavailable this round");
                Vec::new()
            }
        }
    }

    /// Concurrent fetch with per-host slots; honors cancellation
    async fn fetch_batch(
        &self,
        sources: Vec<FetchSource>,
    ) -> Vec<(FetchSource, FetchResult)> {
        let crawler = self.deps.crawler.clone();
        let stream = futures_util::stream::iter(sources.into_iter().map(|source| {
            let crawler = crawler.clone();
            async move {
                let result = crawler.fetch(&source).await;
                (source, result)
            }
        }))
        .buffer_unordered(self.deps.config.fetcher.max_concurrent_fetches);
        tokio::pin!(stream);

        let mut cancel = self.cancel.clone();
        let mut cancel_closed = false;
        let mut out = Vec::new();
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(pair) => out.push(pair),
                    None => break,
                },
                changed = cancel.changed(), if !cancel_closed => {
                    match changed {
                        Ok(()) => {
                            if *cancel.borrow() {
                                warn!("🛑 cancelled mid-round, aborting in-flight fetches");
                                break;
                            }
                        }
                        Err(_) => cancel_closed = true,
                    }
                }
            }
        }
        out
    }

    /// Fold one fetch result into candidates, pages, and the ledgers
    #[allow(clippy::too_many_arguments)]
    fn absorb_result(
        &self,
        lock: &IdentityLock,
        run_id: &str,
        round: u32,
        rules: &FieldRuleSet,
        components: &ComponentDb,
        result: &FetchResult,
        all_candidates: &mut Vec<Candidate>,
        pages: &mut Vec<PageEvidence>,
        endpoint_miner: &mut EndpointMiner,
        fetched_this_run: &mut HashSet<String>,
    ) -> Result<()> {
        let now_ts = result.fetched_at.timestamp();
        if let Ok(canonical) = canonicalize(&result.url) {
            fetched_this_run.insert(canonical.canonical_url);
        }

        let root = url::Url::parse(&result.final_url)
            .ok()
            .and_then(|u| u.host_str().map(root_domain))
            .unwrap_or_else(|| "unknown".to_string());

        self.deps.intel.record_attempt(&root, &lock.brand, &lock.product_id, result.ok());
        self.emit(lock, run_id, "fetch_outcome", Some(round), json!({
            "url": result.url,
            "status": result.status,
            "elapsed_ms": result.elapsed_ms,
            "blocked_by_robots": result.blocked_by_robots,
        }));

        self.deps
            .frontier
            .record_fetch(FetchRecord {
                url: result.url.clone(),
                status: result.status,
                ts: now_ts,
                content_hash: result.content_hash(),
                redirected: result.redirect(),
                blocked_by_robots: result.blocked_by_robots,
                fields_found: vec![],
                confidence: None,
            })
            .context("record_fetch failed")?;

        // Dead, blocked, and errored pages never reach an extractor
        if !result.should_extract() {
            return Ok(());
        }

        let ctx = ExtractionContext {
            rules,
            components,
            lock,
            tier_map: &self.deps.tier_map,
        };
        let candidates = extract_all(result, &ctx);

        let signals = PageSignals::gather(&result.url, &result.body, &candidates);
        let identity = evaluate_page(lock, &signals);
        self.deps.intel.record_identity(
            &root,
            &lock.brand,
            identity.decision == PageDecision::Confirmed,
            false,
        );
        self.emit(lock, run_id, "identity_decision", Some(round), json!({
            "url": result.url,
            "decision": identity.decision.as_str(),
            "score": identity.score,
        }));

        let Some(page_ctx) = PageContext::from_result(result, &self.deps.tier_map) else {
            return Ok(());
        };

        let field_hints: Vec<String> = candidates
            .iter()
            .filter(|c| c.method == crate::models::ExtractionMethod::NetworkPayload)
            .map(|c| c.field.clone())
            .collect();
        for response in &result.recorded_responses {
            endpoint_miner.observe(response, &field_hints);
        }

        pages.push(build_page_evidence(
            &identity, &page_ctx, rules, &candidates, &self.deps.tier_map,
        ));

        // Discovery fetches are treated no differently here: the gate
        // decides, and only admitted pages contribute
        if identity.decision.admits_candidates() {
            all_candidates.extend(candidates);
        } else {
            debug!(
                url = %result.url,
                decision = identity.decision.as_str(),
                "page rejected by identity gate, candidates dropped"
            );
        }

        Ok(())
    }

    /// Yields ledger and intel field contributions. Each candidate is
    /// recorded once, in the round whose consensus it first entered; the
    /// high-yield set still grows whenever a winner URL newly lands an
    /// accepted field.
    #[allow(clippy::too_many_arguments)]
    fn record_round_learning(
        &self,
        lock: &IdentityLock,
        rules: &FieldRuleSet,
        outcome: &ConsensusOutcome,
        all_candidates: &[Candidate],
        recorded_candidates: &mut HashSet<u64>,
        high_yield_urls: &mut HashSet<String>,
    ) -> Result<usize> {
        let now_ts = Utc::now().timestamp();
        let mut new_high_yield = 0usize;

        for field in outcome.fields.values() {
            let Some(key) = &field.value_key else { continue };
            let accepted = field.status == FieldStatus::Accepted;
            let critical = rules.get(&field.field).map(|r| r.critical).unwrap_or(false);
            let winner_urls: HashSet<&str> =
                field.evidence.iter().map(|e| e.url.as_str()).collect();

            for candidate in all_candidates.iter().filter(|c| c.field == field.field) {
                let in_winner = winner_urls.contains(candidate.source_url.as_str());

                if accepted && in_winner && high_yield_urls.insert(candidate.source_url.clone())
                {
                    new_high_yield += 1;
                }

                if !recorded_candidates.insert(candidate.id) {
                    continue;
                }
                let conflicted = field.conflict && !in_winner;

                self.deps.frontier.record_yield(
                    &candidate.source_url,
                    &field.field,
                    &value_hash(key),
                    if in_winner { field.confidence } else { 0.2 },
                    conflicted,
                    now_ts,
                )?;
                self.deps.intel.record_field_contribution(
                    &candidate.root_domain,
                    &lock.brand,
                    &field.field,
                    accepted && in_winner,
                    critical,
                    conflicted,
                );
            }
        }

        Ok(new_high_yield)
    }

    fn persist_artifacts(
        &self,
        lock: &IdentityLock,
        rules: &FieldRuleSet,
        artifacts: &ProductRunArtifacts,
    ) -> Result<()> {
        let base = format!("products/{}", lock.product_id);
        let storage = &self.deps.storage;

        storage.write_json(&format!("{}/spec.json", base), &artifacts.spec)?;
        storage.write_json(&format!("{}/provenance.json", base), &artifacts.provenance)?;
        storage.write_json(&format!("{}/traffic.json", base), &artifacts.traffic)?;
        storage.write_json(&format!("{}/summary.json", base), &artifacts.summary)?;
        storage.write_json(&format!("{}/identity.json", base), &artifacts.identity)?;

        // Dated intel delta for the review surface
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let delta = self.deps.intel.with_state(|state| {
            build_delta(
                state,
                rules,
                &self.deps.tier_map,
                &self.deps.config.category,
                &date,
            )
        });
        storage.write_json(&format!("intel/delta/{}.json", date), &delta)?;

        Ok(())
    }

    fn emit(
        &self,
        lock: &IdentityLock,
        run_id: &str,
        event_type: &str,
        round: Option<u32>,
        payload: serde_json::Value,
    ) {
        let event = RunEvent {
            product_id: lock.product_id.clone(),
            run_id: run_id.to_string(),
            event_type: event_type.to_string(),
            round,
            payload,
        };
        if let Err(e) = self.deps.events.append(&event) {
            warn!(error = %e, "event append failed");
        }
    }
}

fn provenance_map(outcome: &ConsensusOutcome) -> BTreeMap<String, FieldProvenance> {
    outcome
        .fields
        .iter()
        .map(|(key, f)| {
            (
                key.clone(),
                FieldProvenance {
                    value: f.value.clone(),
                    confirmations: f.confirmations,
                    approved_confirmations: f.approved_confirmations,
                    pass_target: f.pass_target,
                    meets_pass_target: f.meets_pass_target,
                    confidence: f.confidence,
                    evidence: f.evidence.clone(),
                    needs_ai_review: f.needs_ai_review,
                },
            )
        })
        .collect()
}

/// Collect everything reconciliation wants to know about one page
fn build_page_evidence(
    identity: &crate::identity::PageIdentity,
    page_ctx: &PageContext,
    rules: &FieldRuleSet,
    candidates: &[Candidate],
    tier_map: &DomainTierMap,
) -> PageEvidence {
    let sensors: Vec<String> = candidates
        .iter()
        .filter_map(|c| match &c.value {
            CandidateValue::Component {
                component_type,
                name,
            } if component_type == "sensor" => Some(name.clone()),
            _ => None,
        })
        .collect();

    let skus: Vec<String> = candidates
        .iter()
        .filter(|c| matches!(c.field.as_str(), "sku" | "mpn"))
        .filter_map(|c| c.value.as_scalar().map(|s| s.to_string()))
        .collect();

    let mut dimensions_mm = HashMap::new();
    for candidate in candidates {
        if !matches!(candidate.field.as_str(), "length" | "width" | "height") {
            continue;
        }
        let canonical_unit = rules
            .get(&candidate.field)
            .and_then(|r| r.canonical_unit.as_deref())
            .unwrap_or("mm");
        if let Some(raw) = candidate.value.as_scalar() {
            if let Some(value) = crate::consensus::to_canonical(raw, Some(canonical_unit)) {
                dimensions_mm.insert(candidate.field.clone(), value);
            }
        }
    }

    PageEvidence {
        identity: identity.clone(),
        root_domain: page_ctx.root_domain.clone(),
        role: page_ctx.role,
        tier: page_ctx.tier,
        approved: tier_map.is_approved(&page_ctx.root_domain),
        connection: identity.connection,
        sensors,
        skus,
        dimensions_mm,
    }
}
