//! HarvestBot - Product Spec Harvester
//! Mission: One vetted spec per product, evidence attached
//! Closed loop: discover, fetch politely, verify identity, merge by
//! consensus, learn which domains deserve the next fetch.

use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use chrono::Utc;
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvestbot_backend::config::Config;
use harvestbot_backend::convergence::{ControllerDeps, ConvergenceController};
use harvestbot_backend::events::EventLog;
use harvestbot_backend::fetch::{DryRunFetcher, DynamicCrawlerService, HttpFetcher};
use harvestbot_backend::frontier::FrontierStore;
use harvestbot_backend::intel::{build_delta, DomainIntelStore};
use harvestbot_backend::llm::{HttpJsonProvider, LlmProvider, LlmRouter};
use harvestbot_backend::models::{
    ComponentDb, DomainTierMap, FieldRule, FieldRuleSet, FieldType, ProductCatalogEntry,
    VariancePolicy,
};
use harvestbot_backend::robots::{HostScheduler, RobotsPolicy};
use harvestbot_backend::search::{FixtureSearchProvider, SearchProvider, SearchService};
use harvestbot_backend::storage::FileStorage;

#[derive(Parser)]
#[command(name = "harvestbot", about = "Product spec harvesting pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the convergence loop for one product
    RunOne { product_id: String },
    /// Run with an explicit round bound
    RunUntilComplete {
        product_id: String,
        #[arg(long, default_value_t = 8)]
        max_rounds: u32,
    },
    /// Inspect the frontier snapshot for a product
    Frontier { product_id: String },
    /// Print today's promotion/demotion report
    IntelReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Command::RunOne { product_id } => {
            run_product(config, &product_id).await?;
        }
        Command::RunUntilComplete {
            product_id,
            max_rounds,
        } => {
            config.convergence.max_rounds = max_rounds;
            run_product(config, &product_id).await?;
        }
        Command::Frontier { product_id } => {
            let storage = FileStorage::new(&config.data_dir)?;
            let frontier =
                FrontierStore::open(storage, &config.category, config.frontier.clone())?;
            let snapshot = frontier.snapshot_for_product(&product_id, Utc::now().timestamp());
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::IntelReport => {
            let storage = FileStorage::new(&config.data_dir)?;
            let intel = DomainIntelStore::open(storage.clone(), &config.category)?;
            let rules = load_rules(&storage, &config.category);
            let tier_map = load_tier_map(&storage, &config.category);
            let date = Utc::now().format("%Y-%m-%d").to_string();
            let delta = intel
                .with_state(|state| build_delta(state, &rules, &tier_map, &config.category, &date));
            println!("{}", serde_json::to_string_pretty(&delta)?);
        }
    }

    Ok(())
}

async fn run_product(config: Config, product_id: &str) -> Result<()> {
    let storage = FileStorage::new(&config.data_dir)?;

    let entry: ProductCatalogEntry = storage
        .read_json(&format!("catalog/{}.json", product_id))?
        .with_context(|| format!("No catalog entry for product {}", product_id))?;

    let (deps, cancel_rx) = build_deps(config, storage).await?;
    deps.crawler.start().await?;

    let controller = ConvergenceController::new(deps, cancel_rx);
    let artifacts = controller.run_product(&entry).await?;

    println!("{}", serde_json::to_string_pretty(&artifacts.summary)?);
    Ok(())
}

async fn build_deps(
    config: Config,
    storage: FileStorage,
) -> Result<(ControllerDeps, watch::Receiver<bool>)> {
    consume_recompile_marker(&storage, &config);

    let rules = Arc::new(ArcSwap::from_pointee(load_rules(&storage, &config.category)));
    let components = Arc::new(ArcSwap::from_pointee(
        storage
            .read_json::<ComponentDb>(&format!("components/{}.json", config.category))?
            .unwrap_or_default(),
    ));
    let tier_map = load_tier_map(&storage, &config.category);

    let frontier = Arc::new(FrontierStore::open(
        storage.clone(),
        &config.category,
        config.frontier.clone(),
    )?);
    let intel = Arc::new(DomainIntelStore::open(storage.clone(), &config.category)?);
    let events = Arc::new(EventLog::open(&config.events_db_path)?);

    let robots = Arc::new(RobotsPolicy::new(&config.user_agent)?);
    let mut scheduler = HostScheduler::new(config.fetcher.per_host_min_delay_ms);
    for (host, policy) in &config.host_policies {
        if let Some(delay) = policy.min_delay_ms {
            scheduler = scheduler.with_override(host, delay);
        }
    }
    let scheduler = Arc::new(scheduler);

    let mut crawler = DynamicCrawlerService::new(
        config.fetcher.clone(),
        config.host_policies.clone(),
        &config.user_agent,
        Some(robots),
        scheduler,
    );
    crawler.register(Arc::new(HttpFetcher::new(
        &config.user_agent,
        config.fetcher.page_goto_timeout_ms,
        config.fetcher.max_json_bytes,
    )?));
    crawler.register(Arc::new(DryRunFetcher::new(storage.clone())));
    let crawler = Arc::new(crawler);

    let search_providers: Vec<Arc<dyn SearchProvider>> =
        vec![Arc::new(FixtureSearchProvider::new(storage.clone()))];
    let search = Arc::new(SearchService::new(search_providers));

    let llm = Arc::new(build_llm_router(&config)?);

    // Cancellation: first Ctrl-C flips the flag, in-flight work aborts
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 cancel requested, flushing partial state");
            let _ = cancel_tx.send(true);
        }
    });

    let deps = ControllerDeps {
        config,
        storage,
        frontier,
        intel,
        crawler,
        search,
        llm,
        events,
        rules,
        components,
        tier_map,
    };
    Ok((deps, cancel_rx))
}

fn build_llm_router(config: &Config) -> Result<LlmRouter> {
    if !config.llm.enabled {
        return Ok(LlmRouter::disabled());
    }

    let endpoint = match std::env::var("LLM_ENDPOINT") {
        Ok(e) => e,
        Err(_) => {
            warn!("LLM_ENABLED set without LLM_ENDPOINT; continuing without assistance");
            return Ok(LlmRouter::disabled());
        }
    };

    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
    if let Some(key) = &config.llm.api_key {
        providers.push(Arc::new(HttpJsonProvider::new("primary", &endpoint, key)?));
    }
    if let Some(key) = &config.llm.fallback_api_key {
        providers.push(Arc::new(HttpJsonProvider::new("fallback", &endpoint, key)?));
    }

    Ok(LlmRouter::new(
        providers,
        config.llm.per_product_budget_usd,
        config.llm.monthly_budget_usd,
    ))
}

/// The workbook compiler drops a marker when artifacts changed; rules are
/// re-read on the next run and the marker is consumed.
fn consume_recompile_marker(storage: &FileStorage, config: &Config) {
    if storage.exists("recompile.marker") {
        info!("recompile marker found; rule artifacts will be re-read");
        let path = config.data_dir.join("recompile.marker");
        if let Err(e) = std::fs::remove_file(path) {
            warn!(error = %e, "could not consume recompile marker");
        }
    }
}

fn load_rules(storage: &FileStorage, category: &str) -> FieldRuleSet {
    match storage.read_json::<FieldRuleSet>(&format!("rules/{}.json", category)) {
        Ok(Some(rules)) => rules,
        Ok(None) => {
            warn!(
                category,
                "no compiled rules artifact; using the built-in default set"
            );
            default_rules(category)
        }
        Err(e) => {
            warn!(error = %e, "rules artifact unreadable; using the built-in default set");
            default_rules(category)
        }
    }
}

fn load_tier_map(storage: &FileStorage, category: &str) -> DomainTierMap {
    storage
        .read_json::<DomainTierMap>(&format!("domains/{}.json", category))
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Minimal built-in rule set so a fresh checkout can dry-run
fn default_rules(category: &str) -> FieldRuleSet {
    FieldRuleSet {
        category: category.to_string(),
        rules: vec![
            FieldRule::new("dpi", FieldType::Integer)
                .with_canonical_unit("dpi")
                .critical(),
            FieldRule::new("weight", FieldType::Number)
                .with_canonical_unit("g")
                .required(),
            FieldRule::new("polling_rate", FieldType::Integer)
                .with_canonical_unit("hz")
                .required(),
            FieldRule::new("connection", FieldType::Enum)
                .with_enum_values(&["wired", "wireless", "dual"])
                .required(),
            FieldRule::new("sensor", FieldType::ComponentRef)
                .with_component_type("sensor")
                .critical(),
            FieldRule::new("length", FieldType::Number).with_canonical_unit("mm"),
            FieldRule::new("width", FieldType::Number).with_canonical_unit("mm"),
            FieldRule::new("height", FieldType::Number).with_canonical_unit("mm"),
            FieldRule::new("buttons", FieldType::Integer),
            FieldRule::new("battery_life", FieldType::Number)
                .with_canonical_unit("h")
                .with_variance_policy(VariancePolicy::UpperBound),
            FieldRule::new("release_date", FieldType::Date),
        ],
    }
}
