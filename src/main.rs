mod cache;
mod config;
mod error;
mod export;
mod models;
mod normalizer;
mod resolver;
mod scheduler;
mod scraper;
mod storage;
mod tools;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cache::FreshnessCache;
use crate::config::AppConfig;
use crate::models::PriceObservation;
use crate::normalizer::Catalog;
use crate::resolver::{Freshness, Resolution, Resolver};
use crate::scheduler::Scheduler;
use crate::scraper::{AgmarknetDriver, MarketFallback};
use crate::storage::PriceStore;
use crate::tools::PriceTools;
use crate::utils::{fmt_count, fmt_rupees};

#[derive(Parser)]
#[command(name = "mandi-prices", about = "Wholesale vegetable prices from Indian mandis", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Current price of one vegetable in one city (cache → store → live fetch)
    Price {
        city: String,
        vegetable: String,
        /// Print the observation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Latest stored price of a vegetable in every city
    Compare { vegetable: String },

    /// Latest stored price of every vegetable in a city
    City { city: String },

    /// Cities and vegetables the lookup understands, with accepted spellings
    Supported,

    /// Store statistics and per-vegetable aggregates
    Trends {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },

    /// Invoke a tool by name with JSON arguments, as an RPC caller would
    Tool {
        name: String,
        #[arg(default_value = "{}")]
        args: String,
    },

    /// One bulk refresh pass over the city × vegetable matrix
    Refresh {
        /// Refetch even targets the store already has fresh
        #[arg(long)]
        force: bool,
    },

    /// Scheduled refreshes, cache sweeps and retention pruning until Ctrl-C
    Daemon,

    /// Delete observations older than the retention window
    Prune {
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Show database statistics
    Stats,

    /// Write every stored observation to CSV
    Export {
        #[arg(short, long, default_value = "data/prices.csv")]
        out: PathBuf,
    },

    /// Apply schema migrations
    Migrate,
}

async fn open_store(config: &AppConfig) -> Result<Arc<PriceStore>> {
    let store = PriceStore::open_with_retry(&config.storage.db_path)
        .await
        .with_context(|| format!("Failed to open DuckDB at {:?}", config.storage.db_path))?;
    if config.storage.run_migrations {
        store.run_migrations()?;
    }
    Ok(Arc::new(store))
}

async fn build_resolver(config: &AppConfig) -> Result<Arc<Resolver>> {
    let store = open_store(config).await?;
    let driver = AgmarknetDriver::new(&config.scraper).context("Failed to build form driver")?;
    info!("Remote form at {}", driver.search_url());
    let source = MarketFallback::new(Arc::new(driver), &config.scraper);

    Ok(Arc::new(Resolver::new(
        Arc::new(Catalog::builtin()),
        store,
        Arc::new(FreshnessCache::new(config.cache.ttl())),
        Arc::new(source),
        config.resolver.clone(),
        &config.cache,
    )))
}

fn print_observation(obs: &PriceObservation) {
    println!("─────────────────────────────────");
    println!("  {} in {}", obs.vegetable, obs.city);
    println!("─────────────────────────────────");
    println!("  Price    : {} / {}", fmt_rupees(obs.price), obs.price_unit);
    println!("  Per kg   : {}", fmt_rupees(obs.price_per_kg()));
    println!("  Market   : {}", obs.market_name);
    if let Some(v) = &obs.variety {
        println!("  Variety  : {}", v);
    }
    println!("  Date     : {}", obs.observed_date);
    println!("  Source   : {}", obs.source.as_str());
    println!("─────────────────────────────────");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "mandi_prices=info,warn",
        1 => "mandi_prices=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Price { city, vegetable, json } => {
            let resolver = build_resolver(&config).await?;
            match resolver.resolve(&city, &vegetable, Freshness::AdHoc).await? {
                Resolution::Found(obs) if json => println!("{}", serde_json::to_string_pretty(&obs)?),
                Resolution::Found(obs) => print_observation(&obs),
                Resolution::Unavailable { city, vegetable, diagnostic } => {
                    if let Some(d) = diagnostic {
                        warn!("{}", d);
                    }
                    println!("No recent {} price reported for {}.", vegetable, city);
                }
            }
        }

        Command::Compare { vegetable } => {
            let tools = PriceTools::new(build_resolver(&config).await?);
            let cmp = tools.compare_across_cities(&vegetable)?;
            if cmp.observations.is_empty() {
                println!("No stored {} prices — run `mandi-prices refresh` first.", cmp.vegetable);
            } else {
                println!("{} across {} cities:", cmp.vegetable, cmp.observations.len());
                for o in &cmp.observations {
                    println!(
                        "  {:<12} {:>10}/kg  {} ({})",
                        o.observation.city,
                        fmt_rupees(o.price_per_kg),
                        o.observation.market_name,
                        o.observation.observed_date
                    );
                }
                if let (Some(city), Some(avg)) = (&cmp.cheapest, cmp.average_price_per_kg) {
                    println!("  Cheapest: {}  |  Average: {}/kg", city, fmt_rupees(avg));
                }
            }
        }

        Command::City { city } => {
            let tools = PriceTools::new(build_resolver(&config).await?);
            let prices = tools.city_prices(&city)?;
            if prices.is_empty() {
                println!("No stored prices for {}.", city);
            }
            for o in &prices {
                println!(
                    "  {:<10} {:>10}/kg  {} ({})",
                    o.observation.vegetable,
                    fmt_rupees(o.price_per_kg),
                    o.observation.market_name,
                    o.observation.observed_date
                );
            }
        }

        Command::Supported => {
            let catalog = Catalog::builtin();
            println!("Cities:");
            for c in catalog.cities() {
                println!("  {:<10} {}", c.key, c.synonyms.join(", "));
            }
            println!("Vegetables:");
            for v in catalog.vegetables() {
                println!("  {:<10} {}", v.key, v.synonyms.join(", "));
            }
        }

        Command::Trends { days } => {
            let tools = PriceTools::new(build_resolver(&config).await?);
            println!("{}", serde_json::to_string_pretty(&tools.trends(days)?)?);
        }

        Command::Tool { name, args } => {
            let args: serde_json::Value = serde_json::from_str(&args).context("Tool arguments must be JSON")?;
            let tools = PriceTools::new(build_resolver(&config).await?);
            println!("{}", serde_json::to_string_pretty(&tools.call_tool(&name, &args).await)?);
        }

        Command::Refresh { force } => {
            let _t = utils::Timer::start("Bulk refresh");
            config.scheduler.force_refresh |= force;
            let scheduler = Scheduler::new(build_resolver(&config).await?, &config);
            if let Some(s) = scheduler.run_once().await {
                println!(
                    "Done: {} attempted, {} ok, {} no data, {} skipped, {} failed",
                    s.attempted, s.succeeded, s.no_data, s.skipped, s.failed
                );
            }
        }

        Command::Daemon => {
            let scheduler = Arc::new(Scheduler::new(build_resolver(&config).await?, &config));
            info!("Daemon started; refresh times {:?}", config.scheduler.run_times);
            scheduler
                .run_forever(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Ctrl-C handler failed: {}", e);
                    }
                })
                .await;
        }

        Command::Prune { days } => {
            let store = open_store(&config).await?;
            let n = store.prune(days.unwrap_or(config.storage.retention_days))?;
            println!("Pruned {} observations.", fmt_count(n as i64));
        }

        Command::Stats => {
            let store = open_store(&config).await?;
            let stats = store.stats()?;
            println!("─────────────────────────────────");
            println!("  Mandi prices — Database Stats");
            println!("─────────────────────────────────");
            println!("  Records     : {}", fmt_count(stats.total_records));
            println!("  Cities      : {}", stats.unique_cities);
            println!("  Vegetables  : {}", stats.unique_vegetables);
            println!(
                "  Last update : {}",
                stats.latest_update.map(|d| d.to_string()).unwrap_or("—".into())
            );
            println!("  Refresh runs: {}", fmt_count(store.refresh_run_count()?));
            println!("─────────────────────────────────");
        }

        Command::Export { out } => {
            let store = open_store(&config).await?;
            let n = export::export_to_path(&out, &store.all()?)?;
            println!("Wrote {} rows to {:?}", fmt_count(n as i64), out);
        }

        Command::Migrate => {
            PriceStore::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
