use anyhow::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::models::ScrapeTarget;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Remote form driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Only meaningful for browser-backed drivers; the HTTP driver is always headless.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Upper bound for one navigation/selection step, including waiting for
    /// a dependent dropdown to populate.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Upper bound for a whole single-market attempt.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_query_window_days")]
    pub query_window_days: u32,

    /// city key → market labels to try before the rest, in order.
    #[serde(default = "default_market_priorities")]
    pub market_priorities: HashMap<String, Vec<String>>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_minutes")]
    pub ttl_minutes: u64,

    /// TTL used when a cache entry is refilled from a store hit.
    #[serde(default = "default_cache_ttl_minutes")]
    pub store_hit_ttl_minutes: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_adhoc_freshness_hours")]
    pub adhoc_freshness_hours: i64,

    #[serde(default = "default_api_freshness_hours")]
    pub api_freshness_hours: i64,

    /// Caller-side bound on the whole fresh-fetch path.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Local times of day, "HH:MM".
    #[serde(default = "default_run_times")]
    pub run_times: Vec<String>,

    #[serde(default = "default_item_delay_secs")]
    pub item_delay_secs: u64,

    #[serde(default)]
    pub jitter_ms: u64,

    /// Refetch even when the store already holds a fresh observation.
    #[serde(default = "default_true")]
    pub force_refresh: bool,

    /// Overrides the catalog's full city × vegetable matrix.
    #[serde(default)]
    pub targets: Option<Vec<ScrapeTarget>>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://agmarknet.gov.in/".to_string()
}
fn default_user_agent() -> String {
    "mandi-price-engine/0.1 (vegetable price lookup)".to_string()
}
fn default_step_timeout_secs() -> u64 {
    3
}
fn default_attempt_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_query_window_days() -> u32 {
    7
}
fn default_market_priorities() -> HashMap<String, Vec<String>> {
    HashMap::from([(
        "mumbai".to_string(),
        vec![
            "Mumbai".to_string(),
            "Mumbai- Fruit Market".to_string(),
            "Vashi New Mumbai".to_string(),
            "Mumbai- Thane Market".to_string(),
        ],
    )])
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/mandi_prices.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_retention_days() -> u32 {
    30
}
fn default_cache_ttl_minutes() -> u64 {
    5
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_adhoc_freshness_hours() -> i64 {
    24
}
fn default_api_freshness_hours() -> i64 {
    6
}
fn default_fetch_timeout_secs() -> u64 {
    120
}
fn default_run_times() -> Vec<String> {
    vec!["09:00".to_string(), "18:00".to_string()]
}
fn default_item_delay_secs() -> u64 {
    3
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            headless: true,
            step_timeout_secs: default_step_timeout_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            query_window_days: default_query_window_days(),
            market_priorities: default_market_priorities(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            retention_days: default_retention_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_cache_ttl_minutes(),
            store_hit_ttl_minutes: default_cache_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            adhoc_freshness_hours: default_adhoc_freshness_hours(),
            api_freshness_hours: default_api_freshness_hours(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_times: default_run_times(),
            item_delay_secs: default_item_delay_secs(),
            jitter_ms: 0,
            force_refresh: true,
            targets: None,
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────────────────

impl ScraperConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
    pub fn store_hit_ttl(&self) -> Duration {
        Duration::from_secs(self.store_hit_ttl_minutes * 60)
    }
}

impl SchedulerConfig {
    /// Parsed, sorted run times; unparseable entries are dropped with a warning.
    pub fn parsed_run_times(&self) -> Vec<NaiveTime> {
        let mut times: Vec<NaiveTime> = self
            .run_times
            .iter()
            .filter_map(|s| match NaiveTime::parse_from_str(s.trim(), "%H:%M") {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("Ignoring scheduler run time {:?}: {}", s, e);
                    None
                }
            })
            .collect();
        times.sort();
        times.dedup();
        times
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_secs(self.item_delay_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Ok(Self::from_sources("config/default", "config/local"))
    }

    /// Layer `default` → `local` → `MANDI__*` env. Anything unreadable,
    /// whether a TOML syntax error or a mistyped value, yields the defaults
    /// with a warning.
    fn from_sources(default: &str, local: &str) -> Self {
        let built = config::Config::builder()
            .add_source(
                config::File::with_name(default)
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name(local)
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MANDI").separator("__"))
            .build()
            .and_then(|cfg| cfg.try_deserialize::<AppConfig>());

        built.unwrap_or_else(|e| {
            warn!("Invalid configuration, using defaults: {}", e);
            AppConfig::default()
        })
    }
}
