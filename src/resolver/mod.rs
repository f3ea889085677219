//! Cache → store → live fetch.
//!
//! Every request ends in a typed result: `Found`, `Unavailable` (the source
//! has nothing, or the fetch failed), or an error for unknown input and an
//! unreachable store. Scrape failures never cross this boundary as errors.

use crate::cache::{CacheKey, FreshnessCache};
use crate::config::{CacheConfig, ResolverConfig};
use crate::error::{ResolveError, ScrapeError, StoreError};
use crate::models::{CityDefinition, PriceObservation, ScrapeTarget, Source, VegetableDefinition};
use crate::normalizer::Catalog;
use crate::scraper::PriceSource;
use crate::storage::PriceStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub type PriceCache = FreshnessCache<PriceObservation>;

/// Which freshness window applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Interactive lookups (CLI); defaults to 24h.
    AdHoc,
    /// Tool/API callers; defaults to 6h.
    Api,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(PriceObservation),
    Unavailable {
        city: String,
        vegetable: String,
        /// Internal reason when a fetch failed rather than found nothing.
        diagnostic: Option<String>,
    },
}

/// Result of a forced fetch for one refresh target.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Fetched(PriceObservation),
    NoData,
    /// Store already held an observation inside the freshness window.
    StillFresh,
}

pub struct Resolver {
    catalog: Arc<Catalog>,
    store: Arc<PriceStore>,
    cache: Arc<PriceCache>,
    source: Arc<dyn PriceSource>,
    config: ResolverConfig,
    store_hit_ttl: Duration,
}

impl Resolver {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<PriceStore>,
        cache: Arc<PriceCache>,
        source: Arc<dyn PriceSource>,
        config: ResolverConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            cache,
            source,
            config,
            store_hit_ttl: cache_config.store_hit_ttl(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    fn window(&self, freshness: Freshness) -> ChronoDuration {
        match freshness {
            Freshness::AdHoc => ChronoDuration::hours(self.config.adhoc_freshness_hours),
            Freshness::Api => ChronoDuration::hours(self.config.api_freshness_hours),
        }
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.config.fetch_timeout_secs)
    }

    pub fn lookup(&self, city: &str, vegetable: &str) -> Result<(&CityDefinition, &VegetableDefinition), ResolveError> {
        Ok((self.catalog.require_city(city)?, self.catalog.require_vegetable(vegetable)?))
    }

    pub async fn resolve(&self, city: &str, vegetable: &str, freshness: Freshness) -> Result<Resolution, ResolveError> {
        let (c, v) = self.lookup(city, vegetable)?;
        let key = CacheKey::new(&c.key, &v.key);

        // 1. Cache
        if let Some(obs) = self.cache.get(&key) {
            debug!(city = %c.key, vegetable = %v.key, "Served from cache");
            return Ok(Resolution::Found(obs.with_source(Source::Cache)));
        }

        // 2. Store, if fresh enough
        if let Some(obs) = self.fresh_from_store(c, v, freshness).await? {
            debug!(city = %c.key, vegetable = %v.key, "Served from store ({})", obs.captured_at);
            self.cache.set(key, obs.clone(), Some(self.store_hit_ttl));
            return Ok(Resolution::Found(obs));
        }

        // 3. Live fetch
        match self.fetch_and_persist(c, v).await {
            Ok(Some(obs)) => Ok(Resolution::Found(obs)),
            Ok(None) => Ok(unavailable(c, v, None)),
            Err(ResolveError::Fetch(e)) => {
                warn!(city = %c.key, vegetable = %v.key, "Fetch failed: {}", e);
                Ok(unavailable(c, v, Some(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Run a store operation on the blocking pool; DuckDB calls block.
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&PriceStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn fresh_from_store(
        &self,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
        freshness: Freshness,
    ) -> Result<Option<PriceObservation>, ResolveError> {
        let (city_key, veg_key) = (city.key.clone(), vegetable.key.clone());
        let Some(obs) = self.with_store(move |s| s.latest(&city_key, &veg_key)).await? else {
            return Ok(None);
        };
        let age = Utc::now().naive_utc() - obs.captured_at;
        if age < self.window(freshness) {
            Ok(Some(obs.with_source(Source::Store)))
        } else {
            debug!(city = %city.key, vegetable = %vegetable.key, "Stored price is stale ({}h old)", age.num_hours());
            Ok(None)
        }
    }

    /// Fetch through the price source and, on success, write store then cache.
    ///
    /// Nothing is written until the fetch has fully completed, so abandoning
    /// this future mid-flight leaves store and cache untouched.
    pub async fn fetch_and_persist(
        &self,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
    ) -> Result<Option<PriceObservation>, ResolveError> {
        let Some(obs) = self.fetch_detached(city, vegetable).await? else {
            return Ok(None);
        };
        if !obs.is_valid() {
            warn!(city = %city.key, vegetable = %vegetable.key, "Discarding non-positive price {}", obs.price);
            return Ok(None);
        }

        let obs = obs.with_source(Source::FreshFetch);
        let row = obs.clone();
        self.with_store(move |s| s.upsert(&row)).await?;
        self.cache.set(CacheKey::new(&city.key, &vegetable.key), obs.clone(), None);
        info!(
            city = %city.key, vegetable = %vegetable.key, market = %obs.market_name,
            "Fresh price ₹{}/kg", obs.price_per_kg()
        );
        Ok(Some(obs))
    }

    /// Run the fetch as its own task so a slow remote never stalls the
    /// caller's worker; the task is aborted if it overruns or the caller
    /// goes away.
    async fn fetch_detached(
        &self,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
    ) -> Result<Option<PriceObservation>, ScrapeError> {
        let source = Arc::clone(&self.source);
        let (c, v) = (city.clone(), vegetable.clone());
        let mut task = AbortOnDrop(tokio::spawn(async move { source.fetch_best_available(&c, &v).await }));

        let limit = self.fetch_timeout();
        match timeout(limit, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ScrapeError::Transient(format!("fetch task failed: {join}"))),
            Err(_) => Err(ScrapeError::Timeout(limit)),
        }
    }

    /// Scheduler entry point: bypasses the cache, and the store check too
    /// when `force` is set.
    pub async fn refresh(&self, target: &ScrapeTarget, force: bool) -> Result<RefreshOutcome, ResolveError> {
        let (c, v) = self.lookup(&target.city, &target.vegetable)?;
        if !force && self.fresh_from_store(c, v, Freshness::Api).await?.is_some() {
            return Ok(RefreshOutcome::StillFresh);
        }
        Ok(match self.fetch_and_persist(c, v).await? {
            Some(obs) => RefreshOutcome::Fetched(obs),
            None => RefreshOutcome::NoData,
        })
    }
}

fn unavailable(city: &CityDefinition, vegetable: &VegetableDefinition, diagnostic: Option<String>) -> Resolution {
    Resolution::Unavailable {
        city: city.key.clone(),
        vegetable: vegetable.key.clone(),
        diagnostic,
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ── Test doubles ──────────────────────────────────────────────────────────────
