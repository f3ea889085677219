pub mod agmarknet;
pub mod cleaner;
pub mod extractor;
pub mod fallback;
pub mod form;
pub mod http_client;

use crate::error::ScrapeError;
use crate::models::{CityDefinition, MarketOption, PriceObservation, VegetableDefinition};
use async_trait::async_trait;
use chrono::NaiveDate;

pub use self::agmarknet::AgmarknetDriver;
pub use self::fallback::MarketFallback;

// ── Driver traits ─────────────────────────────────────────────────────────────

/// What the cascade needs to reach a market list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuery {
    pub commodity_code: String,
    pub commodity_name: String,
    pub state_code: String,
    pub district_name: String,
}

impl MarketQuery {
    pub fn new(city: &CityDefinition, vegetable: &VegetableDefinition) -> Self {
        Self {
            commodity_code: vegetable.commodity_code.clone(),
            commodity_name: vegetable.display_name.clone(),
            state_code: city.state_code.clone(),
            district_name: city.district_name.clone(),
        }
    }
}

/// Opens independent sessions against the remote cascading-select form.
#[async_trait]
pub trait FormDriver: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn FormSession>, ScrapeError>;
}

/// One stateful conversation with the form. Never shared between attempts.
#[async_trait]
pub trait FormSession: Send {
    /// Commodity → state → district, then read the market dropdown.
    /// Placeholder options are skipped.
    async fn resolve_markets(&mut self, query: &MarketQuery) -> Result<Vec<MarketOption>, ScrapeError>;

    /// Select `market_id` and submit for `[from, to]`; returns the results page.
    /// Must follow `resolve_markets` on the same session.
    async fn submit_query(
        &mut self,
        market_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<String, ScrapeError>;
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable "fetch the best available price" abstraction used by the resolver.
///
/// `Ok(None)` is the ordinary no-data outcome. `Err` means the city lookup
/// could not even start (market list unavailable).
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_best_available(
        &self,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
    ) -> Result<Option<PriceObservation>, ScrapeError>;
}
