//! Try every market of a city until one yields a price.
//!
//! Order: the configured priority labels for the city (those that exist in
//! the live list), then the remaining markets in the form's own order. Each
//! market attempt is independent and bounded by the attempt timeout; its
//! failure is logged and the loop moves on.

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::{CityDefinition, MarketOption, PriceObservation, VegetableDefinition};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::extractor::{ExtractContext, extract_price};
use super::{FormDriver, FormSession, MarketQuery, PriceSource};

pub struct MarketFallback {
    driver: Arc<dyn FormDriver>,
    priorities: HashMap<String, Vec<String>>,
    attempt_timeout: Duration,
    window_days: u32,
}

impl MarketFallback {
    pub fn new(driver: Arc<dyn FormDriver>, config: &ScraperConfig) -> Self {
        Self {
            driver,
            priorities: config.market_priorities.clone(),
            attempt_timeout: config.attempt_timeout(),
            window_days: config.query_window_days.max(1),
        }
    }

    /// `[today - (days - 1), today]`, in local calendar days.
    fn query_window(&self) -> (NaiveDate, NaiveDate) {
        let to = Local::now().date_naive();
        let from = to - ChronoDuration::days(i64::from(self.window_days) - 1);
        (from, to)
    }

    async fn try_market(
        &self,
        session: Option<Box<dyn FormSession>>,
        query: &MarketQuery,
        market: &MarketOption,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
    ) -> Result<Option<PriceObservation>, ScrapeError> {
        let mut session = match session {
            Some(s) => s,
            None => {
                let mut s = self.driver.open_session().await?;
                s.resolve_markets(query).await?;
                s
            }
        };

        let (from, to) = self.query_window();
        let html = session.submit_query(&market.id, from, to).await?;

        let ctx = ExtractContext {
            city: city.key.clone(),
            vegetable: vegetable.key.clone(),
            market_name: market.label.clone(),
            default_date: to,
            captured_at: Utc::now().naive_utc(),
        };
        // Parsing a full results page is CPU work; keep it off the async workers.
        tokio::task::spawn_blocking(move || extract_price(&html, &ctx))
            .await
            .map_err(|e| ScrapeError::Transient(format!("extractor task failed: {e}")))
    }
}

/// Priority labels first (case-insensitive, in priority order), then the rest
/// in source order. Priority labels absent from `markets` are ignored.
pub fn order_markets(markets: Vec<MarketOption>, priorities: Option<&Vec<String>>) -> Vec<MarketOption> {
    let Some(priorities) = priorities else {
        return markets;
    };

    let mut ordered = Vec::with_capacity(markets.len());
    let mut rest = markets;
    for wanted in priorities {
        if let Some(pos) = rest
            .iter()
            .position(|m| m.label.trim().eq_ignore_ascii_case(wanted.trim()))
        {
            ordered.push(rest.remove(pos));
        }
    }
    ordered.extend(rest);
    ordered
}

#[async_trait]
impl PriceSource for MarketFallback {
    async fn fetch_best_available(
        &self,
        city: &CityDefinition,
        vegetable: &VegetableDefinition,
    ) -> Result<Option<PriceObservation>, ScrapeError> {
        let query = MarketQuery::new(city, vegetable);

        let mut listing = self.driver.open_session().await?;
        let markets = timeout(self.attempt_timeout, listing.resolve_markets(&query))
            .await
            .map_err(|_| ScrapeError::Timeout(self.attempt_timeout))??;

        if markets.is_empty() {
            info!(city = %city.key, vegetable = %vegetable.key, "No markets listed");
            return Ok(None);
        }

        let markets = order_markets(markets, self.priorities.get(&city.key));
        info!(city = %city.key, vegetable = %vegetable.key, "Trying {} markets", markets.len());

        // The listing session is already positioned on the market dropdown;
        // the first attempt reuses it, later ones start clean.
        let mut reusable = Some(listing);

        for market in &markets {
            let attempt = self.try_market(reusable.take(), &query, market, city, vegetable);
            match timeout(self.attempt_timeout, attempt).await {
                Ok(Ok(Some(obs))) => {
                    info!(
                        city = %city.key, vegetable = %vegetable.key, market = %market.label,
                        "Found ₹{} per {}", obs.price, obs.price_unit
                    );
                    return Ok(Some(obs));
                }
                Ok(Ok(None)) => debug!(market = %market.label, "No data"),
                Ok(Err(e)) => warn!(city = %city.key, vegetable = %vegetable.key, market = %market.label, "Market attempt failed: {}", e),
                Err(_) => warn!(
                    city = %city.key, vegetable = %vegetable.key, market = %market.label,
                    "Market attempt timed out after {:?}", self.attempt_timeout
                ),
            }
        }

        info!(city = %city.key, vegetable = %vegetable.key, "No price in any of {} markets", markets.len());
        Ok(None)
    }
}

// ── Test doubles ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    pub enum FakePage {
        Html(String),
        Protocol,
        Transient,
        Hang,
    }

    /// In-memory stand-in for the remote form.
    #[derive(Default)]
    pub struct FakeDriver {
        pub markets: Vec<MarketOption>,
        pub pages: HashMap<String, FakePage>,
        /// When set, resolving the market list fails this way.
        pub listing_error: Option<FakePage>,
        pub sessions: AtomicUsize,
        pub submits: AtomicUsize,
    }

    impl FakeDriver {
        pub fn new(markets: &[(&str, &str)]) -> Self {
            Self {
                markets: markets.iter().map(|(id, l)| MarketOption::new(*id, *l)).collect(),
                ..Default::default()
            }
        }

        pub fn page(mut self, market_id: &str, page: FakePage) -> Self {
            self.pages.insert(market_id.to_string(), page);
            self
        }

        pub fn submitted(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    fn fail(page: &FakePage) -> ScrapeError {
        match page {
            FakePage::Protocol => ScrapeError::ProtocolMismatch("fake rejection".into()),
            _ => ScrapeError::Transient("fake network error".into()),
        }
    }

    struct FakeSession {
        driver: Arc<FakeDriver>,
    }

    #[async_trait]
    impl FormDriver for Arc<FakeDriver> {
        async fn open_session(&self) -> Result<Box<dyn FormSession>, ScrapeError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession { driver: Arc::clone(self) }))
        }
    }

    #[async_trait]
    impl FormSession for FakeSession {
        async fn resolve_markets(&mut self, _query: &MarketQuery) -> Result<Vec<MarketOption>, ScrapeError> {
            match &self.driver.listing_error {
                Some(page) => Err(fail(page)),
                None => Ok(self.driver.markets.clone()),
            }
        }

        async fn submit_query(&mut self, market_id: &str, _from: NaiveDate, _to: NaiveDate) -> Result<String, ScrapeError> {
            self.driver.submits.fetch_add(1, Ordering::SeqCst);
            match self.driver.pages.get(market_id) {
                Some(FakePage::Html(html)) => Ok(html.clone()),
                Some(FakePage::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
                Some(other) => Err(fail(other)),
                None => Err(ScrapeError::TargetNotFound(format!("market {market_id}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::normalizer::Catalog;
    use crate::scraper::extractor::fixtures::{no_data_row, price_row, results_page};

    fn fallback(driver: &Arc<FakeDriver>, attempt_secs: u64) -> MarketFallback {
        let cfg = ScraperConfig { attempt_timeout_secs: attempt_secs, ..Default::default() };
        MarketFallback::new(Arc::new(Arc::clone(driver)), &cfg)
    }

    fn pune_onion() -> (CityDefinition, VegetableDefinition) {
        let catalog = Catalog::builtin();
        (catalog.city("pune").unwrap().clone(), catalog.vegetable("onion").unwrap().clone())
    }

    #[test]
    fn test_order_markets_priority_then_source_order() {
        let markets: Vec<MarketOption> = ["A", "Vashi New Mumbai", "B", "Mumbai"]
            .iter()
            .enumerate()
            .map(|(i, l)| MarketOption::new(i.to_string(), *l))
            .collect();
        let prio = vec!["mumbai".to_string(), "Missing".to_string(), "Vashi New Mumbai".to_string()];
        let labels: Vec<String> = order_markets(markets.clone(), Some(&prio)).into_iter().map(|m| m.label).collect();
        assert_eq!(labels, vec!["Mumbai", "Vashi New Mumbai", "A", "B"]);

        assert_eq!(order_markets(markets.clone(), None), markets);
    }

    #[tokio::test]
    async fn test_second_market_succeeds() {
        let driver = Arc::new(
            FakeDriver::new(&[("1", "Pune(Pimpri)"), ("2", "Pune")])
                .page("1", FakePage::Html(results_page(&no_data_row())))
                .page("2", FakePage::Html(results_page(&price_row("Pune", "2,450")))),
        );
        let (city, veg) = pune_onion();
        let obs = fallback(&driver, 30).fetch_best_available(&city, &veg).await.unwrap().unwrap();
        assert_eq!(obs.price, 2450.0);
        assert_eq!(obs.city, "pune");
        assert_eq!(driver.submitted(), 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_loop() {
        let driver = Arc::new(
            FakeDriver::new(&[("1", "A"), ("2", "B"), ("3", "C")])
                .page("1", FakePage::Transient)
                .page("2", FakePage::Protocol)
                .page("3", FakePage::Html(results_page(&price_row("C", "1,900")))),
        );
        let (city, veg) = pune_onion();
        let obs = fallback(&driver, 30).fetch_best_available(&city, &veg).await.unwrap().unwrap();
        assert_eq!(obs.price, 1900.0);
    }

    #[tokio::test]
    async fn test_hanging_market_times_out_and_moves_on() {
        let driver = Arc::new(
            FakeDriver::new(&[("1", "Slow"), ("2", "Fast")])
                .page("1", FakePage::Hang)
                .page("2", FakePage::Html(results_page(&price_row("Fast", "2,000")))),
        );
        let (city, veg) = pune_onion();
        let obs = fallback(&driver, 1).fetch_best_available(&city, &veg).await.unwrap().unwrap();
        assert_eq!(obs.market_name, "Fast");
    }

    #[tokio::test]
    async fn test_exhausted_markets_is_no_data() {
        let driver = Arc::new(
            FakeDriver::new(&[("1", "A"), ("2", "B")])
                .page("1", FakePage::Html(results_page(&no_data_row())))
                .page("2", FakePage::Html(results_page(&no_data_row()))),
        );
        let (city, veg) = pune_onion();
        let res = fallback(&driver, 30).fetch_best_available(&city, &veg).await.unwrap();
        assert!(res.is_none());
        assert_eq!(driver.submitted(), 2);
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let mut fake = FakeDriver::new(&[]);
        fake.listing_error = Some(FakePage::Transient);
        let driver = Arc::new(fake);
        let (city, veg) = pune_onion();
        let err = fallback(&driver, 30).fetch_best_available(&city, &veg).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Transient(_)));
    }
}
