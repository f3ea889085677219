//! HTTP driver for the market site's WebForms price search (`SearchCmmMkt.aspx`).
//!
//! Each dropdown change is a full-page postback carrying the page's hidden
//! state; the server answers with the dependent dropdown repopulated. A
//! dependent list that comes back empty is polled until it fills or the step
//! timeout passes.

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::MarketOption;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use super::cleaner::format_form_date;
use super::form::FormState;
use super::http_client::HttpSession;
use super::{FormDriver, FormSession, MarketQuery};

const SEARCH_PATH: &str = "SearchCmmMkt.aspx";

const COMMODITY: &str = "ddlCommodity";
const STATE: &str = "ddlState";
const DISTRICT: &str = "ddlDistrict";
const MARKET: &str = "ddlMarket";
const DATE_FROM: &str = "txtDate";
const DATE_TO: &str = "txtDateTo";
const SUBMIT: (&str, &str) = ("btnGo", "Go");

/// Phrases the form uses when it refuses the submitted dates.
const REJECTION_MARKERS: &[&str] = &[
    "invalid date",
    "enter valid date",
    "date format",
    "from date should be",
];

// ── Driver ────────────────────────────────────────────────────────────────────

pub struct AgmarknetDriver {
    config: ScraperConfig,
    search_url: Url,
}

impl AgmarknetDriver {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ScrapeError::ProtocolMismatch(format!("bad base url {:?}: {e}", config.base_url)))?;
        let search_url = base
            .join(SEARCH_PATH)
            .map_err(|e| ScrapeError::ProtocolMismatch(format!("bad search url: {e}")))?;
        if !config.headless {
            info!("Headed mode requested; the HTTP driver has no window to show");
        }
        Ok(Self { config: config.clone(), search_url })
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }
}

#[async_trait]
impl FormDriver for AgmarknetDriver {
    async fn open_session(&self) -> Result<Box<dyn FormSession>, ScrapeError> {
        Ok(Box::new(AgmarknetSession {
            http: HttpSession::new(&self.config)?,
            search_url: self.search_url.clone(),
            post_url: self.search_url.clone(),
            state: None,
            step_timeout: self.config.step_timeout(),
            poll_interval: self.config.poll_interval(),
        }))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct AgmarknetSession {
    http: HttpSession,
    search_url: Url,
    post_url: Url,
    state: Option<FormState>,
    step_timeout: Duration,
    poll_interval: Duration,
}

impl AgmarknetSession {
    fn state_mut(&mut self) -> Result<&mut FormState, ScrapeError> {
        self.state
            .as_mut()
            .ok_or_else(|| ScrapeError::ProtocolMismatch("form not loaded".into()))
    }

    async fn load(&mut self) -> Result<(), ScrapeError> {
        let html = timeout(self.step_timeout, self.http.get_text(&self.search_url))
            .await
            .map_err(|_| ScrapeError::Timeout(self.step_timeout))??;

        let state = FormState::parse(&html);
        if !state.has_viewstate() || !state.has_select(COMMODITY) {
            return Err(ScrapeError::ProtocolMismatch("search page has no commodity form".into()));
        }
        if let Some(action) = &state.action {
            if let Ok(url) = self.search_url.join(action) {
                self.post_url = url;
            }
        }
        self.state = Some(state);
        Ok(())
    }

    async fn postback(&mut self, event_target: &str, extra: &[(&str, &str)]) -> Result<String, ScrapeError> {
        let mut fields = self.state_mut()?.postback_fields(event_target);
        fields.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self.http.post_form(&self.post_url, &fields).await
    }

    /// Select `value` in `field` and wait for `dependent` to be repopulated.
    async fn select_and_await(
        &mut self,
        field: &str,
        value: &str,
        dependent: &str,
    ) -> Result<Vec<MarketOption>, ScrapeError> {
        let deadline = Instant::now() + self.step_timeout;
        let mut polls = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.stalled(polls, field, value, dependent));
            }

            self.state_mut()?.selected.insert(field.to_string(), value.to_string());
            let html = match timeout(remaining, self.postback(field, &[])).await {
                Ok(html) => html?,
                Err(_) => return Err(self.stalled(polls, field, value, dependent)),
            };
            polls += 1;

            let page = FormState::parse(&html);
            if !page.has_viewstate() {
                return Err(ScrapeError::ProtocolMismatch(format!(
                    "postback for {field} returned a page without form state"
                )));
            }
            let options = page.real_options(dependent);
            self.state = Some(page);

            if !options.is_empty() {
                debug!("{} populated with {} options after {} poll(s)", dependent, options.len(), polls);
                return Ok(options);
            }
            sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Out of time: a list we already saw empty is missing, a step that
    /// never answered is a timeout.
    fn stalled(&self, polls: u32, field: &str, value: &str, dependent: &str) -> ScrapeError {
        if polls == 0 {
            ScrapeError::Timeout(self.step_timeout)
        } else {
            ScrapeError::TargetNotFound(format!("{dependent} stayed empty after selecting {field}={value}"))
        }
    }

    /// Configured commodity code if the live dropdown still has it, else the
    /// option whose label matches the display name.
    fn pick_commodity(&self, query: &MarketQuery) -> Result<String, ScrapeError> {
        let options = self
            .state
            .as_ref()
            .map(|s| s.real_options(COMMODITY))
            .unwrap_or_default();

        if options.iter().any(|o| o.id == query.commodity_code) {
            return Ok(query.commodity_code.clone());
        }
        match options.iter().find(|o| o.label.eq_ignore_ascii_case(&query.commodity_name)) {
            Some(o) => {
                warn!(
                    "Commodity code {} not offered for {}; using live code {}",
                    query.commodity_code, query.commodity_name, o.id
                );
                Ok(o.id.clone())
            }
            None => Err(ScrapeError::TargetNotFound(format!("commodity {}", query.commodity_name))),
        }
    }
}

/// Case-insensitive substring match either way round; first match wins.
pub fn match_district<'a>(options: &'a [MarketOption], district: &str) -> Option<&'a MarketOption> {
    let want = district.trim().to_lowercase();
    if want.is_empty() {
        return None;
    }
    options.iter().find(|o| {
        let label = o.label.trim().to_lowercase();
        !label.is_empty() && (label.contains(&want) || want.contains(&label))
    })
}

pub fn is_rejection(html: &str) -> bool {
    let lower = html.to_lowercase();
    REJECTION_MARKERS.iter().any(|m| lower.contains(m))
}

#[async_trait]
impl FormSession for AgmarknetSession {
    async fn resolve_markets(&mut self, query: &MarketQuery) -> Result<Vec<MarketOption>, ScrapeError> {
        self.load().await?;

        let commodity = self.pick_commodity(query)?;
        let state = self.state_mut()?;
        state.selected.insert(COMMODITY.to_string(), commodity);

        if !state.real_options(STATE).iter().any(|o| o.id == query.state_code) {
            return Err(ScrapeError::TargetNotFound(format!("state {}", query.state_code)));
        }

        let districts = self.select_and_await(STATE, &query.state_code, DISTRICT).await?;
        let district = match_district(&districts, &query.district_name)
            .cloned()
            .ok_or_else(|| ScrapeError::TargetNotFound(format!("district {}", query.district_name)))?;
        debug!("District {:?} → {} ({})", query.district_name, district.label, district.id);

        let markets = self.select_and_await(DISTRICT, &district.id, MARKET).await?;
        info!("{} markets in {}", markets.len(), district.label);
        Ok(markets)
    }

    async fn submit_query(
        &mut self,
        market_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<String, ScrapeError> {
        let state = self.state_mut()?;
        if !state.real_options(MARKET).iter().any(|o| o.id == market_id) {
            return Err(ScrapeError::TargetNotFound(format!("market {market_id}")));
        }
        state.selected.insert(MARKET.to_string(), market_id.to_string());
        state.inputs.insert(DATE_FROM.to_string(), format_form_date(from));
        state.inputs.insert(DATE_TO.to_string(), format_form_date(to));

        let html = self.postback("", &[SUBMIT]).await?;
        if is_rejection(&html) {
            return Err(ScrapeError::ProtocolMismatch(format!(
                "form rejected date range {} – {}",
                format_form_date(from),
                format_form_date(to)
            )));
        }

        let page = FormState::parse(&html);
        if page.has_viewstate() {
            self.state = Some(page);
        }
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::form::fixtures::search_page;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts(labels: &[&str]) -> Vec<MarketOption> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| MarketOption::new((i + 1).to_string(), *l))
            .collect()
    }

    #[test]
    fn test_match_district() {
        let districts = opts(&["Ahmednagar", "Mumbai Suburban", "Pune", "Thane"]);
        assert_eq!(match_district(&districts, "Mumbai").unwrap().label, "Mumbai Suburban");
        assert_eq!(match_district(&districts, "PUNE").unwrap().id, "3");
        assert!(match_district(&districts, "Nagpur").is_none());
        assert!(match_district(&districts, "  ").is_none());
    }

    #[test]
    fn test_rejection_markers() {
        assert!(is_rejection("<span class='err'>Please enter valid date</span>"));
        assert!(!is_rejection("<table><tr><td>No Data Found</td></tr></table>"));
    }

    #[test]
    fn test_search_url_join() {
        let cfg = ScraperConfig { base_url: "https://agmarknet.gov.in/".into(), ..Default::default() };
        let driver = AgmarknetDriver::new(&cfg).unwrap();
        assert_eq!(driver.search_url().as_str(), "https://agmarknet.gov.in/SearchCmmMkt.aspx");

        let bad = ScraperConfig { base_url: "not a url".into(), ..Default::default() };
        assert!(matches!(AgmarknetDriver::new(&bad), Err(ScrapeError::ProtocolMismatch(_))));
    }

    fn pune_onion() -> MarketQuery {
        MarketQuery {
            commodity_code: "23".into(),
            commodity_name: "Onion".into(),
            state_code: "MH".into(),
            district_name: "Pune".into(),
        }
    }

    fn driver_for(server: &MockServer, step_timeout_secs: u64) -> AgmarknetDriver {
        let cfg = ScraperConfig {
            base_url: format!("{}/", server.uri()),
            step_timeout_secs,
            poll_interval_ms: 20,
            ..Default::default()
        };
        AgmarknetDriver::new(&cfg).unwrap()
    }

    fn html(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(body)
    }

    async fn serve_form(server: &MockServer, page: String) {
        Mock::given(method("GET"))
            .and(path("/SearchCmmMkt.aspx"))
            .respond_with(html(page))
            .mount(server)
            .await;
    }

    fn postback_for(target: &str) -> wiremock::MockBuilder {
        Mock::given(method("POST"))
            .and(path("/SearchCmmMkt.aspx"))
            .and(body_string_contains(format!("__EVENTTARGET={target}&")))
    }

    const PUNE_MARKETS: &[(&str, &str)] = &[("215", "Pune"), ("216", "Pune(Pimpri)")];

    #[tokio::test]
    async fn test_district_list_filled_on_second_poll() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;
        postback_for("ddlState")
            .respond_with(html(search_page("vs1", &[], &[])))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        postback_for("ddlState")
            .respond_with(html(search_page("vs2", &[("11", "Mumbai"), ("12", "Pune")], &[])))
            .mount(&server)
            .await;
        postback_for("ddlDistrict")
            .and(body_string_contains("ddlDistrict=12"))
            .respond_with(html(search_page("vs3", &[("12", "Pune")], PUNE_MARKETS)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("btnGo=Go"))
            .and(body_string_contains("ddlMarket=216"))
            .and(body_string_contains("txtDate=01-Aug-2025"))
            .respond_with(html("<table><tr><td>Pune(Pimpri)</td><td>2100</td></tr></table>".into()))
            .mount(&server)
            .await;

        let driver = driver_for(&server, 2);
        let mut session = driver.open_session().await.unwrap();
        let markets = session.resolve_markets(&pune_onion()).await.unwrap();
        assert_eq!(markets, vec![MarketOption::new("215", "Pune"), MarketOption::new("216", "Pune(Pimpri)")]);

        let state_posts = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains("__EVENTTARGET=ddlState&"))
            .count();
        assert_eq!(state_posts, 2);

        let from = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let page = session.submit_query("216", from, to).await.unwrap();
        assert!(page.contains("2100"));

        let err = session.submit_query("999", from, to).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetNotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_district_list_never_fills() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;
        postback_for("ddlState")
            .respond_with(html(search_page("vs1", &[], &[])))
            .mount(&server)
            .await;

        let driver = driver_for(&server, 1);
        let mut session = driver.open_session().await.unwrap();
        let started = std::time::Instant::now();
        let err = session.resolve_markets(&pune_onion()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetNotFound(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_district_without_match() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;
        postback_for("ddlState")
            .respond_with(html(search_page("vs1", &[("11", "Mumbai"), ("12", "Pune")], &[])))
            .mount(&server)
            .await;

        let query = MarketQuery { district_name: "Nagpur".into(), ..pune_onion() };
        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        let err = session.resolve_markets(&query).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetNotFound(ref m) if m.contains("Nagpur")), "{err:?}");
    }

    #[tokio::test]
    async fn test_unknown_state_code() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;

        let query = MarketQuery { state_code: "KK".into(), ..pune_onion() };
        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        let err = session.resolve_markets(&query).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetNotFound(ref m) if m.contains("KK")), "{err:?}");
    }

    #[tokio::test]
    async fn test_page_without_form_is_protocol_mismatch() {
        let server = MockServer::start().await;
        serve_form(&server, "<html><body>Under maintenance</body></html>".into()).await;

        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        let err = session.resolve_markets(&pune_onion()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ProtocolMismatch(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_stale_commodity_code_uses_live_label() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;
        postback_for("ddlState")
            .and(body_string_contains("ddlCommodity=23&"))
            .respond_with(html(search_page("vs1", &[("12", "Pune")], &[])))
            .mount(&server)
            .await;
        postback_for("ddlDistrict")
            .respond_with(html(search_page("vs2", &[("12", "Pune")], PUNE_MARKETS)))
            .mount(&server)
            .await;

        let query = MarketQuery { commodity_code: "99".into(), ..pune_onion() };
        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        assert_eq!(session.resolve_markets(&query).await.unwrap().len(), 2);

        let query = MarketQuery { commodity_code: "99".into(), commodity_name: "Okra".into(), ..pune_onion() };
        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        let err = session.resolve_markets(&query).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetNotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_rejected_dates_and_postbacks() {
        let server = MockServer::start().await;
        serve_form(&server, search_page("vs0", &[], &[])).await;
        postback_for("ddlState")
            .respond_with(html(search_page("vs1", &[("12", "Pune")], &[])))
            .mount(&server)
            .await;
        postback_for("ddlDistrict")
            .respond_with(html(search_page("vs2", &[("12", "Pune")], PUNE_MARKETS)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("btnGo=Go"))
            .and(body_string_contains("ddlMarket=215"))
            .respond_with(html("<span class='error'>Please enter valid date</span>".into()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("btnGo=Go"))
            .and(body_string_contains("ddlMarket=216"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("Invalid postback or callback argument."),
            )
            .mount(&server)
            .await;

        let mut session = driver_for(&server, 2).open_session().await.unwrap();
        session.resolve_markets(&pune_onion()).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let err = session.submit_query("215", day, day).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ProtocolMismatch(ref m) if m.contains("07-Aug-2025")), "{err:?}");

        let err = session.submit_query("216", day, day).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ProtocolMismatch(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let cfg = ScraperConfig {
            base_url: "http://127.0.0.1:9/".into(),
            step_timeout_secs: 2,
            ..Default::default()
        };
        let driver = AgmarknetDriver::new(&cfg).unwrap();
        let mut session = driver.open_session().await.unwrap();
        let query = MarketQuery {
            commodity_code: "23".into(),
            commodity_name: "Onion".into(),
            state_code: "MH".into(),
            district_name: "Pune".into(),
        };
        let err = session.resolve_markets(&query).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Transient(_) | ScrapeError::Timeout(_)), "{err:?}");
    }
}
