use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One remote session: its own cookie jar, so ASP.NET session state never
/// leaks between concurrent resolution attempts.
///
/// No retries here. A failed request fails the attempt; the next market or
/// the next scheduled run is the retry.
pub struct HttpSession {
    inner: reqwest::Client,
}

impl HttpSession {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            // Navigation steps carry their own tighter bound; this one covers result pages.
            .timeout(config.attempt_timeout().max(Duration::from_secs(1)))
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| ScrapeError::Transient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { inner })
    }

    pub async fn get_text(&self, url: &Url) -> Result<String, ScrapeError> {
        debug!("GET {}", url);
        let resp = self.inner.get(url.clone()).send().await?;
        read_body(resp).await
    }

    /// POST `fields` as `application/x-www-form-urlencoded`.
    pub async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<String, ScrapeError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        debug!("POST {} ({} fields)", url, fields.len());

        let resp = self
            .inner
            .post(url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        read_body(resp).await
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String, ScrapeError> {
    let status = resp.status();
    let text = resp.text().await?;

    if status.is_success() {
        return Ok(text);
    }
    // WebForms answers a stale or tampered postback with a 500 page naming it.
    if text.contains("Invalid postback or callback argument") || text.contains("Validation of viewstate MAC failed") {
        return Err(ScrapeError::ProtocolMismatch(format!("postback rejected (HTTP {status})")));
    }
    Err(ScrapeError::Transient(format!("HTTP {status}")))
}
