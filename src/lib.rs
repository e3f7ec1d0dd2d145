use std::fmt;
use std::time::Duration;

use chrono::{Local, TimeZone, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, warn};

mod document;
mod error;
mod time;

pub use document::{derive_unit, parse_price_document, PriceSeries};
pub use error::{EntsoeError, ParseError};
pub use time::{
    format_document_timestamp, format_wire_timestamp, last_midnight, parse_document_timestamp,
    parse_resolution, TimeWindow, ONE_DAY,
};

/// Endpoint of the ENTSO-E transparency platform REST API.
pub const BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";
/// Document type of day-ahead price documents.
pub const DOCUMENT_TYPE: &str = "A44";
/// Bidding zone prices are requested for (the Netherlands).
pub const DOMAIN: &str = "10YNL----------L";

/// The API answers `200 OK` with this text when the query matched nothing.
const NO_DATA_MARKER: &str = "No matching data found";

/// Client for day-ahead prices of [`DOMAIN`].
#[derive(Clone)]
pub struct EntsoeClient {
    client: reqwest::Client,
    security_token: String,
    base_url: String,
}

impl fmt::Debug for EntsoeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntsoeClient")
            .field("base_url", &self.base_url)
            .field("security_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl EntsoeClient {
    /// Creates a client using `security_token` for every request.
    ///
    /// With a `timeout`, a request that takes longer fails with
    /// [`EntsoeError::Http`]. Without one, the transport's default applies.
    pub fn new(
        security_token: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, EntsoeError> {
        let security_token = security_token.into();
        if security_token.is_empty() {
            return Err(EntsoeError::InvalidToken);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            security_token,
            base_url: BASE_URL.to_owned(),
        })
    }

    /// Sends requests to `base_url` instead of [`BASE_URL`].
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query prices for `window`.
    ///
    /// Issues a single request and parses the returned document. Fails with
    /// [`EntsoeError::NoData`] if the API has no prices for the window.
    pub async fn query_prices(&self, window: TimeWindow) -> Result<PriceSeries, EntsoeError> {
        let body = self.request(&window).await?;
        Ok(parse_price_document(&body)?)
    }

    /// Prices from local midnight today up to 24 hours later.
    pub async fn query_today_prices(&self) -> Result<PriceSeries, EntsoeError> {
        self.query_today_prices_in(&Local).await
    }

    /// Prices from local midnight tomorrow up to 24 hours later.
    pub async fn query_day_ahead_prices(&self) -> Result<PriceSeries, EntsoeError> {
        self.query_day_ahead_prices_in(&Local).await
    }

    /// Like [`EntsoeClient::query_today_prices`], with midnight taken in `tz`.
    pub async fn query_today_prices_in<TZ: TimeZone>(
        &self,
        tz: &TZ,
    ) -> Result<PriceSeries, EntsoeError> {
        self.query_prices(TimeWindow::today(Utc::now(), tz)).await
    }

    /// Like [`EntsoeClient::query_day_ahead_prices`], with midnight taken in `tz`.
    pub async fn query_day_ahead_prices_in<TZ: TimeZone>(
        &self,
        tz: &TZ,
    ) -> Result<PriceSeries, EntsoeError> {
        self.query_prices(TimeWindow::day_ahead(Utc::now(), tz)).await
    }

    fn query_params(&self, window: &TimeWindow) -> [(&'static str, String); 6] {
        [
            ("documentType", DOCUMENT_TYPE.to_owned()),
            ("in_Domain", DOMAIN.to_owned()),
            ("out_Domain", DOMAIN.to_owned()),
            ("securityToken", self.security_token.clone()),
            ("periodStart", format_wire_timestamp(&window.start())),
            ("periodEnd", format_wire_timestamp(&window.end())),
        ]
    }

    async fn request(&self, window: &TimeWindow) -> Result<String, EntsoeError> {
        let query_params = self.query_params(window);
        debug!(start = %window.start(), end = %window.end(), domain = DOMAIN, "requesting prices");

        let response = self
            .client
            .get(&self.base_url)
            .query(&query_params)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await?;

        check_response(status, content_type.as_deref(), body)
    }
}

/// Returns the body of a successful response.
///
/// The API reports an empty result with a success status, so XML bodies are
/// also checked for [`NO_DATA_MARKER`]. Other content types pass unexamined.
fn check_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: String,
) -> Result<String, EntsoeError> {
    if !status.is_success() {
        return Err(EntsoeError::Transport { status, body });
    }

    if content_type.map_or(false, is_xml) && body.contains(NO_DATA_MARKER) {
        warn!("api returned no matching data");
        return Err(EntsoeError::NoData);
    }

    Ok(body)
}

fn is_xml(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    essence.eq_ignore_ascii_case("application/xml") || essence.eq_ignore_ascii_case("text/xml")
}
