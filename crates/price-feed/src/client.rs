//! Async HTTP client for the ENTSO-E transparency platform

use crate::document::parse_day_ahead_prices;
use crate::types::{PriceError, PricePoint};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";

/// Document type for day-ahead prices
const DAY_AHEAD_DOCUMENT: &str = "A44";

/// A source of raw hourly day-ahead prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch prices for local calendar days `[start_day, end_day)` of `timezone`
    async fn fetch(
        &self,
        country_code: &str,
        start_day: NaiveDate,
        end_day: NaiveDate,
        timezone: Tz,
    ) -> Result<Vec<PricePoint>, PriceError>;
}

/// Map a two-letter country code to its EIC bidding-zone code
pub fn bidding_zone(country_code: &str) -> Result<&'static str, PriceError> {
    let zone = match country_code.to_ascii_uppercase().as_str() {
        "FI" => "10YFI-1--------U",
        "EE" => "10Y1001A1001A39I",
        "LV" => "10YLV-1001A00074",
        "LT" => "10YLT-1001A0008Q",
        "DK" => "10YDK-1--------W",
        "SE" => "10Y1001A1001A46L",
        "NO" => "10YNO-1--------2",
        "DE" => "10Y1001A1001A82H",
        _ => return Err(PriceError::UnknownCountry(country_code.to_string())),
    };
    Ok(zone)
}

/// Day-ahead price client
pub struct EntsoeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EntsoeClient {
    /// Create a client against the production endpoint
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom endpoint
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl PriceSource for EntsoeClient {
    async fn fetch(
        &self,
        country_code: &str,
        start_day: NaiveDate,
        end_day: NaiveDate,
        timezone: Tz,
    ) -> Result<Vec<PricePoint>, PriceError> {
        let zone = bidding_zone(country_code)?;
        let period_start = format_period(local_midnight(start_day, timezone));
        let period_end = format_period(local_midnight(end_day, timezone));

        tracing::info!(
            "Fetching day-ahead prices for {} from {} to {}",
            country_code,
            period_start,
            period_end
        );

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("securityToken", self.api_key.as_str()),
                ("documentType", DAY_AHEAD_DOCUMENT),
                ("in_Domain", zone),
                ("out_Domain", zone),
                ("periodStart", period_start.as_str()),
                ("periodEnd", period_end.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // "No matching data" comes back as an acknowledgement document with a 400
        if !status.is_success() && !body.contains("Acknowledgement_MarketDocument") {
            return Err(PriceError::Upstream {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let points = parse_day_ahead_prices(&body)?;
        tracing::debug!("Parsed {} price points", points.len());
        Ok(points)
    }
}

/// Start of a local calendar day, as UTC
fn local_midnight(day: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let naive = day.and_hms_opt(0, 0, 0).unwrap_or_default();
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn format_period(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M").to_string()
}
