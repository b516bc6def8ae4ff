//! Cached day-ahead prices with a fetch throttle

use crate::error::EngineError;
use crate::store::StateStore;
use chrono::{DateTime, Days, Duration, Utc};
use chrono_tz::Tz;
use price_feed::{PriceSeries, PriceSource};
use serde_json::Value;
use std::sync::Arc;

pub const PRICES_KEY: &str = "prices";
pub const PRICES_FETCHED_AT_KEY: &str = "prices_fetched_at";

/// Cached prices and the fetch timestamp expire after two days
pub const PRICES_TTL: std::time::Duration = std::time::Duration::from_secs(48 * 60 * 60);

/// Minimum time between upstream fetches
pub const FETCH_INTERVAL: Duration = Duration::hours(1);

pub struct PriceCache {
    store: Arc<dyn StateStore>,
    timezone: Tz,
    source: Option<(Arc<dyn PriceSource>, String)>,
}

impl PriceCache {
    /// Cache without an upstream source; `fetch_if_stale` never fetches
    pub fn new(store: Arc<dyn StateStore>, timezone: Tz) -> Self {
        Self {
            store,
            timezone,
            source: None,
        }
    }

    /// Fetch from `source` for the bidding zone of `country_code`
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn PriceSource>, country_code: &str) -> Self {
        self.source = Some((source, country_code.to_uppercase()));
        self
    }

    /// Last stored series, if any
    pub async fn get_cached(&self) -> Result<Option<PriceSeries>, EngineError> {
        let Some(value) = self.store.get(PRICES_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<PriceSeries>(value) {
            Ok(series) if !series.is_empty() => Ok(Some(series)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cached prices: {}", e);
                Ok(None)
            }
        }
    }

    /// Persist `series` as the current prices
    pub async fn store(&self, series: &PriceSeries, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.store
            .set(PRICES_KEY, serde_json::to_value(series)?, PRICES_TTL)
            .await?;
        self.record_fetch(now).await
    }

    /// Mark the upstream as fetched at `now` without replacing the prices
    pub async fn record_fetch(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.store
            .set(
                PRICES_FETCHED_AT_KEY,
                Value::String(now.to_rfc3339()),
                PRICES_TTL,
            )
            .await?;
        Ok(())
    }

    async fn fetched_recently(&self, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let fetched_at = self
            .store
            .get(PRICES_FETCHED_AT_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok());
        Ok(fetched_at.is_some_and(|at| at.with_timezone(&Utc) > now - FETCH_INTERVAL))
    }

    /// Fetch a new series unless the last fetch was less than an hour ago.
    ///
    /// Returns `None` when throttled, when no source is configured, when the
    /// upstream returned nothing, or on a transient upstream error. Fatal
    /// errors (bad configuration, malformed document) are returned.
    ///
    /// The throttle only starts once the caller has handled the series with
    /// [`PriceCache::store`] or [`PriceCache::record_fetch`].
    pub async fn fetch_if_stale(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<PriceSeries>, EngineError> {
        let Some((source, country_code)) = &self.source else {
            tracing::debug!("No price source configured");
            return Ok(None);
        };
        if self.fetched_recently(now).await? {
            tracing::debug!("Prices fetched less than an hour ago, skipping");
            return Ok(None);
        }

        let today = now.with_timezone(&self.timezone).date_naive();
        let (Some(start_day), Some(end_day)) = (
            today.checked_sub_days(Days::new(1)),
            today.checked_add_days(Days::new(2)),
        ) else {
            return Ok(None);
        };

        let points = match source
            .fetch(country_code, start_day, end_day, self.timezone)
            .await
        {
            Ok(points) => points,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Failed to fetch prices: {}", e);
                return Ok(None);
            }
        };

        let series = PriceSeries::from_points(points);
        if series.is_empty() {
            tracing::warn!("Price source returned no prices for {}", country_code);
            return Ok(None);
        }
        tracing::info!(
            "Fetched {} hourly prices for {} ({} to {})",
            series.len(),
            country_code,
            start_day,
            end_day
        );
        Ok(Some(series))
    }
}
