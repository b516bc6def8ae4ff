//! Price point and price series types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of hourly points kept in a series
pub const MAX_SERIES_LEN: usize = 48;

/// Errors from the upstream price feed
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("Unsupported period resolution {0}")]
    UnsupportedResolution(String),

    #[error("Invalid price document: {0}")]
    InvalidDocument(String),

    #[error("Unknown country code: {0}")]
    UnknownCountry(String),

    #[error("Upstream returned HTTP {status}: {reason}")]
    Upstream { status: u16, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PriceError {
    /// Whether the error is a configuration or parse problem that retrying
    /// on the next tick would not fix
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedResolution(_) | Self::InvalidDocument(_) | Self::UnknownCountry(_)
        )
    }
}

/// One hourly price, half-open `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price: Decimal,
}

impl PricePoint {
    /// Create a one hour point starting at `start`
    #[must_use]
    pub fn hourly(start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            start,
            end: start + Duration::hours(1),
            price,
        }
    }
}

/// Chronologically ordered hourly prices, at most [`MAX_SERIES_LEN`] long
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series from unordered points, keeping the newest entries
    #[must_use]
    pub fn from_points(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.start);
        if points.len() > MAX_SERIES_LEN {
            points.drain(..points.len() - MAX_SERIES_LEN);
        }
        Self { points }
    }

    #[must_use]
    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The trailing `n` points (all of them if the series is shorter)
    #[must_use]
    pub fn last_n(&self, n: usize) -> &[PricePoint] {
        &self.points[self.points.len().saturating_sub(n)..]
    }

    /// Point `n` positions from the end, `from_end(1)` being the newest
    #[must_use]
    pub fn from_end(&self, n: usize) -> Option<&PricePoint> {
        self.points.len().checked_sub(n).and_then(|i| self.points.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(hour: u32, price: i64) -> PricePoint {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour.into());
        PricePoint::hourly(start, Decimal::from(price))
    }

    #[test]
    fn test_from_points_sorts_by_start() {
        let series = PriceSeries::from_points(vec![point(2, 3), point(0, 1), point(1, 2)]);
        let prices: Vec<_> = series.points().iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![Decimal::from(1), Decimal::from(2), Decimal::from(3)]);
    }

    #[test]
    fn test_from_points_keeps_newest_48() {
        let points = (0..72).map(|h| point(h, i64::from(h))).collect();
        let series = PriceSeries::from_points(points);
        assert_eq!(series.len(), MAX_SERIES_LEN);
        assert_eq!(series.points()[0].price, Decimal::from(24));
        assert_eq!(series.from_end(1).unwrap().price, Decimal::from(71));
    }

    #[test]
    fn test_last_n_shorter_series() {
        let series = PriceSeries::from_points(vec![point(0, 1), point(1, 2)]);
        assert_eq!(series.last_n(5).len(), 2);
        assert!(series.from_end(3).is_none());
    }

    #[test]
    fn test_series_serializes_prices_as_strings() {
        let series = PriceSeries::from_points(vec![PricePoint::hourly(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Decimal::new(1234, 2),
        )]);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json[0]["price"], "12.34");
        let back: PriceSeries = serde_json::from_value(json).unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(PriceError::UnsupportedResolution("PT15M".into()).is_fatal());
        assert!(!PriceError::Upstream {
            status: 503,
            reason: "busy".into()
        }
        .is_fatal());
    }
}
