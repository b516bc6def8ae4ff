//! ENTSO-E day-ahead price document parsing

use crate::types::{PriceError, PricePoint};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// The only period resolution the scheduling logics understand
pub const HOURLY_RESOLUTION: &str = "PT60M";

/// Parse a publication document into hourly points, in document order.
///
/// An acknowledgement document (the upstream's "no data" answer) yields no
/// points.
pub fn parse_day_ahead_prices(xml: &str) -> Result<Vec<PricePoint>, PriceError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| PriceError::InvalidDocument(e.to_string()))?;

    let root = doc.root_element();
    if root.tag_name().name() == "Acknowledgement_MarketDocument" {
        let reason = descendant_text(root, "text").unwrap_or("no reason given");
        tracing::warn!("Price source returned no data: {}", reason);
        return Ok(Vec::new());
    }

    let mut points = Vec::new();
    for period in root
        .descendants()
        .filter(|n| n.tag_name().name() == "Period")
    {
        let start_text = descendant_text(period, "start")
            .ok_or_else(|| PriceError::InvalidDocument("Period without start".to_string()))?;
        let period_start = parse_timestamp(start_text)?;

        let resolution = descendant_text(period, "resolution").unwrap_or_default();
        if resolution != HOURLY_RESOLUTION {
            return Err(PriceError::UnsupportedResolution(resolution.to_string()));
        }

        for (hour, point) in period
            .children()
            .filter(|n| n.tag_name().name() == "Point")
            .enumerate()
        {
            let amount = descendant_text(point, "price.amount").ok_or_else(|| {
                PriceError::InvalidDocument(format!("Point {hour} without price.amount"))
            })?;
            let price = Decimal::from_str(amount.trim()).map_err(|e| {
                PriceError::InvalidDocument(format!("Invalid price {amount:?}: {e}"))
            })?;
            let start = period_start + Duration::hours(hour as i64);
            points.push(PricePoint {
                start,
                end: start + Duration::hours(1),
                price,
            });
        }
    }

    Ok(points)
}

/// Text of the first descendant element with the given local name
fn descendant_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
}

/// Parse upstream timestamps, which omit seconds (e.g. "2024-01-01T23:00Z")
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PriceError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
        .map(|naive| naive.and_utc())
        .map_err(|_| PriceError::InvalidDocument(format!("Invalid timestamp: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Publication_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:0">
  <mRID>abc</mRID>
  <TimeSeries>
    <Period>
      <timeInterval>
        <start>2024-01-01T23:00Z</start>
        <end>2024-01-02T02:00Z</end>
      </timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><price.amount>10.50</price.amount></Point>
      <Point><position>2</position><price.amount>-1.25</price.amount></Point>
      <Point><position>3</position><price.amount>7</price.amount></Point>
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#;

    #[test]
    fn test_parse_points() {
        let points = parse_day_ahead_prices(DOCUMENT).unwrap();
        assert_eq!(points.len(), 3);

        let first_start = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        assert_eq!(points[0].start, first_start);
        assert_eq!(points[0].end, first_start + Duration::hours(1));
        assert_eq!(points[0].price, Decimal::new(1050, 2));
        assert_eq!(points[1].price, Decimal::new(-125, 2));
        assert_eq!(points[2].start, first_start + Duration::hours(2));
    }

    #[test]
    fn test_unsupported_resolution_is_fatal() {
        let xml = DOCUMENT.replace("PT60M", "PT15M");
        let err = parse_day_ahead_prices(&xml).unwrap_err();
        assert!(matches!(err, PriceError::UnsupportedResolution(ref r) if r == "PT15M"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_acknowledgement_yields_no_points() {
        let xml = r#"<Acknowledgement_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-1:acknowledgementdocument:7:0">
  <Reason><code>999</code><text>No matching data found</text></Reason>
</Acknowledgement_MarketDocument>"#;
        assert!(parse_day_ahead_prices(xml).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_day_ahead_prices("<Publication_MarketDocument>").unwrap_err();
        assert!(matches!(err, PriceError::InvalidDocument(_)));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 30, 23, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-30T23:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-31T01:00:00+02:00").unwrap(), expected);
    }
}
