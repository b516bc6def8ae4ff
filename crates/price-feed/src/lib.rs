//! Day-ahead electricity price feed for epower
//!
//! Fetches hourly day-ahead prices from the ENTSO-E transparency platform and
//! turns them into an ordered [`PriceSeries`].

pub mod client;
pub mod document;
pub mod types;

pub use client::{bidding_zone, EntsoeClient, PriceSource};
pub use document::parse_day_ahead_prices;
pub use types::{PriceError, PricePoint, PriceSeries, MAX_SERIES_LEN};
