//! Alternating on/off ranges that minimise the average price

use super::settings::{self, SettingsErrors, MIN_OVER_MAX};
use super::Logic;
use crate::model::{CycleContext, Node, NodeState, Ports, ScheduleRange, Settings};
use async_trait::async_trait;
use chrono::Duration;
use price_feed::{PricePoint, PriceSeries};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback for absent fields during validation
const DEFAULT_HOURS: i64 = 4;

const RETENTION_DAYS: i64 = 7;

/// Allowed range lengths in hours for each state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_on: usize,
    pub max_on: usize,
    pub min_off: usize,
    pub max_off: usize,
}

impl Bounds {
    /// Read bounds from node settings. Every bound must be present and at
    /// least one.
    fn from_settings(settings: &Settings) -> Option<Self> {
        let read = |key| {
            settings::int_setting(settings, key)
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v >= 1)
        };
        Some(Self {
            min_on: read("min_on_hours")?,
            max_on: read("max_on_hours")?,
            min_off: read("min_off_hours")?,
            max_off: read("max_off_hours")?,
        })
    }

    fn for_state(&self, on: bool) -> (usize, usize) {
        if on {
            (self.min_on, self.max_on)
        } else {
            (self.min_off, self.max_off)
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnOffState {
    #[serde(default)]
    ranges: Vec<ScheduleRange>,
    #[serde(flatten)]
    other: NodeState,
}

/// Exhaustive depth-first search over range lengths
struct Search {
    bounds: Bounds,
    best: Option<(Decimal, Vec<ScheduleRange>)>,
}

impl Search {
    fn explore(
        &mut self,
        prices: &[PricePoint],
        ranges: &mut Vec<ScheduleRange>,
        price_sum: Decimal,
        next_state: bool,
    ) {
        let (range_min, range_max) = self.bounds.for_state(next_state);

        if prices.is_empty() || prices.len() < range_min {
            self.score(prices, ranges, price_sum, next_state, range_min);
            return;
        }

        for length in range_min..=range_max {
            if prices.len() < length {
                return;
            }
            let (taken, rest) = prices.split_at(length);
            let mut new_sum = price_sum;
            if next_state {
                new_sum += taken.iter().map(|p| p.price).sum::<Decimal>();
            }
            ranges.push(ScheduleRange {
                start: taken[0].start,
                end: taken[length - 1].end,
                active: next_state,
            });
            self.explore(rest, ranges, new_sum, !next_state);
            ranges.pop();
        }
    }

    /// Score a complete combination. A trailing remainder too short for the
    /// next state still counts towards the hours, and towards the price when
    /// that state is "on".
    fn score(
        &mut self,
        remainder: &[PricePoint],
        ranges: &[ScheduleRange],
        mut price_sum: Decimal,
        next_state: bool,
        range_min: usize,
    ) {
        let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
            return;
        };

        let seconds = (last.end - first.start).num_seconds();
        let mut hours = (seconds + 1800).div_euclid(3600);
        if remainder.len() < range_min {
            hours += remainder.len() as i64;
            if next_state {
                price_sum += remainder.iter().map(|p| p.price).sum::<Decimal>();
            }
        }
        if hours <= 0 {
            return;
        }

        let average = price_sum / Decimal::from(hours);
        if self.best.as_ref().map_or(true, |(best, _)| average < *best) {
            self.best = Some((average, ranges.to_vec()));
        }
    }
}

/// Find the cheapest alternating partition of `prices`, starting with
/// `initial_state`.
///
/// Returns `None` when not even one range fits.
pub fn plan_ranges(
    prices: &[PricePoint],
    initial_state: bool,
    bounds: Bounds,
) -> Option<Vec<ScheduleRange>> {
    let mut search = Search { bounds, best: None };
    search.explore(prices, &mut Vec::new(), Decimal::ZERO, initial_state);
    search.best.map(|(_, ranges)| ranges)
}

pub struct PriceBasedOnOff;

#[async_trait]
impl Logic for PriceBasedOnOff {
    fn output_keys(&self) -> &'static [&'static str] {
        &["power"]
    }

    async fn output_values(&mut self, node: &Node, ctx: &CycleContext) -> Ports {
        let state: OnOffState = node.state_as();
        let power = match state.ranges.last() {
            None => true,
            Some(last) => state
                .ranges
                .iter()
                .find(|r| r.contains(ctx.now))
                .map_or(!last.active, |r| r.active),
        };
        Ports::from([("power".to_string(), Value::Bool(power))])
    }

    fn handle_updated_prices(&mut self, node: &mut Node, prices: &PriceSeries, ctx: &CycleContext) {
        let Some(bounds) = Bounds::from_settings(&node.settings) else {
            tracing::debug!("Node {} is missing on/off bounds", node.id);
            return;
        };

        let retain_after = ctx.now - Duration::days(RETENTION_DAYS);
        let mut state: OnOffState = node.state_as();
        state.ranges.retain(|r| r.end >= retain_after);

        let mut resume_at = ctx.current_hour();
        let mut initial_state = true;
        if let Some(last) = state.ranges.last() {
            resume_at = resume_at.max(last.end);
            initial_state = !last.active;
        }

        let points = prices.points();
        let first_future = points
            .iter()
            .position(|p| p.end > resume_at)
            .unwrap_or(points.len());

        if let Some(planned) = plan_ranges(&points[first_future..], initial_state, bounds) {
            tracing::info!(
                "Node {} planned {} ranges from {}",
                node.id,
                planned.len(),
                resume_at
            );
            state.ranges.extend(planned);
        }

        node.replace_state(&state);
    }

    fn settings_errors(&self, candidate: &Settings, existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();
        let mut check = |field| {
            settings::check_hours(&mut errors, candidate, existing, field, 1, DEFAULT_HOURS)
        };

        let min_on = check("min_on_hours");
        let max_on = check("max_on_hours");
        let min_off = check("min_off_hours");
        let max_off = check("max_off_hours");

        for (min, max, field) in [
            (min_on, max_on, "max_on_hours"),
            (min_off, max_off, "max_off_hours"),
        ] {
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    errors.insert(field.to_string(), vec![MIN_OVER_MAX.to_string()]);
                }
            }
        }

        errors
    }
}
