//! One cheapest contiguous "on" window per day

use super::settings::{self, SettingsErrors, INVALID_TYPE, NOT_NEGATIVE};
use super::Logic;
use crate::model::{CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use price_feed::PriceSeries;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_ON_HOURS: i64 = 4;
pub const DEFAULT_MIN_OFF_HOURS: i64 = 12;

/// Stored windows older than this are dropped
const RETENTION_DAYS: i64 = 7;

/// Chosen "on" window, stored as a `[start, end]` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(DateTime<Utc>, DateTime<Utc>)",
    into = "(DateTime<Utc>, DateTime<Utc>)"
)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Whether `[start, end)` comes within `gap` of this window on either side
    fn is_near(&self, start: DateTime<Utc>, end: DateTime<Utc>, gap: Duration) -> bool {
        start < self.end + gap && end > self.start - gap
    }
}

impl From<(DateTime<Utc>, DateTime<Utc>)> for Window {
    fn from((start, end): (DateTime<Utc>, DateTime<Utc>)) -> Self {
        Self { start, end }
    }
}

impl From<Window> for (DateTime<Utc>, DateTime<Utc>) {
    fn from(window: Window) -> Self {
        (window.start, window.end)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheapestHoursState {
    #[serde(default)]
    hours: Vec<Window>,
}

/// Pick the cheapest admissible window in the newest 24 hour horizon.
///
/// Returns `None` when a window already reaches into that horizon, when the
/// series is shorter than a day, or when no candidate fits.
pub fn choose_window(
    prices: &PriceSeries,
    existing: &[Window],
    on_hours: usize,
    min_off: Duration,
    now: DateTime<Utc>,
) -> Option<Window> {
    let horizon_start = prices.from_end(24)?.start;
    if existing.iter().any(|w| w.end > horizon_start) {
        return None;
    }

    let on_duration = i64::try_from(on_hours).ok().and_then(Duration::try_hours)?;
    let candidates = prices.last_n(23 + on_hours);
    let mut best: Option<(usize, Decimal)> = None;

    for offset in 0..candidates.len() {
        let start = candidates[offset].start;
        if start < now {
            continue;
        }
        if candidates.len() - offset < on_hours {
            break;
        }
        let end = start + on_duration;
        if existing.iter().any(|w| w.is_near(start, end, min_off)) {
            continue;
        }
        let total: Decimal = candidates[offset..offset + on_hours]
            .iter()
            .map(|p| p.price)
            .sum();
        if best.map_or(true, |(_, best_total)| total < best_total) {
            best = Some((offset, total));
        }
    }

    best.map(|(offset, _)| {
        let start = candidates[offset].start;
        Window {
            start,
            end: start + on_duration,
        }
    })
}

pub struct SimpleCheapestHours;

#[async_trait]
impl Logic for SimpleCheapestHours {
    fn output_keys(&self) -> &'static [&'static str] {
        &["power"]
    }

    async fn output_values(&mut self, node: &Node, ctx: &CycleContext) -> Ports {
        let state: CheapestHoursState = node.state_as();
        let on = state.hours.iter().any(|w| w.contains(ctx.now));
        Ports::from([("power".to_string(), json!(if on { 1 } else { 0 }))])
    }

    fn handle_updated_prices(&mut self, node: &mut Node, prices: &PriceSeries, ctx: &CycleContext) {
        let on_hours =
            settings::int_setting(&node.settings, "on_hours").unwrap_or(DEFAULT_ON_HOURS);
        let min_off_hours =
            settings::int_setting(&node.settings, "min_off_hours").unwrap_or(DEFAULT_MIN_OFF_HOURS);
        if !(1..=23).contains(&on_hours) || !(0..=23).contains(&min_off_hours) {
            tracing::warn!(
                "Node {} has out of range settings on_hours={} min_off_hours={}, skipping",
                node.id,
                on_hours,
                min_off_hours
            );
            return;
        }
        // Both bounded by the range check above
        let on_hours = on_hours as usize;
        let min_off = Duration::hours(min_off_hours);

        let retain_after = ctx.now - Duration::days(RETENTION_DAYS);
        let mut state: CheapestHoursState = node.state_as();
        state.hours.retain(|w| w.end >= retain_after);

        let Some(window) = choose_window(
            prices,
            &state.hours,
            on_hours,
            min_off,
            ctx.now,
        ) else {
            tracing::debug!("Node {}: no new cheapest window", node.id);
            node.replace_state(&state);
            return;
        };

        tracing::info!(
            "Node {} scheduled on from {} to {}",
            node.id,
            window.start,
            window.end
        );
        state.hours.push(window);
        node.replace_state(&state);
    }

    fn settings_errors(&self, candidate: &Settings, existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();

        let on_hours = settings::check_hours(
            &mut errors,
            candidate,
            existing,
            "on_hours",
            1,
            DEFAULT_ON_HOURS,
        )
        .unwrap_or(DEFAULT_ON_HOURS);

        match candidate.get("min_off_hours") {
            None => {
                if existing.is_none() {
                    settings::push_error(&mut errors, "min_off_hours", settings::REQUIRED);
                }
            }
            Some(value) => match value.as_i64() {
                None => settings::push_error(&mut errors, "min_off_hours", INVALID_TYPE),
                Some(min_off) if min_off < 0 => {
                    settings::push_error(&mut errors, "min_off_hours", NOT_NEGATIVE)
                }
                Some(min_off) => {
                    let on_hours = on_hours.clamp(0, 23);
                    if min_off > 23 - on_hours {
                        settings::push_error(
                            &mut errors,
                            "min_off_hours",
                            format!("Must be smaller than {}!", 24 - on_hours),
                        );
                    }
                }
            },
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::LogicKind;
    use chrono::TimeZone;
    use price_feed::PricePoint;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn series_from(first: DateTime<Utc>, prices: &[i64]) -> PriceSeries {
        PriceSeries::from_points(
            prices
                .iter()
                .enumerate()
                .map(|(i, p)| PricePoint::hourly(first + Duration::hours(i as i64), Decimal::from(*p)))
                .collect(),
        )
    }

    fn series(prices: &[i64]) -> PriceSeries {
        series_from(base(), prices)
    }

    fn ctx(now: DateTime<Utc>) -> CycleContext {
        CycleContext::new(now, chrono_tz::UTC)
    }

    fn node() -> Node {
        Node::new(1, "Boiler", LogicKind::SimpleCheapestHours)
            .with_settings(json!({"on_hours": 4, "min_off_hours": 12}))
    }

    #[test]
    fn test_chooses_cheapest_window() {
        let mut prices = vec![10; 24];
        prices[5..9].copy_from_slice(&[3, 2, 2, 3]);
        let window = choose_window(&series(&prices), &[], 4, Duration::hours(12), base()).unwrap();
        assert_eq!(window.start, base() + Duration::hours(5));
        assert_eq!(window.end, base() + Duration::hours(9));
    }

    #[test]
    fn test_chosen_sum_is_minimal_and_ties_pick_earliest() {
        let prices = [7, 3, 9, 1, 1, 8, 8, 2, 2, 5, 6, 4, 1, 1, 9, 9, 3, 3, 2, 2, 7, 7, 5, 5];
        let series = series(&prices);
        let window = choose_window(&series, &[], 4, Duration::hours(12), base()).unwrap();

        let offset = (window.start - base()).num_hours() as usize;
        let chosen: i64 = prices[offset..offset + 4].iter().sum();
        for start in 0..=20 {
            let other: i64 = prices[start..start + 4].iter().sum();
            assert!(chosen <= other, "window at {start} is cheaper");
            if other == chosen {
                assert!(offset <= start);
            }
        }
    }

    #[test]
    fn test_skips_windows_starting_in_the_past() {
        let mut prices = vec![10; 24];
        prices[0..4].copy_from_slice(&[1, 1, 1, 1]);
        let now = base() + Duration::minutes(30);
        let window = choose_window(&series(&prices), &[], 4, Duration::hours(12), now).unwrap();
        assert!(window.start >= now);
    }

    fn previous_window() -> Window {
        Window {
            start: base() - Duration::hours(4),
            end: base(),
        }
    }

    #[test]
    fn test_min_off_gap_allows_exact_spacing() {
        let mut prices = vec![10; 48];
        prices[36..40].copy_from_slice(&[1, 1, 1, 1]);
        let series = series_from(base() - Duration::hours(24), &prices);

        let window =
            choose_window(&series, &[previous_window()], 4, Duration::hours(12), base()).unwrap();
        assert_eq!(window.start, base() + Duration::hours(12));
    }

    #[test]
    fn test_min_off_gap_rejects_closer_windows() {
        let mut prices = vec![10; 48];
        prices[35..39].copy_from_slice(&[1, 1, 1, 1]);
        prices[40..44].copy_from_slice(&[2, 2, 2, 2]);
        let series = series_from(base() - Duration::hours(24), &prices);

        let window =
            choose_window(&series, &[previous_window()], 4, Duration::hours(12), base()).unwrap();
        assert_eq!(window.start, base() + Duration::hours(16));
    }

    #[test]
    fn test_short_series_is_ignored() {
        assert!(choose_window(&series(&[1; 23]), &[], 4, Duration::hours(12), base()).is_none());
    }

    #[test]
    fn test_handle_updated_prices_is_idempotent() {
        let mut prices = vec![10; 24];
        prices[10..14].copy_from_slice(&[1, 1, 1, 1]);
        let series = series(&prices);
        let ctx = ctx(base());
        let mut node = node();
        let mut logic = SimpleCheapestHours;

        logic.handle_updated_prices(&mut node, &series, &ctx);
        let first = node.state.clone();
        logic.handle_updated_prices(&mut node, &series, &ctx);

        assert_eq!(node.state, first);
        let state: CheapestHoursState = node.state_as();
        assert_eq!(state.hours.len(), 1);
        assert_eq!(state.hours[0].start, base() + Duration::hours(10));
    }

    #[test]
    fn test_prunes_windows_older_than_a_week() {
        let mut node = node();
        let old = Window {
            start: base() - Duration::days(9),
            end: base() - Duration::days(9) + Duration::hours(4),
        };
        node.replace_state(&CheapestHoursState { hours: vec![old] });

        SimpleCheapestHours.handle_updated_prices(&mut node, &series(&[5; 24]), &ctx(base()));
        let state: CheapestHoursState = node.state_as();
        assert_eq!(state.hours.len(), 1);
        assert_ne!(state.hours[0], old);
    }

    #[test]
    fn test_prunes_even_when_horizon_is_covered() {
        let mut node = node();
        let old = Window {
            start: base() - Duration::days(9),
            end: base() - Duration::days(9) + Duration::hours(4),
        };
        let recent = Window {
            start: base() + Duration::hours(20),
            end: base() + Duration::hours(24),
        };
        node.replace_state(&CheapestHoursState { hours: vec![old, recent] });

        SimpleCheapestHours.handle_updated_prices(&mut node, &series(&[5; 24]), &ctx(base()));
        let state: CheapestHoursState = node.state_as();
        assert_eq!(state.hours, vec![recent]);
    }

    #[test]
    fn test_out_of_range_settings_are_skipped() {
        let series = series(&[5; 24]);
        for settings in [
            json!({"on_hours": 1_000_000_000_000_000_i64, "min_off_hours": 12}),
            json!({"on_hours": 4, "min_off_hours": 1_000_000_000_000_000_i64}),
            json!({"on_hours": 0, "min_off_hours": 12}),
        ] {
            let mut node = node().with_settings(settings);
            SimpleCheapestHours.handle_updated_prices(&mut node, &series, &ctx(base()));
            assert!(node.state.is_empty());
        }

        assert!(choose_window(&series, &[], usize::MAX, Duration::hours(12), base()).is_none());
        assert!(choose_window(&series, &[], 1 << 60, Duration::hours(12), base()).is_none());
    }

    #[tokio::test]
    async fn test_output_power_inside_window() {
        let mut node = node();
        node.replace_state(&CheapestHoursState {
            hours: vec![Window {
                start: base(),
                end: base() + Duration::hours(4),
            }],
        });
        let mut logic = SimpleCheapestHours;

        let inside = logic.output_values(&node, &ctx(base() + Duration::hours(4))).await;
        assert_eq!(inside["power"], json!(1));
        let outside = logic.output_values(&node, &ctx(base() + Duration::hours(5))).await;
        assert_eq!(outside["power"], json!(0));
    }

    #[test]
    fn test_settings_errors() {
        let logic = SimpleCheapestHours;
        let candidate = json!({"on_hours": 20, "min_off_hours": 5});
        let errors = logic.settings_errors(candidate.as_object().unwrap(), None);
        assert_eq!(errors["min_off_hours"], vec!["Must be smaller than 4!"]);

        let candidate = json!({"on_hours": 0});
        let errors = logic.settings_errors(candidate.as_object().unwrap(), None);
        assert_eq!(errors["on_hours"], vec![settings::AT_LEAST_ONE]);
        assert_eq!(errors["min_off_hours"], vec![settings::REQUIRED]);

        let candidate = json!({"min_off_hours": -1});
        let existing = json!({"on_hours": 4});
        let errors = logic.settings_errors(candidate.as_object().unwrap(), existing.as_object());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["min_off_hours"], vec![NOT_NEGATIVE]);
    }
}
