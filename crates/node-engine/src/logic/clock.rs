//! Wall-clock time window

use super::settings::{self, SettingsErrors, StringFormat};
use super::Logic;
use crate::model::{CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use serde_json::json;

pub struct Clock;

/// Parse `HH:MM`, also accepting `HH:MM:SS` (seconds are dropped)
fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
        .and_then(|t| t.with_second(0))
}

/// Whether `now` lies in `[start, end)`, wrapping past midnight when
/// `start > end`. An empty window never matches.
fn in_window(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if start < end {
        start <= now && now < end
    } else if start > end {
        start <= now || now < end
    } else {
        false
    }
}

#[async_trait]
impl Logic for Clock {
    fn output_keys(&self) -> &'static [&'static str] {
        &["power"]
    }

    async fn output_values(&mut self, node: &Node, ctx: &CycleContext) -> Ports {
        let window = settings::str_setting(&node.settings, "start")
            .zip(settings::str_setting(&node.settings, "end"))
            .and_then(|(start, end)| parse_time(start).zip(parse_time(end)));

        let on = match window {
            Some((start, end)) => {
                let local = ctx.now.with_timezone(&ctx.timezone).time();
                let minute = local.with_second(0).and_then(|t| t.with_nanosecond(0));
                minute.is_some_and(|now| in_window(start, end, now))
            }
            None => false,
        };
        Ports::from([("power".to_string(), json!(if on { 1 } else { 0 }))])
    }

    fn settings_errors(&self, candidate: &Settings, existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();
        for field in ["start", "end"] {
            settings::check_string(&mut errors, candidate, existing, field, StringFormat::TimeOfDay);
        }
        errors
    }
}
