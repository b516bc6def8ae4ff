//! Data models for the node graph

use crate::logic::LogicKind;
use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Node identifier
pub type NodeId = u64;

/// Free-form node settings, validated per logic
pub type Settings = serde_json::Map<String, Value>;

/// Persisted per-node state, owned by the node's logic
pub type NodeState = serde_json::Map<String, Value>;

/// Values on a node's named inputs or outputs
pub type Ports = BTreeMap<String, Value>;

/// A vertex in the automation graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Behaviour bound to this node
    pub logic: LogicKind,
    /// Logic-specific settings
    #[serde(default)]
    pub settings: Settings,
    /// State loaded from the state store for the current cycle
    #[serde(skip)]
    pub state: NodeState,
}

impl Node {
    /// Create a node with empty settings and state
    pub fn new(id: NodeId, name: impl Into<String>, logic: LogicKind) -> Self {
        Self {
            id,
            name: name.into(),
            logic,
            settings: Settings::new(),
            state: NodeState::new(),
        }
    }

    /// Builder-style settings assignment
    #[must_use]
    pub fn with_settings(mut self, settings: Value) -> Self {
        if let Value::Object(map) = settings {
            self.settings = map;
        }
        self
    }

    /// Decode the state into a typed view, falling back to the default when
    /// the stored shape does not match
    pub fn state_as<T: DeserializeOwned + Default>(&self) -> T {
        match serde_json::from_value(Value::Object(self.state.clone())) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Ignoring unreadable state of node {}: {}", self.id, e);
                T::default()
            }
        }
    }

    /// Replace the whole state with a typed value
    pub fn replace_state<T: Serialize>(&mut self, state: &T) {
        match serde_json::to_value(state) {
            Ok(Value::Object(map)) => self.state = map,
            Ok(other) => tracing::warn!("Node {} state is not an object: {}", self.id, other),
            Err(e) => tracing::warn!("Failed to encode state of node {}: {}", self.id, e),
        }
    }

    /// Raw state value under `key`, `Null` when absent
    pub fn state_value(&self, key: &str) -> Value {
        self.state.get(key).cloned().unwrap_or(Value::Null)
    }
}

/// Directed edge from one node's output to another node's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: u64,
    pub source: NodeId,
    pub source_key: String,
    pub dest: NodeId,
    pub dest_key: String,
}

/// A stored `(start, end, active)` interval, serialized as a JSON triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(DateTime<Utc>, DateTime<Utc>, bool)",
    into = "(DateTime<Utc>, DateTime<Utc>, bool)"
)]
pub struct ScheduleRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub active: bool,
}

impl ScheduleRange {
    /// Whether `instant` lies within the range, both edges included
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

impl From<(DateTime<Utc>, DateTime<Utc>, bool)> for ScheduleRange {
    fn from((start, end, active): (DateTime<Utc>, DateTime<Utc>, bool)) -> Self {
        Self { start, end, active }
    }
}

impl From<ScheduleRange> for (DateTime<Utc>, DateTime<Utc>, bool) {
    fn from(range: ScheduleRange) -> Self {
        (range.start, range.end, range.active)
    }
}

/// Ambient values shared by every logic callback in one cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Instant the cycle treats as "now"
    pub now: DateTime<Utc>,
    /// Zone for wall-clock and calendar-day decisions
    pub timezone: Tz,
}

impl CycleContext {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self { now, timezone }
    }

    /// "Now" truncated to the start of its hour
    pub fn current_hour(&self) -> DateTime<Utc> {
        self.now
            .duration_trunc(Duration::hours(1))
            .unwrap_or(self.now)
    }
}

/// Loose truthiness used for port values (null, false, 0, "" and empty
/// containers are false)
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
