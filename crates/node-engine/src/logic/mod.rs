//! Logic variants and the registry that binds them to nodes
//!
//! Every node names one [`LogicKind`]. At the start of a cycle the registry
//! builds a fresh [`Logic`] instance per node; that instance lives until the
//! cycle ends, so short-lived caches (like a heat pump reading) are shared by
//! the price, propagation and actuation phases but never persisted.

mod and;
mod clock;
mod melcloud;
mod price_based_on_off;
mod select_value;
pub mod settings;
mod simple_cheapest_hours;
mod tapo_p100;

pub use and::And;
pub use clock::Clock;
pub use melcloud::MelCloud;
pub use price_based_on_off::{plan_ranges, Bounds, PriceBasedOnOff};
pub use select_value::SelectValue;
pub use settings::SettingsErrors;
pub use simple_cheapest_hours::{choose_window, SimpleCheapestHours, Window};
pub use tapo_p100::TapoP100;

use crate::error::EngineError;
use crate::model::{CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use device_core::{DeviceDrivers, DeviceError};
use price_feed::PriceSeries;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Behaviour of a node. Every method has a no-op default.
#[async_trait]
pub trait Logic: Send + Sync {
    /// Names of the inputs this logic reads
    fn input_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Names of the outputs this logic emits
    fn output_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Current outputs. Called on every propagation pass, so it must not
    /// change node state.
    async fn output_values(&mut self, _node: &Node, _ctx: &CycleContext) -> Ports {
        Ports::new()
    }

    /// Called with the complete input mapping whenever it differs from the
    /// previous pass
    fn handle_inputs_changed(&mut self, _node: &mut Node, _inputs: &Ports, _ctx: &CycleContext) {}

    /// Called once per cycle when a new, different price series arrives
    fn handle_updated_prices(
        &mut self,
        _node: &mut Node,
        _prices: &PriceSeries,
        _ctx: &CycleContext,
    ) {
    }

    /// Push the node's state out to physical devices
    async fn apply_state_to_devices(
        &mut self,
        _node: &Node,
        _ctx: &CycleContext,
    ) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Validate candidate settings. `existing` holds the current settings of
    /// the node being edited and is `None` when a node is being created.
    fn settings_errors(&self, _settings: &Settings, _existing: Option<&Settings>) -> SettingsErrors {
        SettingsErrors::new()
    }
}

/// Stable identifiers of the available logic variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogicKind {
    SimpleCheapestHours,
    PriceBasedOnOff,
    Clock,
    SelectValue,
    And,
    TapoP100,
    MelCloud,
}

/// Field metadata shown to whoever edits node settings
#[derive(Debug, Clone, Serialize)]
pub struct SettingsField {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl SettingsField {
    const fn new(name: &'static str, field_type: &'static str, label: &'static str) -> Self {
        Self {
            name,
            field_type,
            label,
            min: None,
            max: None,
        }
    }

    const fn ranged(
        name: &'static str,
        label: &'static str,
        min: i64,
        max: i64,
    ) -> Self {
        Self {
            name,
            field_type: "integer",
            label,
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Descriptive information about a logic variant
#[derive(Debug, Clone, Serialize)]
pub struct LogicDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub settings_fields: &'static [SettingsField],
    pub input_keys: &'static [&'static str],
    pub output_keys: &'static [&'static str],
}

/// One row of the registry table
struct RegistryEntry {
    kind: LogicKind,
    key: &'static str,
    aliases: &'static [&'static str],
    name: &'static str,
    description: &'static str,
    settings_fields: &'static [SettingsField],
}

const HOURS_FIELDS_SIMPLE: &[SettingsField] = &[
    SettingsField::ranged("on_hours", "\"On\" state length (h)", 1, 23),
    SettingsField::ranged("min_off_hours", "Minimum time in \"off\" state (h)", 0, 23),
];

const HOURS_FIELDS_ON_OFF: &[SettingsField] = &[
    SettingsField::ranged("min_on_hours", "\"On\" state minimum length (h)", 1, 23),
    SettingsField::ranged("max_on_hours", "\"On\" state maximum length (h)", 1, 23),
    SettingsField::ranged("min_off_hours", "\"Off\" state minimum length (h)", 1, 23),
    SettingsField::ranged("max_off_hours", "\"Off\" state maximum length (h)", 1, 23),
];

const CLOCK_FIELDS: &[SettingsField] = &[
    SettingsField::new("start", "time", "Start time"),
    SettingsField::new("end", "time", "End time"),
];

const SELECT_VALUE_FIELDS: &[SettingsField] = &[
    SettingsField::new("value_on", "integer", "Output when input is on"),
    SettingsField::new("value_off", "integer", "Output when input is off"),
];

const TAPO_FIELDS: &[SettingsField] = &[
    SettingsField::new("ip", "string", "IP address"),
    SettingsField::new("username", "string", "Username (e-mail)"),
    SettingsField::new("password", "password", "Password"),
];

const MELCLOUD_FIELDS: &[SettingsField] = &[
    SettingsField::new("name", "string", "Device name"),
    SettingsField::new("username", "string", "Username (e-mail)"),
    SettingsField::new("password", "password", "Password"),
];

/// The allow-list of logic variants, in `LogicKind` declaration order
static REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        kind: LogicKind::SimpleCheapestHours,
        key: "simple_cheapest_hours",
        aliases: &[
            "nodes.logics.SimpleCheapestHours",
            "nodes.logics.simple_cheapest_hours.SimpleCheapestHours",
        ],
        name: "Simple cheapest hours",
        description: "Emits signal during the cheapest hours of the day.",
        settings_fields: HOURS_FIELDS_SIMPLE,
    },
    RegistryEntry {
        kind: LogicKind::PriceBasedOnOff,
        key: "price_based_on_off",
        aliases: &["nodes.logics.price_based_on_off.PriceBasedOnOff"],
        name: "Price based on/off",
        description: "You set the minimum and maximum on and off hours. This logic will \
                      start and stop emitting signal depending the electricity price.",
        settings_fields: HOURS_FIELDS_ON_OFF,
    },
    RegistryEntry {
        kind: LogicKind::Clock,
        key: "clock",
        aliases: &["nodes.logics.Clock", "nodes.logics.clock.Clock"],
        name: "Clock",
        description: "Simple clock that emits signal during a specific time frame.",
        settings_fields: CLOCK_FIELDS,
    },
    RegistryEntry {
        kind: LogicKind::SelectValue,
        key: "select_value",
        aliases: &["nodes.logics.select_value.SelectValue"],
        name: "Select value",
        description: "Outputs one of two values, based on input.",
        settings_fields: SELECT_VALUE_FIELDS,
    },
    RegistryEntry {
        kind: LogicKind::And,
        key: "and",
        aliases: &["nodes.logics.and.And"],
        name: "AND port",
        description: "If all inputs are considered true, then returns last of them. \
                      Otherwise returns first input that is considered as false.",
        settings_fields: &[],
    },
    RegistryEntry {
        kind: LogicKind::TapoP100,
        key: "tapo_p100",
        aliases: &["nodes.logics.TapoP100", "nodes.logics.tapo_p100.TapoP100"],
        name: "Tapo P100",
        description: "Controls Tapo smart plugs",
        settings_fields: TAPO_FIELDS,
    },
    RegistryEntry {
        kind: LogicKind::MelCloud,
        key: "melcloud",
        aliases: &["nodes.logics.MelCloud", "nodes.logics.melcloud.MelCloud"],
        name: "Mitsubishi air-to-air heat pump",
        description: "Controls Mitsubishi air-to-air heat pumps. Also gets room and target \
                      temperatures from them.",
        settings_fields: MELCLOUD_FIELDS,
    },
];

impl LogicKind {
    fn entry(self) -> &'static RegistryEntry {
        &REGISTRY[self as usize]
    }

    /// All registered variants, in registry order
    pub fn all() -> impl Iterator<Item = LogicKind> {
        REGISTRY.iter().map(|entry| entry.kind)
    }

    /// Stable storage key
    pub fn key(self) -> &'static str {
        self.entry().key
    }

    /// Build a fresh logic instance for one cycle
    pub fn instantiate(self, drivers: &DeviceDrivers) -> Box<dyn Logic> {
        match self {
            LogicKind::SimpleCheapestHours => Box::new(SimpleCheapestHours),
            LogicKind::PriceBasedOnOff => Box::new(PriceBasedOnOff),
            LogicKind::Clock => Box::new(Clock),
            LogicKind::SelectValue => Box::new(SelectValue),
            LogicKind::And => Box::new(And),
            LogicKind::TapoP100 => Box::new(TapoP100::new(drivers.plugs.clone())),
            LogicKind::MelCloud => Box::new(MelCloud::new(drivers.heat_pumps.clone())),
        }
    }

    /// Name, description and settings metadata
    pub fn descriptor(self) -> LogicDescriptor {
        let entry = self.entry();
        let logic = self.instantiate(&DeviceDrivers::default());
        LogicDescriptor {
            key: entry.key,
            name: entry.name,
            description: entry.description,
            settings_fields: entry.settings_fields,
            input_keys: logic.input_keys(),
            output_keys: logic.output_keys(),
        }
    }
}

impl FromStr for LogicKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .iter()
            .find(|entry| entry.key == s || entry.aliases.contains(&s))
            .map(|entry| entry.kind)
            .ok_or_else(|| EngineError::UnknownLogic(s.to_string()))
    }
}

impl TryFrom<String> for LogicKind {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicKind> for String {
    fn from(kind: LogicKind) -> Self {
        kind.key().to_string()
    }
}

impl fmt::Display for LogicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Validate settings for a logic without a node instance.
///
/// Pass `existing` when editing a node; required fields are only enforced for
/// new nodes.
pub fn validate_settings(
    kind: LogicKind,
    settings: &Settings,
    existing: Option<&Settings>,
) -> Result<(), EngineError> {
    let errors = kind
        .instantiate(&DeviceDrivers::default())
        .settings_errors(settings, existing);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidSettings(errors))
    }
}
