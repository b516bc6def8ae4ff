//! Mitsubishi air-to-air heat pump through MELCloud

use super::settings::{self, SettingsErrors, StringFormat};
use super::Logic;
use crate::model::{is_truthy, CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use device_core::{
    CloudCredentials, DeviceError, HeatPumpConnector, HeatPumpDevice, HeatPumpSession,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Temperatures read once per cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Reading {
    room: Option<f64>,
    target: Option<f64>,
}

pub struct MelCloud {
    connector: Option<Arc<dyn HeatPumpConnector>>,
    reading: Option<Reading>,
}

impl MelCloud {
    pub fn new(connector: Option<Arc<dyn HeatPumpConnector>>) -> Self {
        Self {
            connector,
            reading: None,
        }
    }

    /// Log in and look up the device named in the node settings
    async fn open_device(
        &self,
        node: &Node,
    ) -> Result<(Box<dyn HeatPumpSession>, HeatPumpDevice), DeviceError> {
        let connector = self
            .connector
            .as_ref()
            .ok_or(DeviceError::NoTransport("MELCloud"))?;
        let read = |key: &str| {
            settings::str_setting(&node.settings, key)
                .map(str::to_string)
                .ok_or_else(|| DeviceError::Settings(key.to_string()))
        };
        let name = read("name")?;
        let credentials = CloudCredentials {
            username: read("username")?,
            password: read("password")?,
        };

        let mut session = connector.connect(&credentials).await?;
        match session.find_device(&name).await? {
            Some(device) => Ok((session, device)),
            None => Err(DeviceError::NotFound(name)),
        }
    }

    async fn read_temperatures(&self, node: &Node) -> Reading {
        match self.open_device(node).await {
            Ok((_, device)) => Reading {
                room: device.room_temperature,
                target: device.target_temperature,
            },
            Err(e) => {
                tracing::warn!("Failed to read heat pump of node {}: {}", node.id, e);
                Reading::default()
            }
        }
    }
}

#[async_trait]
impl Logic for MelCloud {
    fn input_keys(&self) -> &'static [&'static str] {
        &["power"]
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &["room temperature", "target temperature"]
    }

    async fn output_values(&mut self, node: &Node, _ctx: &CycleContext) -> Ports {
        let reading = match self.reading {
            Some(reading) => reading,
            None => {
                let reading = self.read_temperatures(node).await;
                self.reading = Some(reading);
                reading
            }
        };
        Ports::from([
            ("room temperature".to_string(), json!(reading.room)),
            ("target temperature".to_string(), json!(reading.target)),
        ])
    }

    fn handle_inputs_changed(&mut self, node: &mut Node, inputs: &Ports, _ctx: &CycleContext) {
        let power = inputs.get("power").is_some_and(is_truthy);
        node.state.clear();
        node.state.insert("power".to_string(), Value::Bool(power));
    }

    async fn apply_state_to_devices(
        &mut self,
        node: &Node,
        _ctx: &CycleContext,
    ) -> Result<(), DeviceError> {
        let Value::Bool(power) = node.state_value("power") else {
            return Ok(());
        };
        let (mut session, device) = self.open_device(node).await?;
        if device.power != Some(power) {
            session.set_power(&device, power).await?;
        }
        Ok(())
    }

    fn settings_errors(&self, candidate: &Settings, existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();
        settings::check_string(&mut errors, candidate, existing, "name", StringFormat::Any);
        settings::check_string(&mut errors, candidate, existing, "username", StringFormat::Email);
        settings::check_string(&mut errors, candidate, existing, "password", StringFormat::Any);
        errors
    }
}
