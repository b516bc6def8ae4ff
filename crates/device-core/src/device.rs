//! Device actuation capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unable to connect to {device}: {reason}")]
    Connect { device: String, reason: String },

    #[error("Authentication failed for {0}")]
    Auth(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device reported an error: {0}")]
    Command(String),

    #[error("No transport configured for {0}")]
    NoTransport(&'static str),

    #[error("Missing or invalid setting: {0}")]
    Settings(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Credentials for a smart plug on the local network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugCredentials {
    pub ip: String,
    pub username: String,
    pub password: String,
}

/// Credentials for a cloud account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub username: String,
    pub password: String,
}

/// Opens sessions to smart plugs
#[async_trait]
pub trait PlugConnector: Send + Sync {
    /// Handshake and log in to the plug
    async fn connect(&self, credentials: &PlugCredentials)
        -> Result<Box<dyn PlugSession>, DeviceError>;
}

/// An open session to one smart plug
#[async_trait]
pub trait PlugSession: Send {
    /// Current relay state
    async fn is_on(&mut self) -> Result<bool, DeviceError>;

    /// Switch the relay
    async fn set_on(&mut self, on: bool) -> Result<(), DeviceError>;
}

/// Snapshot of an air-to-air heat pump as reported by its cloud service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatPumpDevice {
    pub device_id: i64,
    pub building_id: i64,
    pub name: String,
    pub power: Option<bool>,
    pub room_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
}

/// Opens sessions to a heat pump cloud account
#[async_trait]
pub trait HeatPumpConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &CloudCredentials,
    ) -> Result<Box<dyn HeatPumpSession>, DeviceError>;
}

/// An authenticated session listing and controlling heat pumps
#[async_trait]
pub trait HeatPumpSession: Send {
    /// All air-to-air devices visible to the account
    async fn devices(&mut self) -> Result<Vec<HeatPumpDevice>, DeviceError>;

    /// Switch a device on or off
    async fn set_power(&mut self, device: &HeatPumpDevice, power: bool)
        -> Result<(), DeviceError>;

    /// First device whose name matches, ignoring case
    async fn find_device(&mut self, name: &str) -> Result<Option<HeatPumpDevice>, DeviceError> {
        let name = name.to_lowercase();
        Ok(self
            .devices()
            .await?
            .into_iter()
            .find(|d| d.name.to_lowercase() == name))
    }
}

/// The set of transports available to device-backed logics
#[derive(Clone, Default)]
pub struct DeviceDrivers {
    pub plugs: Option<Arc<dyn PlugConnector>>,
    pub heat_pumps: Option<Arc<dyn HeatPumpConnector>>,
}

impl DeviceDrivers {
    pub fn with_plugs(mut self, connector: Arc<dyn PlugConnector>) -> Self {
        self.plugs = Some(connector);
        self
    }

    pub fn with_heat_pumps(mut self, connector: Arc<dyn HeatPumpConnector>) -> Self {
        self.heat_pumps = Some(connector);
        self
    }
}

impl std::fmt::Debug for DeviceDrivers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDrivers")
            .field("plugs", &self.plugs.is_some())
            .field("heat_pumps", &self.heat_pumps.is_some())
            .finish()
    }
}
