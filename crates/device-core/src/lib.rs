//! Device actuation layer for epower
//!
//! Defines the connector/session traits that device-backed logics use to
//! read and switch physical devices, plus the MELCloud heat pump client and
//! the Tapo P100 plug transport.

pub mod device;
pub mod melcloud;
pub mod tplink;

pub use device::{
    CloudCredentials, DeviceDrivers, DeviceError, HeatPumpConnector, HeatPumpDevice,
    HeatPumpSession, PlugConnector, PlugCredentials, PlugSession,
};
pub use melcloud::MelCloudConnector;
pub use tplink::TapoConnector;
