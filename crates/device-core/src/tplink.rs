//! TP-Link Tapo P100 smart plug transport

use crate::device::{DeviceError, PlugConnector, PlugCredentials, PlugSession};
use async_trait::async_trait;
use std::fmt::Display;
use tapo::{ApiClient, PlugHandler};

/// Connector that performs the Tapo handshake for every session
#[derive(Debug, Clone, Copy, Default)]
pub struct TapoConnector;

impl TapoConnector {
    pub fn new() -> Self {
        Self
    }
}

fn connect_error(ip: &str, reason: impl Display) -> DeviceError {
    DeviceError::Connect {
        device: format!("Tapo P100 at {ip}"),
        reason: reason.to_string(),
    }
}

fn command_error(ip: &str, reason: impl Display) -> DeviceError {
    DeviceError::Command(format!("Tapo P100 at {ip}: {reason}"))
}

#[async_trait]
impl PlugConnector for TapoConnector {
    async fn connect(
        &self,
        credentials: &PlugCredentials,
    ) -> Result<Box<dyn PlugSession>, DeviceError> {
        let handler = ApiClient::new(
            credentials.username.clone(),
            credentials.password.clone(),
        )
        .p100(credentials.ip.clone())
        .await
        .map_err(|e| connect_error(&credentials.ip, e))?;

        tracing::debug!("Connected to Tapo P100 at {}", credentials.ip);
        Ok(Box::new(TapoSession {
            ip: credentials.ip.clone(),
            handler,
        }))
    }
}

/// An authenticated session to one plug
pub struct TapoSession {
    ip: String,
    handler: PlugHandler,
}

#[async_trait]
impl PlugSession for TapoSession {
    async fn is_on(&mut self) -> Result<bool, DeviceError> {
        let info = self
            .handler
            .get_device_info()
            .await
            .map_err(|e| command_error(&self.ip, e))?;
        Ok(info.device_on)
    }

    async fn set_on(&mut self, on: bool) -> Result<(), DeviceError> {
        let result = if on {
            self.handler.on().await
        } else {
            self.handler.off().await
        };
        result.map_err(|e| command_error(&self.ip, e))?;
        tracing::info!("Switched Tapo P100 at {} {}", self.ip, if on { "on" } else { "off" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDrivers;
    use std::sync::Arc;

    #[test]
    fn test_errors_name_the_plug() {
        let err = connect_error("192.168.1.20", "handshake refused");
        assert!(matches!(err, DeviceError::Connect { .. }));
        assert_eq!(
            err.to_string(),
            "Unable to connect to Tapo P100 at 192.168.1.20: handshake refused"
        );

        let err = command_error("192.168.1.20", "timeout");
        assert_eq!(
            err.to_string(),
            "Device reported an error: Tapo P100 at 192.168.1.20: timeout"
        );
    }

    #[test]
    fn test_connector_plugs_into_drivers() {
        let drivers = DeviceDrivers::default().with_plugs(Arc::new(TapoConnector::new()));
        assert!(drivers.plugs.is_some());
        assert!(drivers.heat_pumps.is_none());
    }
}
