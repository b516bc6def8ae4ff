//! Tapo P100 smart plug

use super::settings::{self, SettingsErrors, StringFormat};
use super::Logic;
use crate::model::{is_truthy, CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use device_core::{DeviceError, PlugConnector, PlugCredentials};
use serde_json::Value;
use std::sync::Arc;

pub struct TapoP100 {
    connector: Option<Arc<dyn PlugConnector>>,
}

impl TapoP100 {
    pub fn new(connector: Option<Arc<dyn PlugConnector>>) -> Self {
        Self { connector }
    }
}

fn credentials(settings: &Settings) -> Result<PlugCredentials, DeviceError> {
    let read = |key: &str| {
        settings::str_setting(settings, key)
            .map(str::to_string)
            .ok_or_else(|| DeviceError::Settings(key.to_string()))
    };
    Ok(PlugCredentials {
        ip: read("ip")?,
        username: read("username")?,
        password: read("password")?,
    })
}

#[async_trait]
impl Logic for TapoP100 {
    fn input_keys(&self) -> &'static [&'static str] {
        &["power"]
    }

    fn handle_inputs_changed(&mut self, node: &mut Node, inputs: &Ports, _ctx: &CycleContext) {
        let power = inputs.get("power").cloned().unwrap_or(Value::Null);
        node.state.clear();
        node.state.insert("power".to_string(), power);
    }

    async fn apply_state_to_devices(
        &mut self,
        node: &Node,
        _ctx: &CycleContext,
    ) -> Result<(), DeviceError> {
        // Null means leave the plug alone
        let power = node.state_value("power");
        if power.is_null() {
            return Ok(());
        }
        let power = is_truthy(&power);

        let connector = self
            .connector
            .as_ref()
            .ok_or(DeviceError::NoTransport("Tapo P100"))?;
        let credentials = credentials(&node.settings)?;

        let mut session = connector.connect(&credentials).await?;
        if session.is_on().await? != power {
            session.set_on(power).await?;
            tracing::info!("Switched plug {} ({}) to {}", node.name, credentials.ip, power);
        }
        Ok(())
    }

    fn settings_errors(&self, candidate: &Settings, existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();
        settings::check_string(&mut errors, candidate, existing, "ip", StringFormat::IpAddress);
        settings::check_string(&mut errors, candidate, existing, "username", StringFormat::Email);
        settings::check_string(&mut errors, candidate, existing, "password", StringFormat::Any);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::LogicKind;
    use chrono::Utc;
    use device_core::PlugSession;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlug {
        on: Mutex<bool>,
        writes: Mutex<Vec<bool>>,
        unreachable: bool,
    }

    struct FakeSession(Arc<FakePlug>);

    #[async_trait]
    impl PlugSession for FakeSession {
        async fn is_on(&mut self) -> Result<bool, DeviceError> {
            Ok(*self.0.on.lock().unwrap())
        }

        async fn set_on(&mut self, on: bool) -> Result<(), DeviceError> {
            *self.0.on.lock().unwrap() = on;
            self.0.writes.lock().unwrap().push(on);
            Ok(())
        }
    }

    struct FakeConnector(Arc<FakePlug>);

    #[async_trait]
    impl PlugConnector for FakeConnector {
        async fn connect(
            &self,
            credentials: &PlugCredentials,
        ) -> Result<Box<dyn PlugSession>, DeviceError> {
            if self.0.unreachable {
                return Err(DeviceError::Connect {
                    device: credentials.ip.clone(),
                    reason: "timed out".to_string(),
                });
            }
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    fn node(power: Value) -> Node {
        let mut node = Node::new(7, "Sauna", LogicKind::TapoP100).with_settings(json!({
            "ip": "192.168.1.20",
            "username": "me@example.com",
            "password": "secret"
        }));
        node.state.insert("power".to_string(), power);
        node
    }

    fn ctx() -> CycleContext {
        CycleContext::new(Utc::now(), chrono_tz::UTC)
    }

    #[tokio::test]
    async fn test_switches_only_when_state_differs() {
        let plug = Arc::new(FakePlug::default());
        let mut logic = TapoP100::new(Some(Arc::new(FakeConnector(plug.clone()))));

        logic.apply_state_to_devices(&node(json!(1)), &ctx()).await.unwrap();
        logic.apply_state_to_devices(&node(json!(true)), &ctx()).await.unwrap();
        logic.apply_state_to_devices(&node(json!(0)), &ctx()).await.unwrap();

        assert_eq!(*plug.writes.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_null_power_does_nothing() {
        let mut logic = TapoP100::new(None);
        assert!(logic.apply_state_to_devices(&node(Value::Null), &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let plug = Arc::new(FakePlug {
            unreachable: true,
            ..Default::default()
        });
        let mut logic = TapoP100::new(Some(Arc::new(FakeConnector(plug))));
        let err = logic
            .apply_state_to_devices(&node(json!(true)), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_missing_transport() {
        let mut logic = TapoP100::new(None);
        let err = logic
            .apply_state_to_devices(&node(json!(true)), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NoTransport(_)));
    }

    #[test]
    fn test_settings_errors() {
        let candidate = json!({"ip": "10.0.0.300x", "username": "nobody", "password": 5});
        let errors = TapoP100::new(None).settings_errors(candidate.as_object().unwrap(), None);
        assert_eq!(errors["ip"], vec![settings::INVALID_IP]);
        assert_eq!(errors["username"], vec![settings::INVALID_EMAIL]);
        assert_eq!(errors["password"], vec![settings::INVALID_TYPE]);
    }
}
