//! MELCloud client for Mitsubishi air-to-air heat pumps

use crate::device::{
    CloudCredentials, DeviceError, HeatPumpConnector, HeatPumpDevice, HeatPumpSession,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://app.melcloud.com/Mitsubishi.Wifi.Client";

/// Device type code for air-to-air units
const DEVICE_TYPE_ATA: i64 = 0;

/// Effective flag telling the service that only `Power` changed
const EFFECTIVE_FLAG_POWER: i64 = 0x01;

const CONTEXT_HEADER: &str = "X-MitsContextKey";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginResponse {
    error_id: Option<i64>,
    login_data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginData {
    context_key: String,
}

/// Connector that logs in to MELCloud for every session
pub struct MelCloudConnector {
    http: reqwest::Client,
    base_url: String,
}

impl Default for MelCloudConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl MelCloudConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HeatPumpConnector for MelCloudConnector {
    async fn connect(
        &self,
        credentials: &CloudCredentials,
    ) -> Result<Box<dyn HeatPumpSession>, DeviceError> {
        let response = self
            .http
            .post(format!("{}/Login/ClientLogin", self.base_url))
            .json(&json!({
                "Email": credentials.username,
                "Password": credentials.password,
                "Language": 0,
                "AppVersion": "1.19.1.1",
                "Persist": true,
                "CaptchaResponse": null,
            }))
            .send()
            .await
            .map_err(|e| DeviceError::Connect {
                device: "MELCloud".to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()?;

        let login: LoginResponse = response.json().await?;
        let context_key = match (login.error_id, login.login_data) {
            (None, Some(data)) => data.context_key,
            _ => return Err(DeviceError::Auth(credentials.username.clone())),
        };

        tracing::debug!("Logged in to MELCloud as {}", credentials.username);

        Ok(Box::new(MelCloudSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            context_key,
        }))
    }
}

/// An authenticated MELCloud session
pub struct MelCloudSession {
    http: reqwest::Client,
    base_url: String,
    context_key: String,
}

#[async_trait]
impl HeatPumpSession for MelCloudSession {
    async fn devices(&mut self) -> Result<Vec<HeatPumpDevice>, DeviceError> {
        let buildings: Value = self
            .http
            .get(format!("{}/User/ListDevices", self.base_url))
            .header(CONTEXT_HEADER, self.context_key.as_str())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut devices = Vec::new();
        collect_ata_devices(&buildings, &mut devices);
        Ok(devices)
    }

    async fn set_power(
        &mut self,
        device: &HeatPumpDevice,
        power: bool,
    ) -> Result<(), DeviceError> {
        // The write endpoint expects the full current state back
        let mut state: Value = self
            .http
            .get(format!("{}/Device/Get", self.base_url))
            .query(&[
                ("id", device.device_id.to_string()),
                ("buildingID", device.building_id.to_string()),
            ])
            .header(CONTEXT_HEADER, self.context_key.as_str())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(fields) = state.as_object_mut() else {
            return Err(DeviceError::Command(format!(
                "unexpected state payload for {}",
                device.name
            )));
        };
        fields.insert("Power".to_string(), Value::Bool(power));
        fields.insert("EffectiveFlags".to_string(), json!(EFFECTIVE_FLAG_POWER));
        fields.insert("HasPendingCommand".to_string(), Value::Bool(true));

        self.http
            .post(format!("{}/Device/SetAta", self.base_url))
            .header(CONTEXT_HEADER, self.context_key.as_str())
            .json(&state)
            .send()
            .await?
            .error_for_status()?;

        tracing::info!("Set heat pump '{}' power to {}", device.name, power);
        Ok(())
    }
}

/// Walk a ListDevices payload and collect every air-to-air unit.
///
/// Devices may sit directly in a building structure, inside floors, or inside
/// areas, so every `Devices` array is visited.
fn collect_ata_devices(value: &Value, out: &mut Vec<HeatPumpDevice>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "Devices" {
                    if let Some(entries) = child.as_array() {
                        out.extend(entries.iter().filter_map(parse_device));
                    }
                } else {
                    collect_ata_devices(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ata_devices(item, out);
            }
        }
        _ => {}
    }
}

fn parse_device(entry: &Value) -> Option<HeatPumpDevice> {
    let props = entry.get("Device")?;
    if props.get("DeviceType").and_then(Value::as_i64) != Some(DEVICE_TYPE_ATA) {
        return None;
    }
    Some(HeatPumpDevice {
        device_id: entry.get("DeviceID")?.as_i64()?,
        building_id: entry.get("BuildingID")?.as_i64()?,
        name: entry.get("DeviceName")?.as_str()?.to_string(),
        power: props.get("Power").and_then(Value::as_bool),
        room_temperature: props.get("RoomTemperature").and_then(Value::as_f64),
        target_temperature: props.get("SetTemperature").and_then(Value::as_f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_entry(id: i64, name: &str, device_type: i64) -> Value {
        json!({
            "DeviceID": id,
            "DeviceName": name,
            "BuildingID": 7,
            "Device": {
                "DeviceType": device_type,
                "Power": true,
                "RoomTemperature": 21.5,
                "SetTemperature": 22.0
            }
        })
    }

    fn list_devices_payload() -> Value {
        json!([{
            "ID": 7,
            "Structure": {
                "Devices": [device_entry(1, "Living room", 0)],
                "Floors": [{
                    "Devices": [device_entry(2, "Water heater", 1)],
                    "Areas": [{ "Devices": [device_entry(3, "Bedroom", 0)] }]
                }],
                "Areas": []
            }
        }])
    }

    #[test]
    fn test_collect_ata_devices_walks_floors_and_areas() {
        let mut devices = Vec::new();
        collect_ata_devices(&list_devices_payload(), &mut devices);

        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Living room", "Bedroom"]);
        assert_eq!(devices[0].room_temperature, Some(21.5));
        assert_eq!(devices[0].target_temperature, Some(22.0));
        assert_eq!(devices[1].building_id, 7);
    }

    #[tokio::test]
    async fn test_session_finds_device_case_insensitively() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/Login/ClientLogin")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ErrorId":null,"LoginData":{"ContextKey":"ctx"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/User/ListDevices")
            .match_header(CONTEXT_HEADER, "ctx")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(list_devices_payload().to_string())
            .create_async()
            .await;

        let connector = MelCloudConnector::new(server.url());
        let credentials = CloudCredentials {
            username: "user@example.com".to_string(),
            password: "secret".to_string(),
        };
        let mut session = connector.connect(&credentials).await.unwrap();
        let device = session.find_device("BEDROOM").await.unwrap().unwrap();
        assert_eq!(device.device_id, 3);
    }

    #[tokio::test]
    async fn test_login_error_is_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/Login/ClientLogin")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ErrorId":1,"LoginData":null}"#)
            .create_async()
            .await;

        let connector = MelCloudConnector::new(server.url());
        let credentials = CloudCredentials {
            username: "user@example.com".to_string(),
            password: "wrong".to_string(),
        };
        let err = connector.connect(&credentials).await.err().unwrap();
        assert!(matches!(err, DeviceError::Auth(_)));
    }
}
