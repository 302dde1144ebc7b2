//! Device and room model

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of smart-home device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Light,
    Thermostat,
    /// `is_on` means locked
    Lock,
    Camera,
    Speaker,
}

impl DeviceType {
    /// Whether `value` carries meaning for this type
    ///
    /// Brightness for lights, temperature for thermostats, volume for
    /// speakers. Locks and cameras ignore it.
    #[must_use]
    pub const fn supports_value(self) -> bool {
        matches!(self, Self::Light | Self::Thermostat | Self::Speaker)
    }

    /// Wire name of the type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "LIGHT",
            Self::Thermostat => "THERMOSTAT",
            Self::Lock => "LOCK",
            Self::Camera => "CAMERA",
            Self::Speaker => "SPEAKER",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Device value: a number for most devices, free text otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceValue {
    Number(f64),
    Text(String),
}

impl From<f64> for DeviceValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for DeviceValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Optional per-device metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A controllable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Owning room (lookup only)
    pub room_id: String,
    pub is_on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DeviceValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DeviceMeta>,
}

impl Device {
    /// Copy of this device with the present fields of `update` applied
    #[must_use]
    pub fn with_update(&self, update: &DeviceUpdate) -> Self {
        Self {
            is_on: update.is_on.unwrap_or(self.is_on),
            value: update.value.clone().or_else(|| self.value.clone()),
            ..self.clone()
        }
    }

    /// Compact description used in the assistant's instructions
    #[must_use]
    pub fn summary(&self) -> DeviceSummary<'_> {
        DeviceSummary {
            name: &self.name,
            id: &self.id,
            device_type: self.device_type,
        }
    }
}

/// `{name, id, type}` view of a device
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeviceSummary<'a> {
    pub name: &'a str,
    pub id: &'a str,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

/// Partial device update; absent fields keep their prior value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub is_on: Option<bool>,
    pub value: Option<DeviceValue>,
}

impl DeviceUpdate {
    /// Update that only sets the power state
    #[must_use]
    pub const fn power_only(is_on: bool) -> Self {
        Self {
            is_on: Some(is_on),
            value: None,
        }
    }

    /// Update that only sets the value
    #[must_use]
    pub const fn value_only(value: DeviceValue) -> Self {
        Self {
            is_on: None,
            value: Some(value),
        }
    }

    /// Whether the update carries no fields
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.is_on.is_none() && self.value.is_none()
    }
}

/// Kind of room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    LivingRoom,
    Kitchen,
    Bedroom,
    Bathroom,
    Office,
    Outdoor,
}

/// A room in the home
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Image reference shown by the dashboard
    pub image: String,
}

/// Complete home model: rooms and devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomeState {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl HomeState {
    /// Load a home description from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if device
    /// identifiers are not unique
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;
        state.validate()?;

        tracing::info!(
            path = %path.display(),
            rooms = state.rooms.len(),
            devices = state.devices.len(),
            "loaded home file"
        );

        Ok(state)
    }

    /// Check that device identifiers are unique
    ///
    /// # Errors
    ///
    /// Returns error naming the first duplicated identifier
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(Error::Config(format!("duplicate device id: {}", device.id)));
            }
        }
        Ok(())
    }

    /// Look up a device by identifier
    #[must_use]
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> Device {
        Device {
            id: "d1".to_string(),
            name: "Lamp".to_string(),
            device_type: DeviceType::Light,
            room_id: "office".to_string(),
            is_on: false,
            value: Some(DeviceValue::Number(20.0)),
            meta: None,
        }
    }

    #[test]
    fn update_keeps_absent_fields() {
        let device = lamp();

        let powered = device.with_update(&DeviceUpdate::power_only(true));
        assert!(powered.is_on);
        assert_eq!(powered.value, Some(DeviceValue::Number(20.0)));

        let dimmed = device.with_update(&DeviceUpdate::value_only(DeviceValue::Number(75.0)));
        assert!(!dimmed.is_on);
        assert_eq!(dimmed.value, Some(DeviceValue::Number(75.0)));
    }

    #[test]
    fn device_json_uses_dashboard_field_names() {
        let json = serde_json::to_value(lamp()).unwrap();
        assert_eq!(json["type"], "LIGHT");
        assert_eq!(json["roomId"], "office");
        assert_eq!(json["isOn"], false);
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn value_accepts_number_or_text() {
        let n: DeviceValue = serde_json::from_str("72").unwrap();
        assert_eq!(n, DeviceValue::Number(72.0));

        let t: DeviceValue = serde_json::from_str("\"warm\"").unwrap();
        assert_eq!(t, DeviceValue::Text("warm".to_string()));
    }

    #[test]
    fn value_display_drops_integral_fraction() {
        assert_eq!(DeviceValue::Number(55.0).to_string(), "55");
        assert_eq!(DeviceValue::Number(21.5).to_string(), "21.5");
    }

    #[test]
    fn only_some_types_support_value() {
        assert!(DeviceType::Light.supports_value());
        assert!(DeviceType::Thermostat.supports_value());
        assert!(DeviceType::Speaker.supports_value());
        assert!(!DeviceType::Lock.supports_value());
        assert!(!DeviceType::Camera.supports_value());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let state = HomeState {
            rooms: Vec::new(),
            devices: vec![lamp(), lamp()],
        };
        assert!(matches!(state.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home.json");
        std::fs::write(
            &path,
            r#"{
                "rooms": [{"id": "office", "name": "Office", "type": "OFFICE", "image": "office.jpg"}],
                "devices": [{"id": "d1", "name": "Lamp", "type": "LIGHT", "roomId": "office", "isOn": true, "value": 40}]
            }"#,
        )
        .unwrap();

        let state = HomeState::load(&path).unwrap();
        assert_eq!(state.rooms[0].room_type, RoomType::Office);
        assert_eq!(state.device("d1").unwrap().value, Some(DeviceValue::Number(40.0)));
    }
}
