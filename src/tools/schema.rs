//! Function declarations advertised to the remote model

use std::collections::BTreeMap;

use serde::Serialize;

/// Name of the device mutation tool
pub const UPDATE_DEVICE_STATE: &str = "updateDeviceState";

/// Name of the device listing tool
pub const GET_DEVICES: &str = "getDevices";

/// Parameter type, in the remote's upper-case vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    Object,
    String,
    Boolean,
    Number,
}

/// JSON-schema-like parameter description
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    fn scalar(schema_type: SchemaType, description: &str) -> Self {
        Self {
            schema_type,
            description: Some(description.to_string()),
            properties: None,
            required: Vec::new(),
        }
    }

    fn object<const N: usize>(properties: [(&str, Self); N], required: &[&str]) -> Self {
        Self {
            schema_type: SchemaType::Object,
            description: None,
            properties: Some(
                properties
                    .into_iter()
                    .map(|(name, schema)| (name.to_string(), schema))
                    .collect(),
            ),
            required: required.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// One callable function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

/// The device tools, in the order they are advertised
#[must_use]
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: UPDATE_DEVICE_STATE.to_string(),
            description: "Turn a device on or off, or update its value (like brightness or temperature)."
                .to_string(),
            parameters: Schema::object(
                [
                    (
                        "deviceId",
                        Schema::scalar(SchemaType::String, "The ID of the device to control"),
                    ),
                    (
                        "isOn",
                        Schema::scalar(SchemaType::Boolean, "Whether the device should be on or off"),
                    ),
                    (
                        "value",
                        Schema::scalar(
                            SchemaType::Number,
                            "Numeric value for the device (brightness, temp, etc.)",
                        ),
                    ),
                ],
                &["deviceId"],
            ),
        },
        FunctionDeclaration {
            name: GET_DEVICES.to_string(),
            description: "Get the current list of all devices and their states.".to_string(),
            parameters: Schema::object([], &[]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_declaration_shape() {
        let json = serde_json::to_value(&declarations()[0]).unwrap();

        assert_eq!(json["name"], "updateDeviceState");
        assert_eq!(json["parameters"]["type"], "OBJECT");
        assert_eq!(json["parameters"]["properties"]["deviceId"]["type"], "STRING");
        assert_eq!(json["parameters"]["properties"]["isOn"]["type"], "BOOLEAN");
        assert_eq!(json["parameters"]["properties"]["value"]["type"], "NUMBER");
        assert_eq!(json["parameters"]["required"], serde_json::json!(["deviceId"]));
    }

    #[test]
    fn get_devices_takes_no_arguments() {
        let json = serde_json::to_value(&declarations()[1]).unwrap();

        assert_eq!(json["name"], "getDevices");
        assert_eq!(json["parameters"]["properties"], serde_json::json!({}));
        assert!(json["parameters"].get("required").is_none());
    }
}
