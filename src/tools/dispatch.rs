//! Tool call dispatch against the device store

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::{GET_DEVICES, UPDATE_DEVICE_STATE};
use crate::home::{ChangeSource, Device, DeviceStore, DeviceUpdate, DeviceValue, UpdateOutcome};
use crate::{Error, Result};

/// Reason reported when a call names a device the store does not have
pub const DEVICE_NOT_FOUND: &str = "device not found";

/// Known tools, plus whatever else the remote asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolName {
    UpdateDeviceState,
    GetDevices,
    Unknown(String),
}

impl ToolName {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            UPDATE_DEVICE_STATE => Self::UpdateDeviceState,
            GET_DEVICES => Self::GetDevices,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::UpdateDeviceState => UPDATE_DEVICE_STATE,
            Self::GetDevices => GET_DEVICES,
            Self::Unknown(name) => name,
        }
    }
}

/// A function call requested by the remote model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Opaque correlation id chosen by the remote
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Answer to exactly one [`ToolCall`]
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: ToolResult,
}

/// Structured result returned to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    Status {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Devices {
        devices: Vec<Device>,
    },
}

impl ToolResult {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Status {
            success: true,
            message: Some(message.into()),
            reason: None,
        }
    }

    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Status {
            success: false,
            message: None,
            reason: Some(reason.into()),
        }
    }

    /// `false` only for a failed status
    #[must_use]
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Status { success, .. } => *success,
            Self::Devices { .. } => true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDeviceArgs {
    device_id: String,
    #[serde(default)]
    is_on: Option<bool>,
    /// Declared as NUMBER; text values only come from home files and the console
    #[serde(default)]
    value: Option<f64>,
}

/// Executes tool calls against the live device store
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    store: DeviceStore,
}

impl ToolDispatcher {
    #[must_use]
    pub const fn new(store: DeviceStore) -> Self {
        Self { store }
    }

    /// Execute one call; failures become a failed result, never an error
    #[must_use]
    pub fn dispatch(&self, call: &ToolCall) -> ToolResponse {
        let tool = ToolName::parse(&call.name);
        tracing::info!(call_id = %call.id, tool = tool.as_str(), args = %call.args, "tool call");

        let outcome = match &tool {
            ToolName::UpdateDeviceState => self.update_device_state(&call.args),
            ToolName::GetDevices => Ok(ToolResult::Devices {
                devices: self.store.list_devices(),
            }),
            ToolName::Unknown(name) => Err(Error::ToolExecution(format!("unknown tool: {name}"))),
        };

        let result = outcome.unwrap_or_else(|e| {
            tracing::warn!(call_id = %call.id, tool = tool.as_str(), error = %e, "tool call failed");
            match e {
                Error::ToolExecution(reason) => ToolResult::failed(reason),
                other => ToolResult::failed(other.to_string()),
            }
        });

        ToolResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            result,
        }
    }

    /// Execute a batch in order, one response per call
    #[must_use]
    pub fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolResponse> {
        calls.iter().map(|call| self.dispatch(call)).collect()
    }

    fn update_device_state(&self, args: &Value) -> Result<ToolResult> {
        let args: UpdateDeviceArgs = serde_json::from_value(args.clone())
            .map_err(|e| Error::ToolExecution(format!("invalid argument: {e}")))?;

        if args.device_id.trim().is_empty() {
            return Err(Error::ToolExecution(
                "invalid argument: deviceId must not be empty".to_string(),
            ));
        }

        let update = DeviceUpdate {
            is_on: args.is_on,
            value: args.value.map(DeviceValue::Number),
        };

        match self
            .store
            .apply_partial_update(&args.device_id, &update, ChangeSource::Assistant)
        {
            UpdateOutcome::Applied => Ok(ToolResult::ok(format!("Updated device {}", args.device_id))),
            UpdateOutcome::NotFound => Err(Error::ToolExecution(DEVICE_NOT_FOUND.to_string())),
        }
    }
}
