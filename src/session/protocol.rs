//! Live API wire messages
//!
//! Every websocket message is a JSON object with exactly one top-level
//! key naming its kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{FunctionDeclaration, ToolCall, ToolResponse, ToolResult};
use crate::voice::PcmBlob;
use crate::{Error, Result};

/// Messages sent to the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a connection
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseBatch),
}

impl ClientMessage {
    /// One captured audio chunk
    #[must_use]
    pub fn audio(blob: PcmBlob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }

    /// Answer to a single tool call
    #[must_use]
    pub fn tool_response(response: ToolResponse) -> Self {
        Self::ToolResponse(ToolResponseBatch {
            function_responses: vec![response.into()],
        })
    }

    /// Serialize to the JSON text sent on the wire
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

/// Session configuration sent once after connecting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name (`models/...`)
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
}

impl Setup {
    /// Audio-only setup for `model`
    #[must_use]
    pub fn new(model: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: None,
            },
            system_instruction: None,
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                },
            },
        });
        self
    }

    #[must_use]
    pub fn with_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(Content::text(text));
        self
    }

    #[must_use]
    pub fn with_functions(mut self, declarations: Vec<FunctionDeclaration>) -> Self {
        self.tools.push(ToolSet {
            function_declarations: declarations,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// A sequence of parts (instruction text or model output)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<PcmBlob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<PcmBlob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseBatch {
    pub function_responses: Vec<FunctionResponse>,
}

/// `{"id", "name", "response": {"result": ...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResult {
    pub result: ToolResult,
}

impl From<ToolResponse> for FunctionResponse {
    fn from(response: ToolResponse) -> Self {
        Self {
            id: response.id,
            name: response.name,
            response: FunctionResult {
                result: response.result,
            },
        }
    }
}

/// Message received from the remote endpoint
///
/// Fields the session does not use (usage metadata, transcriptions) are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBatch>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Parse a text or binary websocket payload
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the payload is not a JSON object of the
    /// expected shape
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Protocol(e.to_string()))
    }

    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Inline audio blobs of the model turn, in order
    pub fn audio_parts(&self) -> impl Iterator<Item = &PcmBlob> {
        self.server_content
            .iter()
            .filter_map(|content| content.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
    }

    /// Whether the remote cut the current model turn short
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl From<FunctionCall> for ToolCall {
    fn from(call: FunctionCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            args: call.args,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::declarations;
    use crate::voice::codec;

    #[test]
    fn setup_serializes_as_live_api_expects() {
        let setup = Setup::new("gemini-test")
            .with_voice("Puck")
            .with_instruction("be brief")
            .with_functions(declarations());

        let json = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();
        let setup = &json["setup"];

        assert_eq!(setup["model"], "models/gemini-test");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            setup["tools"][0]["functionDeclarations"][1]["name"],
            "getDevices"
        );
    }

    #[test]
    fn model_prefix_is_not_doubled() {
        assert_eq!(Setup::new("models/x").model, "models/x");
    }

    #[test]
    fn audio_message_shape() {
        let json = serde_json::to_value(ClientMessage::audio(codec::encode(&[0.0], 16_000))).unwrap();
        assert_eq!(
            json,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}]}})
        );
    }

    #[test]
    fn tool_response_shape() {
        let message = ClientMessage::tool_response(ToolResponse {
            id: "call-1".to_string(),
            name: "updateDeviceState".to_string(),
            result: ToolResult::ok("Updated device d1"),
        });

        assert_eq!(
            serde_json::to_value(message).unwrap(),
            json!({"toolResponse": {"functionResponses": [{
                "id": "call-1",
                "name": "updateDeviceState",
                "response": {"result": {"success": true, "message": "Updated device d1"}}
            }]}})
        );
    }

    #[test]
    fn parses_setup_complete() {
        let message = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();
        assert!(message.is_setup_complete());
        assert!(message.tool_call.is_none());
    }

    #[test]
    fn parses_audio_and_interrupt() {
        let message = ServerMessage::parse(
            br#"{"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                {"text": "hi"}
            ]}, "interrupted": true}}"#,
        )
        .unwrap();

        assert_eq!(message.audio_parts().count(), 1);
        assert!(message.is_interrupted());
        assert!(!message.is_setup_complete());
    }

    #[test]
    fn parses_tool_calls_without_args() {
        let message = ServerMessage::parse(
            br#"{"toolCall": {"functionCalls": [{"id": "a", "name": "getDevices"}]}}"#,
        )
        .unwrap();

        let call: ToolCall = message.tool_call.unwrap().function_calls[0].clone().into();
        assert_eq!(call.id, "a");
        assert_eq!(call.args, Value::Null);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let message =
            ServerMessage::parse(br#"{"usageMetadata": {"totalTokenCount": 3}}"#).unwrap();
        assert_eq!(message, ServerMessage::default());
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(ServerMessage::parse(b"not json"), Err(Error::Protocol(_))));
        assert!(matches!(ServerMessage::parse(b"[1, 2]"), Err(Error::Protocol(_))));
    }
}
