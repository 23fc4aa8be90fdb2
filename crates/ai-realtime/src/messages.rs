//! Outbound message builders and the inbound server-event sum type (§4.5,
//! §6). Inbound events are tagged by their `type` field the same way the
//! upstream speech proxy tags frontend events, with an `Unknown` catch-all
//! since the wire protocol is structurally open-ended.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AiSessionConfig;

pub fn session_update(config: &AiSessionConfig) -> Value {
    serde_json::json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": config.instructions,
            "voice": config.voice,
            "input_audio_format": config.audio_format.0,
            "output_audio_format": config.audio_format.0,
            "turn_detection": {
                "type": "server_vad",
                "threshold": config.turn_detection.threshold,
                "prefix_padding_ms": config.turn_detection.prefix_padding_ms,
                "silence_duration_ms": config.turn_detection.silence_duration_ms,
            },
            "tools": config.tools.iter().map(|t| serde_json::json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>(),
            "temperature": config.temperature,
            "max_response_output_tokens": config.max_output_tokens,
        }
    })
}

/// Prime the welcome response (§4.4 step 8): a `conversation.item.create`
/// carrying a plain user-role message, distinct from a tool result.
pub fn user_message(text: &str) -> Value {
    serde_json::json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_text", "text": text }],
        }
    })
}

pub fn input_audio_append(base64_audio: &str) -> Value {
    serde_json::json!({
        "type": "input_audio_buffer.append",
        "audio": base64_audio,
    })
}

/// Deliver a tool call's result back to the session: a
/// `conversation.item.create` carrying the `function_call_output`, followed
/// by `response.create` to resume generation.
pub fn function_call_output(call_id: &str, output: &str) -> Value {
    serde_json::json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }
    })
}

pub fn response_create() -> Value {
    serde_json::json!({ "type": "response.create" })
}

pub fn leave() -> Value {
    serde_json::json!({ "type": "session.leave" })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCallArgumentsDone {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub message: String,
}

/// Server → client messages. Anything not listed in §6's inbound type list
/// falls into [`ServerEvent::Unknown`], logged and dropped rather than
/// failing deserialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionObject },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionObject },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone(FunctionCallArgumentsDone),
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error(ErrorDetail),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionObject {
    pub id: String,
}

/// Parse one inbound JSON text frame. `raw` is kept alongside `Unknown`-type
/// parses upstream (the caller logs it) -- this function itself just
/// returns the typed event or a parse error for genuinely malformed JSON.
pub fn parse_server_event(raw: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_carries_the_documented_vad_defaults() {
        let config = AiSessionConfig::default();
        let value = session_update(&config);
        assert_eq!(value["session"]["turn_detection"]["threshold"], 0.3);
        assert_eq!(value["session"]["turn_detection"]["prefix_padding_ms"], 200);
        assert_eq!(value["session"]["input_audio_format"], "g711_ulaw");
    }

    #[test]
    fn session_update_lists_both_default_tools() {
        let config = AiSessionConfig::default();
        let value = session_update(&config);
        let tools = value["session"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[test]
    fn parses_session_updated_and_extracts_session_id() {
        let raw = r#"{"type":"session.updated","session":{"id":"sess_123"}}"#;
        let event = parse_server_event(raw).unwrap();
        match event {
            ServerEvent::SessionUpdated { session } => assert_eq!(session.id, "sess_123"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_audio_delta() {
        let raw = r#"{"type":"response.audio.delta","delta":"abcd"}"#;
        let event = parse_server_event(raw).unwrap();
        assert!(matches!(event, ServerEvent::ResponseAudioDelta { delta } if delta == "abcd"));
    }

    #[test]
    fn unrecognized_type_falls_back_to_unknown_instead_of_failing() {
        let raw = r#"{"type":"rate_limits.updated","limits":[]}"#;
        let event = parse_server_event(raw).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn user_message_carries_plain_text_content_not_a_tool_result() {
        let value = user_message("Thanks for calling, how can I help?");
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["text"], "Thanks for calling, how can I help?");
    }

    #[test]
    fn function_call_output_then_response_create_is_the_tool_result_round_trip() {
        let output = function_call_output("call_1", "{\"ok\":true}");
        assert_eq!(output["type"], "conversation.item.create");
        assert_eq!(output["item"]["type"], "function_call_output");
        let create = response_create();
        assert_eq!(create["type"], "response.create");
    }
}
