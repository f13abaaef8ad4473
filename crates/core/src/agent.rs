//! Agent-leg wire format: the conversational-AI provider's websocket protocol.
//!
//! Inbound frames carry a top-level `type` discriminator with the event body
//! nested under `<type>_event`. Outbound frames are either typed control
//! frames or bare `user_audio_chunk` objects.

use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output audio the agent should produce. The telephony leg plays 8 kHz μ-law natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: "ulaw".to_string(),
            sample_rate: 8000,
        }
    }
}

/// A frame received from the agent leg.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentFrame {
    Audio(AgentAudio),
    /// The agent's speech was cut off; buffered playback should be discarded.
    Interruption { event_id: Option<u64> },
    Ping { event_id: Option<u64>, ping_ms: Option<u64> },
    UserTranscript(String),
    AgentResponse(String),
    PartialTranscript(Value),
    ConversationInitiationMetadata { conversation_id: Option<String> },
    /// Acknowledgement of the configuration frame.
    ConversationConfig,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentAudio {
    pub payload: String,
    pub event_id: Option<u64>,
}

#[derive(Deserialize)]
struct AudioEvent {
    audio_base_64: String,
    #[serde(default)]
    event_id: Option<u64>,
}

#[derive(Deserialize)]
struct LegacyAudio {
    chunk: String,
}

#[derive(Deserialize, Default)]
struct EventId {
    #[serde(default)]
    event_id: Option<u64>,
}

#[derive(Deserialize, Default)]
struct PingEvent {
    #[serde(default)]
    event_id: Option<u64>,
    #[serde(default)]
    ping_ms: Option<u64>,
}

impl AgentFrame {
    /// Parses an agent-leg text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let mut value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingDiscriminant("type"))?
            .to_owned();

        let frame = match kind.as_str() {
            "audio" => AgentFrame::Audio(parse_audio(&mut value)?),
            "interruption" => {
                let event: EventId = optional_field(&mut value, "interruption_event")?;
                AgentFrame::Interruption {
                    event_id: event.event_id,
                }
            }
            "ping" => {
                let event: PingEvent = optional_field(&mut value, "ping_event")?;
                AgentFrame::Ping {
                    event_id: event.event_id,
                    ping_ms: event.ping_ms,
                }
            }
            "user_transcript" => AgentFrame::UserTranscript(nested_str(
                &value,
                "user_transcription_event",
                "user_transcript",
            )),
            "agent_response" => AgentFrame::AgentResponse(nested_str(
                &value,
                "agent_response_event",
                "agent_response",
            )),
            "partial_transcript" => AgentFrame::PartialTranscript(value),
            "conversation_initiation_metadata" => {
                let conversation_id = value
                    .get("conversation_initiation_metadata_event")
                    .and_then(|event| event.get("conversation_id"))
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                AgentFrame::ConversationInitiationMetadata { conversation_id }
            }
            "conversation_config" => AgentFrame::ConversationConfig,
            _ => AgentFrame::Other(kind),
        };
        Ok(frame)
    }
}

fn parse_audio(value: &mut Value) -> Result<AgentAudio, FrameError> {
    if let Some(event) = value.get_mut("audio_event").map(Value::take) {
        let event: AudioEvent = serde_json::from_value(event)?;
        return Ok(AgentAudio {
            payload: event.audio_base_64,
            event_id: event.event_id,
        });
    }
    if let Some(audio) = value.get_mut("audio").map(Value::take) {
        let audio: LegacyAudio = serde_json::from_value(audio)?;
        return Ok(AgentAudio {
            payload: audio.chunk,
            event_id: None,
        });
    }
    Err(FrameError::MissingField("audio_event"))
}

fn optional_field<T>(value: &mut Value, field: &'static str) -> Result<T, FrameError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match value.get_mut(field).map(Value::take) {
        Some(Value::Null) | None => Ok(T::default()),
        Some(inner) => Ok(serde_json::from_value(inner)?),
    }
}

fn nested_str(value: &Value, event: &str, field: &str) -> String {
    value
        .get(event)
        .and_then(|e| e.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// A frame sent to the agent leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentEnvelope {
    Control(AgentControl),
    UserAudioChunk { user_audio_chunk: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentControl {
    ConversationConfig {
        conversation_config: ConversationConfig,
    },
    Start,
    Pong {
        event_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationConfig {
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioConfig {
    pub output: AudioFormat,
}

impl AgentEnvelope {
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_value(envelope: &AgentEnvelope) -> Value {
        serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_audio_frames() {
        let frame =
            AgentFrame::parse(r#"{"type":"audio","audio_event":{"audio_base_64":"QUJD","event_id":3}}"#)
                .unwrap();
        assert_eq!(
            frame,
            AgentFrame::Audio(AgentAudio {
                payload: "QUJD".to_string(),
                event_id: Some(3),
            })
        );

        let legacy = AgentFrame::parse(r#"{"type":"audio","audio":{"chunk":"REVG"}}"#).unwrap();
        assert_eq!(
            legacy,
            AgentFrame::Audio(AgentAudio {
                payload: "REVG".to_string(),
                event_id: None,
            })
        );

        assert!(matches!(
            AgentFrame::parse(r#"{"type":"audio"}"#),
            Err(FrameError::MissingField("audio_event"))
        ));
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            AgentFrame::parse(r#"{"type":"interruption","interruption_event":{"event_id":7}}"#).unwrap(),
            AgentFrame::Interruption { event_id: Some(7) }
        );
        assert_eq!(
            AgentFrame::parse(r#"{"type":"interruption"}"#).unwrap(),
            AgentFrame::Interruption { event_id: None }
        );
        assert_eq!(
            AgentFrame::parse(r#"{"type":"ping","ping_event":{"event_id":1,"ping_ms":40}}"#).unwrap(),
            AgentFrame::Ping {
                event_id: Some(1),
                ping_ms: Some(40),
            }
        );
        assert_eq!(
            AgentFrame::parse(
                r#"{"type":"user_transcript","user_transcription_event":{"user_transcript":"hello"}}"#
            )
            .unwrap(),
            AgentFrame::UserTranscript("hello".to_string())
        );
        assert_eq!(
            AgentFrame::parse(
                r#"{"type":"conversation_initiation_metadata","conversation_initiation_metadata_event":{"conversation_id":"conv_1"}}"#
            )
            .unwrap(),
            AgentFrame::ConversationInitiationMetadata {
                conversation_id: Some("conv_1".to_string())
            }
        );
        assert_eq!(
            AgentFrame::parse(r#"{"type":"vad_score"}"#).unwrap(),
            AgentFrame::Other("vad_score".to_string())
        );
        assert!(matches!(AgentFrame::parse("{"), Err(FrameError::Json(_))));
        assert!(matches!(
            AgentFrame::parse(r#"{"kind":"audio"}"#),
            Err(FrameError::MissingDiscriminant("type"))
        ));
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let config = AgentEnvelope::Control(AgentControl::ConversationConfig {
            conversation_config: ConversationConfig {
                audio: AudioConfig {
                    output: AudioFormat::default(),
                },
            },
        });
        assert_eq!(
            to_value(&config),
            json!({
                "type": "conversation_config",
                "conversation_config": { "audio": { "output": { "encoding": "ulaw", "sample_rate": 8000 } } }
            })
        );
        assert_eq!(
            to_value(&AgentEnvelope::Control(AgentControl::Start)),
            json!({ "type": "start" })
        );
        assert_eq!(
            to_value(&AgentEnvelope::Control(AgentControl::Pong { event_id: 4 })),
            json!({ "type": "pong", "event_id": 4 })
        );
        assert_eq!(
            to_value(&AgentEnvelope::UserAudioChunk {
                user_audio_chunk: "//8A".to_string()
            }),
            json!({ "user_audio_chunk": "//8A" })
        );
    }
}
