//! Frame translation between the caller and agent envelopes.
//!
//! Payloads are repackaged, never decoded or re-encoded.

use crate::{
    agent::{AgentAudio, AgentControl, AgentEnvelope, AudioConfig, AudioFormat, ConversationConfig},
    caller::{CallerEnvelope, MediaChunk, MediaPayload},
    error::FrameError,
};

/// The configuration frame sent as soon as the agent leg opens.
pub fn audio_format_config(format: &AudioFormat) -> AgentEnvelope {
    AgentEnvelope::Control(AgentControl::ConversationConfig {
        conversation_config: ConversationConfig {
            audio: AudioConfig {
                output: format.clone(),
            },
        },
    })
}

pub fn start_signal() -> AgentEnvelope {
    AgentEnvelope::Control(AgentControl::Start)
}

pub fn pong(event_id: u64) -> AgentEnvelope {
    AgentEnvelope::Control(AgentControl::Pong { event_id })
}

/// Wraps a caller media chunk as a user audio chunk for the agent.
pub fn caller_media_to_agent(media: &MediaChunk) -> Result<AgentEnvelope, FrameError> {
    if media.payload.is_empty() {
        return Err(FrameError::MissingField("media.payload"));
    }
    Ok(AgentEnvelope::UserAudioChunk {
        user_audio_chunk: media.payload.clone(),
    })
}

/// Wraps agent audio as a caller media frame tagged with `stream_sid`.
pub fn agent_audio_to_caller(
    stream_sid: Option<&str>,
    audio: &AgentAudio,
) -> Result<CallerEnvelope, FrameError> {
    let stream_sid = require_stream_sid(stream_sid)?;
    if audio.payload.is_empty() {
        return Err(FrameError::MissingField("audio_event.audio_base_64"));
    }
    Ok(CallerEnvelope::Media {
        stream_sid,
        media: MediaPayload {
            payload: audio.payload.clone(),
        },
    })
}

/// Builds the clear frame that flushes the caller's playback buffer.
pub fn interruption_to_caller(stream_sid: Option<&str>) -> Result<CallerEnvelope, FrameError> {
    Ok(CallerEnvelope::Clear {
        stream_sid: require_stream_sid(stream_sid)?,
    })
}

fn require_stream_sid(stream_sid: Option<&str>) -> Result<String, FrameError> {
    match stream_sid {
        Some(sid) if !sid.is_empty() => Ok(sid.to_owned()),
        _ => Err(FrameError::MissingField("streamSid")),
    }
}
