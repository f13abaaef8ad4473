//! Caller-leg wire format: the telephony platform's media-stream envelopes.
//!
//! Inbound frames are JSON text with a top-level `event` discriminator.
//! Outbound frames must echo the `streamSid` verbatim or the platform drops them.

use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A frame received from the caller leg.
#[derive(Debug, Clone, PartialEq)]
pub enum CallerFrame {
    /// Sent once when the platform opens the socket, before `start`.
    Connected,
    Start(StreamStart),
    Media(MediaChunk),
    Stop,
    /// Any other event (`mark`, `dtmf`, ...). Ignored by the bridge.
    Other(String),
}

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: Option<u8>,
}

/// One chunk of caller audio. `payload` is opaque transport-encoded bytes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaChunk {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

impl StreamStart {
    /// The stream identifier, treating an empty string as absent.
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref().filter(|sid| !sid.is_empty())
    }
}

impl CallerFrame {
    /// Parses a caller-leg text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let mut value: Value = serde_json::from_str(text)?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingDiscriminant("event"))?
            .to_owned();

        match event.as_str() {
            "connected" => Ok(CallerFrame::Connected),
            "start" => {
                let mut start: StreamStart = take_field(&mut value, "start")?;
                if start.stream_sid().is_none() {
                    start.stream_sid = value
                        .get("streamSid")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                }
                Ok(CallerFrame::Start(start))
            }
            "media" => Ok(CallerFrame::Media(take_field(&mut value, "media")?)),
            "stop" => Ok(CallerFrame::Stop),
            _ => Ok(CallerFrame::Other(event)),
        }
    }
}

fn take_field<T: serde::de::DeserializeOwned>(
    value: &mut Value,
    field: &'static str,
) -> Result<T, FrameError> {
    let inner = value
        .get_mut(field)
        .map(Value::take)
        .ok_or(FrameError::MissingField(field))?;
    Ok(serde_json::from_value(inner)?)
}

/// A frame sent back to the caller leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallerEnvelope {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Flushes audio the platform has buffered but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl CallerEnvelope {
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}
