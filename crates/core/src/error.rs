//! Error taxonomy shared by the bridge and its collaborators.

use crate::session::Leg;

/// A single frame could not be understood. Recovered locally by dropping the frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no `{0}` discriminator")]
    MissingDiscriminant(&'static str),
    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Errors surfaced while setting up or running a bridge session.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Required configuration is absent. Raised before any network call.
    #[error("configuration error: {0}")]
    Config(String),
    /// The credential service answered with a non-success status.
    #[error("credential service rejected the request ({status}): {body}")]
    UpstreamAuth { status: u16, body: String },
    /// The agent leg could not be established (transport failure or timeout).
    #[error("agent leg failed to connect: {0}")]
    Connect(String),
    #[error("malformed frame: {0}")]
    Protocol(#[from] FrameError),
    #[error("{0} leg closed")]
    PeerClosed(Leg),
}
