//! Axum Handlers for the HTTP routes
//!
//! The incoming-call webhook answers the telephony platform with a TwiML
//! document that connects the call's media stream to this server.

use axum::{
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::info;

use crate::{models::StatusResponse, state::AppState};

/// Path of the websocket endpoint the caller leg connects to.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";

/// Health check.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is running", body = StatusResponse)
    )
)]
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Call bridge is running".to_string(),
    })
}

/// Route an inbound call to the media-stream bridge.
///
/// Accepts any method. The stream URL is built from the request's `Host`
/// header, so the same deployment works behind any public hostname.
#[utoipa::path(
    post,
    path = "/incoming-call-eleven",
    responses(
        (status = 200, description = "TwiML routing document", body = String, content_type = "text/xml")
    )
)]
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| state.config.bind_address.to_string());
    info!(%host, "Routing incoming call to media stream");

    ([(header::CONTENT_TYPE, "text/xml")], routing_document(&host))
}

/// Builds the TwiML that connects the call to `wss://<host>/media-stream`.
pub fn routing_document(host: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="wss://{host}{MEDIA_STREAM_PATH}" />
  </Connect>
</Response>"#,
        host = escape_attribute(host),
    )
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
