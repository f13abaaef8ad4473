//! Opens the outbound websocket to the conversational-AI provider.
//!
//! Both initialization steps are bounded so a stalled provider cannot leave
//! the caller leg hanging.

use callbridge_core::{BridgeError, credentials::CredentialFetcher};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests a signed agent-leg URL.
pub async fn fetch_endpoint(
    credentials: Arc<dyn CredentialFetcher>,
    agent_id: String,
    limit: Duration,
) -> Result<String, BridgeError> {
    timeout(limit, credentials.signed_url(&agent_id))
        .await
        .map_err(|_| {
            BridgeError::Connect(format!(
                "credential fetch timed out after {}ms",
                limit.as_millis()
            ))
        })?
}

/// Performs the websocket handshake against a signed URL.
pub async fn connect(url: String, limit: Duration) -> Result<AgentSocket, BridgeError> {
    let (socket, response) = timeout(limit, connect_async(url.as_str()))
        .await
        .map_err(|_| {
            BridgeError::Connect(format!(
                "agent handshake timed out after {}ms",
                limit.as_millis()
            ))
        })?
        .map_err(|e| BridgeError::Connect(e.to_string()))?;
    debug!(status = %response.status(), "Agent leg handshake complete");
    Ok(socket)
}
