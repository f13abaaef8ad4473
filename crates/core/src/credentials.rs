//! Acquisition of the short-lived, signed endpoint used to open the agent leg.

use crate::error::BridgeError;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, error};

pub const DEFAULT_API_BASE: &str = "https://api.elevenlabs.io";
pub const SIGNED_URL_PATH: &str = "/v1/convai/conversation/get_signed_url";
const API_KEY_HEADER: &str = "xi-api-key";

/// Produces a single-use agent-leg endpoint for an agent.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    async fn signed_url(&self, agent_id: &str) -> Result<String, BridgeError>;
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Requests signed URLs from the provider's REST API.
pub struct SignedUrlClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl SignedUrlClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }
}

/// Builds the credential request URL with `agent_id` form-encoded into the query.
pub fn signed_url_endpoint(api_base: &str, agent_id: &str) -> Result<Url, BridgeError> {
    let base = api_base.trim_end_matches('/');
    Url::parse_with_params(&format!("{base}{SIGNED_URL_PATH}"), &[("agent_id", agent_id)])
        .map_err(|e| BridgeError::Config(format!("invalid credential endpoint {base}: {e}")))
}

#[async_trait]
impl CredentialFetcher for SignedUrlClient {
    async fn signed_url(&self, agent_id: &str) -> Result<String, BridgeError> {
        if self.api_key.trim().is_empty() {
            return Err(BridgeError::Config("API key is not set".to_string()));
        }
        if agent_id.trim().is_empty() {
            return Err(BridgeError::Config("agent id is not set".to_string()));
        }
        let url = signed_url_endpoint(&self.api_base, agent_id)?;
        debug!(%agent_id, "Requesting signed agent URL");

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| BridgeError::Connect(format!("credential request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "Credential service rejected request");
            return Err(BridgeError::UpstreamAuth {
                status: status.as_u16(),
                body,
            });
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Connect(format!("invalid credential response: {e}")))?;
        Ok(body.signed_url)
    }
}
