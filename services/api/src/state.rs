//! Shared Application State
//!
//! Holds the resources every call shares: configuration and the credential
//! client. Nothing per-call lives here.

use crate::config::Config;
use callbridge_core::credentials::CredentialFetcher;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<dyn CredentialFetcher>,
}
