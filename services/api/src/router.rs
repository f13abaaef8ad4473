//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the call webhook, the media-stream WebSocket endpoint and the
//! OpenAPI documentation.

use crate::{
    handlers::{self, MEDIA_STREAM_PATH},
    models::StatusResponse,
    state::AppState,
    ws::media_stream_handler,
};

use axum::{
    Router,
    routing::{any, get},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::incoming_call),
    components(schemas(StatusResponse)),
    tags(
        (name = "Call Bridge", description = "Routes phone calls to a conversational AI agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::health))
        .route("/incoming-call-eleven", any(handlers::incoming_call))
        .route(MEDIA_STREAM_PATH, get(media_stream_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
