//! API Models
//!
//! Response bodies for the plain HTTP routes, annotated for OpenAPI generation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    #[schema(example = "Call bridge is running")]
    pub message: String,
}
