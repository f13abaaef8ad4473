//! Call Bridge API Library Crate
//!
//! This library contains the web service that connects phone calls to a
//! conversational AI agent: configuration, shared state, the call webhook,
//! the media-stream WebSocket bridge, and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
