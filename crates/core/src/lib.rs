//! Core protocol and session logic for bridging a telephony media stream to a
//! conversational-AI agent.
//!
//! Nothing in this crate owns a socket. The service crate drives a
//! [`session::BridgeSession`] per call and performs the [`session::Action`]s
//! it returns.

pub mod agent;
pub mod caller;
pub mod credentials;
pub mod error;
pub mod session;
pub mod translate;

pub use error::{BridgeError, FrameError};
