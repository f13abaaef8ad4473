//! WebSocket Call Bridging
//!
//! - `session`: one bridge task per caller websocket, relaying between the
//!   caller leg and the agent leg.
//! - `agent_leg`: the outbound connection to the conversational-AI provider.

pub mod agent_leg;
pub mod session;

pub use session::media_stream_handler;
