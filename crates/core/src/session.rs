//! Per-call bridge state machine.
//!
//! `BridgeSession` performs no I/O. The runtime feeds it events from both legs
//! and executes the [`Action`]s it returns, in order. Every flag lives here, so
//! the start-conversation gate is checked and set in one step per event.

use crate::{
    agent::{AgentEnvelope, AgentFrame, AudioFormat},
    caller::{CallerEnvelope, CallerFrame},
    error::BridgeError,
    translate,
};
use std::fmt;
use tracing::{debug, info, warn};

/// One of the two websocket connections a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Caller,
    Agent,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Caller => write!(f, "caller"),
            Leg::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Caller accepted; credential fetch in flight.
    Initializing,
    /// Agent leg connecting or open, start gate not yet satisfied.
    AwaitingReadiness,
    /// Start signal sent; full relay.
    Active,
    /// A leg closed; the remaining leg is being closed.
    Closing,
    Closed,
}

/// A side effect the runtime must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendToCaller(CallerEnvelope),
    SendToAgent(AgentEnvelope),
    /// Close this leg. Emitted at most once per leg.
    Close(Leg),
}

#[derive(Debug)]
pub struct BridgeSession {
    state: SessionState,
    output_format: AudioFormat,
    stream_sid: Option<String>,
    call_sid: Option<String>,
    caller_started: bool,
    agent_open: bool,
    conversation_started: bool,
    caller_closed: bool,
    agent_closed: bool,
}

impl BridgeSession {
    pub fn new(output_format: AudioFormat) -> Self {
        Self {
            state: SessionState::Initializing,
            output_format,
            stream_sid: None,
            call_sid: None,
            caller_started: false,
            agent_open: false,
            conversation_started: false,
            caller_closed: false,
            agent_closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn conversation_started(&self) -> bool {
        self.conversation_started
    }

    fn is_terminating(&self) -> bool {
        matches!(self.state, SessionState::Closing | SessionState::Closed)
    }

    fn agent_writable(&self) -> bool {
        self.agent_open && !self.agent_closed
    }

    /// The agent endpoint was obtained and the handshake is starting.
    pub fn on_credential_acquired(&mut self) {
        if self.state == SessionState::Initializing {
            self.state = SessionState::AwaitingReadiness;
        }
    }

    /// The agent leg finished its handshake.
    pub fn on_agent_open(&mut self) -> Vec<Action> {
        if self.is_terminating() {
            // Nothing will ever read from this leg.
            self.agent_open = true;
            return self.close_agent().into_iter().collect();
        }
        self.agent_open = true;
        if self.state == SessionState::Initializing {
            self.state = SessionState::AwaitingReadiness;
        }

        let mut actions = vec![Action::SendToAgent(translate::audio_format_config(
            &self.output_format,
        ))];
        actions.extend(self.evaluate_gate());
        actions
    }

    /// Credential fetch or agent handshake failed. Terminal for the session.
    pub fn on_init_failed(&mut self, error: &BridgeError) -> Vec<Action> {
        warn!(%error, "Session initialization failed");
        self.teardown()
    }

    /// Either leg closed or errored.
    pub fn on_leg_closed(&mut self, leg: Leg) -> Vec<Action> {
        match leg {
            Leg::Caller => self.caller_closed = true,
            Leg::Agent => self.agent_closed = true,
        }
        info!(reason = %BridgeError::PeerClosed(leg), "Leg closed");
        self.teardown()
    }

    /// Marks the teardown begun by a close or failure as complete.
    pub fn finish(&mut self) {
        if self.state == SessionState::Closing {
            self.state = SessionState::Closed;
        }
    }

    pub fn on_caller_text(&mut self, text: &str) -> Vec<Action> {
        match CallerFrame::parse(text) {
            Ok(frame) => self.on_caller_frame(frame),
            Err(error) => {
                let error = BridgeError::Protocol(error);
                warn!(%error, "Dropping malformed caller frame");
                Vec::new()
            }
        }
    }

    pub fn on_caller_frame(&mut self, frame: CallerFrame) -> Vec<Action> {
        if self.is_terminating() {
            return Vec::new();
        }
        match frame {
            CallerFrame::Start(start) => {
                // A repeated start may still fill in a missing stream identifier.
                if self.stream_sid.is_some() {
                    warn!("Ignoring duplicate start event");
                    return Vec::new();
                }
                self.caller_started = true;
                self.stream_sid = start.stream_sid().map(str::to_owned);
                if start.call_sid.is_some() {
                    self.call_sid = start.call_sid.clone();
                }
                info!(
                    stream_sid = ?self.stream_sid,
                    call_sid = ?self.call_sid,
                    custom_parameters = ?start.custom_parameters,
                    media_format = ?start.media_format,
                    "Caller stream started"
                );
                self.evaluate_gate().into_iter().collect()
            }
            CallerFrame::Media(media) => {
                if !self.agent_writable() {
                    debug!("Agent leg not open, dropping caller audio");
                    return Vec::new();
                }
                match translate::caller_media_to_agent(&media) {
                    Ok(envelope) => vec![Action::SendToAgent(envelope)],
                    Err(error) => {
                        debug!(%error, "Dropping caller audio");
                        Vec::new()
                    }
                }
            }
            CallerFrame::Stop => {
                info!("Caller stream stopped");
                self.teardown()
            }
            CallerFrame::Connected => {
                debug!("Caller leg connected");
                Vec::new()
            }
            CallerFrame::Other(event) => {
                debug!(%event, "Ignoring caller event");
                Vec::new()
            }
        }
    }

    pub fn on_agent_text(&mut self, text: &str) -> Vec<Action> {
        match AgentFrame::parse(text) {
            Ok(frame) => self.on_agent_frame(frame),
            Err(error) => {
                let error = BridgeError::Protocol(error);
                warn!(%error, "Dropping malformed agent frame");
                Vec::new()
            }
        }
    }

    pub fn on_agent_frame(&mut self, frame: AgentFrame) -> Vec<Action> {
        if self.is_terminating() {
            return Vec::new();
        }
        match frame {
            AgentFrame::Audio(audio) => {
                match translate::agent_audio_to_caller(self.stream_sid(), &audio) {
                    Ok(envelope) => vec![Action::SendToCaller(envelope)],
                    Err(error) => {
                        debug!(%error, "Dropping agent audio");
                        Vec::new()
                    }
                }
            }
            AgentFrame::Interruption { .. } => match translate::interruption_to_caller(self.stream_sid()) {
                Ok(envelope) => {
                    debug!("Agent interrupted, clearing caller playback");
                    vec![Action::SendToCaller(envelope)]
                }
                Err(error) => {
                    debug!(%error, "Dropping interruption");
                    Vec::new()
                }
            },
            AgentFrame::Ping { event_id, .. } => match event_id {
                Some(event_id) if self.agent_writable() => {
                    vec![Action::SendToAgent(translate::pong(event_id))]
                }
                _ => Vec::new(),
            },
            AgentFrame::UserTranscript(transcript) => {
                info!(%transcript, "User transcript");
                Vec::new()
            }
            AgentFrame::AgentResponse(response) => {
                info!(%response, "Agent response");
                Vec::new()
            }
            AgentFrame::ConversationInitiationMetadata { conversation_id } => {
                info!(?conversation_id, "Agent conversation initiated");
                Vec::new()
            }
            AgentFrame::PartialTranscript(_) | AgentFrame::ConversationConfig => Vec::new(),
            AgentFrame::Other(kind) => {
                debug!(%kind, "Ignoring agent event");
                Vec::new()
            }
        }
    }

    fn evaluate_gate(&mut self) -> Option<Action> {
        let ready = self.caller_started && self.stream_sid.is_some() && self.agent_writable();
        if self.conversation_started || !ready {
            return None;
        }
        self.conversation_started = true;
        self.state = SessionState::Active;
        info!("Gate satisfied, starting conversation");
        Some(Action::SendToAgent(translate::start_signal()))
    }

    fn close_agent(&mut self) -> Option<Action> {
        if self.agent_writable() {
            self.agent_closed = true;
            Some(Action::Close(Leg::Agent))
        } else {
            None
        }
    }

    fn teardown(&mut self) -> Vec<Action> {
        if self.is_terminating() {
            return Vec::new();
        }
        self.state = SessionState::Closing;
        let mut actions: Vec<Action> = self.close_agent().into_iter().collect();
        if !self.caller_closed {
            self.caller_closed = true;
            actions.push(Action::Close(Leg::Caller));
        }
        actions
    }
}
