//! Manages the bridge between one caller websocket and its agent leg.
//!
//! Each call runs in a single task. Events from the caller socket, the agent
//! socket and the pending initialization step are multiplexed with
//! `tokio::select!` and fed to a `BridgeSession`, so session state is only
//! ever touched by one event at a time.

use super::agent_leg::{self, AgentSocket};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use callbridge_core::{
    BridgeError,
    agent::AgentEnvelope,
    caller::CallerEnvelope,
    session::{Action, BridgeSession, Leg, SessionState},
};
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{self, protocol::Message as WsMessage};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type AgentSink = SplitSink<AgentSocket, WsMessage>;
type AgentStream = SplitStream<AgentSocket>;

/// The next step of agent-leg setup to complete.
enum InitStep {
    Endpoint(String),
    Connected(AgentSocket),
}

type PendingInit = BoxFuture<'static, Result<InitStep, BridgeError>>;

/// Axum handler to upgrade the caller's HTTP connection to a WebSocket.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// The write halves of both legs.
struct Legs {
    caller_tx: SplitSink<WebSocket, Message>,
    agent_tx: Option<AgentSink>,
}

impl Legs {
    /// Executes actions in order. Returns the first leg a send failed on;
    /// remaining actions still run so closes are never skipped.
    async fn apply(&mut self, actions: Vec<Action>) -> Option<Leg> {
        let mut failed = None;
        for action in actions {
            match action {
                Action::SendToCaller(envelope) => {
                    if let Err(e) = send_to_caller(&mut self.caller_tx, &envelope).await {
                        warn!(error = ?e, "Failed to send to caller leg");
                        failed.get_or_insert(Leg::Caller);
                    }
                }
                Action::SendToAgent(envelope) => {
                    let Some(agent_tx) = self.agent_tx.as_mut() else {
                        debug!("Agent leg gone, dropping outbound frame");
                        continue;
                    };
                    if let Err(e) = send_to_agent(agent_tx, &envelope).await {
                        warn!(error = ?e, "Failed to send to agent leg");
                        failed.get_or_insert(Leg::Agent);
                    }
                }
                Action::Close(Leg::Caller) => {
                    if let Err(e) = self.caller_tx.close().await {
                        debug!(error = %e, "Error closing caller leg");
                    }
                }
                Action::Close(Leg::Agent) => {
                    if let Some(mut agent_tx) = self.agent_tx.take() {
                        if let Err(e) = agent_tx.close().await {
                            debug!(error = %e, "Error closing agent leg");
                        }
                    }
                }
            }
        }
        failed
    }
}

/// Main handler for an individual caller connection.
#[instrument(name = "media_stream", skip_all, fields(connection_id = %Uuid::new_v4(), stream_sid))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Caller leg connected. Opening agent leg...");

    let (caller_tx, mut caller_rx) = socket.split();
    let mut legs = Legs {
        caller_tx,
        agent_tx: None,
    };
    let mut agent_rx: Option<AgentStream> = None;
    let mut session = BridgeSession::new(state.config.output_format.clone());
    let limit = state.config.connect_timeout;

    let mut init: Option<PendingInit> = Some(
        agent_leg::fetch_endpoint(
            state.credentials.clone(),
            state.config.agent_id.clone(),
            limit,
        )
        .map(|result| result.map(InitStep::Endpoint))
        .boxed(),
    );
    let mut stream_sid_recorded = false;

    loop {
        let mut actions = tokio::select! {
            step = next_init_step(&mut init) => {
                init = None;
                match step {
                    Ok(InitStep::Endpoint(url)) => {
                        debug!("Signed URL acquired, connecting to agent");
                        session.on_credential_acquired();
                        init = Some(
                            agent_leg::connect(url, limit)
                                .map(|result| result.map(InitStep::Connected))
                                .boxed(),
                        );
                        Vec::new()
                    }
                    Ok(InitStep::Connected(socket)) => {
                        info!("Agent leg connected");
                        let (agent_tx, rx) = socket.split();
                        legs.agent_tx = Some(agent_tx);
                        agent_rx = Some(rx);
                        session.on_agent_open()
                    }
                    Err(error) => {
                        error!(%error, "Agent leg initialization failed");
                        session.on_init_failed(&error)
                    }
                }
            }
            frame = caller_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => session.on_caller_text(text.as_str()),
                Some(Ok(Message::Close(_))) | None => session.on_leg_closed(Leg::Caller),
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    warn!(error = ?e, "Error receiving from caller leg");
                    session.on_leg_closed(Leg::Caller)
                }
            },
            frame = next_agent_frame(&mut agent_rx) => match frame {
                Some(Ok(WsMessage::Text(text))) => session.on_agent_text(text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => session.on_leg_closed(Leg::Agent),
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    warn!(error = ?e, "Error receiving from agent leg");
                    session.on_leg_closed(Leg::Agent)
                }
            },
        };

        while !actions.is_empty() {
            actions = match legs.apply(actions).await {
                Some(leg) => session.on_leg_closed(leg),
                None => Vec::new(),
            };
        }

        if !stream_sid_recorded {
            if let Some(stream_sid) = session.stream_sid() {
                tracing::Span::current().record("stream_sid", stream_sid);
                stream_sid_recorded = true;
            }
        }

        if session.state() == SessionState::Closing {
            session.finish();
            break;
        }
    }

    info!(
        call_sid = ?session.call_sid(),
        conversation_started = session.conversation_started(),
        "Bridge session closed"
    );
}

async fn next_init_step(init: &mut Option<PendingInit>) -> Result<InitStep, BridgeError> {
    match init {
        Some(step) => step.await,
        None => std::future::pending().await,
    }
}

async fn next_agent_frame(
    agent_rx: &mut Option<AgentStream>,
) -> Option<Result<WsMessage, tungstenite::Error>> {
    match agent_rx {
        Some(rx) => rx.next().await,
        None => std::future::pending().await,
    }
}

/// Serializes and sends a frame to the caller leg.
async fn send_to_caller(
    caller_tx: &mut SplitSink<WebSocket, Message>,
    envelope: &CallerEnvelope,
) -> Result<()> {
    let serialized = envelope.to_json()?;
    caller_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

/// Serializes and sends a frame to the agent leg.
async fn send_to_agent(agent_tx: &mut AgentSink, envelope: &AgentEnvelope) -> Result<()> {
    let serialized = envelope.to_json()?;
    agent_tx.send(WsMessage::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, router::create_router};
    use axum::{Router, routing::get};
    use callbridge_core::{agent::AudioFormat, credentials::MockCredentialFetcher};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::{
        net::TcpListener,
        sync::{Mutex, mpsc},
        time::timeout,
    };
    use tokio_tungstenite::connect_async;

    /// The test's client socket standing in for the telephony platform.
    type CallerClient = AgentSocket;

    const WAIT: Duration = Duration::from_secs(5);
    const CLOSE_COMMAND: &str = "__close__";

    #[derive(Debug, PartialEq)]
    enum AgentEvent {
        Frame(Value),
        Closed,
    }

    /// A stand-in provider: records what the bridge sends and replays what the test queues.
    struct FakeAgent {
        url: String,
        received: mpsc::UnboundedReceiver<AgentEvent>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    #[derive(Clone)]
    struct FakeAgentState {
        received: mpsc::UnboundedSender<AgentEvent>,
        outgoing: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    }

    async fn fake_agent_socket(socket: WebSocket, state: FakeAgentState) {
        let Some(mut outgoing) = state.outgoing.lock().await.take() else {
            return;
        };
        let (mut tx, mut rx) = socket.split();
        loop {
            tokio::select! {
                Some(text) = outgoing.recv() => {
                    if text == CLOSE_COMMAND {
                        let _ = tx.close().await;
                        break;
                    }
                    if tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                frame = rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                        let _ = state.received.send(AgentEvent::Frame(value));
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        let _ = state.received.send(AgentEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn serve(app: Router) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn spawn_fake_agent() -> FakeAgent {
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let state = FakeAgentState {
            received: received_tx,
            outgoing: Arc::new(Mutex::new(Some(outgoing_rx))),
        };
        let app = Router::new()
            .route(
                "/convai",
                get(
                    |ws: WebSocketUpgrade, State(state): State<FakeAgentState>| async move {
                        ws.on_upgrade(move |socket| fake_agent_socket(socket, state))
                    },
                ),
            )
            .with_state(state);
        let addr = serve(app).await;
        FakeAgent {
            url: format!("ws://{addr}/convai"),
            received,
            outgoing,
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            api_key: "test-key".to_string(),
            agent_id: "agent_test".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            output_format: AudioFormat::default(),
            connect_timeout: Duration::from_secs(1),
            log_level: tracing::Level::DEBUG,
        }
    }

    fn fetcher_returning(url: String) -> MockCredentialFetcher {
        let mut mock = MockCredentialFetcher::new();
        mock.expect_signed_url()
            .withf(|agent_id: &str| agent_id == "agent_test")
            .returning(move |_| Ok(url.clone()));
        mock
    }

    async fn spawn_bridge(fetcher: MockCredentialFetcher) -> String {
        let state = Arc::new(AppState {
            config: Arc::new(test_config()),
            credentials: Arc::new(fetcher),
        });
        let addr = serve(create_router(state)).await;
        format!("ws://{addr}/media-stream")
    }

    async fn connect_caller(bridge_url: &str) -> CallerClient {
        let (caller, _) = connect_async(bridge_url).await.unwrap();
        caller
    }

    async fn send_caller(caller: &mut CallerClient, frame: Value) {
        caller
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    async fn next_agent_event(agent: &mut FakeAgent) -> AgentEvent {
        timeout(WAIT, agent.received.recv())
            .await
            .expect("timed out waiting for the agent leg")
            .expect("fake agent stopped")
    }

    /// The next JSON frame on the caller leg, or `None` once it is closed.
    async fn next_caller_frame(caller: &mut CallerClient) -> Option<Value> {
        loop {
            match timeout(WAIT, caller.next())
                .await
                .expect("timed out waiting for the caller leg")
            {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Connects a caller, sends `start` and waits for the agent's config + start frames.
    async fn start_call(agent: &mut FakeAgent) -> CallerClient {
        let bridge_url = spawn_bridge(fetcher_returning(agent.url.clone())).await;
        let mut caller = connect_caller(&bridge_url).await;
        send_caller(&mut caller, json!({ "event": "connected", "protocol": "Call" })).await;
        send_caller(&mut caller, json!({ "event": "start", "start": { "streamSid": "CA123" } })).await;

        assert_eq!(
            next_agent_event(agent).await,
            AgentEvent::Frame(json!({
                "type": "conversation_config",
                "conversation_config": { "audio": { "output": { "encoding": "ulaw", "sample_rate": 8000 } } }
            }))
        );
        assert_eq!(
            next_agent_event(agent).await,
            AgentEvent::Frame(json!({ "type": "start" }))
        );
        caller
    }

    #[tokio::test]
    async fn test_full_call_relays_both_directions() {
        let mut agent = spawn_fake_agent().await;
        let mut caller = start_call(&mut agent).await;

        agent.outgoing.send("not json".to_string()).unwrap();
        agent
            .outgoing
            .send(json!({ "type": "audio", "audio_event": { "audio_base_64": "QUJD" } }).to_string())
            .unwrap();
        assert_eq!(
            next_caller_frame(&mut caller).await,
            Some(json!({ "event": "media", "streamSid": "CA123", "media": { "payload": "QUJD" } }))
        );

        agent
            .outgoing
            .send(json!({ "type": "interruption", "interruption_event": { "event_id": 4 } }).to_string())
            .unwrap();
        assert_eq!(
            next_caller_frame(&mut caller).await,
            Some(json!({ "event": "clear", "streamSid": "CA123" }))
        );

        agent
            .outgoing
            .send(json!({ "type": "ping", "ping_event": { "event_id": 11, "ping_ms": 20 } }).to_string())
            .unwrap();
        assert_eq!(
            next_agent_event(&mut agent).await,
            AgentEvent::Frame(json!({ "type": "pong", "event_id": 11 }))
        );

        caller
            .send(WsMessage::Text("{ definitely not json".to_string().into()))
            .await
            .unwrap();
        send_caller(&mut caller, json!({ "event": "media", "media": { "payload": "//8A" } })).await;
        assert_eq!(
            next_agent_event(&mut agent).await,
            AgentEvent::Frame(json!({ "user_audio_chunk": "//8A" }))
        );

        send_caller(&mut caller, json!({ "event": "stop" })).await;
        assert_eq!(next_agent_event(&mut agent).await, AgentEvent::Closed);
        assert_eq!(next_caller_frame(&mut caller).await, None);
    }

    #[tokio::test]
    async fn test_caller_disconnect_closes_agent_leg() {
        let mut agent = spawn_fake_agent().await;
        let mut caller = start_call(&mut agent).await;

        caller.send(WsMessage::Close(None)).await.unwrap();
        assert_eq!(next_agent_event(&mut agent).await, AgentEvent::Closed);
    }

    #[tokio::test]
    async fn test_agent_disconnect_closes_caller_leg() {
        let mut agent = spawn_fake_agent().await;
        let mut caller = start_call(&mut agent).await;

        agent.outgoing.send(CLOSE_COMMAND.to_string()).unwrap();
        assert_eq!(next_caller_frame(&mut caller).await, None);
    }

    #[tokio::test]
    async fn test_credential_failure_closes_caller_leg() {
        let mut mock = MockCredentialFetcher::new();
        mock.expect_signed_url().times(1).returning(|_| {
            Err(BridgeError::UpstreamAuth {
                status: 401,
                body: "invalid api key".to_string(),
            })
        });
        let bridge_url = spawn_bridge(mock).await;
        let mut caller = connect_caller(&bridge_url).await;

        assert_eq!(next_caller_frame(&mut caller).await, None);
    }

    #[tokio::test]
    async fn test_agent_handshake_timeout_closes_caller_leg() {
        // Never completes a websocket handshake.
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();

        let bridge_url = spawn_bridge(fetcher_returning(format!("ws://{silent_addr}/convai"))).await;
        let mut caller = connect_caller(&bridge_url).await;

        assert_eq!(next_caller_frame(&mut caller).await, None);
        drop(silent);
    }
}
