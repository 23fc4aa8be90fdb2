//! Process wiring: one shared SIP socket, one registration engine, and a
//! Call-ID keyed table of per-dialog contexts, each with its own RTP
//! socket and AI client (§5).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ai_realtime::{AiEvent, AiRealtimeClient, AiSessionConfig};
use call_session::{negotiate_codec, Action, Event, InviteInfo, Session, SessionConfig};
use dashmap::DashMap;
use infra_common::ids::{generate_initial_sequence, generate_initial_timestamp, generate_ssrc};
use rtp_media::{G711Variant, RtpPacer, RtpPacket, RtpSink};
use sip_message::headers::is_auto_answer;
use sip_message::{build_bye_request, build_reinvite_request, build_response, SessionDescription, SipMessage};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::call_context::CallContext;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::transport::{SharedSipSocket, UdpSipTransport};

const RTP_PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=18000;

pub struct Application {
    config: BridgeConfig,
    sip_socket: Arc<SharedSipSocket>,
    calls: DashMap<String, Arc<CallContext>>,
    registration: parking_lot::Mutex<Option<Arc<sip_transaction::RegistrationClient>>>,
    next_rtp_port: AtomicU16,
}

impl Application {
    pub async fn new(config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        let sip_client_port = config.sip_client_port;
        let sip_socket = UdpSocket::bind(("0.0.0.0", sip_client_port)).await?;
        let sip_socket = Arc::new(SharedSipSocket::new(Arc::new(sip_socket), sip_client_port));

        let app = Arc::new(Self {
            config,
            sip_socket,
            calls: DashMap::new(),
            registration: parking_lot::Mutex::new(None),
            next_rtp_port: AtomicU16::new(*RTP_PORT_RANGE.start()),
        });

        if !app.config.skip_sip_registration {
            app.clone().start_registration().await?;
        }

        Ok(app)
    }

    async fn start_registration(self: &Arc<Self>) -> Result<(), BridgeError> {
        let server_addr: SocketAddr = self
            .config
            .sip_server
            .parse()
            .map_err(|_| BridgeError::MissingRequiredConfig("SIP_SERVER (host:port)"))?;
        let transport = Arc::new(UdpSipTransport::new(Arc::clone(&self.sip_socket), server_addr));
        let timers = infra_common::TimerRegistry::new();
        let reg_config = sip_transaction::RegistrationConfig {
            extension: self.config.sip_authorization_user.clone(),
            server: self.config.sip_server.clone(),
            public_ip: self.config.public_ip.to_string(),
            local_port: self.config.sip_client_port,
            username: self.config.sip_authorization_user.clone(),
            password: self.config.sip_password.clone(),
            expires: 3600,
        };
        let client = sip_transaction::RegistrationClient::new(reg_config, Arc::clone(&transport), Arc::clone(&timers));
        client.start().await.map_err(BridgeError::from)?;
        *self.registration.lock() = Some(Arc::clone(&client));

        // §4.3: NAT keep-alive and OPTIONS ping only make sense once we
        // have something registered to keep alive.
        let keepalive = sip_transaction::KeepAlive::new(
            transport,
            Arc::clone(&timers),
            Arc::clone(&client),
            format!("sip:{}", self.config.sip_server),
            format!("{}:{}", self.config.public_ip, self.config.sip_client_port),
        );
        keepalive.start();

        self.start_self_liveness(client, timers);
        Ok(())
    }

    /// §4.3 self-liveness: poll every 5s, and force an immediate
    /// re-registration the moment the registration engine reports itself
    /// degraded rather than waiting for the next scheduled refresh.
    fn start_self_liveness(self: &Arc<Self>, registration: Arc<sip_transaction::RegistrationClient>, timers: Arc<infra_common::TimerRegistry>) {
        timers.set_interval("self_liveness", Duration::from_secs(5), move || {
            let registration = Arc::clone(&registration);
            async move {
                let alive = registration.is_alive();
                info!(alive, state = ?registration.state(), "SIP registration liveness check");
                if !alive && registration.state() != sip_transaction::RegistrationState::NotRegistered {
                    warn!("registration degraded, forcing immediate re-registration");
                    if let Err(err) = registration.start().await {
                        warn!(%err, "forced re-registration failed to send");
                    }
                }
            }
        });
    }

    /// Main receive loop for the shared SIP socket. The socket is re-read
    /// from `sip_socket` every iteration rather than captured once, so a
    /// §4.3 rebind takes effect on the very next datagram.
    pub async fn run(self: Arc<Self>) -> Result<(), BridgeError> {
        let mut buf = vec![0u8; 2048];
        loop {
            let socket = self.sip_socket.socket();
            let (len, src) = socket.recv_from(&mut buf).await?;
            let datagram = buf[..len].to_vec();
            let me = Arc::clone(&self);
            tokio::spawn(async move { me.handle_datagram(&datagram, src).await });
        }
    }

    async fn handle_datagram(self: Arc<Self>, datagram: &[u8], src: SocketAddr) {
        if datagram == b"\r\n\r\n" {
            return; // NAT keep-alive response, nothing to parse
        }
        let message = match SipMessage::parse(datagram) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "discarding malformed SIP datagram");
                return;
            }
        };

        if message.is_request() {
            self.handle_request(message, src).await;
        } else {
            let registration = self.registration.lock().clone();
            if let Some(registration) = registration {
                let _ = registration.handle_response(&message).await;
            }
        }
    }

    async fn handle_request(self: Arc<Self>, request: SipMessage, src: SocketAddr) {
        if let Some(response) = sip_transaction::responder::respond_to(&request) {
            self.send_sip(&response.to_bytes(), src).await;
            return;
        }

        let Some(call_id) = request.call_id().map(str::to_string) else { return };
        match request.method() {
            Some("INVITE") => self.handle_invite(request, call_id, src).await,
            Some("ACK") => self.dispatch(&call_id, Event::Ack).await,
            Some("BYE") => {
                let reason = request.headers.get("Reason").map(str::to_string);
                self.dispatch(&call_id, Event::Bye { source_addr: src, reason }).await;
                let response = build_response(&request, 200, "OK", None);
                self.send_sip(&response.to_bytes(), src).await;
            }
            Some("CANCEL") => {
                self.dispatch(&call_id, Event::Cancel).await;
                let response = build_response(&request, 200, "OK", None);
                self.send_sip(&response.to_bytes(), src).await;
            }
            _ => {
                let response = build_response(&request, 481, "Call/Transaction Does Not Exist", None);
                self.send_sip(&response.to_bytes(), src).await;
            }
        }
    }

    async fn handle_invite(self: Arc<Self>, request: SipMessage, call_id: String, src: SocketAddr) {
        let cseq = request.cseq().map(|c| c.sequence).unwrap_or(0);

        if let Some(context) = self.calls.get(&call_id) {
            let context = Arc::clone(&context);
            let actions = context.session.lock().on_event(Event::RetransmittedInvite { cseq }, Instant::now());
            self.execute(&context, &call_id, actions).await;
            return;
        }

        let codec = request
            .sdp()
            .as_ref()
            .and_then(SessionDescription::audio_media)
            .and_then(negotiate_codec);
        let local_rtp_port = self.allocate_rtp_port();
        let auto_answer = is_auto_answer(&request.headers);
        let session_expires = request
            .headers
            .get("Session-Expires")
            .and_then(|v| v.split(';').next())
            .and_then(|v| v.parse::<u32>().ok());

        let mut config = SessionConfig::default();
        config.welcome_prompt = self.config.ai_instructions.clone();

        let session = Session::new(config);
        let context = CallContext::new(session, request.clone(), src);
        self.calls.insert(call_id.clone(), Arc::clone(&context));

        let info = InviteInfo { cseq, source_addr: src, auto_answer, codec, local_rtp_port, session_expires };
        let actions = context.session.lock().on_event(Event::Invite(info), Instant::now());
        self.execute(&context, &call_id, actions).await;
    }

    async fn dispatch(self: &Arc<Self>, call_id: &str, event: Event) {
        let Some(context) = self.calls.get(call_id).map(|c| Arc::clone(&c)) else { return };
        let actions = context.session.lock().on_event(event, Instant::now());
        self.execute(&context, call_id, actions).await;
    }

    fn allocate_rtp_port(&self) -> u16 {
        if let Some(fixed) = self.config.rtp_port {
            return fixed;
        }
        let port = self.next_rtp_port.fetch_add(2, Ordering::Relaxed);
        if port > *RTP_PORT_RANGE.end() {
            self.next_rtp_port.store(*RTP_PORT_RANGE.start(), Ordering::Relaxed);
        }
        port
    }

    async fn execute(self: &Arc<Self>, context: &Arc<CallContext>, call_id: &str, actions: Vec<Action>) {
        for action in actions {
            self.execute_one(context, call_id, action).await;
        }
    }

    async fn execute_one(self: &Arc<Self>, context: &Arc<CallContext>, call_id: &str, action: Action) {
        match action {
            Action::SendTrying => self.send_final_or_provisional(context, 100, "Trying", None).await,
            Action::SendRinging { to_tag } => self.send_final_or_provisional(context, 180, "Ringing", Some(to_tag)).await,
            Action::SendOk { codec, local_rtp_port, to_tag } => self.send_ok(context, codec, local_rtp_port, to_tag).await,
            Action::SendNotAcceptable => self.send_final_or_provisional(context, 488, "Not Acceptable Here", None).await,
            Action::ResendLastProvisional => {
                if let Some(bytes) = context.last_provisional.lock().clone() {
                    self.send_sip(&bytes, context.remote_addr).await;
                }
            }
            Action::ArmTimer { name, delay } => self.arm_session_timer(context, call_id, name, delay),
            Action::CancelTimer { name } => context.timers.cancel(&name),
            Action::StartMediaPacer => self.start_media(context, call_id).await,
            Action::OpenAiSession => self.open_ai_session(context, call_id).await,
            Action::SendAiWelcome { prompt } => {
                if let Some(ai) = context.ai_client.lock().clone() {
                    ai.send_welcome(&prompt).await;
                    context.session.lock().mark_ai_response_in_progress();
                }
            }
            Action::SendBye => self.send_bye(context).await,
            Action::SendBye200 | Action::IgnoreBye | Action::DeferBye => {}
            Action::Send487ToInvite => {
                let response = build_response(&context.original_invite, 487, "Request Terminated", None);
                self.send_sip(&response.to_bytes(), context.remote_addr).await;
            }
            Action::SendCancel200 => {}
            Action::SendSessionRefresh => self.send_session_refresh(context).await,
            Action::ScheduleSessionRefresh { delay } => {
                self.arm_session_timer(context, call_id, call_session::session::SESSION_REFRESH_TIMER_NAME.to_string(), delay)
            }
            Action::Teardown => self.teardown(context, call_id).await,
            Action::EmitSessionRemoved => {
                info!(call_id, "session removed");
                self.calls.remove(call_id);
            }
        }
    }

    async fn send_final_or_provisional(&self, context: &Arc<CallContext>, status: u16, reason: &str, to_tag: Option<String>) {
        let response = build_response(&context.original_invite, status, reason, to_tag.as_deref());
        let bytes = response.to_bytes();
        if (100..200).contains(&status) {
            *context.last_provisional.lock() = Some(bytes.clone());
        }
        self.send_sip(&bytes, context.remote_addr).await;
    }

    async fn send_ok(&self, context: &Arc<CallContext>, codec: G711Variant, local_rtp_port: u16, to_tag: String) {
        let mut response = build_response(&context.original_invite, 200, "OK", Some(&to_tag));
        let answer = SessionDescription::audio_answer(
            &self.config.public_ip.to_string(),
            local_rtp_port,
            codec.payload_type(),
            codec.rtpmap_name(),
        );
        response.headers.push("Content-Type", "application/sdp");
        response.body = answer;
        self.send_sip(&response.to_bytes(), context.remote_addr).await;
    }

    /// Locally-initiated hangup (the AI's `end_call` tool, §4.5): this
    /// process becomes the BYE's UAC since the caller never sent one.
    async fn send_bye(&self, context: &Arc<CallContext>) {
        let Some(to_tag) = context.session.lock().to_tag().map(str::to_string) else { return };
        let local_contact = format!("{}:{}", self.config.public_ip, self.config.sip_client_port);
        let request = build_bye_request(&context.original_invite, &local_contact, &to_tag, context.next_local_cseq());
        self.send_sip(&request.to_bytes(), context.remote_addr).await;
    }

    /// RFC 4028 session refresh (§4.4): this process re-sends the original
    /// offer in a fresh in-dialog INVITE, keeping the Session-Expires
    /// interval the far end already agreed to.
    async fn send_session_refresh(&self, context: &Arc<CallContext>) {
        let (to_tag, codec, local_rtp_port) = {
            let session = context.session.lock();
            let Some(to_tag) = session.to_tag().map(str::to_string) else { return };
            let Some(codec) = session.codec() else { return };
            (to_tag, codec, session.local_rtp_port())
        };
        let Some(session_expires) = context.original_invite.headers.get("Session-Expires").and_then(|v| v.split(';').next()).and_then(|v| v.parse::<u32>().ok()) else {
            return;
        };
        let local_contact = format!("{}:{}", self.config.public_ip, self.config.sip_client_port);
        let offer = SessionDescription::audio_answer(
            &self.config.public_ip.to_string(),
            local_rtp_port,
            codec.payload_type(),
            codec.rtpmap_name(),
        );
        let request = build_reinvite_request(
            &context.original_invite,
            &local_contact,
            &to_tag,
            context.next_local_cseq(),
            session_expires,
            &offer,
        );
        self.send_sip(&request.to_bytes(), context.remote_addr).await;
    }

    /// Send on the shared socket, tracking consecutive failures against the
    /// registration engine's §4.3 socket-resilience counter.
    async fn send_sip(&self, datagram: &[u8], addr: SocketAddr) {
        if self.sip_socket.send_to(datagram, addr).await.is_err() {
            self.on_transport_error().await;
        }
    }

    async fn on_transport_error(&self) {
        let Some(registration) = self.registration.lock().clone() else { return };
        if registration.record_transport_error() < 3 {
            return;
        }
        warn!("3 consecutive SIP transport errors, rebinding the local socket");
        match self.sip_socket.rebind().await {
            Ok(()) => registration.on_socket_rebound().await,
            Err(err) => warn!(%err, "socket rebind failed"),
        }
    }

    fn arm_session_timer(self: &Arc<Self>, context: &Arc<CallContext>, call_id: &str, name: String, delay: Duration) {
        let me = Arc::clone(self);
        let call_id = call_id.to_string();
        let event = match name.as_str() {
            call_session::session::RINGING_TIMER_NAME => Event::RingingTimerFired,
            call_session::session::ANSWER_TIMER_NAME => Event::AnswerTimerFired,
            call_session::session::ACK_TIMER_NAME => Event::AckTimerFired,
            call_session::session::MEDIA_VALIDATION_TIMER_NAME => Event::MediaValidationTimerFired,
            call_session::session::SESSION_REFRESH_TIMER_NAME => Event::SessionRefreshTimerFired,
            _ => return,
        };
        context.timers.set(name, delay, async move {
            me.dispatch(&call_id, event).await;
        });
    }

    async fn start_media(self: &Arc<Self>, context: &Arc<CallContext>, call_id: &str) {
        let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)).await else { return };
        let remote_rtp: SocketAddr = SocketAddr::new(context.remote_addr.ip(), context.remote_addr.port());
        let socket = Arc::new(socket);
        let sink = Arc::new(UdpRtpSink { socket: Arc::clone(&socket), remote: remote_rtp });

        let sink = Arc::new(AudioActivityRtpSink { inner: sink, app: Arc::clone(self), call_id: call_id.to_string() });

        let pacer = RtpPacer::new(generate_ssrc(), 0, generate_initial_sequence(), generate_initial_timestamp());
        *context.rtp_pacer.lock() = Some(Arc::clone(&pacer));
        tokio::spawn({
            let pacer = Arc::clone(&pacer);
            async move { pacer.run(sink).await }
        });

        let me = Arc::clone(self);
        let call_id = call_id.to_string();
        let context = Arc::clone(context);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                let Ok((len, _)) = socket.recv_from(&mut buf).await else { break };
                match RtpPacket::parse(&buf[..len]) {
                    Ok(packet) => {
                        context.rtp_stats.record_received();
                        me.dispatch(&call_id, Event::RtpPacketArrived).await;
                        if let Some(ai) = context.ai_client.lock().clone() {
                            ai.send_audio_frame(&packet.payload).await;
                        }
                    }
                    Err(err) => {
                        context.rtp_stats.record_malformed();
                        warn!(%err, call_id, "discarding malformed RTP packet");
                    }
                }
            }
        });
    }

    async fn open_ai_session(self: &Arc<Self>, context: &Arc<CallContext>, call_id: &str) {
        let (tx, mut rx) = mpsc::channel::<AiEvent>(32);
        let ai_config = AiSessionConfig {
            url: self.config.ai_realtime_url.clone(),
            api_key: self.config.ai_api_key.clone(),
            voice: self.config.ai_voice.clone(),
            instructions: self.config.ai_instructions.clone(),
            ..AiSessionConfig::default()
        };

        let client = match AiRealtimeClient::connect(ai_config, tx).await {
            Ok(client) => client,
            Err(err) => {
                warn!(%err, "failed to open AI session");
                return;
            }
        };
        *context.ai_client.lock() = Some(Arc::clone(&client));

        let me = Arc::clone(self);
        let call_id = call_id.to_string();
        let context = Arc::clone(context);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    AiEvent::Configured { .. } => me.dispatch(&call_id, Event::AiSessionUpdated).await,
                    AiEvent::AudioDelta(g711_payload) => {
                        // Session requests AudioFormat::G711_ULAW, so these bytes
                        // are already mu-law encoded -- no PCM round-trip needed.
                        if let Some(pacer) = context.rtp_pacer.lock().clone() {
                            pacer.enqueue(&g711_payload).await;
                        }
                    }
                    AiEvent::ResponseDone => me.dispatch(&call_id, Event::AiResponseDone).await,
                    AiEvent::ToolCall { call_id: tool_call_id, name, arguments: _ } => {
                        let ai = context.ai_client.lock().clone();
                        match name.as_str() {
                            "end_call" => {
                                if let Some(ai) = ai {
                                    ai.send_tool_result(&tool_call_id, "{\"acknowledged\":true}").await;
                                    context.session.lock().mark_ai_response_in_progress();
                                }
                                me.dispatch(&call_id, Event::LocalHangup).await;
                            }
                            // Transfer/REFER is out of scope beyond acknowledging the call.
                            "transfer_call" => {
                                if let Some(ai) = ai {
                                    ai.send_tool_result(&tool_call_id, "{\"acknowledged\":true}").await;
                                    context.session.lock().mark_ai_response_in_progress();
                                }
                            }
                            other => {
                                warn!(call_id, tool = other, "unrecognized tool call");
                                if let Some(ai) = ai {
                                    ai.send_tool_result(&tool_call_id, "{\"error\":\"unknown tool\"}").await;
                                    context.session.lock().mark_ai_response_in_progress();
                                }
                            }
                        }
                    }
                    AiEvent::SpeechStarted | AiEvent::SpeechStopped => {}
                    AiEvent::FatalError { message } => {
                        warn!(call_id, message, "fatal AI error, tearing down session");
                        break;
                    }
                    AiEvent::Disconnected => {}
                }
            }
        });
    }

    async fn teardown(&self, context: &Arc<CallContext>, _call_id: &str) {
        context.timers.cancel_all();
        if let Some(ai) = context.ai_client.lock().take() {
            ai.leave().await;
        }
        *context.rtp_pacer.lock() = None;
    }
}

struct UdpRtpSink {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
}

#[async_trait::async_trait]
impl RtpSink for UdpRtpSink {
    async fn send_rtp(&self, packet: bytes::Bytes) {
        let _ = self.socket.send_to(&packet, self.remote).await;
    }
}

/// Wraps the real UDP sink to report outbound audio back into the session
/// as activity -- the BYE staleness fallback (§4.4) must see the AI
/// speaking, not just what the caller sends.
struct AudioActivityRtpSink {
    inner: Arc<UdpRtpSink>,
    app: Arc<Application>,
    call_id: String,
}

#[async_trait::async_trait]
impl RtpSink for AudioActivityRtpSink {
    async fn send_rtp(&self, packet: bytes::Bytes) {
        self.inner.send_rtp(packet).await;
        self.app.dispatch(&self.call_id, Event::RtpPacketSent).await;
    }
}
