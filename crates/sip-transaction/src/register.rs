//! REGISTER client state machine (§4.3): initial REGISTER, Timer A
//! retransmission with doubling backoff, digest challenge response, refresh
//! scheduling, and indefinite retry after final failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use infra_common::ids::{generate_branch, generate_call_id, generate_cnonce, generate_tag};
use infra_common::TimerRegistry;
use parking_lot::Mutex;
use sip_message::headers::{parse_digest_challenge, DigestChallenge};
use sip_message::{HeaderMap, SipMessage, StartLine};
use tracing::{info, warn};

use crate::digest::{build_authorization_header, DigestInputs};
use crate::error::TransactionError;
use crate::transport::SipTransport;

const INITIAL_TIMER_A: Duration = Duration::from_millis(500);
/// RFC 3261 Timer T2: the doubling retransmit interval caps here.
const T2: Duration = Duration::from_secs(4);
const MAX_RETRANSMITS: u32 = 6;

/// Timer A's next retransmit delay: doubles each time, capped at T2.
fn next_timer_a_delay(prior: Duration) -> Duration {
    (prior * 2).min(T2)
}
const FAILURE_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_EXPIRES: u32 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    NotRegistered,
    Registering,
    Registered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub extension: String,
    pub server: String,
    pub public_ip: String,
    pub local_port: u16,
    pub username: String,
    pub password: String,
    pub expires: u32,
}

impl RegistrationConfig {
    fn contact(&self) -> String {
        format!("<sip:{}@{}:{}>", self.extension, self.public_ip, self.local_port)
    }

    fn request_uri(&self) -> String {
        format!("sip:{}", self.server)
    }

    fn aor(&self) -> String {
        format!("<sip:{}@{}>", self.extension, self.server)
    }
}

struct Cycle {
    call_id: String,
    from_tag: String,
    branch: String,
    cseq: u32,
    last_request: Vec<u8>,
    retransmit_count: u32,
    authorization: Option<String>,
}

struct Inner {
    state: RegistrationState,
    cycle: Option<Cycle>,
    last_success: Option<Instant>,
    granted_expires: u32,
    registering_since: Option<Instant>,
}

/// Drives one registration's lifecycle against a single SIP server.
pub struct RegistrationClient {
    config: RegistrationConfig,
    transport: Arc<dyn SipTransport>,
    timers: Arc<TimerRegistry>,
    inner: Mutex<Inner>,
    error_count: AtomicU32,
}

impl RegistrationClient {
    pub fn new(config: RegistrationConfig, transport: Arc<dyn SipTransport>, timers: Arc<TimerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            timers,
            inner: Mutex::new(Inner {
                state: RegistrationState::NotRegistered,
                cycle: None,
                last_success: None,
                granted_expires: DEFAULT_EXPIRES,
                registering_since: None,
            }),
            error_count: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> RegistrationState {
        self.inner.lock().state
    }

    /// Start (or restart) a registration cycle: fresh Call-ID, CSeq=1, no
    /// Authorization header.
    pub async fn start(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.begin_cycle(None).await
    }

    /// Begin a new registration cycle with a fresh Call-ID. CSeq strictly
    /// increases across cycles (it does not reset to 1 on re-registration),
    /// per the invariant that the client's CSeq for this AOR never goes
    /// backwards even when the Call-ID changes.
    async fn begin_cycle(self: &Arc<Self>, authorization: Option<String>) -> Result<(), TransactionError> {
        let call_id = generate_call_id(&self.config.server);
        let from_tag = generate_tag();
        let branch = generate_branch();
        let cseq = self.inner.lock().cycle.as_ref().map(|c| c.cseq + 1).unwrap_or(1);
        let request = self.build_register(&call_id, &from_tag, &branch, cseq, authorization.as_deref());

        {
            let mut inner = self.inner.lock();
            inner.state = RegistrationState::Registering;
            inner.registering_since = Some(Instant::now());
            inner.cycle = Some(Cycle {
                call_id,
                from_tag,
                branch,
                cseq,
                last_request: request.clone(),
                retransmit_count: 0,
                authorization,
            });
        }

        self.transport.send(&request).await?;
        self.arm_timer_a(INITIAL_TIMER_A);
        Ok(())
    }

    fn build_register(
        &self,
        call_id: &str,
        from_tag: &str,
        branch: &str,
        cseq: u32,
        authorization: Option<&str>,
    ) -> Vec<u8> {
        let mut headers = HeaderMap::new();
        headers.push(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};branch={}",
                self.config.public_ip, self.config.local_port, branch
            ),
        );
        headers.push("From", format!("{};tag={}", self.config.aor(), from_tag));
        headers.push("To", self.config.aor());
        headers.push("Call-ID", call_id.to_string());
        headers.push("CSeq", format!("{cseq} REGISTER"));
        headers.push("Contact", self.config.contact());
        headers.push("Expires", self.config.expires.to_string());
        headers.push("Max-Forwards", "70");
        if let Some(auth) = authorization {
            headers.push("Authorization", auth.to_string());
        }

        let message = SipMessage {
            start_line: StartLine::Request {
                method: "REGISTER".to_string(),
                uri: self.config.request_uri(),
            },
            headers,
            body: String::new(),
        };
        message.to_bytes()
    }

    fn arm_timer_a(self: &Arc<Self>, delay: Duration) {
        let me = Arc::clone(self);
        self.timers.set("register_timer_a", delay, async move {
            me.on_timer_a_fire(delay).await;
        });
    }

    async fn on_timer_a_fire(self: &Arc<Self>, prior_delay: Duration) {
        let request = {
            let mut inner = self.inner.lock();
            let Some(cycle) = inner.cycle.as_mut() else { return };
            cycle.retransmit_count += 1;
            if cycle.retransmit_count > MAX_RETRANSMITS {
                inner.state = RegistrationState::Failed;
                None
            } else {
                Some(cycle.last_request.clone())
            }
        };

        match request {
            None => {
                warn!("registration failed after {MAX_RETRANSMITS} retransmissions, backing off");
                self.schedule_backoff_retry();
            }
            Some(request) => {
                if let Err(err) = self.transport.send(&request).await {
                    warn!(%err, "retransmit send failed");
                }
                self.arm_timer_a(next_timer_a_delay(prior_delay));
            }
        }
    }

    fn schedule_backoff_retry(self: &Arc<Self>) {
        let me = Arc::clone(self);
        self.timers.set("register_backoff", FAILURE_BACKOFF, async move {
            if let Err(err) = me.begin_cycle(None).await {
                warn!(%err, "re-registration attempt failed to send");
            }
        });
    }

    fn schedule_refresh(self: &Arc<Self>, granted_expires: u32) {
        let delay = Duration::from_secs((granted_expires as u64 * 50) / 100);
        let me = Arc::clone(self);
        self.timers.set("register_refresh", delay, async move {
            if let Err(err) = me.begin_cycle(None).await {
                warn!(%err, "scheduled re-registration failed to send");
            }
        });
    }

    /// Feed a response datagram belonging to this registration's
    /// transaction into the state machine.
    pub async fn handle_response(self: &Arc<Self>, response: &SipMessage) -> Result<(), TransactionError> {
        let status = response.status().unwrap_or(0);
        match status {
            200..=299 => self.on_success(response).await,
            401 | 407 => self.on_challenge(response).await,
            403 => self.on_final_failure().await,
            300..=699 => self.on_final_failure().await,
            _ => Ok(()), // provisional
        }
    }

    async fn on_success(self: &Arc<Self>, response: &SipMessage) -> Result<(), TransactionError> {
        self.timers.cancel("register_timer_a");
        let granted = response
            .headers
            .get("Expires")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(self.config.expires);

        {
            let mut inner = self.inner.lock();
            inner.state = RegistrationState::Registered;
            inner.last_success = Some(Instant::now());
            inner.granted_expires = granted;
        }
        self.error_count.store(0, Ordering::Relaxed);
        info!(granted_expires = granted, "registration succeeded");
        self.schedule_refresh(granted);
        Ok(())
    }

    async fn on_challenge(self: &Arc<Self>, response: &SipMessage) -> Result<(), TransactionError> {
        self.timers.cancel("register_timer_a");
        let header_name = if response.status() == Some(401) {
            "WWW-Authenticate"
        } else {
            "Proxy-Authenticate"
        };
        let challenge: DigestChallenge = response
            .headers
            .get(header_name)
            .and_then(parse_digest_challenge)
            .ok_or(TransactionError::IncompleteChallenge)?;
        let realm = challenge.realm.clone().ok_or(TransactionError::IncompleteChallenge)?;
        let nonce = challenge.nonce.clone().ok_or(TransactionError::IncompleteChallenge)?;

        let cnonce = generate_cnonce();
        let inputs = DigestInputs {
            username: &self.config.username,
            realm: &realm,
            password: &self.config.password,
            method: "REGISTER",
            uri: &self.config.request_uri(),
            nonce: &nonce,
            qop: challenge.qop.as_deref(),
            nc: "00000001",
            cnonce: &cnonce,
        };
        let authorization = build_authorization_header(&inputs, challenge.opaque.as_deref(), challenge.algorithm.as_deref());

        // A fresh Call-ID for the authenticated request, matching observed
        // real-client behavior and avoiding server-side replay ambiguity.
        self.begin_cycle(Some(authorization)).await
    }

    async fn on_final_failure(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.timers.cancel("register_timer_a");
        self.inner.lock().state = RegistrationState::Failed;
        self.schedule_backoff_retry();
        Ok(())
    }

    /// §4.3 self-liveness check: ALIVE iff registered, within the granted
    /// lease, and not stuck mid-registration for more than 30s.
    pub fn is_alive(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            RegistrationState::Registered => {
                let Some(last_success) = inner.last_success else { return false };
                last_success.elapsed() < Duration::from_secs(inner.granted_expires as u64)
            }
            RegistrationState::Registering => inner
                .registering_since
                .map(|since| since.elapsed() < Duration::from_secs(30))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Record a transport error; at 3 consecutive errors the caller should
    /// re-bind the socket (§4.3 socket resilience) and call
    /// [`RegistrationClient::on_socket_rebound`].
    pub fn record_transport_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn on_socket_rebound(self: &Arc<Self>) {
        self.error_count.store(0, Ordering::Relaxed);
        let me = Arc::clone(self);
        self.timers.set("register_after_rebind", Duration::from_secs(2), async move {
            let _ = me.start().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: TokioMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl SipTransport for RecordingTransport {
        async fn send(&self, datagram: &[u8]) -> std::io::Result<()> {
            self.sent.lock().await.push(datagram.to_vec());
            Ok(())
        }
    }

    fn config() -> RegistrationConfig {
        RegistrationConfig {
            extension: "1000".to_string(),
            server: "pbx.example:5060".to_string(),
            public_ip: "203.0.113.9".to_string(),
            local_port: 5060,
            username: "1000".to_string(),
            password: "secret".to_string(),
            expires: 3600,
        }
    }

    #[tokio::test]
    async fn start_sends_an_initial_register_with_cseq_one() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport.clone(), timers);
        client.start().await.unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let text = String::from_utf8_lossy(&sent[0]);
        assert!(text.starts_with("REGISTER sip:pbx.example:5060 SIP/2.0"));
        assert!(text.contains("CSeq: 1 REGISTER"));
        assert_eq!(client.state(), RegistrationState::Registering);
    }

    #[tokio::test]
    async fn success_response_transitions_to_registered_and_records_expires() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport, timers);
        client.start().await.unwrap();

        let mut headers = HeaderMap::new();
        headers.push("Expires", "1800");
        headers.push("Call-ID", "whatever");
        headers.push("CSeq", "1 REGISTER");
        let response = SipMessage {
            start_line: StartLine::Response { status: 200, reason: "OK".to_string() },
            headers,
            body: String::new(),
        };
        client.handle_response(&response).await.unwrap();
        assert_eq!(client.state(), RegistrationState::Registered);
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn challenge_response_retries_with_a_fresh_call_id_and_authorization() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport.clone(), timers);
        client.start().await.unwrap();

        let first_call_id = {
            let text = String::from_utf8_lossy(&transport.sent.lock().await[0]).to_string();
            text.lines().find(|l| l.starts_with("Call-ID")).unwrap().to_string()
        };

        let mut headers = HeaderMap::new();
        headers.push(
            "WWW-Authenticate",
            r#"Digest realm="asterisk", nonce="1a2b3c", algorithm=MD5"#,
        );
        let response = SipMessage {
            start_line: StartLine::Response { status: 401, reason: "Unauthorized".to_string() },
            headers,
            body: String::new(),
        };
        client.handle_response(&response).await.unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 2);
        let second_text = String::from_utf8_lossy(&sent[1]);
        assert!(second_text.contains("Authorization: Digest"));
        let second_call_id = second_text.lines().find(|l| l.starts_with("Call-ID")).unwrap();
        assert_ne!(first_call_id, second_call_id);
    }

    #[tokio::test]
    async fn full_challenge_then_success_cycle_arms_the_refresh_timer_at_half_expiry() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport.clone(), timers.clone());
        client.start().await.unwrap();

        let mut challenge_headers = HeaderMap::new();
        challenge_headers.push(
            "WWW-Authenticate",
            r#"Digest realm="asterisk", nonce="1a2b3c", qop="auth", algorithm=MD5"#,
        );
        let challenge = SipMessage {
            start_line: StartLine::Response { status: 401, reason: "Unauthorized".to_string() },
            headers: challenge_headers,
            body: String::new(),
        };
        client.handle_response(&challenge).await.unwrap();
        assert_eq!(transport.sent.lock().await.len(), 2);

        let second_cseq = {
            let text = String::from_utf8_lossy(&transport.sent.lock().await[1]).to_string();
            text.lines().find(|l| l.starts_with("CSeq")).unwrap().to_string()
        };
        assert_eq!(second_cseq, "CSeq: 2 REGISTER");

        let mut ok_headers = HeaderMap::new();
        ok_headers.push("Expires", "3600");
        let ok = SipMessage {
            start_line: StartLine::Response { status: 200, reason: "OK".to_string() },
            headers: ok_headers,
            body: String::new(),
        };
        client.handle_response(&ok).await.unwrap();

        assert_eq!(client.state(), RegistrationState::Registered);
        assert!(timers.is_armed("register_refresh"));
    }

    #[tokio::test]
    async fn final_failure_marks_state_failed() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport, timers);
        client.start().await.unwrap();

        let response = SipMessage {
            start_line: StartLine::Response { status: 403, reason: "Forbidden".to_string() },
            headers: HeaderMap::new(),
            body: String::new(),
        };
        client.handle_response(&response).await.unwrap();
        assert_eq!(client.state(), RegistrationState::Failed);
    }

    #[test]
    fn liveness_is_false_before_any_registration() {
        let transport = Arc::new(RecordingTransport::default());
        let timers = TimerRegistry::new();
        let client = RegistrationClient::new(config(), transport, timers);
        assert!(!client.is_alive());
    }

    #[test]
    fn timer_a_doubles_then_caps_at_t2() {
        assert_eq!(next_timer_a_delay(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_timer_a_delay(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_timer_a_delay(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(next_timer_a_delay(Duration::from_secs(4)), Duration::from_secs(4));
        assert_eq!(next_timer_a_delay(Duration::from_secs(3)), Duration::from_secs(4));
    }
}
