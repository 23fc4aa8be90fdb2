//! NAT keep-alive and end-to-end reachability probing (§4.3, RFC 5626
//! §3.5.1).

use std::sync::Arc;
use std::time::Duration;

use infra_common::TimerRegistry;
use sip_message::{HeaderMap, SipMessage, StartLine};
use tracing::warn;

use crate::register::{RegistrationClient, RegistrationState};
use crate::transport::SipTransport;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const OPTIONS_PING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The double-CRLF "STUN-style" keep-alive datagram RFC 5626 §3.5.1 calls
/// for: no SIP parsing happens on the receiving end, it just keeps the NAT
/// binding open.
const KEEPALIVE_DATAGRAM: &[u8] = b"\r\n\r\n";

pub struct KeepAlive {
    transport: Arc<dyn SipTransport>,
    timers: Arc<TimerRegistry>,
    registration: Arc<RegistrationClient>,
    server_uri: String,
    contact: String,
}

impl KeepAlive {
    pub fn new(
        transport: Arc<dyn SipTransport>,
        timers: Arc<TimerRegistry>,
        registration: Arc<RegistrationClient>,
        server_uri: String,
        contact: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            timers,
            registration,
            server_uri,
            contact,
        })
    }

    pub fn start(self: &Arc<Self>) {
        let me = Arc::clone(self);
        self.timers.set_interval("nat_keepalive", KEEPALIVE_INTERVAL, move || {
            let me = Arc::clone(&me);
            async move {
                if let Err(err) = me.transport.send(KEEPALIVE_DATAGRAM).await {
                    warn!(%err, "NAT keep-alive send failed");
                }
            }
        });

        let me = Arc::clone(self);
        self.timers.set_interval("options_ping", OPTIONS_PING_INTERVAL, move || {
            let me = Arc::clone(&me);
            async move {
                if me.registration.state() != RegistrationState::Registered {
                    return;
                }
                let datagram = me.build_options_ping();
                if let Err(err) = me.transport.send(&datagram).await {
                    warn!(%err, "OPTIONS ping send failed");
                }
            }
        });
    }

    fn build_options_ping(&self) -> Vec<u8> {
        let mut headers = HeaderMap::new();
        headers.push(
            "Via",
            format!("SIP/2.0/UDP {};branch={}", self.contact, infra_common::ids::generate_branch()),
        );
        headers.push("From", format!("{};tag={}", self.contact, infra_common::ids::generate_tag()));
        headers.push("To", self.server_uri.clone());
        headers.push("Call-ID", infra_common::ids::generate_call_id(&self.server_uri));
        headers.push("CSeq", "1 OPTIONS".to_string());
        headers.push("Max-Forwards", "70");

        let message = SipMessage {
            start_line: StartLine::Request {
                method: "OPTIONS".to_string(),
                uri: self.server_uri.clone(),
            },
            headers,
            body: String::new(),
        };
        message.to_bytes()
    }
}
