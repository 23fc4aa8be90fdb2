//! Everything a single dialog needs beyond the pure [`call_session::Session`]
//! state machine: the original INVITE (for echoing headers), this call's
//! timer registry, its RTP pacer, and its AI client handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ai_realtime::AiRealtimeClient;
use call_session::Session;
use infra_common::TimerRegistry;
use parking_lot::Mutex as SyncMutex;
use rtp_media::{RtpPacer, RtpReceiveStats};
use sip_message::SipMessage;

pub struct CallContext {
    pub session: SyncMutex<Session>,
    pub original_invite: SipMessage,
    pub remote_addr: SocketAddr,
    pub timers: Arc<TimerRegistry>,
    pub rtp_pacer: SyncMutex<Option<Arc<RtpPacer>>>,
    pub ai_client: SyncMutex<Option<Arc<AiRealtimeClient>>>,
    pub last_provisional: SyncMutex<Option<Vec<u8>>>,
    pub rtp_stats: RtpReceiveStats,
    local_cseq: AtomicU32,
}

impl CallContext {
    pub fn new(session: Session, original_invite: SipMessage, remote_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            session: SyncMutex::new(session),
            original_invite,
            remote_addr,
            timers: TimerRegistry::new(),
            rtp_pacer: SyncMutex::new(None),
            ai_client: SyncMutex::new(None),
            last_provisional: SyncMutex::new(None),
            rtp_stats: RtpReceiveStats::default(),
            local_cseq: AtomicU32::new(0),
        })
    }

    /// This side's next CSeq for a locally-originated in-dialog request
    /// (BYE or re-INVITE) -- shared across both so the dialog's local CSeq
    /// keeps advancing regardless of which request used it last.
    pub fn next_local_cseq(&self) -> u32 {
        self.local_cseq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
