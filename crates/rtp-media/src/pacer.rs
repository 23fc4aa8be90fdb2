//! Per-session RTP send pacer: chunks outbound audio into 160-byte (20ms at
//! 8kHz G.711) payloads and emits one packet every 20ms, independent of how
//! bursty the producer (the AI realtime client) is. Sequence increments by
//! one and timestamp by 160 per packet; SSRC is fixed for the session's
//! lifetime, per §4.1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use infra_common::queue::DropOldestQueue;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::packet::RtpPacket;

/// 20ms at 8kHz G.711 = 160 samples = 160 bytes of companded payload.
pub const FRAME_BYTES: usize = 160;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);
pub const TIMESTAMP_STEP: u32 = 160;

/// How outbound RTP packets actually leave the process. Implemented by the
/// real UDP socket in `telephony-bridge`; tests substitute an in-memory
/// sink to assert pacing/sequencing without binding a port.
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn send_rtp(&self, packet: Bytes);
}

/// Outbound audio queued ahead of a frame boundary. The pacer drops frames
/// once more than [`MAX_BUFFERED_FRAMES`] (40ms) are queued -- the far end
/// cannot usefully play back audio that old (§5 backpressure rule).
pub const MAX_BUFFERED_FRAMES: usize = 2;

struct PacerState {
    sequence: u16,
    timestamp: u32,
    queue: DropOldestQueue<Bytes>,
    in_talkspurt: bool,
}

/// Drives one call session's outbound RTP stream on a fixed 20ms cadence.
pub struct RtpPacer {
    ssrc: u32,
    payload_type: u8,
    state: Mutex<PacerState>,
}

impl RtpPacer {
    pub fn new(ssrc: u32, payload_type: u8, initial_sequence: u16, initial_timestamp: u32) -> Self {
        Self {
            ssrc,
            payload_type,
            state: Mutex::new(PacerState {
                sequence: initial_sequence,
                timestamp: initial_timestamp,
                queue: DropOldestQueue::new(MAX_BUFFERED_FRAMES),
                in_talkspurt: false,
            }),
        }
    }

    /// Queue a payload for the next tick(s). Payloads larger than
    /// [`FRAME_BYTES`] are split into multiple frames; the caller is not
    /// required to pre-chunk.
    pub async fn enqueue(&self, payload: &[u8]) {
        let mut state = self.state.lock().await;
        for chunk in payload.chunks(FRAME_BYTES) {
            if state.queue.push(Bytes::copy_from_slice(chunk)) {
                warn!(ssrc = self.ssrc, "RTP pacer dropped a frame: outbound buffer exceeded 40ms");
            }
        }
    }

    /// Run the pacer loop until `sink` is dropped or the task is aborted.
    /// Call from a spawned task owned by the session.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn RtpSink>) {
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(packet) = self.next_packet().await else {
                continue;
            };
            sink.send_rtp(packet).await;
        }
    }

    /// Pull the next queued frame (if any) and build its RTP packet,
    /// advancing sequence/timestamp. Silent (no packet) when the queue is
    /// empty -- comfort noise is out of scope; the session simply sends
    /// nothing that tick.
    async fn next_packet(&self) -> Option<Bytes> {
        let mut state = self.state.lock().await;
        let Some(payload) = state.queue.pop() else {
            // A silent tick ends the current talkspurt; the next queued
            // frame starts a new one and must carry the marker bit.
            state.in_talkspurt = false;
            return None;
        };
        let marker = !state.in_talkspurt;
        state.in_talkspurt = true;
        let packet = RtpPacket {
            marker,
            payload_type: self.payload_type,
            sequence: state.sequence,
            timestamp: state.timestamp,
            ssrc: self.ssrc,
            payload,
        };
        state.sequence = state.sequence.wrapping_add(1);
        state.timestamp = state.timestamp.wrapping_add(TIMESTAMP_STEP);
        trace!(seq = packet.sequence, ts = packet.timestamp, marker, "paced RTP frame");
        Some(packet.to_bytes())
    }
}
