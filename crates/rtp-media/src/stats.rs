//! Drop/error counters for the RTP receive path. Malformed packets are
//! dropped with no upstream notification (§4.1's failure mode), but the
//! counters here let the self-liveness subsystem and tests observe it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RtpReceiveStats {
    malformed: AtomicU64,
    received: AtomicU64,
}

impl RtpReceiveStats {
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment_independently() {
        let stats = RtpReceiveStats::default();
        assert_eq!(stats.malformed_count(), 0);
        stats.record_malformed();
        stats.record_received();
        stats.record_received();
        assert_eq!(stats.malformed_count(), 1);
        assert_eq!(stats.received_count(), 2);
    }
}
