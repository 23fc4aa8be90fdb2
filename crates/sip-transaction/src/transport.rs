//! I/O boundary so the registration engine can be driven in tests without a
//! real socket, mirroring [`rtp_media::RtpSink`]'s role on the media side.

use async_trait::async_trait;

#[async_trait]
pub trait SipTransport: Send + Sync {
    async fn send(&self, datagram: &[u8]) -> std::io::Result<()>;
}
