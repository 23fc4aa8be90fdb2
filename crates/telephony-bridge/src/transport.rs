//! The shared SIP UDP socket (§5: "the upstream SIP socket is shared one
//! per process; writes serialize through a send queue").

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sip_transaction::SipTransport;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Serializes writes to arbitrary peers on the shared socket (out-of-dialog
/// responses, where the destination varies per request) and is the
/// underlying socket `UdpSipTransport` and the receive loop both read
/// through, so a §4.3 socket-resilience rebind is visible to every sender.
pub struct SharedSipSocket {
    socket: RwLock<Arc<UdpSocket>>,
    write_lock: Mutex<()>,
    local_port: u16,
}

impl SharedSipSocket {
    pub fn new(socket: Arc<UdpSocket>, local_port: u16) -> Self {
        Self { socket: RwLock::new(socket), write_lock: Mutex::new(()), local_port }
    }

    pub async fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let socket = self.socket.read().clone();
        socket.send_to(datagram, addr).await.map(|_| ())
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.read().clone()
    }

    /// Re-bind a fresh socket onto the same local port (§4.3 socket
    /// resilience: 3 consecutive transport errors trigger this).
    pub async fn rebind(&self) -> std::io::Result<()> {
        let fresh = UdpSocket::bind(("0.0.0.0", self.local_port)).await?;
        *self.socket.write() = Arc::new(fresh);
        Ok(())
    }
}

/// The `SipTransport` the registration engine sends REGISTERs through, and
/// `KeepAlive` sends NAT pings/OPTIONS through -- routed via
/// [`SharedSipSocket`] so a rebind takes effect here too.
pub struct UdpSipTransport {
    socket: Arc<SharedSipSocket>,
    remote: SocketAddr,
}

impl UdpSipTransport {
    pub fn new(socket: Arc<SharedSipSocket>, remote: SocketAddr) -> Self {
        Self { socket, remote }
    }
}

#[async_trait]
impl SipTransport for UdpSipTransport {
    async fn send(&self, datagram: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(datagram, self.remote).await
    }
}
