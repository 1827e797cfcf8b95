use crate::message::Message;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    /// Send errors are logged and swallowed: they are treated like packet loss, which the
    ///  protocol recovers from through retransmission
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.as_ref().local_addr().ok()
    }
}

/// The receiving counterpart to [SendSocket]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReceiveSocket: Send + Sync + 'static {
    /// Reads a single datagram into the buffer, returning its length and sender. An error is
    ///  unrecoverable for the socket.
    async fn recv_packet(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl ReceiveSocket for Arc<UdpSocket> {
    async fn recv_packet(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Serializes messages and hands them to the socket. This is shared between the multiplexer and
///  all its channels.
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_message(&self, to: SocketAddr, message: &Message) {
        trace!("sending {:?} to {:?}", message, to);

        let mut buf = Vec::with_capacity(message.serialized_len());
        message.ser(&mut buf);
        self.socket.do_send_packet(to, &buf).await;
    }
}
