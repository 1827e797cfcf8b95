use crate::connection::{Connection, Reliability};
use crate::host::Host;
use crate::message::Message;
use crate::send_pipeline::SendSocket;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Mutex;

/// A [SendSocket] that records all packets instead of sending them
pub struct TrackingSendSocket {
    local_addr: SocketAddr,
    tracker: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}
impl TrackingSendSocket {
    pub fn new(local_addr: SocketAddr) -> Self {
        TrackingSendSocket {
            local_addr,
            tracker: Default::default(),
        }
    }

    /// returns sent packets, clearing the internal buffer
    pub fn sent_packets(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut lock = self.tracker.lock().unwrap();
        std::mem::take(&mut *lock)
    }

    /// returns sent packets parsed as messages, clearing the internal buffer
    pub fn sent_messages(&self) -> Vec<(SocketAddr, Message)> {
        self.sent_packets()
            .into_iter()
            .map(|(to, buf)| (to, Message::deser(&buf).unwrap()))
            .collect()
    }

    /// returns the sequence numbers of sent messages, clearing the internal buffer
    pub fn sent_sequences(&self) -> Vec<u32> {
        self.sent_messages()
            .into_iter()
            .map(|(_, msg)| msg.sequence)
            .collect()
    }
}

#[async_trait]
impl SendSocket for TrackingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.tracker.lock().unwrap()
            .push((to, packet_buf.to_vec()));
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

/// A [Host] that records everything it is called with
#[derive(Default)]
pub struct TrackingHost {
    delivered: Mutex<Vec<(Message, Connection)>>,
    events: Mutex<Vec<(&'static str, SocketAddr)>>,
    inits: Mutex<Vec<(Message, SocketAddr, Reliability)>>,
}
impl TrackingHost {
    /// returns delivered messages, clearing the internal buffer
    pub fn delivered(&self) -> Vec<(Message, Connection)> {
        let mut lock = self.delivered.lock().unwrap();
        std::mem::take(&mut *lock)
    }

    /// returns the sequence numbers of delivered messages, clearing the internal buffer
    pub fn delivered_sequences(&self) -> Vec<u32> {
        self.delivered()
            .into_iter()
            .map(|(msg, _)| msg.sequence)
            .collect()
    }

    /// returns control events ("end", "ping", "timeout") with their peer, clearing the
    ///  internal buffer
    pub fn events(&self) -> Vec<(&'static str, SocketAddr)> {
        let mut lock = self.events.lock().unwrap();
        std::mem::take(&mut *lock)
    }

    /// returns received INIT messages, clearing the internal buffer
    pub fn inits(&self) -> Vec<(Message, SocketAddr, Reliability)> {
        let mut lock = self.inits.lock().unwrap();
        std::mem::take(&mut *lock)
    }
}

#[async_trait]
impl Host for TrackingHost {
    async fn on_message(&self, message: Message, source: Connection) {
        self.delivered.lock().unwrap()
            .push((message, source));
    }

    async fn on_init(&self, message: Message, from: SocketAddr, reliability: Reliability) {
        self.inits.lock().unwrap()
            .push((message, from, reliability));
    }

    async fn on_end(&self, _message: Message, from: Connection) {
        self.events.lock().unwrap()
            .push(("end", from.addr()));
    }

    async fn on_ping(&self, _message: Message, from: Connection) {
        self.events.lock().unwrap()
            .push(("ping", from.addr()));
    }

    async fn on_timeout(&self, connection: Connection) {
        self.events.lock().unwrap()
            .push(("timeout", connection.addr()));
    }
}
