use crate::connection::{Connection, Reliability};
use crate::message::Message;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;

/// The application-facing side of the protocol: channels deliver accepted messages here, and
///  control messages (which bypass sequencing) are handed over without further processing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// called by a channel for every message it accepts, in delivery order
    async fn on_message(&self, message: Message, source: Connection);

    /// INIT messages are received before there is a channel for the peer
    async fn on_init(&self, message: Message, from: SocketAddr, reliability: Reliability);

    async fn on_end(&self, message: Message, from: Connection);

    async fn on_ping(&self, message: Message, from: Connection);

    /// called by keepalive when a peer stopped answering pings, never by channels themselves
    async fn on_timeout(&self, connection: Connection);
}
