use std::net::SocketAddr;
use thiserror::Error;

/// Failures surfaced by the protocol core. Out-of-window sequence numbers, stale or duplicate
///  ACKs are *not* errors: they are regular branches of the channel state machine.
#[derive(Debug, Error)]
pub enum ArqError {
    /// A datagram is shorter than the fixed message header
    #[error("malformed message header: {len} bytes, at least {min} required")]
    MalformedHeader { len: usize, min: usize },

    /// A payload exceeds the maximum that fits into a single message
    #[error("oversized payload: {len} bytes, at most {max} allowed")]
    OversizedPayload { len: usize, max: usize },

    /// A handshake payload does not have the fixed channel info length
    #[error("invalid channel info: {len} bytes, exactly {expected} required")]
    InvalidChannelInfo { len: usize, expected: usize },

    /// A port field in a handshake payload is outside the 16 bit port range
    #[error("invalid port in channel info: {field} = {value}")]
    InvalidPort { field: &'static str, value: u32 },

    #[error("transport fault: {0}")]
    TransportFault(#[from] std::io::Error),

    #[error("channel to {0:?} is not active")]
    ChannelStopped(SocketAddr),

    #[error("no channel registered for {0:?}")]
    UnknownConnection(SocketAddr),
}
