//! A message oriented ARQ (automatic repeat request) protocol on top of UDP, with two classes of
//!  channels between any pair of hosts:
//!
//! * *reliable* channels deliver every message exactly once and in the order it was sent
//! * *partially reliable* channels deliver in order as well, but may skip up to a configured
//!    fraction of each window rather than waiting for retransmissions
//!
//! ## Design
//!
//! * Each host has one UDP socket per reliability class. A [socket_multiplexer::SocketMultiplexer]
//!    owns such a socket and routes incoming datagrams to the channel for the sending peer.
//! * Messages are sent with a sliding window: at most `window_size` messages are in flight per
//!    channel, messages beyond that are held back until ACKs arrive.
//! * ACKs are cumulative. The receiver acknowledges every data message with the highest sequence
//!    number it delivered so far.
//! * Loss is detected by a retransmit timer, and by three duplicate ACKs ('fast retransmit'). In
//!    both cases only the oldest unacknowledged message is resent.
//! * Out-of-order messages inside the window are buffered and delivered once the gap is filled
//!    (or skipped, for partially reliable channels).
//! * Control messages (INIT, END, PING) bypass sequencing and go straight to the [host::Host].
//! * Sequence numbers are 32 bit and wrap around. All comparisons are relative to the current
//!    window, see [sequence].
//!
//! ## Wire format
//!
//! Each datagram contains exactly one message, see [message::Message] for the layout. There is
//!  no checksum and no encryption.
//!
//! ## Threading
//!
//! All protocol state of a channel is owned by a single tokio task, which processes received
//!  messages, timer expiry and submitted messages strictly one at a time. Everything else talks
//!  to that task through queues.

pub mod buffers;
pub mod channel;
pub mod channel_info;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod host;
pub mod keepalive;
pub mod message;
pub mod message_router;
pub mod safe_converter;
pub mod send_pipeline;
pub mod sequence;
pub mod socket_multiplexer;

#[cfg(test)]
pub mod test_util;
