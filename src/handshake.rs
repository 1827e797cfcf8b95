//! Building blocks for establishing connections. Hosts exchange INIT messages carrying a
//!  [ChannelInfo] over the reliable socket, each side with randomly chosen initial sequence and
//!  ack numbers, and then set up one channel per reliability class with the negotiated
//!  parameters. The orchestration of connect retries and accepting is left to the application.

use crate::channel_info::ChannelInfo;
use crate::error::ArqError;
use crate::message::{Message, MessageFlags};
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};

/// The IANA range for dynamic / private ports
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Random initial sequence and ack numbers, drawn independently over the full `u32` range
pub fn random_initial_numbers(rng: &mut impl Rng) -> (u32, u32) {
    (rng.gen(), rng.gen())
}

/// Two distinct random ports from [EPHEMERAL_PORTS], for a host's reliable and partially
///  reliable sockets
pub fn random_port_pair(rng: &mut impl Rng) -> (u16, u16) {
    let mut first = rng.gen_range(EPHEMERAL_PORTS);
    let second = rng.gen_range(EPHEMERAL_PORTS);

    if first == second {
        first = if first == *EPHEMERAL_PORTS.end() { first - 1 } else { first + 1 };
    }
    (first, second)
}

/// Hands out connection ids 0, 1, 2, ... per host
#[derive(Default)]
pub struct ConnectionIdAllocator {
    next: AtomicU32,
}

impl ConnectionIdAllocator {
    pub fn new() -> ConnectionIdAllocator {
        Default::default()
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

pub fn init_message(sequence: u32, ack: u32, channel_info: &ChannelInfo) -> Message {
    let mut message = Message::new(0, MessageFlags::INIT, channel_info.to_bytes())
        .expect("a channel info is far below the maximum payload size");
    message.sequence = sequence;
    message.ack = ack;
    message
}

/// Extracts the [ChannelInfo] from a received INIT message
pub fn parse_init(message: &Message) -> Result<ChannelInfo, ArqError> {
    ChannelInfo::deser(message.payload())
}
