use crate::connection::Reliability;
use anyhow::bail;
use std::net::SocketAddr;
use std::time::Duration;

/// Host-wide settings. Some of these (window size, reliable percentage) are negotiated with
///  the peer during the handshake, in which case the negotiated values are used for the
///  resulting channel - see [ArqConfig::channel_config_negotiated].
pub struct ArqConfig {
    /// This is the maximum number of *messages* (not bytes) that are sent but not acknowledged
    ///  yet. Messages beyond this window are held back on the sender side until ACKs arrive.
    ///
    /// Sequence number comparison relies on all messages in flight being inside one window, so
    ///  this must be far below the sequence number range.
    pub window_size: u32,

    /// The percentage of messages in a window that must arrive on partially reliable channels.
    ///  A value of 80 with a window size of 10 means that up to 2 messages per window may be
    ///  skipped by the receiver.
    pub reliable_percentage: u32,

    /// Time after which the oldest unacknowledged message is resent. This is a starting value:
    ///  keepalive RTT measurements overwrite it per channel at runtime.
    pub retransmit_interval: Duration,
    /// Lower bound for retransmit intervals, in particular those derived from RTT measurements
    ///  which can be arbitrarily small on a local network
    pub min_retransmit_interval: Duration,

    /// Delay between polls of a channel's outbound queue, and of a multiplexer's intake queue
    pub poll_interval: Duration,

    pub ping_interval: Duration,
    /// A connection whose pings are not answered for this long is considered dead
    pub keepalive_timeout: Duration,

    pub max_connections: usize,

    pub reliable_addr: SocketAddr,
    pub no_reliable_addr: SocketAddr,

    /// Number of received datagrams that can be buffered between a multiplexer's socket and
    ///  its processing loop. Datagrams in excess of this are dropped.
    pub intake_queue_capacity: usize,
}

impl Default for ArqConfig {
    fn default() -> Self {
        ArqConfig {
            window_size: 32,
            reliable_percentage: 80,
            retransmit_interval: Duration::from_millis(200),
            min_retransmit_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
            ping_interval: Duration::from_secs(1),
            keepalive_timeout: Duration::from_secs(5),
            max_connections: 64,
            reliable_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            no_reliable_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            intake_queue_capacity: 4096,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        Self::validate_window(self.window_size, self.reliable_percentage)?;

        if self.retransmit_interval.is_zero() {
            bail!("retransmit interval must not be zero");
        }
        if self.min_retransmit_interval.is_zero() {
            bail!("minimum retransmit interval must not be zero");
        }
        if self.min_retransmit_interval > self.retransmit_interval {
            bail!("minimum retransmit interval {:?} is above the retransmit interval {:?}", self.min_retransmit_interval, self.retransmit_interval);
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must not be zero");
        }
        if self.ping_interval.is_zero() {
            bail!("ping interval must not be zero");
        }
        if self.keepalive_timeout < self.ping_interval {
            bail!("keepalive timeout {:?} is shorter than the ping interval {:?}", self.keepalive_timeout, self.ping_interval);
        }
        if self.intake_queue_capacity == 0 {
            bail!("intake queue capacity must not be zero");
        }
        Ok(())
    }

    fn validate_window(window_size: u32, reliable_percentage: u32) -> anyhow::Result<()> {
        if window_size == 0 {
            bail!("window size must not be zero");
        }
        if window_size > u32::MAX / 4 {
            bail!("window size {} is too big for wrap-around safe sequence numbers", window_size);
        }
        if reliable_percentage > 100 {
            bail!("reliable percentage {} is above 100", reliable_percentage);
        }
        Ok(())
    }

    pub fn channel_config(&self, reliability: Reliability) -> ChannelConfig {
        ChannelConfig {
            reliability,
            window_size: self.window_size,
            reliable_percentage: self.reliable_percentage,
            retransmit_interval: self.retransmit_interval,
            min_retransmit_interval: self.min_retransmit_interval,
            poll_interval: self.poll_interval,
        }
    }

    /// channel config with window size and reliable percentage as negotiated with the peer
    pub fn channel_config_negotiated(&self, reliability: Reliability, window_size: u32, reliable_percentage: u32) -> anyhow::Result<ChannelConfig> {
        Self::validate_window(window_size, reliable_percentage)?;

        Ok(ChannelConfig {
            window_size,
            reliable_percentage,
            ..self.channel_config(reliability)
        })
    }

    /// The number of unanswered pings after which a connection times out
    pub fn max_not_replied_pings(&self) -> u32 {
        let ratio = self.keepalive_timeout.as_secs_f64() / self.ping_interval.as_secs_f64();
        ratio.round() as u32 + 1
    }
}

/// The effective settings of a single channel
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelConfig {
    pub reliability: Reliability,
    pub window_size: u32,
    pub reliable_percentage: u32,
    pub retransmit_interval: Duration,
    pub min_retransmit_interval: Duration,
    pub poll_interval: Duration,
}

impl ChannelConfig {
    /// The number of messages per window that a partially reliable receiver may skip
    pub fn max_fails(&self) -> u32 {
        let tolerated = u64::from(self.window_size) * u64::from(100 - self.reliable_percentage.min(100)) / 100;
        tolerated as u32
    }
}
