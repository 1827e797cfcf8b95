use crate::connection::Reliability;
use crate::channel::partial_reliable::PartialReliablePolicy;
use crate::channel::reliable::ReliablePolicy;
use crate::config::ChannelConfig;

/// The verdict of a receive policy on an incoming sequence number
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Acceptance {
    /// deliver the message and make its sequence number the new receiver ack
    Deliver,
    /// keep the message in the reorder buffer until earlier messages arrive
    Buffer,
    /// stale or duplicate
    Drop,
}

/// The receiver-side acceptance algorithm of a channel. Policies only decide, they never
///  touch buffers: the engine applies the verdict, and it sets the receiver ack to the
///  accepted sequence number for every [Acceptance::Deliver].
pub trait ReceivePolicy: Send + 'static {
    fn accept(&mut self, sequence: u32, current_ack: u32) -> Acceptance;

    fn reset(&mut self) {}
}

pub fn policy_for(config: &ChannelConfig) -> Box<dyn ReceivePolicy> {
    match config.reliability {
        Reliability::Reliable => Box::new(ReliablePolicy::new(config.window_size)),
        Reliability::PartialReliable => Box::new(PartialReliablePolicy::new(config.window_size, config.max_fails())),
    }
}
