use crate::channel::policy::{Acceptance, ReceivePolicy};
use crate::sequence::is_ahead_within;

/// Strictly ordered, gapless delivery: only the message directly following the current ack is
///  delivered, messages further ahead inside the window wait in the reorder buffer, and
///  everything at or behind the current ack is a duplicate.
pub struct ReliablePolicy {
    window_size: u32,
}

impl ReliablePolicy {
    pub fn new(window_size: u32) -> ReliablePolicy {
        ReliablePolicy { window_size }
    }
}

impl ReceivePolicy for ReliablePolicy {
    fn accept(&mut self, sequence: u32, current_ack: u32) -> Acceptance {
        let to_max = u32::MAX - current_ack;

        if sequence < current_ack {
            // numerically behind, but possibly ahead across the wrap-around boundary
            if current_ack == u32::MAX && sequence == 0 {
                return Acceptance::Deliver;
            }
            if to_max < self.window_size && to_max + sequence <= self.window_size {
                return Acceptance::Buffer;
            }
            Acceptance::Drop
        }
        else if sequence > current_ack.wrapping_add(1) {
            // NB: at current_ack == u32::MAX, a duplicate lands in this branch
            if is_ahead_within(current_ack, sequence, self.window_size) {
                Acceptance::Buffer
            }
            else {
                Acceptance::Drop
            }
        }
        else if sequence == current_ack.wrapping_add(1) {
            Acceptance::Deliver
        }
        else {
            Acceptance::Drop
        }
    }
}
