use crate::channel::policy::{Acceptance, ReceivePolicy};
use tracing::trace;

/// Bounded-loss delivery: a message following a gap is delivered (skipping the gap for good) as
///  long as the number of skipped messages inside the current accounting window stays within
///  `max_fails`. Messages that would exceed the tolerance wait in the reorder buffer for the
///  gap to be filled.
///
/// Accounting works in windows of `window_size` received-or-skipped messages: `counting` is the
///  position inside the current window, and `current_fails` the number of skipped messages in
///  it. A gap that crosses the window boundary is split: the part up to the boundary counts
///  against the current window, the rest against the next one.
///
/// All counter arithmetic is modulo 2^32.
pub struct PartialReliablePolicy {
    window_size: u32,
    max_fails: u32,
    current_fails: u32,
    counting: u32,
}

impl PartialReliablePolicy {
    pub fn new(window_size: u32, max_fails: u32) -> PartialReliablePolicy {
        PartialReliablePolicy {
            window_size,
            max_fails,
            current_fails: 0,
            counting: 0,
        }
    }

    fn accept_gap(&mut self, distance: u32) -> Acceptance {
        let w = self.window_size;

        if distance.wrapping_add(self.counting).wrapping_add(1) > w {
            let h1 = w.wrapping_sub(self.counting);
            let h2 = distance.wrapping_sub(h1);
            let new_fails = self.current_fails.wrapping_add(h1);

            if new_fails <= self.max_fails && h2 <= self.max_fails {
                trace!("skipping {} messages across the accounting window boundary", distance);
                self.counting = h2.wrapping_add(1);
                self.current_fails = h2;
                Acceptance::Deliver
            }
            else {
                Acceptance::Buffer
            }
        }
        else {
            let new_fails = self.current_fails.wrapping_add(distance);
            if new_fails > self.max_fails {
                return Acceptance::Buffer;
            }

            trace!("skipping {} messages", distance);
            self.current_fails = new_fails;
            self.counting = self.counting.wrapping_add(distance).wrapping_add(1);
            if self.counting == w {
                self.counting = 0;
                self.current_fails = 0;
            }
            Acceptance::Deliver
        }
    }
}

impl ReceivePolicy for PartialReliablePolicy {
    fn accept(&mut self, sequence: u32, current_ack: u32) -> Acceptance {
        let mut distance = sequence.wrapping_sub(current_ack.wrapping_add(1));

        if sequence <= current_ack {
            let to_max = u32::MAX - current_ack;
            if to_max <= self.window_size && to_max.wrapping_add(sequence) <= self.window_size {
                distance = to_max.wrapping_add(sequence);
            }
            else {
                return Acceptance::Drop;
            }
        }

        if distance == 0 {
            self.counting = self.counting.wrapping_add(1);
            if self.counting >= self.window_size {
                self.counting = 0;
                self.current_fails = 0;
            }
            return Acceptance::Deliver;
        }

        self.accept_gap(distance)
    }

    fn reset(&mut self) {
        self.current_fails = 0;
        self.counting = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// feeds sequence numbers into the policy, applying the engine's rule of advancing the ack on
    ///  delivery, and returns the delivered sequence numbers
    fn run(policy: &mut PartialReliablePolicy, initial_ack: u32, sequences: &[u32]) -> (Vec<u32>, Vec<u32>, u32) {
        let mut current_ack = initial_ack;
        let mut delivered = Vec::new();
        let mut buffered = Vec::new();
        for &sequence in sequences {
            match policy.accept(sequence, current_ack) {
                Acceptance::Deliver => {
                    current_ack = sequence;
                    delivered.push(sequence);
                }
                Acceptance::Buffer => buffered.push(sequence),
                Acceptance::Drop => {}
            }
        }
        (delivered, buffered, current_ack)
    }

    #[rstest]
    #[case::in_order(vec![1, 2, 3, 4], vec![1, 2, 3, 4], vec![])]
    #[case::one_gap(vec![1, 3, 4], vec![1, 3, 4], vec![])]
    #[case::two_consecutive_gaps(vec![1, 4, 5], vec![1, 4, 5], vec![])]
    #[case::three_consecutive_gaps(vec![1, 5], vec![1], vec![5])]
    #[case::two_separate_gaps(vec![2, 4, 5], vec![2, 4, 5], vec![])]
    #[case::third_gap_in_window(vec![2, 4, 6], vec![2, 4], vec![6])]
    #[case::duplicate(vec![1, 2, 2, 1], vec![1, 2], vec![])]
    fn test_accept(#[case] sequences: Vec<u32>, #[case] expected_delivered: Vec<u32>, #[case] expected_buffered: Vec<u32>) {
        // window 10, 80% reliable
        let mut policy = PartialReliablePolicy::new(10, 2);
        let (delivered, buffered, _) = run(&mut policy, 0, &sequences);
        assert_eq!(delivered, expected_delivered);
        assert_eq!(buffered, expected_buffered);
    }

    #[test]
    fn test_fails_reset_after_full_window() {
        let mut policy = PartialReliablePolicy::new(10, 2);

        // two gaps in the first window: 1..=10 with 3 and 4 missing
        let (delivered, _, ack) = run(&mut policy, 0, &[1, 2, 5, 6, 7, 8, 9, 10]);
        assert_eq!(delivered, vec![1, 2, 5, 6, 7, 8, 9, 10]);
        assert_eq!(policy.counting, 0);
        assert_eq!(policy.current_fails, 0);

        // the next window tolerates two gaps again
        let (delivered, buffered, _) = run(&mut policy, ack, &[11, 14]);
        assert_eq!(delivered, vec![11, 14]);
        assert!(buffered.is_empty());
    }

    #[test]
    fn test_gap_across_window_boundary() {
        let mut policy = PartialReliablePolicy::new(10, 2);

        let (_, _, ack) = run(&mut policy, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(policy.counting, 8);

        // 9 and 10 missing (h1 = 2 in the old window), 11 and 12 missing (h2 = 2 in the new one)
        let (delivered, _, _) = run(&mut policy, ack, &[13]);
        assert_eq!(delivered, vec![13]);
        assert_eq!(policy.counting, 3);
        assert_eq!(policy.current_fails, 2);
    }

    #[test]
    fn test_gap_across_window_boundary_too_big() {
        let mut policy = PartialReliablePolicy::new(10, 2);

        let (_, _, ack) = run(&mut policy, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        // h1 = 2, h2 = 3 exceeds the tolerance of the new window
        let (delivered, buffered, _) = run(&mut policy, ack, &[14]);
        assert!(delivered.is_empty());
        assert_eq!(buffered, vec![14]);
        assert_eq!(policy.counting, 8);
    }

    #[rstest]
    #[case::wrap_next(u32::MAX, 0, Acceptance::Deliver)]
    #[case::wrap_one_gap(u32::MAX, 1, Acceptance::Deliver)]
    #[case::wrap_from_below(u32::MAX - 1, 0, Acceptance::Deliver)]
    #[case::wrap_duplicate(u32::MAX, u32::MAX, Acceptance::Drop)]
    #[case::stale(7, 5, Acceptance::Drop)]
    #[case::too_far(u32::MAX, 5, Acceptance::Buffer)]
    fn test_accept_wrap_around(#[case] current_ack: u32, #[case] sequence: u32, #[case] expected: Acceptance) {
        let mut policy = PartialReliablePolicy::new(10, 2);
        assert_eq!(policy.accept(sequence, current_ack), expected);
    }

    #[test]
    fn test_reset() {
        let mut policy = PartialReliablePolicy::new(10, 2);
        run(&mut policy, 0, &[1, 3]);
        assert_eq!(policy.current_fails, 1);

        policy.reset();
        assert_eq!(policy.current_fails, 0);
        assert_eq!(policy.counting, 0);
    }
}
