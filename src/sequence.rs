//! Sequence and ACK numbers are `u32` values with wrap-around semantics, i.e. `0` follows
//!  after `u32::MAX`. All arithmetic on them goes through this module.
//!
//! Ordering is only meaningful for numbers that are at most one window apart: two numbers
//!  close to the wrap-around boundary compare by their *distance*, so that `u32::MAX` precedes
//!  `0` if the window covers both.

use std::cmp::Ordering;

/// The number of steps from `from` forward to `to`, modulo 2^32
pub fn forward_distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

/// true iff `to` lies strictly after `from`, but not more than `window_size` steps
pub fn is_ahead_within(from: u32, to: u32, window_size: u32) -> bool {
    let distance = forward_distance(from, to);
    distance != 0 && distance <= window_size
}

/// Total order for sequence numbers inside a window of a given size. Numbers close to
///  `u32::MAX` (less than `window_size - 1` away from it) sort *before* small numbers (less
///  than `window_size - 1`); everything else sorts numerically.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WindowOrder {
    window_size: u32,
}

impl WindowOrder {
    pub fn new(window_size: u32) -> WindowOrder {
        WindowOrder { window_size }
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn compare(&self, a: u32, b: u32) -> Ordering {
        let edge = self.window_size.saturating_sub(1);

        if u32::MAX - a < edge && b < edge {
            return Ordering::Less;
        }
        if u32::MAX - b < edge && a < edge {
            return Ordering::Greater;
        }
        a.cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::same(5, 5, 0)]
    #[case::forward(5, 8, 3)]
    #[case::backward(8, 5, u32::MAX - 2)]
    #[case::wrap(u32::MAX - 1, 1, 3)]
    #[case::wrap_to_zero(u32::MAX, 0, 1)]
    fn test_forward_distance(#[case] from: u32, #[case] to: u32, #[case] expected: u32) {
        assert_eq!(forward_distance(from, to), expected);
    }

    #[rstest]
    #[case::same(5, 5, 4, false)]
    #[case::next(5, 6, 4, true)]
    #[case::window_edge(5, 9, 4, true)]
    #[case::beyond_window(5, 10, 4, false)]
    #[case::behind(5, 4, 4, false)]
    #[case::wrap(u32::MAX - 1, 1, 3, true)]
    #[case::wrap_too_far(u32::MAX - 1, 2, 3, false)]
    fn test_is_ahead_within(#[case] from: u32, #[case] to: u32, #[case] window_size: u32, #[case] expected: bool) {
        assert_eq!(is_ahead_within(from, to, window_size), expected);
    }

    #[rstest]
    #[case::equal(10, 3, 3, Ordering::Equal)]
    #[case::plain_less(10, 3, 4, Ordering::Less)]
    #[case::plain_greater(10, 4, 3, Ordering::Greater)]
    #[case::max_before_zero(10, u32::MAX, 0, Ordering::Less)]
    #[case::zero_after_max(10, 0, u32::MAX, Ordering::Greater)]
    #[case::near_max_before_small(10, u32::MAX - 3, 5, Ordering::Less)]
    #[case::outside_edge_numeric(10, u32::MAX - 9, 5, Ordering::Greater)]
    #[case::small_outside_edge_numeric(10, u32::MAX, 9, Ordering::Greater)]
    #[case::window_one_numeric(1, u32::MAX, 0, Ordering::Greater)]
    fn test_window_order(#[case] window_size: u32, #[case] a: u32, #[case] b: u32, #[case] expected: Ordering) {
        assert_eq!(WindowOrder::new(window_size).compare(a, b), expected);
    }
}
