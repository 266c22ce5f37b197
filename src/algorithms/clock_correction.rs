//! Per-anchor clock correction.
//!
//! Every anchor runs its own free-running clock. The correction factor is the
//! number of tag ticks per anchor tick, measured between two consecutive
//! packets from the same anchor. Samples are trusted once they agree with the
//! filtered value; a small bucket absorbs isolated outliers before a new
//! value is adopted.

use crate::core::timestamp;

/// Crystal tolerance of the radios
const MAX_CLOCK_DEVIATION: f64 = 10e-6;
const CLOCK_CORRECTION_MIN: f64 = 1.0 - MAX_CLOCK_DEVIATION * 2.0;
const CLOCK_CORRECTION_MAX: f64 = 1.0 + MAX_CLOCK_DEVIATION * 2.0;

const CLOCK_CORRECTION_ACCEPTED_NOISE: f64 = 0.03e-6;
const CLOCK_CORRECTION_FILTER: f64 = 0.1;
const CLOCK_CORRECTION_BUCKET_MAX: u32 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockCorrection {
    value: f64,
    bucket: u32,
}

impl ClockCorrection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tag-ticks-per-anchor-tick estimate, 0.0 until the first sample
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Reliability bucket level
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    /// Compute a candidate from two tag receive times and the matching
    /// anchor transmit times. Returns `None` when the anchor clock did not
    /// advance.
    pub fn candidate(new_rx_by_tag: u64, old_rx_by_tag: u64, new_tx_by_anchor: u64, old_tx_by_anchor: u64) -> Option<f64> {
        let tag_ticks = timestamp::elapsed(new_rx_by_tag, old_rx_by_tag, timestamp::TAG_TIMESTAMP_BITS);
        let anchor_ticks = timestamp::elapsed(new_tx_by_anchor, old_tx_by_anchor, timestamp::ANCHOR_TIMESTAMP_BITS);
        if anchor_ticks == 0 {
            return None;
        }
        Some(tag_ticks as f64 / anchor_ticks as f64)
    }

    /// Feed a candidate; returns true if the sample is reliable
    pub fn update(&mut self, candidate: f64) -> bool {
        let difference = candidate - self.value;

        if difference.abs() < CLOCK_CORRECTION_ACCEPTED_NOISE {
            self.value = self.value * CLOCK_CORRECTION_FILTER + candidate * (1.0 - CLOCK_CORRECTION_FILTER);
            if self.bucket < CLOCK_CORRECTION_BUCKET_MAX {
                self.bucket += 1;
            }
            return true;
        }

        if self.bucket > 0 {
            self.bucket -= 1;
        } else if CLOCK_CORRECTION_MIN < candidate && candidate < CLOCK_CORRECTION_MAX {
            self.value = candidate;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_adopted_but_not_reliable() {
        let mut cc = ClockCorrection::new();
        assert!(!cc.update(1.000_001));
        assert_eq!(cc.get(), 1.000_001);
        assert_eq!(cc.bucket(), 0);
    }

    #[test]
    fn test_consistent_sample_is_reliable() {
        let mut cc = ClockCorrection::new();
        cc.update(1.0);
        assert!(cc.update(1.0 + 0.01e-6));
        assert!((cc.get() - 1.0).abs() < 0.02e-6);
        assert_eq!(cc.bucket(), 1);
    }

    #[test]
    fn test_out_of_spec_candidate_ignored() {
        let mut cc = ClockCorrection::new();
        assert!(!cc.update(1.001));
        assert_eq!(cc.get(), 0.0);
    }

    #[test]
    fn test_bucket_absorbs_outliers() {
        let mut cc = ClockCorrection::new();
        cc.update(1.0);
        for _ in 0..6 {
            assert!(cc.update(1.0));
        }
        assert_eq!(cc.bucket(), CLOCK_CORRECTION_BUCKET_MAX);

        // Outliers drain the bucket without moving the value
        for expected in (0..CLOCK_CORRECTION_BUCKET_MAX).rev() {
            assert!(!cc.update(1.000_005));
            assert_eq!(cc.bucket(), expected);
            assert_eq!(cc.get(), 1.0);
        }
        // Bucket empty: the new value is taken over
        assert!(!cc.update(1.000_005));
        assert_eq!(cc.get(), 1.000_005);
    }

    #[test]
    fn test_candidate_across_wraps() {
        // Tag clock wraps at 2^40, anchor clock at 2^32
        let tag_old = (1u64 << 40) - 500;
        let tag_new = 500;
        let anchor_old = u32::MAX as u64 - 499;
        let anchor_new = 500;
        assert_eq!(ClockCorrection::candidate(tag_new, tag_old, anchor_new, anchor_old), Some(1.0));
        assert_eq!(ClockCorrection::candidate(10, 5, 7, 7), None);
    }
}
