//! Wrap-aware arithmetic on radio timestamps.
//!
//! The tag's radio counts in a 40-bit register that wraps roughly every
//! 17 seconds. Anchors only put the low 32 bits of their own counter on air,
//! so values read from a packet wrap at 2^32. Differences must always be
//! taken modulo the width of the clock that produced both values.

/// Width of the tag's local receive timestamps
pub const TAG_TIMESTAMP_BITS: u32 = 40;

/// Width of anchor timestamps carried in packets
pub const ANCHOR_TIMESTAMP_BITS: u32 = 32;

const fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// Keep the low `bits` bits of a timestamp
pub fn truncate(timestamp: u64, bits: u32) -> u64 {
    timestamp & mask(bits)
}

/// Ticks from `earlier` to `later`, assuming at most one wrap between them
pub fn elapsed(later: u64, earlier: u64, bits: u32) -> u64 {
    later.wrapping_sub(earlier) & mask(bits)
}

/// Signed difference `later - earlier` on a `bits`-wide wrapping clock.
///
/// Results are in `[-2^(bits-1), 2^(bits-1))`.
pub fn wrapping_delta(later: u64, earlier: u64, bits: u32) -> i64 {
    let raw = elapsed(later, earlier, bits);
    if raw >= 1u64 << (bits - 1) {
        raw as i64 - (1i64 << bits)
    } else {
        raw as i64
    }
}

/// Signed difference on the tag's 40-bit clock
pub fn tag_delta(later: u64, earlier: u64) -> i64 {
    wrapping_delta(later, earlier, TAG_TIMESTAMP_BITS)
}

/// Signed difference on an anchor's 32-bit on-air clock
pub fn anchor_delta(later: u64, earlier: u64) -> i64 {
    wrapping_delta(later, earlier, ANCHOR_TIMESTAMP_BITS)
}
