//! TCP sequence number arithmetic.
//!
//! Sequence numbers are 32-bit and wrap modulo 2^32, so two of them can
//! only be compared through their signed difference. Every before/after test
//! in the reassembler goes through these helpers.

/// Signed distance from `b` to `a` (`a - b`), modulo 2^32.
#[inline]
pub fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    seq_diff(a, b) < 0
}

#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    seq_diff(a, b) <= 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_diff(a, b) > 0
}

#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    seq_diff(a, b) >= 0
}

#[inline]
pub fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}

/// Map a sequence number into the 64-bit stream offset space anchored at
/// `base_seq` (offset 0), choosing the value nearest to `reference`.
///
/// Returns `None` when the nearest candidate would lie before offset 0.
pub fn unwrap_offset(base_seq: u32, reference: u64, seq: u32) -> Option<u64> {
    let reference_seq = seq_add(base_seq, (reference & u32::MAX as u64) as usize);
    let delta = seq_diff(seq, reference_seq) as i64;
    let offset = reference as i64 + delta;
    if offset < 0 {
        None
    } else {
        Some(offset as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Plain ordering away from the wrap point
    #[test]
    fn test_ordering() {
        assert!(seq_lt(100, 200));
        assert!(seq_gt(200, 100));
        assert!(seq_le(100, 100));
        assert!(seq_ge(100, 100));
        assert!(!seq_lt(100, 100));
        assert_eq!(seq_diff(200, 100), 100);
        assert_eq!(seq_diff(100, 200), -100);
    }

    // Test 2: Ordering across 2^32
    #[test]
    fn test_wraparound_ordering() {
        let before = u32::MAX - 5;
        let after = 10;
        assert!(seq_lt(before, after));
        assert!(seq_gt(after, before));
        assert_eq!(seq_diff(after, before), 16);
        assert_eq!(seq_add(before, 16), after);
    }

    // Test 3: Offsets keep growing past the wrap
    #[test]
    fn test_unwrap_offset_across_wrap() {
        let base = u32::MAX - 1;
        assert_eq!(unwrap_offset(base, 0, base), Some(0));
        assert_eq!(unwrap_offset(base, 0, 3), Some(5));
        // A second lap of sequence space lands 2^32 further out.
        let reference = 1u64 << 32;
        assert_eq!(unwrap_offset(base, reference, base.wrapping_add(4)), Some(reference + 4));
    }

    // Test 4: Sequence numbers before the base have no offset
    #[test]
    fn test_unwrap_offset_before_base() {
        assert_eq!(unwrap_offset(1000, 0, 990), None);
        assert_eq!(unwrap_offset(1000, 20, 1010), Some(10));
    }
}
