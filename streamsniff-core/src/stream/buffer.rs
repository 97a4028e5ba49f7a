use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

/// Result of inserting one payload into a [`SegmentBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Bytes that were new and are now buffered.
    pub accepted: usize,
    /// Bytes dropped because they were already delivered or buffered.
    pub duplicate: usize,
}

/// Out-of-order byte ranges for one direction of a flow.
///
/// Ranges are keyed by 64-bit stream offset, never overlap and never touch:
/// adjacent ranges are merged on insert. The first bytes to arrive for an
/// offset win; later arrivals only fill holes.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    ranges: BTreeMap<u64, Vec<u8>>,
    bytes: usize,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `data` starting at stream offset `start`.
    ///
    /// Anything below `watermark` (already delivered) is dropped first.
    pub fn insert(&mut self, watermark: u64, start: u64, data: &[u8]) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        let end = start + data.len() as u64;
        if data.is_empty() || end <= watermark {
            outcome.duplicate = data.len();
            return outcome;
        }

        let (start, data) = if start < watermark {
            let skip = (watermark - start) as usize;
            outcome.duplicate = skip;
            (watermark, &data[skip..])
        } else {
            (start, data)
        };

        let mut touching = Vec::new();
        if let Some((&k, v)) = self.ranges.range(..=start).next_back() {
            if k + v.len() as u64 >= start {
                touching.push(k);
            }
        }
        touching.extend(
            self.ranges
                .range((Excluded(start), Included(end)))
                .map(|(&k, _)| k),
        );

        if touching.is_empty() {
            self.ranges.insert(start, data.to_vec());
            self.bytes += data.len();
            outcome.accepted = data.len();
            return outcome;
        }

        let mut existing = touching
            .into_iter()
            .filter_map(|k| self.ranges.remove(&k).map(|v| (k, v)))
            .peekable();

        // Reuse the allocation of a range that already covers `start`.
        let (merged_start, mut merged) = match existing.next_if(|(k, _)| *k <= start) {
            Some(first) => first,
            None => (start, Vec::with_capacity(data.len())),
        };
        self.bytes -= merged.len();

        let mut cursor = merged_start + merged.len() as u64;
        let mut filled = 0usize;
        for (k, v) in existing {
            if k > cursor {
                merged.extend_from_slice(&data[(cursor - start) as usize..(k - start) as usize]);
                filled += (k - cursor) as usize;
            }
            self.bytes -= v.len();
            merged.extend_from_slice(&v);
            cursor = k + v.len() as u64;
        }
        if end > cursor {
            merged.extend_from_slice(&data[(cursor - start) as usize..]);
            filled += (end - cursor) as usize;
        }

        self.bytes += merged.len();
        self.ranges.insert(merged_start, merged);
        outcome.accepted = filled;
        outcome.duplicate += data.len() - filled;
        outcome
    }

    /// Lowest buffered range.
    pub fn peek_lowest(&self) -> Option<(u64, &[u8])> {
        self.ranges
            .first_key_value()
            .map(|(&k, v)| (k, v.as_slice()))
    }

    /// Remove and return the lowest buffered range.
    pub fn pop_lowest(&mut self) -> Option<(u64, Vec<u8>)> {
        let (k, v) = self.ranges.pop_first()?;
        self.bytes -= v.len();
        Some((k, v))
    }

    /// Total buffered bytes.
    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Stream offset one past the highest buffered byte.
    pub fn end_offset(&self) -> Option<u64> {
        self.ranges
            .last_key_value()
            .map(|(&k, v)| k + v.len() as u64)
    }

    /// Drop everything, returning the number of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.bytes;
        self.ranges.clear();
        self.bytes = 0;
        discarded
    }
}
