use bytes::Bytes;

use super::seq::{seq_add, seq_diff, unwrap_offset};
use super::{Direction, FlowDescriptor, SegmentBuffer, StreamConsumer, TcpSegment};

/// Lifecycle phase of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Only handshake segments seen so far.
    Opening,
    Established,
    /// One direction has closed (FIN reached or RST).
    HalfClosed,
    Closed,
}

impl FlowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPhase::Opening => "opening",
            FlowPhase::Established => "established",
            FlowPhase::HalfClosed => "half_closed",
            FlowPhase::Closed => "closed",
        }
    }
}

/// Per-direction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    pub segments: u64,
    pub bytes_delivered: u64,
    pub retransmitted_bytes: u64,
    pub out_of_order: u64,
    /// Bytes skipped or discarded without delivery.
    pub bytes_lost: u64,
}

impl DirectionStats {
    pub(crate) fn merge(&mut self, other: &DirectionStats) {
        self.segments += other.segments;
        self.bytes_delivered += other.bytes_delivered;
        self.retransmitted_bytes += other.retransmitted_bytes;
        self.out_of_order += other.out_of_order;
        self.bytes_lost += other.bytes_lost;
    }
}

/// Reassembly state for one direction.
///
/// Positions are 64-bit stream offsets relative to `base_seq`; offset 0 is
/// the first byte the direction carries (or the first byte captured when
/// the flow was picked up mid-stream).
#[derive(Debug, Default)]
pub(crate) struct DirectionState {
    base_seq: Option<u32>,
    next_offset: u64,
    buffer: SegmentBuffer,
    fin_offset: Option<u64>,
    closed: bool,
    pub stats: DirectionStats,
}

impl DirectionState {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.buffered_bytes()
    }

    /// Next expected sequence number, if the direction has been seeded.
    #[cfg(test)]
    pub fn next_seq(&self) -> Option<u32> {
        self.base_seq
            .map(|base| seq_add(base, (self.next_offset & u32::MAX as u64) as usize))
    }

    /// SYN seeds the direction unless data already did.
    pub fn on_syn(&mut self, seq: u32) {
        if self.base_seq.is_none() {
            self.base_seq = Some(seq_add(seq, 1));
        }
    }

    /// Accept payload starting at `seq`, pushing newly contiguous ranges
    /// onto `ready` in order.
    pub fn receive(&mut self, seq: u32, payload: &Bytes, ready: &mut Vec<Bytes>) {
        if payload.is_empty() {
            return;
        }
        let base = *self.base_seq.get_or_insert(seq);
        let next_seq = seq_add(base, (self.next_offset & u32::MAX as u64) as usize);
        let rel = seq_diff(seq, next_seq) as i64;
        let len = payload.len() as i64;

        if rel + len <= 0 {
            self.stats.retransmitted_bytes += payload.len() as u64;
            return;
        }

        let skip = if rel < 0 { (-rel) as usize } else { 0 };
        let start = if rel < 0 {
            self.next_offset
        } else {
            self.next_offset + rel as u64
        };
        self.stats.retransmitted_bytes += skip as u64;

        if start == self.next_offset {
            let end = start + (payload.len() - skip) as u64;
            // In order and not touching anything buffered: hand the payload
            // over without copying it.
            let clear = match self.buffer.peek_lowest() {
                None => true,
                Some((lowest, _)) => end < lowest,
            };
            if clear {
                let data = payload.slice(skip..);
                self.next_offset = end;
                self.stats.bytes_delivered += data.len() as u64;
                ready.push(data);
                self.check_fin();
                return;
            }
        } else {
            self.stats.out_of_order += 1;
        }

        let outcome = self.buffer.insert(self.next_offset, start, &payload[skip..]);
        self.stats.retransmitted_bytes += outcome.duplicate as u64;
        self.drain(ready);
        self.check_fin();
    }

    fn drain(&mut self, ready: &mut Vec<Bytes>) {
        while let Some((offset, _)) = self.buffer.peek_lowest() {
            if offset != self.next_offset {
                break;
            }
            if let Some((_, data)) = self.buffer.pop_lowest() {
                self.next_offset += data.len() as u64;
                self.stats.bytes_delivered += data.len() as u64;
                ready.push(Bytes::from(data));
            }
        }
    }

    /// Record a FIN whose sequence number is `fin_seq` (one past the last
    /// data byte).
    pub fn mark_fin(&mut self, fin_seq: u32) {
        let base = *self.base_seq.get_or_insert(fin_seq);
        if self.fin_offset.is_none() {
            let offset = unwrap_offset(base, self.next_offset, fin_seq).unwrap_or(self.next_offset);
            self.fin_offset = Some(offset.max(self.next_offset));
        }
        self.check_fin();
    }

    fn check_fin(&mut self) {
        if let Some(fin) = self.fin_offset {
            if self.next_offset >= fin {
                self.closed = true;
            }
        }
    }

    /// RST: close at once and discard anything undeliverable.
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.clear();
        self.stats.bytes_lost += discarded as u64;
        self.closed = true;
        discarded
    }

    /// Skip the gap in front of the buffered data and discard the buffer.
    ///
    /// Returns `(skipped, discarded)` byte counts.
    pub fn abandon_gap(&mut self) -> (u64, usize) {
        let Some(end) = self.buffer.end_offset() else {
            return (0, 0);
        };
        let discarded = self.buffer.clear();
        let skipped = end - self.next_offset - discarded as u64;
        self.next_offset = end;
        self.stats.bytes_lost += skipped + discarded as u64;
        self.check_fin();
        (skipped, discarded)
    }

    /// Drop buffered data that can no longer become contiguous.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.buffer.clear();
        self.stats.bytes_lost += discarded as u64;
        discarded
    }
}

/// What happened to one segment inside its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowStep {
    /// Segment was used (possibly as a pure duplicate).
    Applied,
    /// Segment arrived for an already closed direction.
    DirectionClosed,
}

/// A tracked flow: two direction states and the consumer they feed.
pub(crate) struct Flow<C> {
    pub descriptor: FlowDescriptor,
    consumer: C,
    dirs: [DirectionState; 2],
    phase: FlowPhase,
    pub last_activity_us: i64,
    pub activity_tick: u64,
    ready: Vec<Bytes>,
}

impl<C: StreamConsumer> Flow<C> {
    pub fn new(descriptor: FlowDescriptor, consumer: C, opening: bool) -> Self {
        let last_activity_us = descriptor.first_seen_us;
        Self {
            descriptor,
            consumer,
            dirs: [DirectionState::default(), DirectionState::default()],
            phase: if opening {
                FlowPhase::Opening
            } else {
                FlowPhase::Established
            },
            last_activity_us,
            activity_tick: 0,
            ready: Vec::new(),
        }
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    pub fn direction(&self, direction: Direction) -> &DirectionState {
        &self.dirs[direction.index()]
    }

    pub fn buffered_bytes(&self) -> usize {
        self.dirs.iter().map(DirectionState::buffered_bytes).sum()
    }

    pub fn touch(&mut self, timestamp_us: i64, tick: u64) {
        self.last_activity_us = self.last_activity_us.max(timestamp_us);
        self.activity_tick = tick;
    }

    /// Apply a segment that is not liveness-only.
    pub fn apply(&mut self, segment: &TcpSegment, direction: Direction) -> FlowStep {
        let dir = &mut self.dirs[direction.index()];
        if dir.is_closed() {
            return FlowStep::DirectionClosed;
        }
        dir.stats.segments += 1;

        if segment.flags.rst {
            dir.reset();
        } else {
            if segment.flags.syn {
                dir.on_syn(segment.seq);
            }
            dir.receive(segment.data_seq(), &segment.payload, &mut self.ready);
            if segment.flags.fin {
                dir.mark_fin(seq_add(segment.data_seq(), segment.payload.len()));
            }
        }

        self.deliver(direction);
        if !segment.flags.syn || !segment.payload.is_empty() {
            self.promote();
        }
        self.update_phase();
        FlowStep::Applied
    }

    fn deliver(&mut self, direction: Direction) {
        for data in self.ready.drain(..) {
            self.consumer.accept(direction, data);
        }
    }

    pub fn promote(&mut self) {
        if self.phase == FlowPhase::Opening {
            self.phase = FlowPhase::Established;
        }
    }

    fn update_phase(&mut self) {
        let closed = self.dirs.iter().filter(|d| d.is_closed()).count();
        self.phase = match closed {
            0 => self.phase,
            1 => FlowPhase::HalfClosed,
            _ => FlowPhase::Closed,
        };
    }

    pub fn is_closed(&self) -> bool {
        self.phase == FlowPhase::Closed
    }

    /// Abandon gaps in both directions, delivering nothing.
    pub fn evict(&mut self) -> (u64, usize) {
        let mut skipped = 0;
        let mut discarded = 0;
        for dir in &mut self.dirs {
            let (s, d) = dir.abandon_gap();
            skipped += s;
            discarded += d;
        }
        self.update_phase();
        (skipped, discarded)
    }

    /// Close the consumer, dropping any non-contiguous remainder.
    ///
    /// Returns the final per-direction counters, `[to_server, to_client]`.
    pub fn finish(mut self) -> (FlowDescriptor, [DirectionStats; 2]) {
        for dir in &mut self.dirs {
            dir.discard_pending();
        }
        self.consumer.close();
        self.phase = FlowPhase::Closed;
        let stats = [self.dirs[0].stats, self.dirs[1].stats];
        (self.descriptor, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive_all(dir: &mut DirectionState, segments: &[(u32, &'static [u8])]) -> Vec<Bytes> {
        let mut ready = Vec::new();
        for (seq, data) in segments {
            dir.receive(*seq, &Bytes::from_static(data), &mut ready);
        }
        ready
    }

    // Test 1: Out-of-order arrival is delivered in order
    #[test]
    fn test_reorder_delivery() {
        let mut dir = DirectionState::default();
        let ready = receive_all(&mut dir, &[(100, b"AB"), (104, b"EF"), (102, b"CD")]);
        assert_eq!(ready, vec![Bytes::from_static(b"AB"), Bytes::from_static(b"CDEF")]);
        assert_eq!(dir.stats.out_of_order, 1);
        assert_eq!(dir.next_seq(), Some(106));
        assert_eq!(dir.buffered_bytes(), 0);
    }

    // Test 2: Duplicate delivery is suppressed
    #[test]
    fn test_duplicate_suppressed() {
        let mut dir = DirectionState::default();
        let ready = receive_all(&mut dir, &[(100, b"AB"), (100, b"AB")]);
        assert_eq!(ready, vec![Bytes::from_static(b"AB")]);
        assert_eq!(dir.stats.retransmitted_bytes, 2);
    }

    // Test 3: Partial retransmission only yields the new tail
    #[test]
    fn test_partial_retransmit() {
        let mut dir = DirectionState::default();
        let ready = receive_all(&mut dir, &[(100, b"ABCD"), (102, b"CDEF")]);
        assert_eq!(ready, vec![Bytes::from_static(b"ABCD"), Bytes::from_static(b"EF")]);
        assert_eq!(dir.stats.retransmitted_bytes, 2);
    }

    // Test 4: Sequence numbers straddling 2^32
    #[test]
    fn test_wraparound() {
        let mut dir = DirectionState::default();
        let start = u32::MAX - 1;
        let ready = receive_all(
            &mut dir,
            &[(start, b"AB"), (start.wrapping_add(4), b"EF"), (start.wrapping_add(2), b"CD")],
        );
        assert_eq!(ready, vec![Bytes::from_static(b"AB"), Bytes::from_static(b"CDEF")]);
        assert_eq!(dir.next_seq(), Some(4));
    }

    // Test 5: FIN with no data closes immediately
    #[test]
    fn test_fin_without_data() {
        let mut dir = DirectionState::default();
        dir.mark_fin(5000);
        assert!(dir.is_closed());
    }

    // Test 6: FIN waits for the gap to fill
    #[test]
    fn test_fin_waits_for_gap() {
        let mut dir = DirectionState::default();
        let mut ready = Vec::new();
        dir.receive(10, &Bytes::from_static(b"AB"), &mut ready);
        dir.receive(14, &Bytes::from_static(b"EF"), &mut ready);
        dir.mark_fin(16);
        assert!(!dir.is_closed());
        dir.receive(12, &Bytes::from_static(b"CD"), &mut ready);
        assert!(dir.is_closed());
        assert_eq!(ready.concat(), b"ABCDEF".to_vec());
    }

    // Test 7: SYN seeds the next sequence number
    #[test]
    fn test_syn_seeds() {
        let mut dir = DirectionState::default();
        dir.on_syn(999);
        assert_eq!(dir.next_seq(), Some(1000));
        let ready = receive_all(&mut dir, &[(1002, b"CD"), (1000, b"AB")]);
        assert_eq!(ready, vec![Bytes::from_static(b"ABCD")]);
    }

    // Test 8: Abandoning a gap skips it and discards buffered data
    #[test]
    fn test_abandon_gap() {
        let mut dir = DirectionState::default();
        let mut ready = Vec::new();
        dir.receive(0, &Bytes::from_static(b"AB"), &mut ready);
        dir.receive(10, &Bytes::from_static(b"XYZ"), &mut ready);
        assert_eq!(dir.buffered_bytes(), 3);

        let (skipped, discarded) = dir.abandon_gap();
        assert_eq!((skipped, discarded), (8, 3));
        assert_eq!(dir.next_seq(), Some(13));
        assert_eq!(dir.stats.bytes_lost, 11);

        ready.clear();
        dir.receive(13, &Bytes::from_static(b"next"), &mut ready);
        assert_eq!(ready, vec![Bytes::from_static(b"next")]);
    }

    // Test 9: RST discards buffered bytes
    #[test]
    fn test_reset() {
        let mut dir = DirectionState::default();
        let mut ready = Vec::new();
        dir.receive(0, &Bytes::from_static(b"AB"), &mut ready);
        dir.receive(5, &Bytes::from_static(b"XY"), &mut ready);
        assert_eq!(dir.reset(), 2);
        assert!(dir.is_closed());
        assert_eq!(dir.buffered_bytes(), 0);
    }
}
