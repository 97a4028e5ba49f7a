use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{debug, trace};

use super::flow::{DirectionStats, Flow, FlowPhase, FlowStep};
use super::{Direction, FlowDescriptor, FlowKey, StreamConsumerFactory, TcpSegment};

/// Size of one buffering page.
pub const PAGE_SIZE: usize = 1900;

/// Default number of buffering pages across all flows.
pub const DEFAULT_MAX_PAGES: usize = 4096;

/// Default global buffer budget (bytes).
pub const DEFAULT_BUFFER_BUDGET: usize = DEFAULT_MAX_PAGES * PAGE_SIZE;

/// Default cap on concurrently open flows.
pub const DEFAULT_MAX_FLOWS: usize = 65_536;

/// Tombstone expiry and idle sweeps run at most this often (capture time).
const SWEEP_INTERVAL_US: i64 = 1_000_000;

/// Eviction events retained between calls to `take_evictions`.
const MAX_PENDING_EVICTIONS: usize = 4096;

/// Configuration for the [`Reassembler`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum bytes buffered out of order across all flows.
    pub buffer_budget: usize,
    /// Close flows with no activity for this long (microseconds).
    pub idle_timeout_us: Option<i64>,
    /// How long a closed flow key keeps swallowing trailing segments
    /// (microseconds).
    pub closed_linger_us: i64,
    /// Open flows allowed at once; the least recently active flow is
    /// closed to make room for a new one.
    pub max_flows: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            idle_timeout_us: None,
            closed_linger_us: 120_000_000, // 2 minutes
            max_flows: DEFAULT_MAX_FLOWS,
        }
    }
}

/// Why a segment was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The flow closed recently.
    Tombstoned,
    /// The sending direction already closed.
    DirectionClosed,
}

/// Outcome of [`Reassembler::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Empty segment without SYN/FIN/RST; only refreshed activity.
    LivenessOnly,
    Ignored(IgnoreReason),
}

/// Data dropped from one flow to respect the buffer budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionEvent {
    pub flow_id: u64,
    pub key: FlowKey,
    /// Bytes never seen that the flow jumped over.
    pub skipped_bytes: u64,
    /// Buffered bytes thrown away.
    pub discarded_bytes: usize,
}

/// Reassembly counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub segments: u64,
    pub liveness_only: u64,
    pub ignored: u64,
    pub flows_opened: u64,
    pub flows_closed: u64,
    pub flows_idle_closed: u64,
    /// Flows closed to stay within `max_flows`.
    pub flows_capacity_closed: u64,
    pub evictions: u64,
    pub bytes_delivered: u64,
    pub retransmitted_bytes: u64,
    pub out_of_order: u64,
    pub bytes_lost: u64,
    pub buffered_bytes: usize,
    pub open_flows: usize,
}

/// Groups segments into flows, reorders them and feeds each flow's consumer.
///
/// All state is owned here and driven through `&mut self` from a single
/// reassembly path.
pub struct Reassembler<F: StreamConsumerFactory> {
    factory: F,
    config: StreamConfig,
    flows: HashMap<FlowKey, Flow<F::Consumer>>,
    /// Closed keys and when they closed.
    tombstones: HashMap<FlowKey, i64>,
    next_id: u64,
    tick: u64,
    buffered_bytes: usize,
    clock_us: i64,
    last_sweep_us: i64,
    evictions: Vec<EvictionEvent>,
    closed_totals: DirectionStats,
    counters: ReassemblyStats,
}

impl<F: StreamConsumerFactory> Reassembler<F> {
    pub fn new(factory: F, config: StreamConfig) -> Self {
        Self {
            factory,
            config,
            flows: HashMap::new(),
            tombstones: HashMap::new(),
            next_id: 1,
            tick: 0,
            buffered_bytes: 0,
            clock_us: i64::MIN,
            last_sweep_us: i64::MIN,
            evictions: Vec::new(),
            closed_totals: DirectionStats::default(),
            counters: ReassemblyStats::default(),
        }
    }

    /// Create with the default configuration.
    pub fn with_defaults(factory: F) -> Self {
        Self::new(factory, StreamConfig::default())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Set the global eviction threshold, evicting at once if needed.
    pub fn set_buffer_budget(&mut self, max_bytes: usize) {
        self.config.buffer_budget = max_bytes;
        self.enforce_budget();
    }

    /// Process one TCP segment.
    pub fn process(&mut self, segment: &TcpSegment) -> Disposition {
        self.counters.segments += 1;
        self.tick += 1;
        if segment.timestamp_us > self.clock_us {
            self.clock_us = segment.timestamp_us;
        }
        self.maybe_sweep();

        // 1. Resolve the key, skipping recently closed flows
        let key = segment.key();
        if let Some(&closed_at) = self.tombstones.get(&key) {
            if self.clock_us.saturating_sub(closed_at) < self.config.closed_linger_us {
                self.counters.ignored += 1;
                trace!(%key, "segment for closed flow ignored");
                return Disposition::Ignored(IgnoreReason::Tombstoned);
            }
            self.tombstones.remove(&key);
        }

        // 2. Liveness-only segments refresh activity and never open flows
        if segment.is_liveness_only() {
            self.counters.liveness_only += 1;
            if let Some(flow) = self.flows.get_mut(&key) {
                flow.touch(segment.timestamp_us, self.tick);
                if segment.flags.ack {
                    flow.promote();
                }
            }
            return Disposition::LivenessOnly;
        }

        // 3. Look up or create the flow
        if !self.flows.contains_key(&key) {
            self.make_room();
        }
        let flow = match self.flows.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let descriptor = FlowDescriptor::from_first_segment(
                    self.next_id,
                    segment.src,
                    segment.dst,
                    segment.flags,
                    segment.timestamp_us,
                );
                self.next_id += 1;
                self.counters.flows_opened += 1;
                debug!(flow = %descriptor, "flow opened");
                let consumer = self.factory.new_consumer(&descriptor);
                entry.insert(Flow::new(descriptor, consumer, segment.flags.syn))
            }
        };

        // 4. Buffer, deliver, and handle FIN/RST
        let direction = flow.descriptor.direction(segment.src);
        let before = flow.buffered_bytes();
        flow.touch(segment.timestamp_us, self.tick);
        let step = flow.apply(segment, direction);
        let after = flow.buffered_bytes();
        let closed = flow.is_closed();
        self.buffered_bytes = self.buffered_bytes + after - before;

        if step == FlowStep::DirectionClosed {
            self.counters.ignored += 1;
            trace!(%key, direction = direction.as_str(), "segment for closed direction ignored");
            return Disposition::Ignored(IgnoreReason::DirectionClosed);
        }

        if closed {
            self.close_flow(&key);
        }

        // 5. Keep total buffering within budget
        self.enforce_budget();
        Disposition::Accepted
    }

    /// Close every open flow, oldest id first.
    ///
    /// Delivered data stays delivered; buffered data behind a gap is dropped
    /// and counted as lost. Returns the number of flows closed.
    pub fn flush_all(&mut self) -> usize {
        let mut open: Vec<(u64, FlowKey)> = self
            .flows
            .iter()
            .map(|(key, flow)| (flow.descriptor.id, *key))
            .collect();
        open.sort_unstable();
        for (_, key) in &open {
            self.close_flow(key);
        }
        if !open.is_empty() {
            debug!(flows = open.len(), "flushed all flows");
        }
        open.len()
    }

    /// Close flows idle since before `now_us - idle_timeout`, oldest first.
    ///
    /// Does nothing without an idle timeout. Returns the number closed.
    pub fn flush_idle(&mut self, now_us: i64) -> usize {
        let Some(timeout) = self.config.idle_timeout_us else {
            return 0;
        };
        let mut idle: Vec<(i64, u64, FlowKey)> = self
            .flows
            .iter()
            .filter(|(_, flow)| now_us.saturating_sub(flow.last_activity_us) >= timeout)
            .map(|(key, flow)| (flow.last_activity_us, flow.activity_tick, *key))
            .collect();
        idle.sort_unstable();
        for (_, _, key) in &idle {
            debug!(%key, "closing idle flow");
            self.close_flow(key);
        }
        self.counters.flows_idle_closed += idle.len() as u64;
        idle.len()
    }

    /// Current counters, including flows that are still open.
    pub fn stats(&self) -> ReassemblyStats {
        let mut totals = self.closed_totals;
        for flow in self.flows.values() {
            totals.merge(&flow.direction(Direction::ToServer).stats);
            totals.merge(&flow.direction(Direction::ToClient).stats);
        }
        ReassemblyStats {
            bytes_delivered: totals.bytes_delivered,
            retransmitted_bytes: totals.retransmitted_bytes,
            out_of_order: totals.out_of_order,
            bytes_lost: totals.bytes_lost,
            buffered_bytes: self.buffered_bytes,
            open_flows: self.flows.len(),
            ..self.counters
        }
    }

    /// Eviction events since the last call.
    pub fn take_evictions(&mut self) -> Vec<EvictionEvent> {
        std::mem::take(&mut self.evictions)
    }

    /// Total bytes currently buffered out of order.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn open_flows(&self) -> usize {
        self.flows.len()
    }

    /// Phase of an open flow.
    pub fn flow_phase(&self, key: &FlowKey) -> Option<FlowPhase> {
        self.flows.get(key).map(|flow| flow.phase())
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    /// Consume the reassembler, returning its factory.
    ///
    /// Flows still open are dropped without `close`; call
    /// [`flush_all`](Self::flush_all) first.
    pub fn into_factory(self) -> F {
        self.factory
    }

    fn close_flow(&mut self, key: &FlowKey) {
        let Some(flow) = self.flows.remove(key) else {
            return;
        };
        self.buffered_bytes -= flow.buffered_bytes();
        let phase = flow.phase();
        let (descriptor, stats) = flow.finish();
        self.closed_totals.merge(&stats[0]);
        self.closed_totals.merge(&stats[1]);
        self.counters.flows_closed += 1;
        self.tombstones.insert(*key, self.clock_us);
        debug!(
            flow = %descriptor,
            phase = phase.as_str(),
            to_server = stats[0].bytes_delivered,
            to_client = stats[1].bytes_delivered,
            "flow closed"
        );
    }

    fn enforce_budget(&mut self) {
        while self.buffered_bytes > self.config.buffer_budget {
            let victim = self
                .flows
                .iter()
                .filter(|(_, flow)| flow.buffered_bytes() > 0)
                .min_by_key(|(_, flow)| (flow.last_activity_us, flow.activity_tick))
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                break;
            };
            let Some(flow) = self.flows.get_mut(&key) else {
                break;
            };

            let before = flow.buffered_bytes();
            let (skipped, discarded) = flow.evict();
            self.buffered_bytes -= before - flow.buffered_bytes();
            self.counters.evictions += 1;
            debug!(
                flow = %flow.descriptor,
                skipped_bytes = skipped,
                discarded_bytes = discarded,
                "evicted buffered data over budget"
            );
            if self.evictions.len() < MAX_PENDING_EVICTIONS {
                self.evictions.push(EvictionEvent {
                    flow_id: flow.descriptor.id,
                    key,
                    skipped_bytes: skipped,
                    discarded_bytes: discarded,
                });
            }
            if flow.is_closed() {
                self.close_flow(&key);
            }
        }
    }

    /// Close least recently active flows until one more fits.
    fn make_room(&mut self) {
        while self.flows.len() >= self.config.max_flows.max(1) {
            let victim = self
                .flows
                .iter()
                .min_by_key(|(_, flow)| (flow.last_activity_us, flow.activity_tick))
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                break;
            };
            debug!(%key, open = self.flows.len(), "closing flow over flow limit");
            self.close_flow(&key);
            self.counters.flows_capacity_closed += 1;
        }
    }

    fn maybe_sweep(&mut self) {
        if self.clock_us.saturating_sub(self.last_sweep_us) < SWEEP_INTERVAL_US {
            return;
        }
        self.last_sweep_us = self.clock_us;
        let now = self.clock_us;
        let linger = self.config.closed_linger_us;
        self.tombstones
            .retain(|_, closed_at| now.saturating_sub(*closed_at) < linger);
        self.flush_idle(now);
    }
}
