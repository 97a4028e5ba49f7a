//! Fuzz target for TCP stream reassembly.
//!
//! Input is a sequence of 8-byte segment descriptions:
//! - flow selector and direction
//! - sequence number offset (near a base that sits just below 2^32)
//! - payload length and TCP flags
//! - timestamp step
//!
//! Each payload byte is derived from its sequence number and its sender's
//! port, so any delivered byte reveals the stream position it came from.
//!
//! Checks, after every segment:
//! - buffered bytes stay within the budget
//! - delivered bytes of a flow direction are consecutive stream positions,
//!   except across an eviction
//! - no flow receives data after it was closed

#![no_main]

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use streamsniff_core::stream::{
    Direction, FlowDescriptor, Reassembler, StreamConfig, TcpFlags, TcpSegment,
};
use streamsniff_core::test_utils::{ConsumerEvent, RecordingFactory};

const BUDGET: usize = 4096;
const SEQ_BASE: u32 = u32::MAX - 2048;

fn endpoint(host: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)), port)
}

/// Byte carried at sequence position `seq` by the endpoint on `port`.
fn stream_byte(port: u16, seq: u32) -> u8 {
    (seq as u8) ^ (port as u8).wrapping_mul(37)
}

/// Stream position (mod 256) a delivered byte was generated for.
fn position(port: u16, byte: u8) -> u8 {
    byte ^ (port as u8).wrapping_mul(37)
}

/// Checks delivered ranges against the positions their bytes encode.
#[derive(Default)]
struct OrderCheck {
    flows: HashMap<u64, FlowDescriptor>,
    /// Next expected position per flow direction.
    next: HashMap<(u64, Direction), u8>,
    seen: usize,
}

impl OrderCheck {
    fn observe(&mut self, events: &[ConsumerEvent]) {
        for event in &events[self.seen..] {
            match event {
                ConsumerEvent::Open(flow) => {
                    self.flows.insert(flow.id, flow.clone());
                }
                ConsumerEvent::Data {
                    flow_id,
                    direction,
                    data,
                } => {
                    let flow = &self.flows[flow_id];
                    let sender = match direction {
                        Direction::ToServer => flow.client.port(),
                        Direction::ToClient => flow.server.port(),
                    };
                    let mut expected = self.next.get(&(*flow_id, *direction)).copied();
                    for &byte in data.iter() {
                        let pos = position(sender, byte);
                        if let Some(expected) = expected {
                            assert_eq!(pos, expected, "flow {flow_id} {direction} out of order");
                        }
                        expected = Some(pos.wrapping_add(1));
                    }
                    if let Some(expected) = expected {
                        self.next.insert((*flow_id, *direction), expected);
                    }
                }
                ConsumerEvent::Close { .. } => {}
            }
        }
        self.seen = events.len();
    }

    /// An eviction may jump a flow forward.
    fn evicted(&mut self, flow_id: u64) {
        self.next.retain(|(id, _), _| *id != flow_id);
    }
}

fuzz_target!(|data: &[u8]| {
    let factory = RecordingFactory::default();
    let config = StreamConfig {
        buffer_budget: BUDGET,
        idle_timeout_us: Some(5_000_000),
        ..StreamConfig::default()
    };
    let mut reassembler = Reassembler::new(factory.clone(), config);
    let mut timestamp_us = 0i64;
    let mut order = OrderCheck::default();

    for record in data.chunks_exact(8) {
        let flow = (record[0] & 0x03) as u16;
        let to_server = record[0] & 0x80 == 0;
        let offset = u16::from_be_bytes([record[1], record[2]]) as u32;
        let len = record[3] as usize;
        let flags = record[4];
        timestamp_us += u16::from_be_bytes([record[5], record[6]]) as i64 * 1000;

        let client = endpoint(1, 40000 + flow);
        let server = endpoint(2, 1935);
        let (src, dst) = if to_server { (client, server) } else { (server, client) };
        let seq = SEQ_BASE.wrapping_add(offset);
        let syn = flags & 0x02 != 0;
        // SYN occupies one sequence number ahead of the data
        let data_seq = if syn { seq.wrapping_add(1) } else { seq };
        let payload: Vec<u8> = (0..len as u32)
            .map(|i| stream_byte(src.port(), data_seq.wrapping_add(i)))
            .collect();

        reassembler.process(&TcpSegment {
            src,
            dst,
            seq,
            flags: TcpFlags {
                syn,
                ack: flags & 0x10 != 0,
                fin: flags & 0x01 != 0,
                rst: flags & 0x04 != 0,
            },
            payload: Bytes::from(payload),
            timestamp_us,
        });

        assert!(reassembler.buffered_bytes() <= BUDGET);
        order.observe(&factory.events());
        for eviction in reassembler.take_evictions() {
            order.evicted(eviction.flow_id);
        }
    }

    reassembler.flush_all();
    order.observe(&factory.events());
    assert_eq!(reassembler.buffered_bytes(), 0);
    assert_eq!(reassembler.open_flows(), 0);

    // Every flow closes exactly once and never sees data afterwards
    let mut closed = HashSet::new();
    for event in factory.events() {
        match event {
            ConsumerEvent::Data { flow_id, .. } => assert!(!closed.contains(&flow_id)),
            ConsumerEvent::Close { flow_id } => assert!(closed.insert(flow_id)),
            ConsumerEvent::Open(_) => {}
        }
    }
});
