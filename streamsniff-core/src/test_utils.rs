//! Test utilities.
//!
//! Builders for decoded segments, raw frames and capture files, plus a
//! consumer factory that records everything it is handed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::stream::{Direction, FlowDescriptor, StreamConsumer, StreamConsumerFactory, TcpFlags, TcpSegment};

/// Builder for decoded [`TcpSegment`]s.
///
/// Addresses are parsed from strings and panic when invalid.
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    flags: TcpFlags,
    payload: Vec<u8>,
    timestamp_us: i64,
}

impl SegmentBuilder {
    pub fn new(src: &str, dst: &str) -> Self {
        Self {
            src: src.parse().expect("invalid source address"),
            dst: dst.parse().expect("invalid destination address"),
            seq: 0,
            flags: TcpFlags::default(),
            payload: Vec::new(),
            timestamp_us: 0,
        }
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn syn(mut self) -> Self {
        self.flags.syn = true;
        self
    }

    pub fn ack(mut self) -> Self {
        self.flags.ack = true;
        self
    }

    pub fn fin(mut self) -> Self {
        self.flags.fin = true;
        self
    }

    pub fn rst(mut self) -> Self {
        self.flags.rst = true;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Capture timestamp in microseconds.
    pub fn at(mut self, timestamp_us: i64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn build(self) -> TcpSegment {
        TcpSegment {
            src: self.src,
            dst: self.dst,
            seq: self.seq,
            flags: self.flags,
            payload: Bytes::from(self.payload),
            timestamp_us: self.timestamp_us,
        }
    }
}

/// Builder for Ethernet II frames.
#[derive(Debug, Clone)]
pub struct EthernetBuilder {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    vlan: Option<u16>,
    ethertype: u16,
    payload: Vec<u8>,
}

impl Default for EthernetBuilder {
    fn default() -> Self {
        Self {
            src_mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            dst_mac: [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb],
            vlan: None,
            ethertype: 0x0800, // IPv4
            payload: Vec::new(),
        }
    }
}

impl EthernetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn ipv6(self) -> Self {
        self.ethertype(0x86DD)
    }

    /// Insert an 802.1Q tag.
    pub fn vlan(mut self, id: u16) -> Self {
        self.vlan = Some(id);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(18 + self.payload.len());
        frame.extend_from_slice(&self.dst_mac);
        frame.extend_from_slice(&self.src_mac);
        if let Some(id) = self.vlan {
            frame.extend_from_slice(&0x8100u16.to_be_bytes());
            frame.extend_from_slice(&(id & 0x0fff).to_be_bytes());
        }
        frame.extend_from_slice(&self.ethertype.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Builder for IPv4 packets.
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    protocol: u8,
    flags_fragment: u16,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    payload: Vec<u8>,
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self {
            protocol: 6, // TCP
            flags_fragment: 0x4000, // DF
            src_ip: [10, 0, 0, 1],
            dst_ip: [10, 0, 0, 2],
            payload: Vec::new(),
        }
    }
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_ip(mut self, ip: [u8; 4]) -> Self {
        self.src_ip = ip;
        self
    }

    pub fn dst_ip(mut self, ip: [u8; 4]) -> Self {
        self.dst_ip = ip;
        self
    }

    /// Mark the packet as a non-final fragment.
    pub fn more_fragments(mut self) -> Self {
        self.flags_fragment = 0x2000;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = 20 + self.payload.len() as u16;
        let mut packet = Vec::with_capacity(total_length as usize);
        packet.push(0x45); // Version 4, IHL 5
        packet.push(0x00);
        packet.extend_from_slice(&total_length.to_be_bytes());
        packet.extend_from_slice(&0x0001u16.to_be_bytes());
        packet.extend_from_slice(&self.flags_fragment.to_be_bytes());
        packet.push(64); // TTL
        packet.push(self.protocol);
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum (not calculated)
        packet.extend_from_slice(&self.src_ip);
        packet.extend_from_slice(&self.dst_ip);
        packet.extend_from_slice(&self.payload);
        packet
    }
}

/// Builder for IPv6 packets without extension headers.
#[derive(Debug, Clone)]
pub struct Ipv6Builder {
    next_header: u8,
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    payload: Vec<u8>,
}

impl Default for Ipv6Builder {
    fn default() -> Self {
        let mut src_ip = [0u8; 16];
        src_ip[0] = 0xfd;
        src_ip[15] = 1;
        let mut dst_ip = src_ip;
        dst_ip[15] = 2;
        Self {
            next_header: 6,
            src_ip,
            dst_ip,
            payload: Vec::new(),
        }
    }
}

impl Ipv6Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(40 + self.payload.len());
        packet.extend_from_slice(&[0x60, 0x00, 0x00, 0x00]);
        packet.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        packet.push(self.next_header);
        packet.push(64); // Hop limit
        packet.extend_from_slice(&self.src_ip);
        packet.extend_from_slice(&self.dst_ip);
        packet.extend_from_slice(&self.payload);
        packet
    }
}

/// Builder for TCP headers.
#[derive(Debug, Clone)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: Vec<u8>,
}

impl Default for TcpBuilder {
    fn default() -> Self {
        Self {
            src_port: 50000,
            dst_port: 1935,
            seq: 1,
            ack: 0,
            flags: 0x10, // ACK
            payload: Vec::new(),
        }
    }
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack_num(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn syn(self) -> Self {
        self.flags(0x02)
    }

    pub fn syn_ack(self) -> Self {
        self.flags(0x12)
    }

    pub fn fin_ack(self) -> Self {
        self.flags(0x11)
    }

    pub fn rst(self) -> Self {
        self.flags(0x04)
    }

    pub fn psh_ack(self) -> Self {
        self.flags(0x18)
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut segment = Vec::with_capacity(20 + self.payload.len());
        segment.extend_from_slice(&self.src_port.to_be_bytes());
        segment.extend_from_slice(&self.dst_port.to_be_bytes());
        segment.extend_from_slice(&self.seq.to_be_bytes());
        segment.extend_from_slice(&self.ack.to_be_bytes());
        segment.push(5 << 4); // Data offset 5 (20 bytes)
        segment.push(self.flags);
        segment.extend_from_slice(&65535u16.to_be_bytes()); // Window
        segment.extend_from_slice(&[0x00, 0x00]); // Checksum
        segment.extend_from_slice(&[0x00, 0x00]); // Urgent pointer
        segment.extend_from_slice(&self.payload);
        segment
    }
}

/// Serialize frames into a little-endian, microsecond-resolution legacy
/// pcap file.
pub fn pcap_file(link_type: u16, packets: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    out.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
    out.extend_from_slice(&(link_type as u32).to_le_bytes());
    for (timestamp_us, data) in packets {
        out.extend_from_slice(&((timestamp_us / 1_000_000) as u32).to_le_bytes());
        out.extend_from_slice(&((timestamp_us % 1_000_000) as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Everything a [`RecordingConsumer`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Open(FlowDescriptor),
    Data {
        flow_id: u64,
        direction: Direction,
        data: Bytes,
    },
    Close {
        flow_id: u64,
    },
}

/// Consumer factory whose consumers append to one shared event log.
///
/// Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    events: Arc<Mutex<Vec<ConsumerEvent>>>,
}

impl RecordingFactory {
    fn log(&self) -> MutexGuard<'_, Vec<ConsumerEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.log().clone()
    }

    /// Chunks delivered to one flow direction, in order.
    pub fn chunks(&self, flow_id: u64, direction: Direction) -> Vec<Vec<u8>> {
        self.log()
            .iter()
            .filter_map(|event| match event {
                ConsumerEvent::Data {
                    flow_id: id,
                    direction: dir,
                    data,
                } if *id == flow_id && *dir == direction => Some(data.to_vec()),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of everything delivered to one flow direction.
    pub fn delivered(&self, flow_id: u64, direction: Direction) -> Vec<u8> {
        self.chunks(flow_id, direction).concat()
    }

    pub fn close_count(&self, flow_id: u64) -> usize {
        self.log()
            .iter()
            .filter(|event| matches!(event, ConsumerEvent::Close { flow_id: id } if *id == flow_id))
            .count()
    }
}

impl StreamConsumerFactory for RecordingFactory {
    type Consumer = RecordingConsumer;

    fn new_consumer(&mut self, flow: &FlowDescriptor) -> RecordingConsumer {
        self.log().push(ConsumerEvent::Open(flow.clone()));
        RecordingConsumer {
            flow_id: flow.id,
            events: Arc::clone(&self.events),
        }
    }
}

#[derive(Debug)]
pub struct RecordingConsumer {
    flow_id: u64,
    events: Arc<Mutex<Vec<ConsumerEvent>>>,
}

impl StreamConsumer for RecordingConsumer {
    fn accept(&mut self, direction: Direction, data: Bytes) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ConsumerEvent::Data {
                flow_id: self.flow_id,
                direction,
                data,
            });
        }
    }

    fn close(&mut self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ConsumerEvent::Close {
                flow_id: self.flow_id,
            });
        }
    }
}
