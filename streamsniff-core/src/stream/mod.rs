//! TCP stream reassembly.
//!
//! Groups decoded segments into bidirectional flows and turns each
//! direction into an ordered byte stream, despite reordering,
//! retransmission and overlap on the wire.
//!
//! ## Components
//!
//! - [`FlowKey`] - Canonical identity of a bidirectional connection
//! - [`SegmentBuffer`] - Out-of-order byte ranges for one direction
//! - [`Reassembler`] - Owns the flow table, delivers contiguous data and
//!   enforces the global buffer budget
//! - [`StreamConsumer`] / [`StreamConsumerFactory`] - Per-flow consumer
//!   contract
//!
//! Sequence numbers wrap at 2^32; every comparison goes through the helpers
//! in [`seq`].
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use streamsniff_core::stream::{
//!     Direction, FlowDescriptor, Reassembler, StreamConsumer, TcpFlags, TcpSegment,
//! };
//!
//! struct Printer;
//!
//! impl StreamConsumer for Printer {
//!     fn accept(&mut self, direction: Direction, data: Bytes) {
//!         println!("{}: {} bytes", direction, data.len());
//!     }
//!     fn close(&mut self) {}
//! }
//!
//! let mut reassembler = Reassembler::with_defaults(|_: &FlowDescriptor| Printer);
//! reassembler.process(&TcpSegment {
//!     src: "10.0.0.1:50000".parse().unwrap(),
//!     dst: "10.0.0.2:80".parse().unwrap(),
//!     seq: 1,
//!     flags: TcpFlags::default(),
//!     payload: Bytes::from_static(b"GET / HTTP/1.1\r\n"),
//!     timestamp_us: 0,
//! });
//! reassembler.flush_all();
//! ```

mod buffer;
mod consumer;
mod engine;
mod flow;
mod key;
mod segment;
pub mod seq;

pub use buffer::{InsertOutcome, SegmentBuffer};
pub use consumer::{StreamConsumer, StreamConsumerFactory};
pub use engine::{
    Disposition, EvictionEvent, IgnoreReason, Reassembler, ReassemblyStats, StreamConfig,
    DEFAULT_BUFFER_BUDGET, DEFAULT_MAX_FLOWS, DEFAULT_MAX_PAGES, PAGE_SIZE,
};
pub use flow::{DirectionStats, FlowPhase};
pub use key::{Direction, FlowDescriptor, FlowKey, TcpFlags};
pub use segment::TcpSegment;
