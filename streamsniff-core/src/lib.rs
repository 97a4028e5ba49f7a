//! # streamsniff-core
//!
//! TCP stream reassembly and per-flow dispatch for packet captures.
//!
//! This crate turns captured frames (from a PCAP/PCAPNG file or a live
//! interface) into ordered, de-duplicated byte streams per TCP flow and
//! runs one handler task per flow over those streams. It has no opinion
//! about what the handlers look for; the `streamsniff` binary ships an
//! RTMP probe and a byte-count summary.
//!
//! ## Features
//!
//! - **Reassembly**: 32-bit sequence wraparound, out-of-order buffering,
//!   retransmission trimming, FIN/RST handling and a global buffer budget
//!   with least-recently-active eviction
//! - **Capture input**: PCAP and PCAPNG files, gzip-compressed or not;
//!   live capture behind the `live` feature
//! - **Link types**: Ethernet (with VLAN/QinQ), Linux SLL/SLL2, BSD
//!   loopback and raw IPv4/IPv6
//! - **Dispatch**: one tokio task per flow, a single bounded result
//!   channel and bounded shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use streamsniff_core::prelude::*;
//!
//! struct Counter(usize);
//!
//! impl FlowHandler for Counter {
//!     type Output = usize;
//!
//!     fn on_data(&mut self, _: Direction, data: Bytes) -> std::result::Result<Vec<usize>, HandlerError> {
//!         self.0 += data.len();
//!         Ok(Vec::new())
//!     }
//!
//!     fn on_close(&mut self) -> Vec<usize> {
//!         vec![self.0]
//!     }
//! }
//!
//! struct Counters;
//!
//! impl FlowHandlerFactory for Counters {
//!     type Output = usize;
//!     type Handler = Counter;
//!
//!     fn new_handler(&mut self, _: &FlowDescriptor) -> Counter {
//!         Counter(0)
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let source = FileSegmentSource::open("capture.pcap")?;
//! let (summary, totals) = Pipeline::new(Counters, PipelineConfig::default())
//!     .run(source)
//!     .await?;
//! println!("{} flows, {:?}", summary.reassembly.flows_opened, totals);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        streamsniff-core                             |
//! +---------------------------------------------------------------------+
//! |  pcap/       - PCAP/PCAPNG reading, gzip detection                  |
//! |  io/         - Frame decoding, SegmentSource (file, live, iterator) |
//! |  stream/     - Sequence math, segment buffers, Reassembler          |
//! |  dispatch/   - Pipeline, per-flow tasks, FlowHandler traits         |
//! |  error/      - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Crate Features
//!
//! - `live` - Live capture through libpcap

pub mod dispatch;
pub mod error;
pub mod io;
pub mod pcap;
pub mod prelude;
pub mod stream;
pub mod test_utils;

pub use dispatch::{
    FlowHandler, FlowHandlerFactory, Pipeline, PipelineConfig, PipelineHandle, PipelineState,
    PipelineSummary, StopSignal, TaskStats,
};
pub use error::{DecodeError, Error, HandlerError, PcapError, Result};
pub use io::{decode_tcp, FileSegmentSource, IterSource, SegmentSource, SourceItem};
#[cfg(feature = "live")]
pub use io::{LiveOptions, LiveSegmentSource};
pub use pcap::{PcapReader, RawPacket};
pub use stream::{
    Direction, FlowDescriptor, FlowKey, FlowPhase, Reassembler, ReassemblyStats,
    StreamConfig, StreamConsumer, StreamConsumerFactory, TcpFlags, TcpSegment,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
