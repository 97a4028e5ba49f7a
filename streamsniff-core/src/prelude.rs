//! Convenient re-exports for common usage.
//!
//! ```rust,no_run
//! use streamsniff_core::prelude::*;
//!
//! let source = FileSegmentSource::open("capture.pcap.gz").unwrap();
//! ```

pub use bytes::Bytes;

// Reassembly
pub use crate::stream::{
    Direction, FlowDescriptor, FlowKey, Reassembler, StreamConfig, StreamConsumer,
    StreamConsumerFactory, TcpSegment,
};

// Dispatch
pub use crate::dispatch::{
    FlowHandler, FlowHandlerFactory, Pipeline, PipelineConfig, PipelineSummary,
};

// Sources
pub use crate::io::{FileSegmentSource, SegmentSource, SourceItem};

// Error types
pub use crate::error::{Error, HandlerError, Result};
