//! Packet acquisition and decoding.
//!
//! - [`decode_tcp`] - Strip link/IP headers from a captured frame
//! - [`SegmentSource`] - Blocking producer of decoded segments
//! - [`FileSegmentSource`] - Capture file replay
//! - `LiveSegmentSource` - Live capture (feature `live`)

mod decode;
#[cfg(feature = "live")]
mod live;
mod source;

pub use decode::{
    decode_tcp, LINKTYPE_ETHERNET, LINKTYPE_IPV4, LINKTYPE_IPV6, LINKTYPE_LINUX_SLL,
    LINKTYPE_LINUX_SLL2, LINKTYPE_NULL, LINKTYPE_RAW,
};
#[cfg(feature = "live")]
pub use live::{LiveOptions, LiveSegmentSource};
pub use source::{FileSegmentSource, IterSource, SegmentSource, SourceItem};
