//! Capture file reading.
//!
//! Reads PCAP and PCAPNG files (optionally gzip-compressed) into
//! [`RawPacket`]s.

mod packet;
mod reader;

pub use packet::RawPacket;
pub use reader::{is_gzip_extension, PcapReader};
