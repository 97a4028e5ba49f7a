//! Live capture through libpcap.

use bytes::Bytes;
use pcap::{Active, Capture};
use tracing::info;

use super::decode::decode_tcp;
use super::source::{SegmentSource, SourceItem};
use crate::error::Error;

/// Options for opening a live capture.
#[derive(Debug, Clone)]
pub struct LiveOptions {
    /// Interface name; `any` captures on all interfaces (Linux).
    pub interface: String,
    pub snaplen: i32,
    pub promisc: bool,
    /// Read timeout; an expired timeout yields [`SourceItem::Idle`].
    pub timeout_ms: i32,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            interface: "any".to_string(),
            snaplen: 65535,
            promisc: true,
            timeout_ms: 100,
        }
    }
}

/// Segments captured from a network interface.
pub struct LiveSegmentSource {
    capture: Capture<Active>,
    link_type: u16,
}

impl LiveSegmentSource {
    /// Open the interface. Fails if it does not exist or lacks permission.
    pub fn open(options: &LiveOptions) -> Result<Self, Error> {
        let capture = Capture::from_device(options.interface.as_str())?
            .promisc(options.promisc)
            .snaplen(options.snaplen)
            .timeout(options.timeout_ms)
            .immediate_mode(true)
            .open()?;
        let link_type = capture.get_datalink().0 as u16;
        info!(
            interface = %options.interface,
            link_type,
            snaplen = options.snaplen,
            promisc = options.promisc,
            "live capture started"
        );
        Ok(Self { capture, link_type })
    }
}

impl SegmentSource for LiveSegmentSource {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp_us = ts.tv_sec as i64 * 1_000_000 + ts.tv_usec as i64;
                let frame = Bytes::copy_from_slice(packet.data);
                Ok(Some(match decode_tcp(self.link_type, &frame, timestamp_us) {
                    Ok(segment) => SourceItem::Segment(segment),
                    Err(err) => SourceItem::Skipped(err),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(Some(SourceItem::Idle)),
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
