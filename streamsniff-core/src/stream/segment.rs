use std::net::SocketAddr;

use bytes::Bytes;

use super::{FlowKey, TcpFlags};

/// A decoded TCP segment, ready for reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: Bytes,
    /// Capture timestamp (microseconds since epoch).
    pub timestamp_us: i64,
}

impl TcpSegment {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.src, self.dst)
    }

    /// Segments without payload or SYN/FIN/RST (pure ACKs, keepalives).
    ///
    /// They refresh flow activity and nothing else.
    pub fn is_liveness_only(&self) -> bool {
        self.payload.is_empty() && !self.flags.syn && !self.flags.fin && !self.flags.rst
    }

    /// Sequence number of the first payload byte.
    pub fn data_seq(&self) -> u32 {
        if self.flags.syn {
            self.seq.wrapping_add(1)
        } else {
            self.seq
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(flags: TcpFlags, payload: &'static [u8]) -> TcpSegment {
        TcpSegment {
            src: "10.0.0.1:5000".parse().unwrap(),
            dst: "10.0.0.2:80".parse().unwrap(),
            seq: u32::MAX,
            flags,
            payload: Bytes::from_static(payload),
            timestamp_us: 0,
        }
    }

    #[test]
    fn test_liveness_only() {
        let ack = TcpFlags {
            ack: true,
            ..Default::default()
        };
        assert!(segment(ack, b"").is_liveness_only());
        assert!(!segment(ack, b"x").is_liveness_only());
        let fin = TcpFlags {
            fin: true,
            ..Default::default()
        };
        assert!(!segment(fin, b"").is_liveness_only());
    }

    #[test]
    fn test_syn_data_starts_after_isn() {
        let syn = TcpFlags {
            syn: true,
            ..Default::default()
        };
        assert_eq!(segment(syn, b"").data_seq(), 0);
        assert_eq!(segment(TcpFlags::default(), b"").data_seq(), u32::MAX);
    }
}
