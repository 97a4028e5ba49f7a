//! Link/IP/TCP header decoding.
//!
//! Turns one captured frame into a [`TcpSegment`]. The payload is a
//! zero-copy slice of the frame. IPv4 fragments are not reassembled.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice};

use crate::error::DecodeError;
use crate::stream::{TcpFlags, TcpSegment};

pub const LINKTYPE_NULL: u16 = 0;
pub const LINKTYPE_ETHERNET: u16 = 1;
pub const LINKTYPE_RAW: u16 = 101;
pub const LINKTYPE_LINUX_SLL: u16 = 113;
pub const LINKTYPE_IPV4: u16 = 228;
pub const LINKTYPE_IPV6: u16 = 229;
pub const LINKTYPE_LINUX_SLL2: u16 = 276;

/// DLT_RAW as written by some platforms (12 on most, 14 on OpenBSD).
const DLT_RAW_ALIASES: [u16; 2] = [12, 14];
/// Big-endian loopback header.
const LINKTYPE_LOOP: u16 = 108;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const IP_PROTO_TCP: u8 = 6;

/// Decode a captured frame into a TCP segment.
pub fn decode_tcp(link_type: u16, frame: &Bytes, timestamp_us: i64) -> Result<TcpSegment, DecodeError> {
    let (ether_type, offset) = strip_link(link_type, frame)?;
    let ip = &frame[offset..];
    let (src, dst, l4_start, l4_end) = match ether_type {
        ETHERTYPE_IPV4 => decode_ipv4(ip)?,
        ETHERTYPE_IPV6 => decode_ipv6(ip)?,
        other => return Err(DecodeError::NotIp { ether_type: other }),
    };

    let tcp_bytes = &ip[l4_start..l4_end];
    let tcp = TcpHeaderSlice::from_slice(tcp_bytes).map_err(|e| malformed("tcp", e))?;
    let payload_start = offset + l4_start + tcp.slice().len();
    let payload_end = offset + l4_end;

    Ok(TcpSegment {
        src: SocketAddr::new(src, tcp.source_port()),
        dst: SocketAddr::new(dst, tcp.destination_port()),
        seq: tcp.sequence_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
        },
        payload: frame.slice(payload_start..payload_end),
        timestamp_us,
    })
}

/// Strip the link layer, returning the network ethertype and its offset.
fn strip_link(link_type: u16, frame: &[u8]) -> Result<(u16, usize), DecodeError> {
    match link_type {
        LINKTYPE_ETHERNET => {
            let eth = Ethernet2HeaderSlice::from_slice(frame).map_err(|e| malformed("ethernet", e))?;
            let mut ether_type = eth.ether_type().0;
            let mut offset = eth.slice().len();
            while ether_type == ETHERTYPE_VLAN || ether_type == ETHERTYPE_QINQ {
                let tag = frame.get(offset..offset + 4).ok_or(DecodeError::Truncated {
                    layer: "vlan",
                    needed: offset + 4,
                    have: frame.len(),
                })?;
                ether_type = u16::from_be_bytes([tag[2], tag[3]]);
                offset += 4;
            }
            Ok((ether_type, offset))
        }
        LINKTYPE_LINUX_SLL => {
            let header = require(frame, 16, "linux_sll")?;
            Ok((u16::from_be_bytes([header[14], header[15]]), 16))
        }
        LINKTYPE_LINUX_SLL2 => {
            let header = require(frame, 20, "linux_sll2")?;
            Ok((u16::from_be_bytes([header[0], header[1]]), 20))
        }
        LINKTYPE_NULL | LINKTYPE_LOOP => {
            let header = require(frame, 4, "loopback")?;
            let family = if link_type == LINKTYPE_LOOP {
                u32::from_be_bytes([header[0], header[1], header[2], header[3]])
            } else {
                // Host byte order of the capturing machine
                let le = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
                if le > 0xffff {
                    le.swap_bytes()
                } else {
                    le
                }
            };
            match family {
                2 => Ok((ETHERTYPE_IPV4, 4)),
                10 | 24 | 28 | 30 => Ok((ETHERTYPE_IPV6, 4)),
                other => Err(DecodeError::NotIp {
                    ether_type: other as u16,
                }),
            }
        }
        LINKTYPE_IPV4 => Ok((ETHERTYPE_IPV4, 0)),
        LINKTYPE_IPV6 => Ok((ETHERTYPE_IPV6, 0)),
        lt if lt == LINKTYPE_RAW || DLT_RAW_ALIASES.contains(&lt) => {
            let first = require(frame, 1, "raw_ip")?[0];
            match first >> 4 {
                4 => Ok((ETHERTYPE_IPV4, 0)),
                6 => Ok((ETHERTYPE_IPV6, 0)),
                version => Err(DecodeError::Malformed {
                    layer: "raw_ip",
                    reason: format!("unknown IP version {version}"),
                }),
            }
        }
        other => Err(DecodeError::UnsupportedLinkType { link_type: other }),
    }
}

/// Returns `(src, dst, l4_start, l4_end)` relative to the IP header.
fn decode_ipv4(ip: &[u8]) -> Result<(IpAddr, IpAddr, usize, usize), DecodeError> {
    let header = Ipv4HeaderSlice::from_slice(ip).map_err(|e| malformed("ipv4", e))?;
    let raw = header.slice();
    let fragment_offset = u16::from_be_bytes([raw[6], raw[7]]) & 0x1fff;
    if header.more_fragments() || fragment_offset != 0 {
        return Err(DecodeError::Fragment);
    }
    let protocol = header.protocol().0;
    if protocol != IP_PROTO_TCP {
        return Err(DecodeError::NotTcp { protocol });
    }

    let header_len = raw.len();
    // Ethernet padding may follow the datagram; snaplen may cut it short
    let end = (header.total_len() as usize).min(ip.len());
    if end < header_len {
        return Err(DecodeError::Malformed {
            layer: "ipv4",
            reason: format!("total length {} shorter than header", header.total_len()),
        });
    }
    Ok((
        IpAddr::V4(header.source_addr()),
        IpAddr::V4(header.destination_addr()),
        header_len,
        end,
    ))
}

fn decode_ipv6(ip: &[u8]) -> Result<(IpAddr, IpAddr, usize, usize), DecodeError> {
    let header = Ipv6HeaderSlice::from_slice(ip).map_err(|e| malformed("ipv6", e))?;
    let payload_len = header.payload_length() as usize;
    let end = if payload_len == 0 {
        ip.len() // Jumbogram
    } else {
        (40 + payload_len).min(ip.len())
    };

    let mut next = header.next_header().0;
    let mut offset = 40;
    loop {
        match next {
            IP_PROTO_TCP => break,
            // Hop-by-hop, routing, destination options
            0 | 43 | 60 => {
                let ext = ip.get(offset..offset + 2).ok_or(DecodeError::Truncated {
                    layer: "ipv6_ext",
                    needed: offset + 2,
                    have: ip.len(),
                })?;
                next = ext[0];
                offset += (ext[1] as usize + 1) * 8;
            }
            44 => return Err(DecodeError::Fragment),
            protocol => return Err(DecodeError::NotTcp { protocol }),
        }
    }
    if offset > end {
        return Err(DecodeError::Truncated {
            layer: "ipv6_ext",
            needed: offset,
            have: end,
        });
    }
    Ok((
        IpAddr::V6(header.source_addr()),
        IpAddr::V6(header.destination_addr()),
        offset,
        end,
    ))
}

fn require<'a>(frame: &'a [u8], len: usize, layer: &'static str) -> Result<&'a [u8], DecodeError> {
    frame.get(..len).ok_or(DecodeError::Truncated {
        layer,
        needed: len,
        have: frame.len(),
    })
}

fn malformed(layer: &'static str, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed {
        layer,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EthernetBuilder, Ipv4Builder, Ipv6Builder, TcpBuilder};

    fn tcp_frame(tcp: TcpBuilder) -> Bytes {
        Bytes::from(
            EthernetBuilder::new()
                .payload(Ipv4Builder::new().payload(tcp.build()).build())
                .build(),
        )
    }

    // Test 1: Ethernet/IPv4/TCP with payload
    #[test]
    fn test_decode_ethernet_ipv4() {
        let frame = tcp_frame(TcpBuilder::new().seq(1234).psh_ack().payload(b"hello".to_vec()));
        let seg = decode_tcp(LINKTYPE_ETHERNET, &frame, 77).unwrap();
        assert_eq!(seg.src, "10.0.0.1:50000".parse().unwrap());
        assert_eq!(seg.dst, "10.0.0.2:1935".parse().unwrap());
        assert_eq!(seg.seq, 1234);
        assert!(seg.flags.ack);
        assert!(!seg.flags.syn);
        assert_eq!(&seg.payload[..], b"hello");
        assert_eq!(seg.timestamp_us, 77);
    }

    // Test 2: Ethernet padding is not payload
    #[test]
    fn test_ethernet_padding_ignored() {
        let mut frame = EthernetBuilder::new()
            .payload(Ipv4Builder::new().payload(TcpBuilder::new().syn().build()).build())
            .build();
        frame.extend_from_slice(&[0u8; 6]);
        let seg = decode_tcp(LINKTYPE_ETHERNET, &Bytes::from(frame), 0).unwrap();
        assert!(seg.payload.is_empty());
        assert!(seg.flags.syn);
    }

    // Test 3: VLAN-tagged frames
    #[test]
    fn test_decode_vlan() {
        let frame = EthernetBuilder::new()
            .vlan(42)
            .payload(Ipv4Builder::new().payload(TcpBuilder::new().payload(b"v".to_vec()).build()).build())
            .build();
        let seg = decode_tcp(LINKTYPE_ETHERNET, &Bytes::from(frame), 0).unwrap();
        assert_eq!(&seg.payload[..], b"v");
    }

    // Test 4: IPv6 over raw IP
    #[test]
    fn test_decode_raw_ipv6() {
        let packet = Ipv6Builder::new()
            .payload(TcpBuilder::new().src_port(40000).dst_port(80).payload(b"six".to_vec()).build())
            .build();
        let seg = decode_tcp(LINKTYPE_RAW, &Bytes::from(packet), 0).unwrap();
        assert_eq!(seg.src, "[fd00::1]:40000".parse().unwrap());
        assert_eq!(&seg.payload[..], b"six");
    }

    // Test 5: Linux cooked capture (SLL)
    #[test]
    fn test_decode_linux_sll() {
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.extend(Ipv4Builder::new().payload(TcpBuilder::new().payload(b"sll".to_vec()).build()).build());
        let seg = decode_tcp(LINKTYPE_LINUX_SLL, &Bytes::from(frame), 0).unwrap();
        assert_eq!(&seg.payload[..], b"sll");
    }

    // Test 6: UDP and ARP are skipped, not malformed
    #[test]
    fn test_non_tcp() {
        let udp = EthernetBuilder::new()
            .payload(Ipv4Builder::new().protocol(17).payload(vec![0u8; 8]).build())
            .build();
        let err = decode_tcp(LINKTYPE_ETHERNET, &Bytes::from(udp), 0).unwrap_err();
        assert_eq!(err, DecodeError::NotTcp { protocol: 17 });
        assert!(!err.is_malformed());

        let arp = EthernetBuilder::new().ethertype(0x0806).payload(vec![0u8; 28]).build();
        let err = decode_tcp(LINKTYPE_ETHERNET, &Bytes::from(arp), 0).unwrap_err();
        assert_eq!(err, DecodeError::NotIp { ether_type: 0x0806 });
    }

    // Test 7: Truncated headers are malformed
    #[test]
    fn test_truncated() {
        let frame = tcp_frame(TcpBuilder::new());
        let short = frame.slice(..frame.len() - 10);
        let err = decode_tcp(LINKTYPE_ETHERNET, &short, 0).unwrap_err();
        assert!(err.is_malformed());

        let err = decode_tcp(LINKTYPE_LINUX_SLL, &Bytes::from_static(&[0u8; 3]), 0).unwrap_err();
        assert!(err.is_malformed());
    }

    // Test 8: Fragments and unknown link types
    #[test]
    fn test_fragment_and_unsupported_link() {
        let frame = EthernetBuilder::new()
            .payload(Ipv4Builder::new().more_fragments().payload(TcpBuilder::new().build()).build())
            .build();
        assert_eq!(
            decode_tcp(LINKTYPE_ETHERNET, &Bytes::from(frame), 0).unwrap_err(),
            DecodeError::Fragment
        );
        assert_eq!(
            decode_tcp(147, &Bytes::from_static(b"x"), 0).unwrap_err(),
            DecodeError::UnsupportedLinkType { link_type: 147 }
        );
    }
}
