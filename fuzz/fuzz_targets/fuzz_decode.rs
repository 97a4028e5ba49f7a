//! Fuzz target for frame decoding.
//!
//! The first byte picks the link type; the rest is the captured frame.
//! Decoding must never panic and a decoded payload must lie inside the
//! frame.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use streamsniff_core::io::{
    decode_tcp, LINKTYPE_ETHERNET, LINKTYPE_IPV4, LINKTYPE_IPV6, LINKTYPE_LINUX_SLL,
    LINKTYPE_LINUX_SLL2, LINKTYPE_NULL, LINKTYPE_RAW,
};

const LINK_TYPES: [u16; 8] = [
    LINKTYPE_ETHERNET,
    LINKTYPE_RAW,
    LINKTYPE_LINUX_SLL,
    LINKTYPE_LINUX_SLL2,
    LINKTYPE_NULL,
    LINKTYPE_IPV4,
    LINKTYPE_IPV6,
    108, // OpenBSD loopback
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, frame)) = data.split_first() else {
        return;
    };
    let link_type = LINK_TYPES[selector as usize % LINK_TYPES.len()];
    let frame = Bytes::copy_from_slice(frame);

    if let Ok(segment) = decode_tcp(link_type, &frame, 0) {
        assert!(segment.payload.len() <= frame.len());
    }
});
