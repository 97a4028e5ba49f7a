//! Error types for streamsniff-core.
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`PcapError`] - Errors from capture file reading
//! - [`DecodeError`] - Errors from link/IP/TCP header decoding
//! - [`HandlerError`] - Failures reported by per-flow handlers
//!
//! Reassembly itself never fails: gaps, overlaps and budget pressure are
//! resolved inside the engine and surface as statistics, not errors.

use thiserror::Error;

/// Main error type for streamsniff-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading or parsing a capture file
    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    /// Error decoding a captured frame
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Live capture failure
    #[cfg(feature = "live")]
    #[error("Capture error: {0}")]
    Capture(#[from] pcap::Error),

    /// A pipeline task panicked or was cancelled
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to capture file reading.
#[derive(Error, Debug)]
pub enum PcapError {
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Invalid PCAP format
    #[error("Invalid PCAP format: {reason}")]
    InvalidFormat { reason: String },

    /// Unsupported link type
    #[error("Unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },
}

/// Errors raised while turning a captured frame into a TCP segment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header could not be parsed (short or inconsistent)
    #[error("{layer}: malformed header: {reason}")]
    Malformed { layer: &'static str, reason: String },

    /// Frame too short for the header that the link type promises
    #[error("{layer}: packet too short (need {needed} bytes, have {have})")]
    Truncated {
        layer: &'static str,
        needed: usize,
        have: usize,
    },

    /// Link type we cannot strip
    #[error("unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },

    /// Network layer is not IPv4 or IPv6
    #[error("not an IP packet (ethertype {ether_type:#06x})")]
    NotIp { ether_type: u16 },

    /// IP packet carrying something other than TCP
    #[error("not a TCP packet (protocol {protocol})")]
    NotTcp { protocol: u8 },

    /// IPv4 fragment; fragments are not reassembled
    #[error("IP fragment ignored")]
    Fragment,
}

impl DecodeError {
    /// True for frames that claim to be TCP/IP but cannot be parsed.
    ///
    /// Everything else is traffic we simply have no interest in.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DecodeError::Malformed { .. } | DecodeError::Truncated { .. }
        )
    }
}

/// Failure reported by a per-flow handler.
///
/// The failing flow stops producing results; the pipeline keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler error: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
