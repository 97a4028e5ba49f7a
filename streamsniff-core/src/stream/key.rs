use std::fmt;
use std::net::SocketAddr;

/// Direction of data flow in a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToServer,
    ToClient,
}

impl Direction {
    /// Return a string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::ToServer => 0,
            Direction::ToClient => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized flow key (lower endpoint first for consistent lookup).
///
/// Both directions of a connection map to the same key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct FlowKey {
    a: SocketAddr,
    b: SocketAddr,
}

impl FlowKey {
    /// Create a normalized key. Ensures `a <= b`.
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        if src <= dst {
            Self { a: src, b: dst }
        } else {
            Self { a: dst, b: src }
        }
    }

    /// The lower endpoint.
    pub fn a(&self) -> SocketAddr {
        self.a
    }

    /// The higher endpoint.
    pub fn b(&self) -> SocketAddr {
        self.b
    }

    pub fn is_from_a(&self, src: SocketAddr) -> bool {
        src == self.a
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// TCP flags relevant to reassembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// Description of a flow handed to the consumer factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDescriptor {
    /// Numeric id, unique for the lifetime of one reassembler.
    pub id: u64,
    pub key: FlowKey,
    pub client: SocketAddr,
    pub server: SocketAddr,
    /// Capture timestamp of the first segment (microseconds since epoch).
    pub first_seen_us: i64,
}

impl FlowDescriptor {
    /// Build a descriptor from the first segment seen for a flow.
    ///
    /// A bare SYN marks its sender as the client and a SYN+ACK marks its
    /// receiver. Mid-stream, the endpoint with the higher port is assumed
    /// to be the client.
    pub fn from_first_segment(
        id: u64,
        src: SocketAddr,
        dst: SocketAddr,
        flags: TcpFlags,
        timestamp_us: i64,
    ) -> Self {
        let src_is_client = if flags.syn {
            !flags.ack
        } else {
            src.port() > dst.port() || (src.port() == dst.port() && src > dst)
        };
        let (client, server) = if src_is_client { (src, dst) } else { (dst, src) };
        Self {
            id,
            key: FlowKey::new(src, dst),
            client,
            server,
            first_seen_us: timestamp_us,
        }
    }

    /// Direction of a segment sent from `src`.
    pub fn direction(&self, src: SocketAddr) -> Direction {
        if src == self.client {
            Direction::ToServer
        } else {
            Direction::ToClient
        }
    }
}

impl fmt::Display for FlowDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} -> {}", self.id, self.client, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    // Test 1: Both directions normalize to one key
    #[test]
    fn test_key_normalization() {
        let c = addr("192.168.1.100:54321");
        let s = addr("10.0.0.1:80");
        let k1 = FlowKey::new(c, s);
        let k2 = FlowKey::new(s, c);
        assert_eq!(k1, k2);
        assert_eq!(k1.a(), s);
        assert!(k1.is_from_a(s));
        assert_eq!(k1.to_string(), "10.0.0.1:80 <-> 192.168.1.100:54321");
    }

    // Test 2: SYN sender is the client
    #[test]
    fn test_client_from_syn() {
        let c = addr("10.0.0.1:40000");
        let s = addr("10.0.0.2:1935");
        let syn = TcpFlags {
            syn: true,
            ..Default::default()
        };
        let d = FlowDescriptor::from_first_segment(1, c, s, syn, 0);
        assert_eq!(d.client, c);
        assert_eq!(d.direction(c), Direction::ToServer);
        assert_eq!(d.direction(s), Direction::ToClient);
    }

    // Test 3: SYN+ACK receiver is the client
    #[test]
    fn test_client_from_syn_ack() {
        let c = addr("10.0.0.1:40000");
        let s = addr("10.0.0.2:1935");
        let syn_ack = TcpFlags {
            syn: true,
            ack: true,
            ..Default::default()
        };
        let d = FlowDescriptor::from_first_segment(1, s, c, syn_ack, 0);
        assert_eq!(d.client, c);
        assert_eq!(d.server, s);
    }

    // Test 4: Mid-stream guesses the higher port as client
    #[test]
    fn test_client_mid_stream() {
        let c = addr("10.0.0.9:51000");
        let s = addr("10.0.0.2:443");
        let ack = TcpFlags {
            ack: true,
            ..Default::default()
        };
        let from_server = FlowDescriptor::from_first_segment(7, s, c, ack, 5);
        assert_eq!(from_server.client, c);
        assert_eq!(from_server.first_seen_us, 5);
        assert_eq!(from_server.to_string(), "#7 10.0.0.9:51000 -> 10.0.0.2:443");
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::ToServer.reverse(), Direction::ToClient);
        assert_eq!(Direction::ToClient.as_str(), "to_client");
    }
}
