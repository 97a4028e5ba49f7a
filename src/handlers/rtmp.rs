//! RTMP handshake and connect probe.
//!
//! Follows the client side of a flow through the handshake (C0, C1, C2)
//! and the chunk stream that follows it, decoding AMF0 command messages
//! until the client issues `publish` or `play`. The server side is only
//! checked for its S0 version byte.
//!
//! Flows that do not open with RTMP version 3 are dropped silently.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::amf0::{self, Amf0Error, Amf0Value};

const RTMP_VERSION: u8 = 3;

/// Size of each of C1/C2 (and S1/S2).
const HANDSHAKE_SIZE: usize = 1536;

const DEFAULT_CHUNK_SIZE: usize = 128;

/// Largest chunk size the protocol can express.
const MAX_CHUNK_SIZE: usize = 0xFF_FFFF;

/// Largest command message we are willing to assemble.
const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Client bytes examined before the probe gives up.
const MAX_PROBE_BYTES: usize = 4 << 20;

/// Extended timestamp escape value.
const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// RTMP message type ids.
mod message_type {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const AMF3_COMMAND: u8 = 17;
    pub const AMF0_COMMAND: u8 = 20;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtmpError {
    #[error("invalid chunk size {0}")]
    ChunkSize(u32),

    #[error("message of {0} bytes exceeds limit")]
    MessageTooLarge(usize),

    #[error("chunk stream {0} continues a message that never started")]
    UnknownChunkStream(u32),

    #[error("AMF0: {0}")]
    Amf(#[from] Amf0Error),
}

/// What the probe learned about an RTMP session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtmpSession {
    pub client_version: Option<u8>,
    pub server_version: Option<u8>,
    pub app: Option<String>,
    pub tc_url: Option<String>,
    pub flash_ver: Option<String>,
    pub swf_url: Option<String>,
    /// `publish` or `play`.
    pub action: Option<&'static str>,
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Waiting for C0.
    Version,
    /// Skipping C1 and C2; bytes left.
    Handshake(usize),
    Chunks,
    Done,
}

/// Per-flow RTMP probe.
#[derive(Debug)]
pub struct RtmpProbe {
    state: ClientState,
    chunks: ChunkReader,
    session: RtmpSession,
    client_bytes: usize,
    connected: bool,
    reported: bool,
}

impl Default for RtmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpProbe {
    pub fn new() -> Self {
        Self {
            state: ClientState::Version,
            chunks: ChunkReader::new(),
            session: RtmpSession::default(),
            client_bytes: 0,
            connected: false,
            reported: false,
        }
    }

    /// True once the probe has reported or given up.
    pub fn is_done(&self) -> bool {
        self.state == ClientState::Done
    }

    /// Feed client-to-server bytes.
    ///
    /// Returns the session once the client publishes or plays a stream.
    pub fn feed_client(&mut self, mut data: &[u8]) -> Result<Option<RtmpSession>, RtmpError> {
        self.client_bytes += data.len();
        if self.client_bytes > MAX_PROBE_BYTES && self.state != ClientState::Done {
            debug!(bytes = self.client_bytes, "rtmp probe limit reached");
            self.state = ClientState::Done;
        }

        loop {
            match self.state {
                ClientState::Version => {
                    let Some((&version, rest)) = data.split_first() else {
                        return Ok(None);
                    };
                    if version != RTMP_VERSION {
                        self.state = ClientState::Done;
                        return Ok(None);
                    }
                    self.session.client_version = Some(version);
                    self.state = ClientState::Handshake(2 * HANDSHAKE_SIZE);
                    data = rest;
                }
                ClientState::Handshake(remaining) => {
                    let n = remaining.min(data.len());
                    data = &data[n..];
                    if n < remaining {
                        self.state = ClientState::Handshake(remaining - n);
                        return Ok(None);
                    }
                    self.state = ClientState::Chunks;
                }
                ClientState::Chunks => {
                    self.chunks.push(data);
                    while let Some(message) = self.chunks.next_message()? {
                        if let Some(session) = self.on_message(&message)? {
                            self.state = ClientState::Done;
                            self.chunks.clear();
                            return Ok(Some(session));
                        }
                    }
                    return Ok(None);
                }
                ClientState::Done => return Ok(None),
            }
        }
    }

    /// Feed server-to-client bytes. Only S0 is examined.
    pub fn feed_server(&mut self, data: &[u8]) {
        if self.session.server_version.is_none() {
            self.session.server_version = data.first().copied();
        }
    }

    /// A session that connected but never published or played.
    pub fn finish(&mut self) -> Option<RtmpSession> {
        if self.connected && !self.reported {
            self.reported = true;
            return Some(self.session.clone());
        }
        None
    }

    fn on_message(&mut self, message: &Message) -> Result<Option<RtmpSession>, RtmpError> {
        let body = match message.type_id {
            message_type::AMF0_COMMAND => &message.payload[..],
            // AMF3 commands start with a format byte, then AMF0
            message_type::AMF3_COMMAND => message.payload.get(1..).unwrap_or_default(),
            _ => return Ok(None),
        };
        let values = amf0::decode_all(body)?;
        let Some(command) = values.first().and_then(Amf0Value::as_str) else {
            return Ok(None);
        };

        match command {
            "connect" if !self.connected => {
                self.connected = true;
                if let Some(object) = values.get(2) {
                    let text = |key: &str| object.get(key).and_then(Amf0Value::as_str).map(str::to_string);
                    self.session.app = text("app");
                    self.session.tc_url = text("tcUrl");
                    self.session.flash_ver = text("flashVer");
                    self.session.swf_url = text("swfUrl");
                }
                debug!(app = ?self.session.app, "rtmp connect");
                Ok(None)
            }
            "publish" | "play" => {
                self.session.action = Some(if command == "publish" { "publish" } else { "play" });
                // name, transaction id, null, stream name
                self.session.stream = values.get(3).and_then(Amf0Value::as_str).map(str::to_string);
                self.reported = true;
                Ok(Some(self.session.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// A reassembled RTMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Message {
    type_id: u8,
    payload: Vec<u8>,
}

/// Header state of one chunk stream.
#[derive(Debug, Default)]
struct ChunkStream {
    length: usize,
    type_id: u8,
    extended: bool,
    payload: Vec<u8>,
}

/// Splits the client byte stream into chunks and reassembles messages.
#[derive(Debug)]
struct ChunkReader {
    buf: Vec<u8>,
    chunk_size: usize,
    streams: HashMap<u32, ChunkStream>,
}

impl ChunkReader {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn clear(&mut self) {
        self.buf = Vec::new();
        self.streams.clear();
    }

    /// Next complete message, or `None` until more bytes arrive.
    fn next_message(&mut self) -> Result<Option<Message>, RtmpError> {
        let mut pos = 0;
        let result = loop {
            match self.read_chunk(pos) {
                Ok(Some((consumed, message))) => {
                    pos += consumed;
                    if let Some(message) = message {
                        break Ok(Some(message));
                    }
                }
                Ok(None) => break Ok(None),
                Err(err) => break Err(err),
            }
        };
        self.buf.drain(..pos);
        result
    }

    /// Parse the chunk at `start`, returning the bytes it spans and the
    /// message it completes. Nothing changes unless the whole chunk is
    /// buffered.
    fn read_chunk(&mut self, start: usize) -> Result<Option<(usize, Option<Message>)>, RtmpError> {
        let data = &self.buf[start..];
        let Some(&first) = data.first() else {
            return Ok(None);
        };
        let fmt = first >> 6;
        let (csid, mut pos) = match first & 0x3f {
            0 => match data.get(1) {
                Some(&b) => (64 + b as u32, 2),
                None => return Ok(None),
            },
            1 => match data.get(1..3) {
                Some(b) => (64 + b[0] as u32 + ((b[1] as u32) << 8), 3),
                None => return Ok(None),
            },
            id => (id as u32, 1),
        };

        let header_len = [11, 7, 3, 0][fmt as usize];
        let Some(header) = data.get(pos..pos + header_len) else {
            return Ok(None);
        };
        pos += header_len;

        let previous = self
            .streams
            .get(&csid)
            .map(|s| (s.length, s.type_id, s.extended, s.payload.len()));
        let (length, type_id, extended, received) = match (fmt, previous) {
            (0 | 1, _) => (
                be24(&header[3..6]) as usize,
                header[6],
                be24(&header[0..3]) == EXTENDED_TIMESTAMP,
                0,
            ),
            (2, Some((length, type_id, _, _))) => {
                (length, type_id, be24(&header[0..3]) == EXTENDED_TIMESTAMP, 0)
            }
            (_, Some(previous)) => previous,
            (_, None) => return Err(RtmpError::UnknownChunkStream(csid)),
        };
        if extended {
            if data.len() < pos + 4 {
                return Ok(None);
            }
            pos += 4;
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(RtmpError::MessageTooLarge(length));
        }

        let take = (length - received).min(self.chunk_size);
        let Some(body) = data.get(pos..pos + take) else {
            return Ok(None);
        };
        let consumed = pos + take;

        let stream = self.streams.entry(csid).or_default();
        if fmt < 3 {
            // A new message header drops any unfinished message on this stream
            stream.payload.clear();
        }
        stream.length = length;
        stream.type_id = type_id;
        stream.extended = extended;
        stream.payload.extend_from_slice(body);
        if stream.payload.len() < length {
            return Ok(Some((consumed, None)));
        }
        let payload = std::mem::take(&mut stream.payload);

        match type_id {
            message_type::SET_CHUNK_SIZE => {
                let size = payload
                    .get(..4)
                    .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) & 0x7fff_ffff)
                    .unwrap_or(0);
                if size == 0 || size as usize > MAX_CHUNK_SIZE {
                    return Err(RtmpError::ChunkSize(size));
                }
                self.chunk_size = size as usize;
                Ok(Some((consumed, None)))
            }
            message_type::ABORT => {
                if let Some(b) = payload.get(..4) {
                    let aborted = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                    if let Some(stream) = self.streams.get_mut(&aborted) {
                        stream.payload.clear();
                    }
                }
                Ok(Some((consumed, None)))
            }
            _ => Ok(Some((consumed, Some(Message { type_id, payload })))),
        }
    }
}

fn be24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

#[cfg(test)]
pub(crate) mod testing {
    use super::super::amf0::encode;
    use super::*;

    /// C0 + C1 + C2.
    pub fn client_handshake() -> Vec<u8> {
        let mut out = vec![RTMP_VERSION];
        out.resize(1 + 2 * HANDSHAKE_SIZE, 0x5a);
        out
    }

    /// S0 + S1 + S2.
    pub fn server_handshake() -> Vec<u8> {
        client_handshake()
    }

    /// One message on chunk stream 3, split at `chunk_size`.
    pub fn chunked(type_id: u8, payload: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = vec![0x03]; // fmt 0, csid 3
        out.extend_from_slice(&[0, 0, 0]); // timestamp
        let len = payload.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.push(type_id);
        out.extend_from_slice(&0u32.to_le_bytes());
        for (i, piece) in payload.chunks(chunk_size).enumerate() {
            if i > 0 {
                out.push(0xc3); // fmt 3, csid 3
            }
            out.extend_from_slice(piece);
        }
        out
    }

    pub fn connect_command(app: &str, tc_url: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode::string(&mut out, "connect");
        encode::number(&mut out, 1.0);
        encode::object(
            &mut out,
            &[("app", app), ("flashVer", "FMLE/3.0"), ("tcUrl", tc_url)],
        );
        out
    }

    pub fn stream_command(name: &str, stream: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode::string(&mut out, name);
        encode::number(&mut out, 5.0);
        encode::null(&mut out);
        encode::string(&mut out, stream);
        out
    }

    pub fn set_chunk_size(size: u32) -> Vec<u8> {
        chunked(message_type::SET_CHUNK_SIZE, &size.to_be_bytes(), DEFAULT_CHUNK_SIZE)
    }

    pub fn command(payload: &[u8], chunk_size: usize) -> Vec<u8> {
        chunked(message_type::AMF0_COMMAND, payload, chunk_size)
    }

    /// A full publishing client stream.
    pub fn publisher(app: &str, tc_url: &str, stream: &str) -> Vec<u8> {
        let mut out = client_handshake();
        out.extend_from_slice(&command(&connect_command(app, tc_url), DEFAULT_CHUNK_SIZE));
        out.extend_from_slice(&command(&stream_command("publish", stream), DEFAULT_CHUNK_SIZE));
        out
    }
}
