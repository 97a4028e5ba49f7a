//! Per-flow handlers shipped with the binary.
//!
//! Every flow runs a [`SniffHandler`], which feeds the RTMP probe and,
//! with `--summary`, counts delivered bytes. Both emit [`FlowRecord`]s.

pub mod amf0;
pub mod rtmp;
mod summary;

use std::net::SocketAddr;

use bytes::Bytes;
use streamsniff_core::{Direction, FlowDescriptor, FlowHandler, FlowHandlerFactory, HandlerError};
use tracing::debug;

pub use rtmp::{RtmpError, RtmpProbe, RtmpSession};
pub use summary::FlowSummary;

/// One result line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub kind: &'static str,
    pub flow_id: u64,
    pub client: SocketAddr,
    pub server: SocketAddr,
    pub fields: Vec<(&'static str, String)>,
}

impl FlowRecord {
    pub fn new(kind: &'static str, flow: &FlowDescriptor) -> Self {
        Self {
            kind,
            flow_id: flow.id,
            client: flow.client,
            server: flow.server,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'static str, value: impl ToString) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    /// Add the field only when there is a value.
    pub fn field_opt<T: ToString>(self, name: &'static str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Records without fields are not printed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn from_rtmp(flow: &FlowDescriptor, session: RtmpSession) -> Self {
        FlowRecord::new("rtmp", flow)
            .field_opt("version", session.client_version)
            .field_opt("server_version", session.server_version)
            .field_opt("app", session.app)
            .field_opt("tc_url", session.tc_url)
            .field_opt("flash_ver", session.flash_ver)
            .field_opt("swf_url", session.swf_url)
            .field_opt("action", session.action)
            .field_opt("stream", session.stream)
    }

    fn from_summary(flow: &FlowDescriptor, summary: &FlowSummary) -> Self {
        FlowRecord::new("flow", flow)
            .field("bytes_to_server", summary.bytes_to_server)
            .field("bytes_to_client", summary.bytes_to_client)
            .field("ranges_to_server", summary.ranges_to_server)
            .field("ranges_to_client", summary.ranges_to_client)
    }
}

/// Which handlers run on each flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOptions {
    pub rtmp: bool,
    pub summary: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            rtmp: true,
            summary: false,
        }
    }
}

/// Factory for [`SniffHandler`]s.
#[derive(Debug, Clone, Default)]
pub struct SniffHandlers {
    options: HandlerOptions,
}

impl SniffHandlers {
    pub fn new(options: HandlerOptions) -> Self {
        Self { options }
    }
}

impl FlowHandlerFactory for SniffHandlers {
    type Output = FlowRecord;
    type Handler = SniffHandler;

    fn new_handler(&mut self, flow: &FlowDescriptor) -> SniffHandler {
        SniffHandler {
            flow: flow.clone(),
            rtmp: self.options.rtmp.then(RtmpProbe::new),
            summary: self.options.summary.then(FlowSummary::default),
        }
    }
}

pub struct SniffHandler {
    flow: FlowDescriptor,
    rtmp: Option<RtmpProbe>,
    summary: Option<FlowSummary>,
}

impl FlowHandler for SniffHandler {
    type Output = FlowRecord;

    fn on_data(&mut self, direction: Direction, data: Bytes) -> Result<Vec<FlowRecord>, HandlerError> {
        if let Some(summary) = &mut self.summary {
            summary.record(direction, data.len());
        }

        let Some(probe) = &mut self.rtmp else {
            return Ok(Vec::new());
        };
        if probe.is_done() {
            return Ok(Vec::new());
        }
        match direction {
            Direction::ToServer => match probe.feed_client(&data) {
                Ok(Some(session)) => Ok(vec![FlowRecord::from_rtmp(&self.flow, session)]),
                Ok(None) => Ok(Vec::new()),
                Err(err) if self.summary.is_some() => {
                    // Keep counting; only the probe stops
                    debug!(flow = %self.flow, error = %err, "rtmp probe stopped");
                    self.rtmp = None;
                    Ok(Vec::new())
                }
                Err(err) => Err(HandlerError::new(format!("rtmp: {err}"))),
            },
            Direction::ToClient => {
                probe.feed_server(&data);
                Ok(Vec::new())
            }
        }
    }

    fn on_close(&mut self) -> Vec<FlowRecord> {
        let mut records = Vec::new();
        if let Some(session) = self.rtmp.as_mut().and_then(RtmpProbe::finish) {
            records.push(FlowRecord::from_rtmp(&self.flow, session));
        }
        if let Some(summary) = &self.summary {
            records.push(FlowRecord::from_summary(&self.flow, summary));
        }
        records
    }
}
