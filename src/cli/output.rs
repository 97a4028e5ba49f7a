//! Output formatting for flow records.

use std::io::Write;

use clap::ValueEnum;
use serde_json::{Map, Value};

use crate::handlers::FlowRecord;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One `key=value` line per record (default)
    Text,
    /// JSON Lines (one JSON object per record)
    Json,
}

/// Formats flow records for output.
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Write one record as a line. Empty records are skipped.
    pub fn write<W: Write>(&self, record: &FlowRecord, writer: &mut W) -> std::io::Result<()> {
        if record.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Text => self.write_text(record, writer),
            OutputFormat::Json => self.write_json(record, writer),
        }
    }

    fn write_text<W: Write>(&self, record: &FlowRecord, writer: &mut W) -> std::io::Result<()> {
        write!(
            writer,
            "{} #{} {} -> {}",
            record.kind, record.flow_id, record.client, record.server
        )?;
        for (name, value) in &record.fields {
            if value.is_empty() || value.contains(char::is_whitespace) {
                write!(writer, " {name}={value:?}")?;
            } else {
                write!(writer, " {name}={value}")?;
            }
        }
        writeln!(writer)
    }

    fn write_json<W: Write>(&self, record: &FlowRecord, writer: &mut W) -> std::io::Result<()> {
        let mut obj = Map::new();
        obj.insert("kind".to_string(), Value::from(record.kind));
        obj.insert("flow_id".to_string(), Value::from(record.flow_id));
        obj.insert("client".to_string(), Value::from(record.client.to_string()));
        obj.insert("server".to_string(), Value::from(record.server.to_string()));
        for (name, value) in &record.fields {
            obj.insert(name.to_string(), Value::from(value.as_str()));
        }
        writeln!(writer, "{}", Value::Object(obj))
    }
}
