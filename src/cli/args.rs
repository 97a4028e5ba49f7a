//! Command-line argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use streamsniff_core::stream::{DEFAULT_BUFFER_BUDGET, DEFAULT_MAX_FLOWS};
use streamsniff_core::{PipelineConfig, StreamConfig};

use super::OutputFormat;
use crate::handlers::HandlerOptions;

/// Idle timeout applied to live capture when `--idle-timeout` is absent.
pub const DEFAULT_LIVE_IDLE_TIMEOUT_SECS: u64 = 120;

/// Reassemble TCP streams and report what flows carry.
#[derive(Parser, Debug)]
#[command(name = "streamsniff")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture file to read (pcap or pcapng, optionally gzip-compressed)
    #[arg(short = 'r', long = "read", short_alias = 'f', value_name = "FILE")]
    pub read: Option<PathBuf>,

    /// Interface to capture from when no file is given
    #[arg(short = 'i', long = "interface", default_value = "any", value_name = "NAME")]
    pub interface: String,

    /// Snapshot length for live capture
    #[arg(short = 's', long = "snaplen", default_value = "65535")]
    pub snaplen: i32,

    /// Disable promiscuous mode
    #[arg(short = 'p', long = "no-promisc")]
    pub no_promisc: bool,

    /// Bytes buffered out of order across all flows before eviction
    #[arg(long = "buffer-budget", default_value_t = DEFAULT_BUFFER_BUDGET, value_name = "BYTES")]
    pub buffer_budget: usize,

    /// Close flows idle for this many seconds [default: 120 for live capture]
    #[arg(long = "idle-timeout", value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Maximum concurrently open flows
    #[arg(long = "max-flows", default_value_t = DEFAULT_MAX_FLOWS, value_name = "N")]
    pub max_flows: usize,

    /// Seconds to wait for flow handlers at shutdown
    #[arg(long = "drain-timeout", default_value = "30", value_name = "SECS")]
    pub drain_timeout: u64,

    /// Emit a byte summary for every flow
    #[arg(long = "summary")]
    pub summary: bool,

    /// Output format for results
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            stream: StreamConfig {
                buffer_budget: self.buffer_budget,
                idle_timeout_us: self
                    .idle_timeout_secs()
                    .map(|secs| secs.saturating_mul(1_000_000).min(i64::MAX as u64) as i64),
                max_flows: self.max_flows,
                ..StreamConfig::default()
            },
            drain_timeout: Duration::from_secs(self.drain_timeout),
            ..PipelineConfig::default()
        }
    }

    /// Live capture never ends on its own, so it always sweeps idle flows.
    fn idle_timeout_secs(&self) -> Option<u64> {
        match (self.idle_timeout, &self.read) {
            (Some(secs), _) => Some(secs),
            (None, None) => Some(DEFAULT_LIVE_IDLE_TIMEOUT_SECS),
            (None, Some(_)) => None,
        }
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            summary: self.summary,
            ..HandlerOptions::default()
        }
    }

    #[cfg(feature = "live")]
    pub fn live_options(&self) -> streamsniff_core::LiveOptions {
        streamsniff_core::LiveOptions {
            interface: self.interface.clone(),
            snaplen: self.snaplen,
            promisc: !self.no_promisc,
            ..Default::default()
        }
    }

    /// Log filter for the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
