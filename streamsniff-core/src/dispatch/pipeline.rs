use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::spawner::{TaskSpawner, TaskStats};
use super::FlowHandlerFactory;
use crate::error::Error;
use crate::io::{SegmentSource, SourceItem};
use crate::stream::{Reassembler, ReassemblyStats, StreamConfig};

/// Finished flow tasks are collected every this many segments.
const REAP_INTERVAL: u64 = 1024;

/// Configuration for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    /// Capacity of the shared result channel.
    pub result_capacity: usize,
    /// How long shutdown waits for flow tasks before aborting them.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            result_capacity: 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Segments are being read and reassembled.
    Running,
    /// Input stopped; flows are flushed and tasks are finishing.
    Draining,
    /// All flow tasks are done and the result channel is closed.
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        }
    }
}

/// Final report of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// TCP segments fed to the reassembler.
    pub segments: u64,
    /// Frames that were not TCP (or were fragments).
    pub skipped: u64,
    /// Frames that could not be decoded.
    pub malformed: u64,
    pub reassembly: ReassemblyStats,
    pub tasks: TaskStats,
    /// Set when the source failed mid-capture.
    pub source_error: Option<String>,
}

/// Shared flag that stops the read loop before its next segment.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reads segments, reassembles flows and fans handler results into one
/// output channel.
///
/// ```rust,no_run
/// # use streamsniff_core::dispatch::{FlowHandlerFactory, Pipeline, PipelineConfig};
/// # use streamsniff_core::io::FileSegmentSource;
/// # async fn example<H: FlowHandlerFactory>(handlers: H) -> streamsniff_core::Result<()>
/// # where H::Output: std::fmt::Debug {
/// let source = FileSegmentSource::open("capture.pcap")?;
/// let (handle, mut results) = Pipeline::new(handlers, PipelineConfig::default()).spawn(source);
/// while let Some(result) = results.recv().await {
///     println!("{result:?}");
/// }
/// let summary = handle.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<H: FlowHandlerFactory> {
    factory: H,
    config: PipelineConfig,
}

impl<H: FlowHandlerFactory> Pipeline<H> {
    pub fn new(factory: H, config: PipelineConfig) -> Self {
        Self { factory, config }
    }

    /// Start the pipeline on the current tokio runtime.
    ///
    /// The receiver closes only after every flow task has finished.
    pub fn spawn<S>(self, source: S) -> (PipelineHandle, mpsc::Receiver<H::Output>)
    where
        S: SegmentSource + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.result_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PipelineState::Running);
        let stop = StopSignal::new();
        let task = tokio::spawn(drive(
            self.factory,
            self.config,
            source,
            tx,
            state_tx,
            stop.clone(),
        ));
        let handle = PipelineHandle {
            stop,
            state: state_rx,
            task,
        };
        (handle, rx)
    }

    /// Run to completion, collecting every result.
    pub async fn run<S>(self, source: S) -> Result<(PipelineSummary, Vec<H::Output>), Error>
    where
        S: SegmentSource + 'static,
    {
        let (handle, mut rx) = self.spawn(source);
        let mut outputs = Vec::new();
        while let Some(output) = rx.recv().await {
            outputs.push(output);
        }
        let summary = handle.join().await?;
        Ok((summary, outputs))
    }
}

/// Control handle of a running pipeline.
pub struct PipelineHandle {
    stop: StopSignal,
    state: watch::Receiver<PipelineState>,
    task: JoinHandle<Result<PipelineSummary, Error>>,
}

impl PipelineHandle {
    /// Ask the read loop to stop and drain.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Wait for the pipeline to stop.
    pub async fn join(self) -> Result<PipelineSummary, Error> {
        self.task.await?
    }
}

async fn drive<H, S>(
    factory: H,
    config: PipelineConfig,
    source: S,
    results: mpsc::Sender<H::Output>,
    state: watch::Sender<PipelineState>,
    stop: StopSignal,
) -> Result<PipelineSummary, Error>
where
    H: FlowHandlerFactory,
    S: SegmentSource + 'static,
{
    let state = Arc::new(state);
    let spawner = TaskSpawner::new(factory, results, Handle::current());
    let stream_config = config.stream.clone();
    let reader_state = Arc::clone(&state);
    let (mut spawner, mut summary) = tokio::task::spawn_blocking(move || {
        read_loop(source, spawner, stream_config, &stop, &reader_state)
    })
    .await?;

    // Wait for every flow task, bounded by the drain timeout
    let deadline = tokio::time::sleep(config.drain_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            joined = spawner.tasks.join_next() => match joined {
                Some(result) => spawner.record(result),
                None => break,
            },
            _ = &mut deadline => {
                warn!(remaining = spawner.tasks.len(), "drain timeout expired, aborting flow tasks");
                spawner.tasks.abort_all();
                while let Some(result) = spawner.tasks.join_next().await {
                    spawner.record(result);
                }
                break;
            }
        }
    }

    summary.tasks = spawner.stats;
    set_state(&state, PipelineState::Stopped);
    // Dropping the spawner drops the last result sender
    drop(spawner);

    info!(
        segments = summary.segments,
        skipped = summary.skipped,
        malformed = summary.malformed,
        flows = summary.reassembly.flows_opened,
        evictions = summary.reassembly.evictions,
        idle_closed = summary.reassembly.flows_idle_closed,
        capacity_closed = summary.reassembly.flows_capacity_closed,
        bytes_lost = summary.reassembly.bytes_lost,
        handler_failures = summary.tasks.handler_failures + summary.tasks.panics,
        "pipeline stopped"
    );
    Ok(summary)
}

fn read_loop<H, S>(
    mut source: S,
    spawner: TaskSpawner<H>,
    config: StreamConfig,
    stop: &StopSignal,
    state: &watch::Sender<PipelineState>,
) -> (TaskSpawner<H>, PipelineSummary)
where
    H: FlowHandlerFactory,
    S: SegmentSource,
{
    let mut reassembler = Reassembler::new(spawner, config);
    let mut summary = PipelineSummary::default();

    while !stop.is_stopped() {
        let item = match source.next_item() {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!("packet source exhausted");
                break;
            }
            Err(err) => {
                warn!(error = %err, "packet source failed, draining");
                summary.source_error = Some(err.to_string());
                break;
            }
        };
        if stop.is_stopped() {
            break;
        }

        match item {
            SourceItem::Segment(segment) => {
                summary.segments += 1;
                reassembler.process(&segment);
                if summary.segments % REAP_INTERVAL == 0 {
                    reassembler.factory_mut().reap();
                }
            }
            SourceItem::Skipped(err) if err.is_malformed() => {
                summary.malformed += 1;
                debug!(error = %err, "skipping malformed packet");
            }
            SourceItem::Skipped(err) => {
                summary.skipped += 1;
                trace!(error = %err, "skipping packet");
            }
            SourceItem::Idle => {
                reassembler.flush_idle(wall_clock_us());
                reassembler.factory_mut().reap();
            }
        }
    }

    if stop.is_stopped() {
        debug!("stop requested");
    }
    set_state(state, PipelineState::Draining);
    reassembler.flush_all();
    summary.reassembly = reassembler.stats();
    (reassembler.into_factory(), summary)
}

fn set_state(state: &watch::Sender<PipelineState>, next: PipelineState) {
    debug!(state = next.as_str(), "pipeline state changed");
    state.send_replace(next);
}

fn wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
