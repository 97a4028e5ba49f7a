use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use super::{FlowHandler, FlowHandlerFactory};
use crate::stream::{Direction, FlowDescriptor, StreamConsumer, StreamConsumerFactory};

/// How a flow task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowOutcome {
    Completed,
    /// The handler returned an error.
    Failed,
    /// The result receiver went away.
    OutputClosed,
}

/// Task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub spawned: u64,
    pub completed: u64,
    pub handler_failures: u64,
    pub panics: u64,
    pub aborted: u64,
}

/// Consumer factory that runs one handler task per flow.
///
/// Each flow gets an unbounded channel into its task, so `accept` never
/// blocks the reassembly path. Results go to one shared bounded channel.
pub(crate) struct TaskSpawner<H: FlowHandlerFactory> {
    factory: H,
    runtime: Handle,
    results: mpsc::Sender<H::Output>,
    pub tasks: JoinSet<FlowOutcome>,
    pub stats: TaskStats,
}

impl<H: FlowHandlerFactory> TaskSpawner<H> {
    pub fn new(factory: H, results: mpsc::Sender<H::Output>, runtime: Handle) -> Self {
        Self {
            factory,
            runtime,
            results,
            tasks: JoinSet::new(),
            stats: TaskStats::default(),
        }
    }

    /// Collect tasks that already finished.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    pub fn record(&mut self, result: Result<FlowOutcome, JoinError>) {
        match result {
            Ok(FlowOutcome::Completed) | Ok(FlowOutcome::OutputClosed) => self.stats.completed += 1,
            Ok(FlowOutcome::Failed) => self.stats.handler_failures += 1,
            Err(err) if err.is_panic() => {
                warn!(error = %err, "flow handler panicked");
                self.stats.panics += 1;
            }
            Err(_) => self.stats.aborted += 1,
        }
    }
}

impl<H: FlowHandlerFactory> StreamConsumerFactory for TaskSpawner<H> {
    type Consumer = FlowChannel;

    fn new_consumer(&mut self, flow: &FlowDescriptor) -> FlowChannel {
        let handler = self.factory.new_handler(flow);
        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks.spawn_on(
            run_flow(flow.clone(), handler, rx, self.results.clone()),
            &self.runtime,
        );
        self.stats.spawned += 1;
        FlowChannel { tx: Some(tx) }
    }
}

/// Engine-side handle of a flow task.
pub(crate) struct FlowChannel {
    tx: Option<mpsc::UnboundedSender<(Direction, Bytes)>>,
}

impl StreamConsumer for FlowChannel {
    fn accept(&mut self, direction: Direction, data: Bytes) {
        if let Some(tx) = &self.tx {
            if tx.send((direction, data)).is_err() {
                // Task is gone (handler failed); stop queueing for it
                self.tx = None;
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

async fn run_flow<F: FlowHandler>(
    flow: FlowDescriptor,
    mut handler: F,
    mut rx: mpsc::UnboundedReceiver<(Direction, Bytes)>,
    results: mpsc::Sender<F::Output>,
) -> FlowOutcome {
    while let Some((direction, data)) = rx.recv().await {
        match handler.on_data(direction, data) {
            Ok(outputs) => {
                for output in outputs {
                    if results.send(output).await.is_err() {
                        return FlowOutcome::OutputClosed;
                    }
                }
            }
            Err(err) => {
                warn!(flow = %flow, error = %err, "flow handler failed");
                return FlowOutcome::Failed;
            }
        }
    }

    for output in handler.on_close() {
        if results.send(output).await.is_err() {
            return FlowOutcome::OutputClosed;
        }
    }
    debug!(flow = %flow, "flow task finished");
    FlowOutcome::Completed
}
