//! Per-flow dispatch and result aggregation.
//!
//! The [`Pipeline`] runs a single blocking read loop that feeds the
//! [`Reassembler`](crate::stream::Reassembler). Every new flow gets a
//! [`FlowHandler`] on its own tokio task; handler results from all flows are
//! funneled into one bounded channel.
//!
//! ```text
//! source ──► read loop (blocking) ──► Reassembler ──► flow channel ──► flow task
//!                                                                        │
//!                                               results (mpsc) ◄─────────┘
//! ```
//!
//! Shutdown: the source ends (or a stop is requested), every flow is
//! flushed, all flow tasks are joined within the drain timeout, and only
//! then is the result channel closed.

mod handler;
mod pipeline;
mod spawner;

pub use handler::{FlowHandler, FlowHandlerFactory};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineHandle, PipelineState, PipelineSummary, StopSignal,
};
pub use spawner::TaskStats;

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::error::{Error, HandlerError};
    use crate::io::{IterSource, SegmentSource, SourceItem};
    use crate::stream::{Direction, FlowDescriptor, TcpSegment};
    use crate::test_utils::SegmentBuilder;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Data {
            flow_id: u64,
            direction: Direction,
            data: Vec<u8>,
        },
        Closed {
            flow_id: u64,
        },
    }

    /// Echoes every range; fails on "boom", panics on "panic".
    struct EchoHandler {
        flow_id: u64,
    }

    impl FlowHandler for EchoHandler {
        type Output = Event;

        fn on_data(&mut self, direction: Direction, data: Bytes) -> Result<Vec<Event>, HandlerError> {
            if data.as_ref() == b"boom" {
                return Err(HandlerError::new("boom"));
            }
            if data.as_ref() == b"panic" {
                panic!("handler panic");
            }
            Ok(vec![Event::Data {
                flow_id: self.flow_id,
                direction,
                data: data.to_vec(),
            }])
        }

        fn on_close(&mut self) -> Vec<Event> {
            vec![Event::Closed {
                flow_id: self.flow_id,
            }]
        }
    }

    struct EchoFactory;

    impl FlowHandlerFactory for EchoFactory {
        type Output = Event;
        type Handler = EchoHandler;

        fn new_handler(&mut self, flow: &FlowDescriptor) -> EchoHandler {
            EchoHandler { flow_id: flow.id }
        }
    }

    /// Replays a fixed script, optionally blocking on a gate before ending.
    struct ScriptedSource {
        items: VecDeque<Result<SourceItem, Error>>,
        gate: Option<std_mpsc::Receiver<()>>,
    }

    impl ScriptedSource {
        fn new(items: Vec<Result<SourceItem, Error>>) -> Self {
            Self {
                items: items.into(),
                gate: None,
            }
        }

        fn gated(mut self, gate: std_mpsc::Receiver<()>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    impl SegmentSource for ScriptedSource {
        fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
            if let Some(item) = self.items.pop_front() {
                return item.map(Some);
            }
            if let Some(gate) = self.gate.take() {
                let _ = gate.recv();
            }
            Ok(None)
        }
    }

    fn flow_a(seq: u32, data: &[u8]) -> TcpSegment {
        SegmentBuilder::new("10.0.0.1:50000", "10.0.0.2:1935")
            .seq(seq)
            .payload(data)
            .build()
    }

    fn flow_b(seq: u32, data: &[u8]) -> TcpSegment {
        SegmentBuilder::new("10.0.0.3:50001", "10.0.0.2:1935")
            .seq(seq)
            .payload(data)
            .build()
    }

    fn delivered(events: &[Event], flow_id: u64) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Data { flow_id: id, data, .. } if *id == flow_id => Some(data.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat()
    }

    fn closes(events: &[Event], flow_id: u64) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Event::Closed { flow_id: id } if *id == flow_id))
            .count()
    }

    // Test 1: Two interleaved flows are reassembled and closed once each
    #[tokio::test]
    async fn test_pipeline_two_flows() {
        let source = IterSource::new(vec![
            flow_a(100, b"AB"),
            flow_b(7, b"xy"),
            flow_a(104, b"EF"),
            flow_a(102, b"CD"),
            flow_b(9, b"z"),
        ]);
        let (summary, events) = Pipeline::new(EchoFactory, PipelineConfig::default())
            .run(source)
            .await
            .unwrap();

        assert_eq!(delivered(&events, 1), b"ABCDEF".to_vec());
        assert_eq!(delivered(&events, 2), b"xyz".to_vec());
        assert_eq!(closes(&events, 1), 1);
        assert_eq!(closes(&events, 2), 1);
        // Per-flow order: the close comes last
        let last_a = events
            .iter()
            .rposition(|e| matches!(e, Event::Data { flow_id: 1, .. }))
            .unwrap();
        let close_a = events
            .iter()
            .position(|e| matches!(e, Event::Closed { flow_id: 1 }))
            .unwrap();
        assert!(last_a < close_a);

        assert_eq!(summary.segments, 5);
        assert_eq!(summary.reassembly.flows_opened, 2);
        assert_eq!(summary.tasks.spawned, 2);
        assert_eq!(summary.tasks.completed, 2);
    }

    // Test 2: A failing handler does not affect other flows
    #[tokio::test]
    async fn test_handler_failure_isolated() {
        let source = IterSource::new(vec![
            flow_a(1, b"boom"),
            flow_b(1, b"fine"),
            flow_a(5, b"after"),
        ]);
        let (summary, events) = Pipeline::new(EchoFactory, PipelineConfig::default())
            .run(source)
            .await
            .unwrap();

        assert_eq!(delivered(&events, 2), b"fine".to_vec());
        assert_eq!(closes(&events, 2), 1);
        assert!(delivered(&events, 1).is_empty());
        assert_eq!(summary.tasks.handler_failures, 1);
    }

    // Test 3: A panicking handler is counted, not propagated
    #[tokio::test]
    async fn test_handler_panic_isolated() {
        let source = IterSource::new(vec![flow_a(1, b"panic"), flow_b(1, b"fine")]);
        let (summary, events) = Pipeline::new(EchoFactory, PipelineConfig::default())
            .run(source)
            .await
            .unwrap();

        assert_eq!(delivered(&events, 2), b"fine".to_vec());
        assert_eq!(summary.tasks.panics, 1);
    }

    // Test 4: Tasks stuck on a full output are aborted after the drain timeout
    #[tokio::test]
    async fn test_drain_timeout_aborts() {
        let source = IterSource::new((0..8u32).map(|i| flow_a(i, b"x")));
        let config = PipelineConfig {
            result_capacity: 1,
            drain_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (handle, mut rx) = Pipeline::new(EchoFactory, config).spawn(source);
        let state = handle.subscribe();

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.tasks.aborted, 1);
        assert_eq!(*state.borrow(), PipelineState::Stopped);

        // The output closes after the buffered result is drained
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    // Test 5: Stop drains and closes the output
    #[tokio::test]
    async fn test_stop_signal() {
        let source = IterSource::new((0u32..).map(|i| flow_a(i, b"s")));
        let (handle, mut rx) = Pipeline::new(EchoFactory, PipelineConfig::default()).spawn(source);
        assert!(rx.recv().await.is_some());
        handle.stop();

        let mut closed = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Closed { .. }) {
                closed += 1;
            }
        }
        let summary = handle.join().await.unwrap();
        assert_eq!(closed, 1);
        assert_eq!(summary.reassembly.flows_closed, 1);
        assert!(summary.segments >= 1);
    }

    // Test 6: An idle tick closes stale flows while input is still open
    #[tokio::test]
    async fn test_idle_tick_closes_flows() {
        let (release, gate) = std_mpsc::channel();
        let source = ScriptedSource::new(vec![
            Ok(SourceItem::Segment(flow_a(1, b"quiet"))),
            Ok(SourceItem::Idle),
        ])
        .gated(gate);
        let config = PipelineConfig {
            stream: crate::stream::StreamConfig {
                idle_timeout_us: Some(1_000_000),
                ..Default::default()
            },
            ..Default::default()
        };
        let (handle, mut rx) = Pipeline::new(EchoFactory, config).spawn(source);

        let mut before_end = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                let done = matches!(event, Event::Closed { flow_id: 1 });
                before_end.push(event);
                if done {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(closed);
        assert_eq!(handle.state(), PipelineState::Running);
        assert_eq!(delivered(&before_end, 1), b"quiet".to_vec());

        release.send(()).unwrap();
        let mut rest = Vec::new();
        while let Some(event) = rx.recv().await {
            rest.push(event);
        }
        let summary = handle.join().await.unwrap();
        assert_eq!(closes(&rest, 1), 0);
        assert_eq!(summary.reassembly.flows_idle_closed, 1);
        assert_eq!(summary.reassembly.flows_closed, 1);
    }

    // Test 7: A source error mid-capture drains every flow
    #[tokio::test]
    async fn test_source_error_drains() {
        let failure = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "interface went down");
        let source = ScriptedSource::new(vec![
            Ok(SourceItem::Segment(flow_a(1, b"one"))),
            Ok(SourceItem::Segment(flow_b(1, b"two"))),
            Err(Error::Io(failure)),
            Ok(SourceItem::Segment(flow_a(4, b"never"))),
        ]);
        let (handle, mut rx) = Pipeline::new(EchoFactory, PipelineConfig::default()).spawn(source);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let summary = handle.join().await.unwrap();

        let source_error = summary.source_error.as_deref().unwrap();
        assert!(source_error.contains("interface went down"));
        assert_eq!(delivered(&events, 1), b"one".to_vec());
        assert_eq!(delivered(&events, 2), b"two".to_vec());
        assert_eq!(closes(&events, 1), 1);
        assert_eq!(closes(&events, 2), 1);
        assert_eq!(summary.segments, 2);
        assert_eq!(summary.reassembly.flows_closed, 2);
    }
}
