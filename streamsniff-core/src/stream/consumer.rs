use bytes::Bytes;

use super::{Direction, FlowDescriptor};

/// Receives the ordered byte stream of one flow.
///
/// `accept` is called once per contiguous range, in increasing sequence
/// order per direction. `close` is called exactly once, after which no
/// further `accept` calls are made. Consumers run on the reassembly path
/// and cannot call back into the engine.
pub trait StreamConsumer {
    fn accept(&mut self, direction: Direction, data: Bytes);

    fn close(&mut self);
}

impl<C: StreamConsumer + ?Sized> StreamConsumer for Box<C> {
    fn accept(&mut self, direction: Direction, data: Bytes) {
        (**self).accept(direction, data)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Creates one consumer per newly observed flow.
pub trait StreamConsumerFactory {
    type Consumer: StreamConsumer;

    /// Called exactly once per flow, synchronously, when its first segment
    /// is processed.
    fn new_consumer(&mut self, flow: &FlowDescriptor) -> Self::Consumer;
}

impl<F, C> StreamConsumerFactory for F
where
    F: FnMut(&FlowDescriptor) -> C,
    C: StreamConsumer,
{
    type Consumer = C;

    fn new_consumer(&mut self, flow: &FlowDescriptor) -> C {
        self(flow)
    }
}
