use bytes::Bytes;

use crate::error::HandlerError;
use crate::stream::{Direction, FlowDescriptor};

/// Per-flow logic run on the flow's own task.
///
/// Receives the flow's ordered byte ranges and turns them into result
/// values. An error ends the flow's task; other flows are unaffected.
pub trait FlowHandler: Send + 'static {
    type Output: Send + 'static;

    /// Called once per delivered contiguous range, in order per direction.
    fn on_data(&mut self, direction: Direction, data: Bytes) -> Result<Vec<Self::Output>, HandlerError>;

    /// Called once when the flow closes.
    fn on_close(&mut self) -> Vec<Self::Output> {
        Vec::new()
    }
}

/// Creates a handler for every new flow.
pub trait FlowHandlerFactory: Send + 'static {
    type Output: Send + 'static;
    type Handler: FlowHandler<Output = Self::Output>;

    fn new_handler(&mut self, flow: &FlowDescriptor) -> Self::Handler;
}
