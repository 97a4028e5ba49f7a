//! Per-flow byte accounting.

use streamsniff_core::Direction;

/// Bytes and contiguous ranges delivered per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowSummary {
    pub bytes_to_server: u64,
    pub bytes_to_client: u64,
    pub ranges_to_server: u64,
    pub ranges_to_client: u64,
}

impl FlowSummary {
    pub fn record(&mut self, direction: Direction, len: usize) {
        match direction {
            Direction::ToServer => {
                self.bytes_to_server += len as u64;
                self.ranges_to_server += 1;
            }
            Direction::ToClient => {
                self.bytes_to_client += len as u64;
                self.ranges_to_client += 1;
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_server + self.bytes_to_client
    }
}
