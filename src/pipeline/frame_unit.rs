//! The record that carries one frame (or the end-of-stream sentinel)
//! between stages.

/// One compressed or decoded frame in flight between two stages.
///
/// A unit is owned by exactly one stage at a time; queues move it, they
/// never share it.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameUnit {
    /// Frame payload; empty for the sentinel
    data: Vec<u8>,

    /// Original frame number assigned by the source stage
    timestamp: u64,

    /// End-of-stream marker
    end_of_stream: bool,

    /// Number of stages that have processed this unit
    handled: u32,
}

impl FrameUnit {
    /// Create a unit holding a frame payload
    pub fn new(data: Vec<u8>, timestamp: u64) -> Self {
        Self {
            data,
            timestamp,
            end_of_stream: false,
            handled: 0,
        }
    }

    /// Copy a borrowed buffer into a new unit
    pub fn copy_from(data: &[u8], timestamp: u64) -> Self {
        Self::new(data.to_vec(), timestamp)
    }

    /// Create the end-of-stream sentinel. It never carries a payload.
    pub fn end_of_stream(timestamp: u64) -> Self {
        Self {
            data: Vec::new(),
            timestamp,
            end_of_stream: true,
            handled: 0,
        }
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Frame number tag
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Check if this is the sentinel
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Record that a stage processed this unit
    pub fn mark_handled(&mut self) {
        self.handled += 1;
    }

    /// Times this unit was processed
    pub fn handled(&self) -> u32 {
        self.handled
    }
}
