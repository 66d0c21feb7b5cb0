use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Read-only transport snapshot handed to processing units each block.
/// Owned and mutated by the outer engine between blocks. When punch
/// recording is used, `punch_in` must lie before `punch_out`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transport {
    pub rolling: bool,
    pub recording: bool,
    pub loop_enabled: bool,
    pub loop_start: Position,
    pub loop_end: Position,
    pub punch_enabled: bool,
    pub punch_in: Position,
    pub punch_out: Position,
    /// Frames of count-in left before recording actually starts.
    pub preroll_frames_remaining: u32,
    /// Requests that queued note output gets flushed with all-notes-off.
    pub panic: bool,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }
}
