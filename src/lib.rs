pub mod error;
pub mod graph;
pub mod math;
pub mod midi;
pub mod port;
pub mod position;
pub mod processor;
pub mod send;
pub mod track;
pub mod transport;

pub use error::Error;

use serde::{Deserialize, Serialize};

use crate::midi::MidiEventVec;
use crate::port::identifier::{PluginUuid, PortUuid, TrackId};

/// Window of the current audio block handed to every `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    /// Absolute frame the block starts at.
    pub g_start_frame: u64,
    /// Absolute frame this sub-range starts at (>= `g_start_frame` when a
    /// block was split).
    pub g_start_frame_w_offset: u64,
    /// Offset of this sub-range inside the block's buffers.
    pub local_offset: u32,
    pub nframes: u32,
}

impl TimeInfo {
    pub fn new(g_start_frame: u64, nframes: u32) -> Self {
        Self {
            g_start_frame,
            g_start_frame_w_offset: g_start_frame,
            local_offset: 0,
            nframes,
        }
    }
}

/// Notes a chord expands to, as MIDI note numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordDescriptor {
    pub notes: Vec<u8>,
}

/// External recording engine. Receives one call per monotonic sub-range;
/// no call ever straddles a loop wrap or punch boundary.
pub trait Recorder {
    fn handle_recording(&mut self, track: TrackId, time_nfo: &TimeInfo);
}

/// Recomputes the processing schedule after a topology change.
pub trait Router {
    fn recalc_graph(&mut self);
}

/// Supplies clip content for the current block window.
pub trait ClipSource {
    fn fill_audio(&mut self, time_nfo: &TimeInfo, left: &mut [f32], right: &mut [f32]);
    fn fill_midi(&mut self, time_nfo: &TimeInfo, out: &mut MidiEventVec);
}

/// Maps single trigger notes to chords for chord tracks.
pub trait ChordSource {
    fn chord_for_note(&self, note: u8) -> Option<&ChordDescriptor>;
}

/// Answers plugin questions a send cannot answer from port data alone.
pub trait PluginCatalog {
    /// The plugin owning `port`, if any.
    fn owner_plugin(&self, port: PortUuid) -> Option<PluginUuid>;
    fn instantiation_failed(&self, plugin: PluginUuid) -> bool;
}
