use serde::{Deserialize, Serialize};

use crate::port::identifier::{PortKind, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    /// Records and plays audio; carries stereo ports plus gain controls.
    Audio,
    /// MIDI-based track. `piano_roll` tracks own editable note content;
    /// chord tracks expand single notes into chords on the way out.
    Event { piano_roll: bool, chord: bool },
    /// Automation-only; owns no signal ports.
    ControlOnly,
}

impl TrackKind {
    pub fn is_audio(&self) -> bool {
        matches!(self, TrackKind::Audio)
    }

    pub fn is_event(&self) -> bool {
        matches!(self, TrackKind::Event { .. })
    }

    pub fn is_chord(&self) -> bool {
        matches!(self, TrackKind::Event { chord: true, .. })
    }

    /// Chord tracks hold their content in a piano-roll port too.
    pub fn has_piano_roll_port(&self) -> bool {
        matches!(
            self,
            TrackKind::Event { piano_roll: true, .. } | TrackKind::Event { chord: true, .. }
        )
    }

    pub fn input_signal(&self) -> Option<PortKind> {
        match self {
            TrackKind::Audio => Some(PortKind::Audio),
            TrackKind::Event { .. } => Some(PortKind::Event),
            TrackKind::ControlOnly => None,
        }
    }
}

/// Descriptor for a track as seen by its processor. The full track model
/// (lanes, clips, automation) lives in the outer engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    pub enabled: bool,
    /// Frozen tracks are rendered offline; their processor is skipped.
    pub frozen: bool,
    pub recording_armed: bool,
    /// Whether this track's content is open in the editor, which routes
    /// live editor input into the processor.
    pub currently_edited: bool,
    /// 1-based channel that non-passthrough event tracks force their
    /// input onto.
    pub midi_ch: u8,
    pub passthrough_midi_input: bool,
    /// Accepted input channels, zero-based index. `None` accepts all.
    pub midi_channels: Option<[bool; 16]>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            enabled: true,
            frozen: false,
            recording_armed: false,
            currently_edited: false,
            midi_ch: 1,
            passthrough_midi_input: false,
            midi_channels: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates() {
        assert!(TrackKind::Audio.is_audio());
        let chord = TrackKind::Event {
            piano_roll: false,
            chord: true,
        };
        assert!(chord.is_event());
        assert!(chord.is_chord());
        assert!(chord.has_piano_roll_port());
        assert_eq!(TrackKind::ControlOnly.input_signal(), None);
        assert_eq!(TrackKind::Audio.input_signal(), Some(PortKind::Audio));
    }

    #[test]
    fn new_track_defaults() {
        let track = Track::new(TrackId(7), "Drums", TrackKind::Audio);
        assert!(track.enabled);
        assert!(!track.frozen);
        assert_eq!(track.midi_ch, 1);
        assert!(track.midi_channels.is_none());
    }
}
