use midly::MidiMessage;
use midly::live::LiveEvent;

use crate::ChordSource;

/// Hard cap per event vector. Reached only under pathological input;
/// events past the cap are dropped instead of reallocating mid-block.
pub const MAX_MIDI_EVENTS: usize = 2048;

/// One wire-format MIDI event stamped with a frame offset inside the
/// current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub time: u32,
    raw: [u8; 3],
    len: u8,
}

impl MidiEvent {
    pub fn new(time: u32, bytes: &[u8]) -> Self {
        let mut raw = [0u8; 3];
        let len = bytes.len().min(3);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self {
            time,
            raw,
            len: len as u8,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw[..self.len as usize]
    }

    fn parsed(&self) -> Option<LiveEvent<'_>> {
        LiveEvent::parse(self.raw()).ok()
    }

    /// Zero-based channel, or `None` for system messages.
    pub fn channel(&self) -> Option<u8> {
        match self.parsed()? {
            LiveEvent::Midi { channel, .. } => Some(channel.as_int()),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(
            self.parsed(),
            Some(LiveEvent::Midi {
                message: MidiMessage::NoteOn { vel, .. },
                ..
            }) if vel.as_int() > 0
        )
    }

    pub fn is_note_off(&self) -> bool {
        match self.parsed() {
            Some(LiveEvent::Midi {
                message: MidiMessage::NoteOff { .. },
                ..
            }) => true,
            Some(LiveEvent::Midi {
                message: MidiMessage::NoteOn { vel, .. },
                ..
            }) => vel.as_int() == 0,
            _ => false,
        }
    }

    pub fn note_number(&self) -> Option<u8> {
        match self.parsed()? {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { key, .. },
                ..
            }
            | LiveEvent::Midi {
                message: MidiMessage::NoteOff { key, .. },
                ..
            } => Some(key.as_int()),
            _ => None,
        }
    }
}

/// Fixed-capacity event vector. All `add_*` channels are 1-based.
#[derive(Debug, Default)]
pub struct MidiEventVec {
    events: Vec<MidiEvent>,
}

impl Clone for MidiEventVec {
    fn clone(&self) -> Self {
        let mut events = Vec::with_capacity(MAX_MIDI_EVENTS);
        events.extend_from_slice(&self.events);
        Self { events }
    }
}

impl MidiEventVec {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(MAX_MIDI_EVENTS),
        }
    }

    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            events: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn push(&mut self, ev: MidiEvent) {
        if self.events.len() >= MAX_MIDI_EVENTS {
            return;
        }
        self.events.push(ev);
    }

    pub fn add_raw(&mut self, time: u32, bytes: &[u8]) {
        self.push(MidiEvent::new(time, bytes));
    }

    pub fn add_note_on(&mut self, channel: u8, note: u8, velocity: u8, time: u32) {
        self.add_raw(time, &[0x90 | (channel - 1), note, velocity]);
    }

    pub fn add_note_off(&mut self, channel: u8, note: u8, time: u32) {
        self.add_raw(time, &[0x80 | (channel - 1), note, 90]);
    }

    pub fn add_control_change(&mut self, channel: u8, controller: u8, value: u8, time: u32) {
        self.add_raw(time, &[0xB0 | (channel - 1), controller, value]);
    }

    /// `value` is the 14-bit wire value in `[0, 0x4000)`; 0x2000 is center.
    pub fn add_pitchbend(&mut self, channel: u8, value: u16, time: u32) {
        let lsb = (value & 0x7F) as u8;
        let msb = ((value >> 7) & 0x7F) as u8;
        self.add_raw(time, &[0xE0 | (channel - 1), lsb, msb]);
    }

    pub fn add_channel_pressure(&mut self, channel: u8, value: u8, time: u32) {
        self.add_raw(time, &[0xD0 | (channel - 1), value]);
    }

    /// CC 123: all notes off.
    pub fn add_all_notes_off(&mut self, channel: u8, time: u32) {
        self.add_control_change(channel, 0x7B, 0, time);
    }

    /// Drops everything pending and emits all-notes-off on every channel.
    pub fn panic(&mut self) {
        self.clear();
        for channel in 1..=16 {
            self.add_all_notes_off(channel, 0);
        }
    }

    pub fn append(&mut self, src: &MidiEventVec, local_offset: u32, nframes: u32) {
        self.append_w_filter(src, None, local_offset, nframes);
    }

    /// Appends events from `src` that fall inside the window, optionally
    /// keeping only the given channels (index = zero-based channel).
    pub fn append_w_filter(
        &mut self,
        src: &MidiEventVec,
        channels: Option<&[bool; 16]>,
        local_offset: u32,
        nframes: u32,
    ) {
        for ev in &src.events {
            if ev.time < local_offset || ev.time >= local_offset + nframes {
                continue;
            }
            if let Some(accepted) = channels {
                if let Some(ch) = ev.channel() {
                    if !accepted[ch as usize] {
                        continue;
                    }
                }
            }
            self.push(*ev);
        }
        self.clear_duplicates();
    }

    /// Rewrites the channel of every channel-voice message. System messages
    /// (status >= 0xF0) pass through untouched. `channel` is 1-based.
    pub fn set_channel(&mut self, channel: u8) {
        for ev in &mut self.events {
            let status = ev.raw[0];
            if status >= 0xF0 {
                continue;
            }
            if status >= 0x80 {
                ev.raw[0] = (status & 0xF0) | (channel - 1);
            }
        }
    }

    /// In-place dedup keeping first occurrences. Quadratic, but vectors
    /// are short and this must not allocate.
    pub fn clear_duplicates(&mut self) {
        let mut i = 0;
        while i < self.events.len() {
            let mut j = i + 1;
            while j < self.events.len() {
                if self.events[j] == self.events[i] {
                    self.events.remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    /// Expands note events from `src` into the chords a [`ChordSource`]
    /// maps them to and appends the result. Non-note events are skipped.
    pub fn transform_chord_and_append(
        &mut self,
        src: &MidiEventVec,
        chords: &dyn ChordSource,
        velocity: u8,
        local_offset: u32,
        nframes: u32,
    ) {
        for ev in &src.events {
            if ev.time < local_offset || ev.time >= local_offset + nframes {
                continue;
            }
            let (Some(note), Some(_)) = (ev.note_number(), ev.channel()) else {
                continue;
            };
            let Some(descr) = chords.chord_for_note(note) else {
                continue;
            };
            if ev.is_note_on() {
                for &chord_note in &descr.notes {
                    self.add_note_on(1, chord_note, velocity, ev.time);
                }
            } else if ev.is_note_off() {
                for &chord_note in &descr.notes {
                    self.add_note_off(1, chord_note, ev.time);
                }
            }
        }
        self.clear_duplicates();
    }
}

/// Double-buffered events of one port: `active` is what the current block
/// consumes, `queued` collects events for upcoming blocks.
#[derive(Debug, Clone, Default)]
pub struct MidiEvents {
    pub active: MidiEventVec,
    pub queued: MidiEventVec,
}

impl MidiEvents {
    pub fn new() -> Self {
        Self {
            active: MidiEventVec::new(),
            queued: MidiEventVec::new(),
        }
    }

    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            active: MidiEventVec::with_capacity(cap),
            queued: MidiEventVec::with_capacity(cap),
        }
    }

    /// Moves queued events that fall inside the block window into `active`.
    /// Events scheduled further out stay queued.
    pub fn dequeue(&mut self, local_offset: u32, nframes: u32) {
        let end = local_offset + nframes;
        let mut i = 0;
        while i < self.queued.events.len() {
            let ev = self.queued.events[i];
            if ev.time >= local_offset && ev.time < end {
                self.active.push(ev);
                self.queued.events.remove(i);
            } else {
                i += 1;
            }
        }
    }
}
