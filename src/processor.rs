use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use midly::MidiMessage;
use midly::live::LiveEvent;

use crate::math;
use crate::midi::MidiEventVec;
use crate::port::identifier::{
    PortFlag, PortFlags, PortFlow, PortIdentifier, PortKind, PortOwner, PortUuid,
};
use crate::port::{ControlPort, Port, PortConnectionsManager, PortRange, StereoPorts};
use crate::position::Position;
use crate::track::{Track, TrackKind};
use crate::transport::Transport;
use crate::{ChordSource, ClipSource, Recorder, TimeInfo};

/// One slot per possible CC address.
pub const MIDI_CC_QUEUE_CAPACITY: usize = 16 * 128;

const CHORD_VELOCITY: u8 = 90;

/// Which MIDI-bound control port changed. Channels are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiCcKey {
    Cc { channel: u8, cc: u8 },
    PitchBend { channel: u8 },
    PolyKeyPressure { channel: u8 },
    ChannelPressure { channel: u8 },
}

/// Full 16-channel table of MIDI-bound control ports.
#[derive(Debug)]
struct MidiCcPorts {
    cc: Vec<ControlPort>,
    pitch_bend: Vec<ControlPort>,
    poly_key_pressure: Vec<ControlPort>,
    channel_pressure: Vec<ControlPort>,
}

impl MidiCcPorts {
    fn cc_index(channel: u8, cc: u8) -> usize {
        (channel as usize - 1) * 128 + cc as usize
    }
}

/// Everything `process` needs from outside the unit for one block.
pub struct ProcessContext<'a> {
    pub transport: &'a Transport,
    pub clips: Option<&'a mut dyn ClipSource>,
    /// Live events from the currently open editor.
    pub editor_events: Option<&'a MidiEventVec>,
    pub chords: Option<&'a dyn ChordSource>,
    pub recorder: Option<&'a mut dyn Recorder>,
}

/// Per-track processing unit. Aggregates the track's ports, fills them
/// from clip content, mixes input into output and hands recording
/// sub-ranges to the external recorder.
#[derive(Debug)]
pub struct TrackProcessor {
    kind: TrackKind,
    pub stereo_in: Option<StereoPorts>,
    pub stereo_out: Option<StereoPorts>,
    pub mono: Option<ControlPort>,
    pub input_gain: Option<ControlPort>,
    pub output_gain: Option<ControlPort>,
    pub monitor_audio: Option<ControlPort>,
    pub midi_in: Option<Port>,
    pub midi_out: Option<Port>,
    pub piano_roll: Option<Port>,
    midi_cc: Option<Box<MidiCcPorts>>,
    updated_midi_automatable: Arc<ArrayQueue<MidiCcKey>>,
}

impl TrackProcessor {
    pub fn new(track: &Track, block_size: usize) -> Self {
        let owner = PortOwner::TrackProcessor(track.id);
        let queue = Arc::new(ArrayQueue::new(MIDI_CC_QUEUE_CAPACITY));
        let mut this = Self {
            kind: track.kind,
            stereo_in: None,
            stereo_out: None,
            mono: None,
            input_gain: None,
            output_gain: None,
            monitor_audio: None,
            midi_in: None,
            midi_out: None,
            piano_roll: None,
            midi_cc: None,
            updated_midi_automatable: queue,
        };
        match track.kind {
            TrackKind::Audio => {
                this.stereo_in = Some(StereoPorts::new(
                    PortFlow::Input,
                    owner,
                    "TP audio in",
                    "tp_audio_in",
                    PortFlags::empty().with(PortFlag::SendReceivable),
                    block_size,
                ));
                this.stereo_out = Some(StereoPorts::new(
                    PortFlow::Output,
                    owner,
                    "TP audio out",
                    "tp_audio_out",
                    PortFlags::empty(),
                    block_size,
                ));
                this.mono = Some(ControlPort::new(
                    PortIdentifier::new(
                        PortKind::Control,
                        PortFlow::Input,
                        owner,
                        "TP Mono Toggle",
                        "tp_mono_toggle",
                    )
                    .with_flags(
                        PortFlags::empty()
                            .with(PortFlag::Toggle)
                            .with(PortFlag::Mono),
                    ),
                    PortRange::new(0.0, 1.0, 0.0),
                    0.0,
                ));
                this.input_gain = Some(ControlPort::new(
                    PortIdentifier::new(
                        PortKind::Control,
                        PortFlow::Input,
                        owner,
                        "TP Input Gain",
                        "tp_input_gain",
                    )
                    .with_flags(
                        PortFlags::empty()
                            .with(PortFlag::Amplitude)
                            .with(PortFlag::InputGain),
                    ),
                    PortRange::new(0.0, 4.0, 1.0),
                    1.0,
                ));
                this.output_gain = Some(ControlPort::new(
                    PortIdentifier::new(
                        PortKind::Control,
                        PortFlow::Input,
                        owner,
                        "TP Output Gain",
                        "tp_output_gain",
                    )
                    .with_flags(
                        PortFlags::empty()
                            .with(PortFlag::Amplitude)
                            .with(PortFlag::OutputGain),
                    ),
                    PortRange::new(0.0, 4.0, 1.0),
                    1.0,
                ));
                this.monitor_audio = Some(ControlPort::new(
                    PortIdentifier::new(
                        PortKind::Control,
                        PortFlow::Input,
                        owner,
                        "Monitor audio",
                        "tp_monitor_audio",
                    )
                    .with_flags(
                        PortFlags::empty()
                            .with(PortFlag::Toggle)
                            .with(PortFlag::MonitorAudio),
                    ),
                    PortRange::new(0.0, 1.0, 0.0),
                    0.0,
                ));
            }
            TrackKind::Event { piano_roll, chord } => {
                this.midi_in = Some(Port::new(
                    PortIdentifier::new(
                        PortKind::Event,
                        PortFlow::Input,
                        owner,
                        "TP MIDI in",
                        "tp_midi_in",
                    )
                    .with_flags(PortFlags::empty().with(PortFlag::SendReceivable)),
                    0,
                ));
                this.midi_out = Some(Port::new(
                    PortIdentifier::new(
                        PortKind::Event,
                        PortFlow::Output,
                        owner,
                        "TP MIDI out",
                        "tp_midi_out",
                    ),
                    0,
                ));
                if piano_roll || chord {
                    this.piano_roll = Some(Port::new(
                        PortIdentifier::new(
                            PortKind::Event,
                            PortFlow::Input,
                            owner,
                            "TP Piano Roll",
                            "tp_piano_roll",
                        )
                        .with_flags(PortFlags::empty().with(PortFlag::PianoRoll)),
                        0,
                    ));
                }
                if piano_roll && !chord {
                    this.init_midi_cc_ports(owner);
                }
            }
            TrackKind::ControlOnly => {}
        }
        this
    }

    fn init_midi_cc_ports(&mut self, owner: PortOwner) {
        let flags = PortFlags::empty()
            .with(PortFlag::MidiAutomatable)
            .with(PortFlag::Automatable);
        let mut ports = MidiCcPorts {
            cc: Vec::with_capacity(16 * 128),
            pitch_bend: Vec::with_capacity(16),
            poly_key_pressure: Vec::with_capacity(16),
            channel_pressure: Vec::with_capacity(16),
        };
        for ch in 1u8..=16 {
            for cc in 0u8..128 {
                let mut id = PortIdentifier::new(
                    PortKind::Control,
                    PortFlow::Input,
                    owner,
                    format!("Ch{ch} Controller {cc}"),
                    format!("ch{ch}_controller_{cc}"),
                )
                .with_flags(flags);
                id.midi_channel = Some(ch);
                id.midi_cc_no = Some(cc);
                let mut port = ControlPort::new(id, PortRange::new(0.0, 1.0, 0.0), 0.0);
                self.install_cc_hook(&mut port, MidiCcKey::Cc { channel: ch, cc });
                ports.cc.push(port);
            }

            let mut id = PortIdentifier::new(
                PortKind::Control,
                PortFlow::Input,
                owner,
                format!("Ch{ch} Pitch bend"),
                format!("ch{ch}_pitch_bend"),
            )
            .with_flags(flags.with(PortFlag::Integer));
            id.midi_channel = Some(ch);
            let mut port = ControlPort::new(id, PortRange::new(-8192.0, 8191.0, 0.0), 0.0);
            self.install_cc_hook(&mut port, MidiCcKey::PitchBend { channel: ch });
            ports.pitch_bend.push(port);

            let mut id = PortIdentifier::new(
                PortKind::Control,
                PortFlow::Input,
                owner,
                format!("Ch{ch} Poly key pressure"),
                format!("ch{ch}_poly_key_pressure"),
            )
            .with_flags(flags);
            id.midi_channel = Some(ch);
            let mut port = ControlPort::new(id, PortRange::new(0.0, 1.0, 0.0), 0.0);
            self.install_cc_hook(&mut port, MidiCcKey::PolyKeyPressure { channel: ch });
            ports.poly_key_pressure.push(port);

            let mut id = PortIdentifier::new(
                PortKind::Control,
                PortFlow::Input,
                owner,
                format!("Ch{ch} Channel pressure"),
                format!("ch{ch}_channel_pressure"),
            )
            .with_flags(flags);
            id.midi_channel = Some(ch);
            let mut port = ControlPort::new(id, PortRange::new(0.0, 1.0, 0.0), 0.0);
            self.install_cc_hook(&mut port, MidiCcKey::ChannelPressure { channel: ch });
            ports.channel_pressure.push(port);
        }
        self.midi_cc = Some(Box::new(ports));
    }

    fn install_cc_hook(&self, port: &mut ControlPort, key: MidiCcKey) {
        let queue = Arc::clone(&self.updated_midi_automatable);
        port.set_change_hook(Arc::new(move |_id, _val| {
            // full queue means the event is dropped, never blocked on
            let _ = queue.push(key);
        }));
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn midi_cc_port(&self, channel: u8, cc: u8) -> Option<&ControlPort> {
        self.midi_cc
            .as_ref()
            .map(|p| &p.cc[MidiCcPorts::cc_index(channel, cc)])
    }

    pub fn midi_cc_port_mut(&mut self, channel: u8, cc: u8) -> Option<&mut ControlPort> {
        self.midi_cc
            .as_mut()
            .map(|p| &mut p.cc[MidiCcPorts::cc_index(channel, cc)])
    }

    pub fn pitch_bend_port_mut(&mut self, channel: u8) -> Option<&mut ControlPort> {
        self.midi_cc
            .as_mut()
            .map(|p| &mut p.pitch_bend[channel as usize - 1])
    }

    pub fn poly_key_pressure_port_mut(&mut self, channel: u8) -> Option<&mut ControlPort> {
        self.midi_cc
            .as_mut()
            .map(|p| &mut p.poly_key_pressure[channel as usize - 1])
    }

    pub fn channel_pressure_port_mut(&mut self, channel: u8) -> Option<&mut ControlPort> {
        self.midi_cc
            .as_mut()
            .map(|p| &mut p.channel_pressure[channel as usize - 1])
    }

    /// Notifies the realtime side that a MIDI-bound control moved. Safe
    /// from any thread; also wired as the change hook of every CC port.
    pub fn on_control_change_event(&self, key: MidiCcKey) {
        let _ = self.updated_midi_automatable.push(key);
    }

    /// Clears every signal buffer ahead of a block.
    pub fn prepare_process(&mut self) {
        if let Some(ports) = self.stereo_in.as_mut() {
            ports.clear_buffers();
        }
        if let Some(ports) = self.stereo_out.as_mut() {
            ports.clear_buffers();
        }
        if let Some(port) = self.midi_in.as_mut() {
            port.clear_buffer();
        }
        if let Some(port) = self.midi_out.as_mut() {
            port.clear_buffer();
        }
        if let Some(port) = self.piano_roll.as_mut() {
            port.clear_buffer();
        }
    }

    /// Runs the unit for one block window.
    pub fn process(&mut self, track: &Track, time_nfo: &TimeInfo, ctx: &mut ProcessContext<'_>) {
        if track.frozen || !track.enabled {
            return;
        }

        self.fill_from_clips(time_nfo, ctx);
        self.forward_editor_events(track, time_nfo, ctx);
        self.mix(track, time_nfo, ctx);

        if self.kind.is_event() {
            if let Some(out) = self.midi_out.as_mut() {
                out.midi_events.dequeue(time_nfo.local_offset, time_nfo.nframes);
                // flushed after forwarding so the notes-off are the
                // block's final output
                if ctx.transport.panic {
                    out.midi_events.queued.clear();
                    out.midi_events.active.panic();
                }
            }
        }

        if track.recording_armed && ctx.transport.preroll_frames_remaining == 0 {
            if let Some(recorder) = ctx.recorder.as_mut() {
                handle_recording(track, time_nfo, ctx.transport, *recorder);
            }
        }

        if self.kind.is_audio() {
            self.apply_output_gain(time_nfo);
        }
    }

    fn fill_from_clips(&mut self, time_nfo: &TimeInfo, ctx: &mut ProcessContext<'_>) {
        if self.kind.is_audio() {
            if let (Some(clips), Some(out)) = (ctx.clips.as_mut(), self.stereo_out.as_mut()) {
                clips.fill_audio(time_nfo, &mut out.l.buf, &mut out.r.buf);
            }
            return;
        }

        if let Some(pr) = self.piano_roll.as_mut() {
            if ctx.transport.panic {
                pr.midi_events.queued.panic();
            } else if ctx.transport.rolling {
                if let Some(clips) = ctx.clips.as_mut() {
                    clips.fill_midi(time_nfo, &mut pr.midi_events.queued);
                }
            }
            pr.midi_events.dequeue(time_nfo.local_offset, time_nfo.nframes);
        }

        if !self.kind.is_chord() {
            self.add_events_from_midi_cc_control_ports(time_nfo.local_offset);
        }

        if let (Some(pr), Some(out)) = (self.piano_roll.as_ref(), self.midi_out.as_mut()) {
            out.midi_events.active.append(
                &pr.midi_events.active,
                time_nfo.local_offset,
                time_nfo.nframes,
            );
        }
    }

    fn forward_editor_events(
        &mut self,
        track: &Track,
        time_nfo: &TimeInfo,
        ctx: &ProcessContext<'_>,
    ) {
        if !self.kind.is_event() || !track.currently_edited {
            return;
        }
        let (Some(editor), Some(midi_in)) = (ctx.editor_events, self.midi_in.as_mut()) else {
            return;
        };
        match track.midi_channels.as_ref() {
            Some(accepted) => midi_in.midi_events.active.append_w_filter(
                editor,
                Some(accepted),
                time_nfo.local_offset,
                time_nfo.nframes,
            ),
            None => midi_in.midi_events.active.append(
                editor,
                time_nfo.local_offset,
                time_nfo.nframes,
            ),
        }
    }

    fn mix(&mut self, track: &Track, time_nfo: &TimeInfo, ctx: &mut ProcessContext<'_>) {
        let start = time_nfo.local_offset as usize;
        let end = start + time_nfo.nframes as usize;
        match self.kind {
            TrackKind::Audio => {
                let monitor = self
                    .monitor_audio
                    .as_ref()
                    .is_none_or(|port| port.is_toggled());
                if !monitor {
                    return;
                }
                let gain = self.input_gain.as_ref().map_or(1.0, |port| port.control());
                let mono = self.mono.as_ref().is_some_and(|port| port.is_toggled());
                let (Some(input), Some(output)) =
                    (self.stereo_in.as_ref(), self.stereo_out.as_mut())
                else {
                    return;
                };
                for i in start..end {
                    output.l.buf[i] += input.l.buf[i] * gain;
                }
                if mono {
                    for i in start..end {
                        output.r.buf[i] += input.l.buf[i] * gain;
                    }
                } else {
                    for i in start..end {
                        output.r.buf[i] += input.r.buf[i] * gain;
                    }
                }
            }
            TrackKind::Event { piano_roll, chord } => {
                if piano_roll && !chord && !track.passthrough_midi_input {
                    if let Some(midi_in) = self.midi_in.as_mut() {
                        midi_in.midi_events.active.set_channel(track.midi_ch);
                    }
                }
                if ctx.transport.recording {
                    self.apply_cc_events_to_control_ports();
                }
                if chord {
                    if let Some(chords) = ctx.chords {
                        if let (Some(midi_in), Some(out)) =
                            (self.midi_in.as_ref(), self.midi_out.as_mut())
                        {
                            out.midi_events.active.transform_chord_and_append(
                                &midi_in.midi_events.active,
                                chords,
                                CHORD_VELOCITY,
                                time_nfo.local_offset,
                                time_nfo.nframes,
                            );
                        }
                    }
                } else if let (Some(midi_in), Some(out)) =
                    (self.midi_in.as_ref(), self.midi_out.as_mut())
                {
                    out.midi_events.active.append(
                        &midi_in.midi_events.active,
                        time_nfo.local_offset,
                        time_nfo.nframes,
                    );
                }
            }
            TrackKind::ControlOnly => {}
        }
    }

    fn apply_output_gain(&mut self, time_nfo: &TimeInfo) {
        let Some(gain) = self.output_gain.as_ref().map(|port| port.control()) else {
            return;
        };
        if math::floats_equal(gain, 1.0) {
            return;
        }
        let start = time_nfo.local_offset as usize;
        let end = start + time_nfo.nframes as usize;
        if let Some(output) = self.stereo_out.as_mut() {
            for i in start..end {
                output.l.buf[i] *= gain;
                output.r.buf[i] *= gain;
            }
        }
    }

    /// Drains the cross-thread queue and emits one MIDI event per drained
    /// key into the MIDI-out queued events, then surfaces the window's
    /// share into the active events.
    pub fn add_events_from_midi_cc_control_ports(&mut self, local_offset: u32) {
        let Some(cc_ports) = self.midi_cc.as_ref() else {
            return;
        };
        let Some(out) = self.midi_out.as_mut() else {
            return;
        };
        while let Some(key) = self.updated_midi_automatable.pop() {
            match key {
                MidiCcKey::Cc { channel, cc } => {
                    let port = &cc_ports.cc[MidiCcPorts::cc_index(channel, cc)];
                    let value = math::round_to_i32(port.control() * 127.0).clamp(0, 127) as u8;
                    out.midi_events
                        .queued
                        .add_control_change(channel, cc, value, local_offset);
                }
                MidiCcKey::PitchBend { channel } => {
                    let port = &cc_ports.pitch_bend[channel as usize - 1];
                    let value = (math::round_to_i32(port.control()) + 0x2000) as u16;
                    out.midi_events
                        .queued
                        .add_pitchbend(channel, value, local_offset);
                }
                MidiCcKey::PolyKeyPressure { .. } => {
                    // No outgoing translation defined for poly key
                    // pressure; events are accepted and dropped here.
                }
                MidiCcKey::ChannelPressure { channel } => {
                    let port = &cc_ports.channel_pressure[channel as usize - 1];
                    let value = math::round_to_i32(port.control() * 127.0).clamp(0, 127) as u8;
                    out.midi_events
                        .queued
                        .add_channel_pressure(channel, value, local_offset);
                }
            }
        }
    }

    /// While recording, incoming CC-type events land in their bound
    /// control ports so the values can be captured as automation.
    fn apply_cc_events_to_control_ports(&mut self) {
        let Some(cc_ports) = self.midi_cc.as_mut() else {
            return;
        };
        let Some(midi_in) = self.midi_in.as_ref() else {
            return;
        };
        for ev in midi_in.midi_events.active.iter() {
            let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(ev.raw()) else {
                continue;
            };
            let ch = channel.as_int() as usize;
            match message {
                MidiMessage::Controller { controller, value } => {
                    let idx = ch * 128 + controller.as_int() as usize;
                    cc_ports.cc[idx].set_control_value(
                        value.as_int() as f32 / 127.0,
                        true,
                        false,
                    );
                }
                MidiMessage::PitchBend { bend } => {
                    let raw = bend.0.as_int() as i32 - 0x2000;
                    cc_ports.pitch_bend[ch].set_control_value(raw as f32, false, false);
                }
                MidiMessage::ChannelAftertouch { vel } => {
                    cc_ports.channel_pressure[ch].set_control_value(
                        vel.as_int() as f32 / 127.0,
                        true,
                        false,
                    );
                }
                MidiMessage::Aftertouch { vel, .. } => {
                    cc_ports.poly_key_pressure[ch].set_control_value(
                        vel.as_int() as f32 / 127.0,
                        true,
                        false,
                    );
                }
                _ => {}
            }
        }
    }

    /// Removes every edge touching a port of this unit.
    pub fn disconnect_all_ports(&self, mgr: &mut PortConnectionsManager) {
        for uuid in self.port_uuids() {
            mgr.disconnect_all_for(uuid);
        }
    }

    /// Ids of every port the unit owns.
    pub fn port_uuids(&self) -> Vec<PortUuid> {
        let mut out = Vec::new();
        if let Some(ports) = self.stereo_in.as_ref() {
            out.push(ports.l.uuid());
            out.push(ports.r.uuid());
        }
        if let Some(ports) = self.stereo_out.as_ref() {
            out.push(ports.l.uuid());
            out.push(ports.r.uuid());
        }
        for port in [
            self.mono.as_ref(),
            self.input_gain.as_ref(),
            self.output_gain.as_ref(),
            self.monitor_audio.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            out.push(port.uuid());
        }
        for port in [
            self.midi_in.as_ref(),
            self.midi_out.as_ref(),
            self.piano_roll.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            out.push(port.uuid());
        }
        if let Some(cc_ports) = self.midi_cc.as_ref() {
            for port in cc_ports
                .cc
                .iter()
                .chain(cc_ports.pitch_bend.iter())
                .chain(cc_ports.poly_key_pressure.iter())
                .chain(cc_ports.channel_pressure.iter())
            {
                out.push(port.uuid());
            }
        }
        out
    }
}

fn pos_frames(pos: &Position) -> u64 {
    pos.frames().max(0) as u64
}

/// Splits the block at loop and punch boundaries and hands each monotone
/// sub-range to the recorder. Sub-range lengths always sum to `nframes`.
pub fn handle_recording(
    track: &Track,
    time_nfo: &TimeInfo,
    transport: &Transport,
    recorder: &mut dyn Recorder,
) {
    let mut split_points = [0u64; 6];
    let mut each_nframes = [0u32; 6];
    let mut num_split_points = 1;

    let start_frames = time_nfo.g_start_frame_w_offset;
    let end_frames = time_nfo.g_start_frame + time_nfo.nframes as u64;
    let loop_end = pos_frames(&transport.loop_end);
    let loop_start = pos_frames(&transport.loop_start);
    let punch_in = pos_frames(&transport.punch_in);
    let punch_out = pos_frames(&transport.punch_out);

    split_points[0] = start_frames;
    each_nframes[0] = time_nfo.nframes;

    // A loop wrap splits into pre-loop frames, a zero-length pause at
    // loop end, and the wrapped remainder at loop start.
    let loop_hit = transport.loop_enabled && loop_end == end_frames;
    if loop_hit {
        num_split_points = 3;
        each_nframes[0] = (loop_end - start_frames) as u32;
        split_points[1] = loop_end;
        each_nframes[1] = 0;
        split_points[2] = loop_start;
        each_nframes[2] = time_nfo.nframes - each_nframes[0];
    }

    if transport.punch_enabled {
        let mut punch_in_hit = false;
        if loop_hit {
            if punch_in > start_frames && punch_in < loop_end {
                punch_in_hit = true;
                num_split_points = 4;
                split_points[3] = split_points[2];
                each_nframes[3] = each_nframes[2];
                split_points[2] = split_points[1];
                each_nframes[2] = each_nframes[1];
                split_points[1] = punch_in;
                each_nframes[1] = (loop_end - punch_in) as u32;
                each_nframes[0] -= each_nframes[1];
            }
            if punch_out > start_frames && punch_out < loop_end && punch_out > punch_in {
                if punch_in_hit {
                    num_split_points = 6;
                    split_points[5] = split_points[3];
                    each_nframes[5] = each_nframes[3];
                    split_points[4] = split_points[2];
                    each_nframes[4] = each_nframes[2];
                    split_points[2] = punch_out;
                    each_nframes[2] = (loop_end - punch_out) as u32;
                    split_points[3] = split_points[2] + each_nframes[2] as u64;
                    each_nframes[3] = 0;
                    each_nframes[1] -= each_nframes[2];
                } else {
                    num_split_points = 5;
                    split_points[4] = split_points[2];
                    each_nframes[4] = each_nframes[2];
                    split_points[3] = split_points[1];
                    each_nframes[3] = each_nframes[1];
                    split_points[1] = punch_out;
                    each_nframes[1] = (loop_end - punch_out) as u32;
                    split_points[2] = split_points[1] + each_nframes[1] as u64;
                    each_nframes[2] = 0;
                    each_nframes[0] -= each_nframes[1];
                }
            }
        } else {
            if punch_in > start_frames && punch_in < end_frames {
                punch_in_hit = true;
                num_split_points = 2;
                split_points[1] = punch_in;
                each_nframes[1] = (end_frames - punch_in) as u32;
                each_nframes[0] -= each_nframes[1];
            }
            if punch_out > start_frames && punch_out < end_frames && punch_out > punch_in {
                if punch_in_hit {
                    num_split_points = 4;
                    split_points[2] = punch_out;
                    each_nframes[2] = (end_frames - punch_out) as u32;
                    split_points[3] = split_points[2] + each_nframes[2] as u64;
                    each_nframes[3] = 0;
                    each_nframes[1] -= each_nframes[2];
                } else {
                    num_split_points = 3;
                    split_points[1] = punch_out;
                    each_nframes[1] = (end_frames - punch_out) as u32;
                    split_points[2] = split_points[1] + each_nframes[1] as u64;
                    each_nframes[2] = 0;
                    each_nframes[0] -= each_nframes[1];
                }
            }
        }
    }

    let mut prev_split = u64::MAX;
    for i in 0..num_split_points {
        if i != 0 && split_points[i] == prev_split {
            continue;
        }
        prev_split = split_points[i];
        let sub = TimeInfo {
            g_start_frame: split_points[i],
            g_start_frame_w_offset: split_points[i],
            local_offset: 0,
            nframes: each_nframes[i],
        };
        recorder.handle_recording(track.id, &sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChordDescriptor;
    use crate::port::identifier::TrackId;
    use proptest::prelude::*;

    const FRAMES_PER_TICK: f64 = 22.675736961451246;

    fn audio_track() -> Track {
        Track::new(TrackId(1), "Audio", TrackKind::Audio)
    }

    fn piano_roll_track() -> Track {
        Track::new(
            TrackId(2),
            "MIDI",
            TrackKind::Event {
                piano_roll: true,
                chord: false,
            },
        )
    }

    fn chord_track() -> Track {
        Track::new(
            TrackId(3),
            "Chords",
            TrackKind::Event {
                piano_roll: false,
                chord: true,
            },
        )
    }

    fn ctx(transport: &Transport) -> ProcessContext<'_> {
        ProcessContext {
            transport,
            clips: None,
            editor_events: None,
            chords: None,
            recorder: None,
        }
    }

    fn set_toggle(port: &mut ControlPort, on: bool) {
        port.set_control_value(if on { 1.0 } else { 0.0 }, false, false);
    }

    #[test]
    fn audio_input_mixes_only_when_monitored() {
        let track = audio_track();
        let mut tp = TrackProcessor::new(&track, 4);
        let transport = Transport::new();

        tp.stereo_in.as_mut().unwrap().l.buf.fill(1.0);
        tp.stereo_in.as_mut().unwrap().r.buf.fill(0.5);
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        assert_eq!(tp.stereo_out.as_ref().unwrap().l.buf, vec![0.0; 4]);

        tp.prepare_process();
        tp.stereo_in.as_mut().unwrap().l.buf.fill(1.0);
        tp.stereo_in.as_mut().unwrap().r.buf.fill(0.5);
        set_toggle(tp.monitor_audio.as_mut().unwrap(), true);
        tp.input_gain
            .as_mut()
            .unwrap()
            .set_control_value(2.0, false, false);
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        assert_eq!(tp.stereo_out.as_ref().unwrap().l.buf, vec![2.0; 4]);
        assert_eq!(tp.stereo_out.as_ref().unwrap().r.buf, vec![1.0; 4]);
    }

    #[test]
    fn mono_copies_left_into_right() {
        let track = audio_track();
        let mut tp = TrackProcessor::new(&track, 4);
        let transport = Transport::new();
        set_toggle(tp.monitor_audio.as_mut().unwrap(), true);
        set_toggle(tp.mono.as_mut().unwrap(), true);
        tp.stereo_in.as_mut().unwrap().l.buf.fill(0.8);
        tp.stereo_in.as_mut().unwrap().r.buf.fill(-0.3);
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        let out = tp.stereo_out.as_ref().unwrap();
        assert_eq!(out.l.buf, vec![0.8; 4]);
        assert_eq!(out.r.buf, vec![0.8; 4]);
    }

    #[test]
    fn output_gain_scales_everything() {
        let track = audio_track();
        let mut tp = TrackProcessor::new(&track, 4);
        let transport = Transport::new();
        set_toggle(tp.monitor_audio.as_mut().unwrap(), true);
        tp.output_gain
            .as_mut()
            .unwrap()
            .set_control_value(0.5, false, false);
        tp.stereo_in.as_mut().unwrap().l.buf.fill(1.0);
        tp.stereo_in.as_mut().unwrap().r.buf.fill(1.0);
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        assert_eq!(tp.stereo_out.as_ref().unwrap().l.buf, vec![0.5; 4]);
    }

    #[test]
    fn frozen_or_disabled_tracks_are_skipped() {
        let mut track = audio_track();
        let mut tp = TrackProcessor::new(&track, 4);
        let transport = Transport::new();
        set_toggle(tp.monitor_audio.as_mut().unwrap(), true);
        tp.stereo_in.as_mut().unwrap().l.buf.fill(1.0);

        track.frozen = true;
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        assert_eq!(tp.stereo_out.as_ref().unwrap().l.buf, vec![0.0; 4]);

        track.frozen = false;
        track.enabled = false;
        tp.process(&track, &TimeInfo::new(0, 4), &mut ctx(&transport));
        assert_eq!(tp.stereo_out.as_ref().unwrap().l.buf, vec![0.0; 4]);
    }

    struct StaticClips {
        audio: f32,
        notes: Vec<(u8, u32)>,
    }

    impl ClipSource for StaticClips {
        fn fill_audio(&mut self, time_nfo: &TimeInfo, left: &mut [f32], right: &mut [f32]) {
            let start = time_nfo.local_offset as usize;
            let end = start + time_nfo.nframes as usize;
            for i in start..end {
                left[i] = self.audio;
                right[i] = self.audio;
            }
        }

        fn fill_midi(&mut self, _time_nfo: &TimeInfo, out: &mut MidiEventVec) {
            for (note, time) in &self.notes {
                out.add_note_on(1, *note, 100, *time);
            }
        }
    }

    #[test]
    fn piano_roll_content_reaches_midi_out() {
        let track = piano_roll_track();
        let mut tp = TrackProcessor::new(&track, 0);
        let mut transport = Transport::new();
        transport.rolling = true;
        let mut clips = StaticClips {
            audio: 0.0,
            notes: vec![(60, 10), (64, 400)],
        };
        let mut context = ctx(&transport);
        context.clips = Some(&mut clips);
        tp.process(&track, &TimeInfo::new(0, 256), &mut context);

        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.len(), 1);
        assert_eq!(out.midi_events.active.as_slice()[0].note_number(), Some(60));
        // the out-of-window note stays queued on the piano roll port
        assert_eq!(
            tp.piano_roll.as_ref().unwrap().midi_events.queued.len(),
            1
        );
    }

    #[test]
    fn panic_flushes_piano_roll_with_notes_off() {
        let track = piano_roll_track();
        let mut tp = TrackProcessor::new(&track, 0);
        let mut transport = Transport::new();
        transport.panic = true;
        tp.piano_roll
            .as_mut()
            .unwrap()
            .midi_events
            .queued
            .add_note_on(1, 60, 100, 0);
        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));
        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.len(), 16);
        assert!(out.midi_events.active.iter().all(|e| e.raw()[1] == 0x7B));
    }

    #[test]
    fn panic_overrides_forwarded_input() {
        let track = piano_roll_track();
        let mut tp = TrackProcessor::new(&track, 0);
        let mut transport = Transport::new();
        transport.panic = true;
        // a live note arriving in the same block must not survive the flush
        tp.midi_in
            .as_mut()
            .unwrap()
            .midi_events
            .active
            .add_note_on(1, 60, 100, 0);
        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));
        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.len(), 16);
        assert!(out.midi_events.active.iter().all(|e| e.raw()[1] == 0x7B));
        assert!(out.midi_events.queued.is_empty());
    }

    #[test]
    fn input_channel_is_rewritten() {
        let mut track = piano_roll_track();
        track.midi_ch = 5;
        let mut tp = TrackProcessor::new(&track, 0);
        let transport = Transport::new();
        tp.midi_in
            .as_mut()
            .unwrap()
            .midi_events
            .active
            .add_note_on(2, 60, 100, 0);
        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));
        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.as_slice()[0].channel(), Some(4));
    }

    #[test]
    fn passthrough_keeps_input_channel() {
        let mut track = piano_roll_track();
        track.midi_ch = 5;
        track.passthrough_midi_input = true;
        let mut tp = TrackProcessor::new(&track, 0);
        let transport = Transport::new();
        tp.midi_in
            .as_mut()
            .unwrap()
            .midi_events
            .active
            .add_note_on(2, 60, 100, 0);
        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));
        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.as_slice()[0].channel(), Some(1));
    }

    #[test]
    fn editor_events_respect_channel_filter() {
        let mut track = piano_roll_track();
        track.currently_edited = true;
        let mut channels = [false; 16];
        channels[0] = true;
        track.midi_channels = Some(channels);

        let mut tp = TrackProcessor::new(&track, 0);
        let transport = Transport::new();
        let mut editor = MidiEventVec::new();
        editor.add_note_on(1, 60, 100, 0);
        editor.add_note_on(3, 62, 100, 0);
        let mut context = ctx(&transport);
        context.editor_events = Some(&editor);
        tp.process(&track, &TimeInfo::new(0, 256), &mut context);

        let out = tp.midi_out.as_ref().unwrap();
        assert_eq!(out.midi_events.active.len(), 1);
        assert_eq!(out.midi_events.active.as_slice()[0].note_number(), Some(60));
    }

    struct MajorChords(ChordDescriptor);

    impl ChordSource for MajorChords {
        fn chord_for_note(&self, note: u8) -> Option<&ChordDescriptor> {
            (note == 60).then_some(&self.0)
        }
    }

    #[test]
    fn chord_track_expands_trigger_notes() {
        let track = chord_track();
        let mut tp = TrackProcessor::new(&track, 0);
        assert!(tp.midi_cc.is_none());
        let transport = Transport::new();
        let chords = MajorChords(ChordDescriptor {
            notes: vec![48, 52, 55],
        });
        tp.midi_in
            .as_mut()
            .unwrap()
            .midi_events
            .active
            .add_note_on(1, 60, 100, 0);
        let mut context = ctx(&transport);
        context.chords = Some(&chords);
        tp.process(&track, &TimeInfo::new(0, 256), &mut context);
        let out = tp.midi_out.as_ref().unwrap();
        let notes: Vec<_> = out
            .midi_events
            .active
            .iter()
            .filter_map(|e| e.note_number())
            .collect();
        assert_eq!(notes, vec![48, 52, 55]);
    }

    #[test]
    fn cc_queue_drains_into_wire_events() {
        let track = piano_roll_track();
        let mut tp = TrackProcessor::new(&track, 0);
        let transport = Transport::new();

        tp.midi_cc_port_mut(3, 7)
            .unwrap()
            .set_control_value(1.0, false, true);
        tp.pitch_bend_port_mut(1)
            .unwrap()
            .set_control_value(100.0, false, true);
        tp.channel_pressure_port_mut(2)
            .unwrap()
            .set_control_value(0.5, false, true);
        // accepted but never translated
        tp.poly_key_pressure_port_mut(1)
            .unwrap()
            .set_control_value(0.5, false, true);

        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));

        let out = tp.midi_out.as_ref().unwrap();
        let raw: Vec<&[u8]> = out.midi_events.active.iter().map(|e| e.raw()).collect();
        assert_eq!(raw.len(), 3);
        assert!(raw.contains(&&[0xB2u8, 7, 127][..])); // ch3 CC7 full
        assert!(raw.contains(&&[0xE0u8, 0x64, 0x40][..])); // 100 + 0x2000
        assert!(raw.contains(&&[0xD1u8, 64][..])); // ch2 pressure 0.5

        // queue drained, next block emits nothing
        tp.prepare_process();
        tp.process(&track, &TimeInfo::new(256, 256), &mut ctx(&transport));
        assert!(tp.midi_out.as_ref().unwrap().midi_events.active.is_empty());
    }

    #[test]
    fn recording_applies_cc_events_to_ports() {
        let mut track = piano_roll_track();
        track.passthrough_midi_input = true; // keep event channels intact
        let mut tp = TrackProcessor::new(&track, 0);
        let mut transport = Transport::new();
        transport.recording = true;

        let events = tp.midi_in.as_mut().unwrap();
        events.midi_events.active.add_control_change(3, 7, 127, 0);
        events.midi_events.active.add_pitchbend(1, 0x2064, 0);
        events.midi_events.active.add_channel_pressure(2, 64, 0);

        tp.process(&track, &TimeInfo::new(0, 256), &mut ctx(&transport));

        assert!(math::floats_near(
            tp.midi_cc_port(3, 7).unwrap().control(),
            1.0,
            1e-6
        ));
        let bend = tp.pitch_bend_port_mut(1).unwrap().control();
        assert_eq!(bend, 100.0);
        let pressure = tp.channel_pressure_port_mut(2).unwrap().control();
        assert!(math::floats_near(pressure, 64.0 / 127.0, 1e-6));
    }

    #[derive(Default)]
    struct SpyRecorder {
        calls: Vec<(u64, u32)>,
    }

    impl Recorder for SpyRecorder {
        fn handle_recording(&mut self, _track: TrackId, time_nfo: &TimeInfo) {
            self.calls.push((time_nfo.g_start_frame, time_nfo.nframes));
        }
    }

    fn pos(frames: u64) -> Position {
        Position::from_frames(frames as i64, FRAMES_PER_TICK)
    }

    #[test]
    fn recording_without_boundaries_is_one_call() {
        let track = audio_track();
        let transport = Transport::new();
        let mut recorder = SpyRecorder::default();
        handle_recording(&track, &TimeInfo::new(1000, 256), &transport, &mut recorder);
        assert_eq!(recorder.calls, vec![(1000, 256)]);
    }

    #[test]
    fn loop_end_splits_into_three() {
        let track = audio_track();
        let mut transport = Transport::new();
        transport.loop_enabled = true;
        transport.loop_start = pos(500);
        transport.loop_end = pos(1256);

        let time_nfo = TimeInfo {
            g_start_frame: 1000,
            g_start_frame_w_offset: 1100,
            local_offset: 100,
            nframes: 256,
        };
        let mut recorder = SpyRecorder::default();
        handle_recording(&track, &time_nfo, &transport, &mut recorder);
        // pre-loop frames, the pause marker at loop end, wrapped remainder
        assert_eq!(
            recorder.calls,
            vec![(1100, 156), (1256, 0), (500, 100)]
        );
    }

    #[test]
    fn punch_boundaries_split_plain_block() {
        let track = audio_track();
        let mut transport = Transport::new();
        transport.punch_enabled = true;
        transport.punch_in = pos(1100);
        transport.punch_out = pos(1200);

        let mut recorder = SpyRecorder::default();
        handle_recording(&track, &TimeInfo::new(1000, 256), &transport, &mut recorder);
        assert_eq!(
            recorder.calls,
            vec![(1000, 100), (1100, 100), (1200, 56), (1256, 0)]
        );
        let total: u32 = recorder.calls.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 256);
    }

    #[test]
    fn loop_and_punch_make_six_points() {
        let track = audio_track();
        let mut transport = Transport::new();
        transport.loop_enabled = true;
        transport.loop_start = pos(100);
        transport.loop_end = pos(1200);
        transport.punch_enabled = true;
        transport.punch_in = pos(1050);
        transport.punch_out = pos(1150);

        let time_nfo = TimeInfo {
            g_start_frame: 1000,
            g_start_frame_w_offset: 1000,
            local_offset: 0,
            nframes: 200,
        };
        let mut recorder = SpyRecorder::default();
        handle_recording(&track, &time_nfo, &transport, &mut recorder);
        let total: u32 = recorder.calls.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 200);
        // no sub-range straddles the punch or loop boundaries
        for &(start, n) in &recorder.calls {
            let end = start + n as u64;
            for boundary in [1050u64, 1150, 1200] {
                assert!(!(start < boundary && end > boundary), "{start}+{n}");
            }
        }
        assert_eq!(recorder.calls[0], (1000, 50));
    }

    proptest! {
        #[test]
        fn recording_split_conserves_frames(
            start in 0u64..10_000,
            nframes in 1u32..512,
            offset_ratio in 0u32..100,
            loop_enabled: bool,
            punch_enabled: bool,
            punch_a in 0u64..11_000,
            punch_len in 1u64..600,
            loop_start in 0u64..9_000,
        ) {
            // a start offset only occurs when a previous split wrapped the
            // block at the loop point
            let offset = if loop_enabled {
                (nframes - 1).min(offset_ratio * nframes / 100)
            } else {
                0
            };
            let end = start + nframes as u64;
            let track = audio_track();
            let mut transport = Transport::new();
            transport.loop_enabled = loop_enabled;
            transport.loop_start = pos(loop_start.min(start));
            transport.loop_end = pos(end); // always "hits" when enabled
            transport.punch_enabled = punch_enabled;
            transport.punch_in = pos(punch_a);
            transport.punch_out = pos(punch_a + punch_len);

            let time_nfo = TimeInfo {
                g_start_frame: start,
                g_start_frame_w_offset: start + offset as u64,
                local_offset: offset,
                nframes,
            };
            let mut recorder = SpyRecorder::default();
            handle_recording(&track, &time_nfo, &transport, &mut recorder);

            let total: u32 = recorder.calls.iter().map(|(_, n)| n).sum();
            prop_assert_eq!(total, nframes);

            // only boundaries that actually carve this block apply
            let w_offset = start + offset as u64;
            let mut boundaries = vec![end];
            if punch_enabled {
                for p in [punch_a, punch_a + punch_len] {
                    if p > w_offset && p < end {
                        boundaries.push(p);
                    }
                }
            }
            for &(s, n) in &recorder.calls {
                let e = s + n as u64;
                for &b in &boundaries {
                    prop_assert!(!(s < b && e > b), "sub-range {}..{} straddles {}", s, e, b);
                }
            }
        }
    }
}
