use tracing::warn;

use crate::error::Error;
use crate::math;
use crate::port::identifier::{
    PortFlag, PortFlags, PortFlow, PortIdentifier, PortKind, PortOwner, PortUuid, TrackId,
};
use crate::port::{ControlPort, Port, PortConnectionsManager, PortRange, StereoPorts};
use crate::{PluginCatalog, Router, TimeInfo};

/// Two sends within this of 1.0 copy verbatim instead of scaling.
const AMOUNT_UNITY_EPSILON: f32 = 1e-5;

/// Small bridge unit forwarding a copy of one track signal to exactly one
/// destination, optionally attenuated. Owns its own in/out ports; the
/// graph routes through them like any other unit.
#[derive(Debug)]
pub struct ChannelSend {
    track_id: TrackId,
    slot: u8,
    signal: PortKind,
    pub enabled: ControlPort,
    pub amount: ControlPort,
    pub stereo_in: Option<StereoPorts>,
    pub stereo_out: Option<StereoPorts>,
    pub midi_in: Option<Port>,
    pub midi_out: Option<Port>,
    // Cached so process_block never queries the connections manager.
    has_destination: bool,
}

impl ChannelSend {
    /// `signal` must be `Audio` or `Event`, matching the owning channel.
    pub fn new(track_id: TrackId, slot: u8, signal: PortKind, block_size: usize) -> Self {
        let owner = PortOwner::ChannelSend {
            track: track_id,
            slot,
        };
        let enabled = ControlPort::new(
            PortIdentifier::new(
                PortKind::Control,
                PortFlow::Input,
                owner,
                format!("Channel Send {} enabled", slot + 1),
                format!("channel_send_{}_enabled", slot + 1),
            )
            .with_flags(
                PortFlags::empty()
                    .with(PortFlag::Toggle)
                    .with(PortFlag::ChannelSendEnabled),
            ),
            PortRange::new(0.0, 1.0, 0.0),
            0.0,
        );
        let amount = ControlPort::new(
            PortIdentifier::new(
                PortKind::Control,
                PortFlow::Input,
                owner,
                format!("Channel Send {} amount", slot + 1),
                format!("channel_send_{}_amount", slot + 1),
            )
            .with_flags(
                PortFlags::empty()
                    .with(PortFlag::Amplitude)
                    .with(PortFlag::Automatable)
                    .with(PortFlag::ChannelSendAmount),
            ),
            PortRange::new(0.0, 2.0, 0.0),
            1.0,
        );

        let mut this = Self {
            track_id,
            slot,
            signal,
            enabled,
            amount,
            stereo_in: None,
            stereo_out: None,
            midi_in: None,
            midi_out: None,
            has_destination: false,
        };
        match signal {
            PortKind::Audio => {
                this.stereo_in = Some(StereoPorts::new(
                    PortFlow::Input,
                    owner,
                    &format!("Channel Send {} audio in", slot + 1),
                    &format!("channel_send_{}_audio_in", slot + 1),
                    PortFlags::empty(),
                    block_size,
                ));
                this.stereo_out = Some(StereoPorts::new(
                    PortFlow::Output,
                    owner,
                    &format!("Channel Send {} audio out", slot + 1),
                    &format!("channel_send_{}_audio_out", slot + 1),
                    PortFlags::empty(),
                    block_size,
                ));
            }
            PortKind::Event => {
                this.midi_in = Some(Port::new(
                    PortIdentifier::new(
                        PortKind::Event,
                        PortFlow::Input,
                        owner,
                        format!("Channel Send {} MIDI in", slot + 1),
                        format!("channel_send_{}_midi_in", slot + 1),
                    ),
                    0,
                ));
                this.midi_out = Some(Port::new(
                    PortIdentifier::new(
                        PortKind::Event,
                        PortFlow::Output,
                        owner,
                        format!("Channel Send {} MIDI out", slot + 1),
                        format!("channel_send_{}_midi_out", slot + 1),
                    ),
                    0,
                ));
            }
            _ => warn!(?signal, "channel send created with non-signal kind"),
        }
        this
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn is_audio(&self) -> bool {
        self.signal == PortKind::Audio
    }

    pub fn is_midi(&self) -> bool {
        self.signal == PortKind::Event
    }

    fn output_uuid(&self) -> Option<PortUuid> {
        match self.signal {
            PortKind::Audio => self.stereo_out.as_ref().map(|s| s.l.uuid()),
            PortKind::Event => self.midi_out.as_ref().map(|p| p.uuid()),
            _ => None,
        }
    }

    /// No destination connected.
    pub fn is_empty(&self, mgr: &PortConnectionsManager) -> bool {
        self.output_uuid()
            .map_or(true, |out| mgr.get_sources_or_dests(None, out, false) == 0)
    }

    /// A send is live when its toggle is on, it has exactly one
    /// destination, and that destination's plugin (if any) instantiated.
    pub fn is_enabled(
        &self,
        mgr: &PortConnectionsManager,
        plugins: Option<&dyn PluginCatalog>,
    ) -> bool {
        if !self.enabled.is_toggled() {
            return false;
        }
        let Some(out) = self.output_uuid() else {
            return false;
        };
        let Some(conn) = mgr.get_source_or_dest(out, false) else {
            return false;
        };
        if let Some(catalog) = plugins {
            if let Some(plugin) = catalog.owner_plugin(conn.dest) {
                if catalog.instantiation_failed(plugin) {
                    return false;
                }
            }
        }
        true
    }

    /// Single destination port, when exactly one exists.
    pub fn target_dest(&self, mgr: &PortConnectionsManager) -> Option<PortUuid> {
        let out = self.output_uuid()?;
        mgr.get_source_or_dest(out, false).map(|c| c.dest)
    }

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
    }

    /// Forwards the block. Amounts within 1e-5 of unity copy bit-exact.
    pub fn process_block(&mut self, time_nfo: &TimeInfo) {
        if !self.has_destination {
            return;
        }
        let start = time_nfo.local_offset as usize;
        let end = start + time_nfo.nframes as usize;
        match self.signal {
            PortKind::Audio => {
                let (Some(input), Some(output)) = (self.stereo_in.as_ref(), self.stereo_out.as_mut())
                else {
                    return;
                };
                let amount = self.amount.control();
                if math::floats_near(amount, 1.0, AMOUNT_UNITY_EPSILON) {
                    output.l.buf[start..end].copy_from_slice(&input.l.buf[start..end]);
                    output.r.buf[start..end].copy_from_slice(&input.r.buf[start..end]);
                } else {
                    for i in start..end {
                        output.l.buf[i] = input.l.buf[i] * amount;
                        output.r.buf[i] = input.r.buf[i] * amount;
                    }
                }
            }
            PortKind::Event => {
                let (Some(input), Some(output)) = (self.midi_in.as_ref(), self.midi_out.as_mut())
                else {
                    return;
                };
                output.midi_events.active.append(
                    &input.midi_events.active,
                    time_nfo.local_offset,
                    time_nfo.nframes,
                );
            }
            _ => {}
        }
    }

    /// Connects an audio send to a destination L/R pair. Any previous
    /// destination is disconnected first; the enabled toggle flips on.
    pub fn connect_stereo(
        &mut self,
        mgr: &mut PortConnectionsManager,
        left: &Port,
        right: &Port,
        router: Option<&mut dyn Router>,
    ) -> Result<(), Error> {
        if self.signal != PortKind::Audio || left.id.kind != PortKind::Audio {
            return Err(Error::KindMismatch {
                src: self.signal,
                dest: left.id.kind,
            });
        }
        if right.id.kind != PortKind::Audio {
            return Err(Error::KindMismatch {
                src: self.signal,
                dest: right.id.kind,
            });
        }
        self.disconnect_dests(mgr);
        let Some(out) = self.stereo_out.as_ref() else {
            return Err(Error::PortLookup(left.uuid()));
        };
        mgr.ensure_connect(out.l.uuid(), left.uuid(), 1.0, true, true);
        mgr.ensure_connect(out.r.uuid(), right.uuid(), 1.0, true, true);
        self.finish_connect(router);
        Ok(())
    }

    /// Connects a MIDI send to a destination event port.
    pub fn connect_midi(
        &mut self,
        mgr: &mut PortConnectionsManager,
        dest: &Port,
        router: Option<&mut dyn Router>,
    ) -> Result<(), Error> {
        if self.signal != PortKind::Event || dest.id.kind != PortKind::Event {
            return Err(Error::KindMismatch {
                src: self.signal,
                dest: dest.id.kind,
            });
        }
        self.disconnect_dests(mgr);
        let Some(out) = self.midi_out.as_ref() else {
            return Err(Error::PortLookup(dest.uuid()));
        };
        mgr.ensure_connect(out.uuid(), dest.uuid(), 1.0, true, true);
        self.finish_connect(router);
        Ok(())
    }

    fn finish_connect(&mut self, router: Option<&mut dyn Router>) {
        self.enabled.set_control_value(1.0, false, true);
        self.has_destination = true;
        if let Some(router) = router {
            router.recalc_graph();
        }
    }

    /// Drops the current destination, if any.
    pub fn disconnect(&mut self, mgr: &mut PortConnectionsManager, router: Option<&mut dyn Router>) {
        self.disconnect_dests(mgr);
        self.enabled.set_control_value(0.0, false, true);
        self.has_destination = false;
        if let Some(router) = router {
            router.recalc_graph();
        }
    }

    fn disconnect_dests(&self, mgr: &mut PortConnectionsManager) {
        let mut outs = [None, None];
        match self.signal {
            PortKind::Audio => {
                if let Some(ports) = self.stereo_out.as_ref() {
                    outs = [Some(ports.l.uuid()), Some(ports.r.uuid())];
                }
            }
            PortKind::Event => {
                outs[0] = self.midi_out.as_ref().map(|p| p.uuid());
            }
            _ => {}
        }
        let mut edges = Vec::new();
        for out in outs.into_iter().flatten() {
            mgr.get_sources_or_dests(Some(&mut edges), out, false);
        }
        for edge in edges {
            mgr.ensure_disconnect(edge.src, edge.dest);
        }
    }

    /// Re-primes the destination cache after loading a project.
    pub fn refresh_destination_cache(&mut self, mgr: &PortConnectionsManager) {
        self.has_destination = !self.is_empty(mgr);
    }

    pub fn amount_value(&self) -> f32 {
        self.amount.control()
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount.set_control_value(amount, false, true);
    }

    /// Amount expressed on the perceptual fader scale for UI widgets.
    pub fn amount_for_widgets(&self) -> f32 {
        math::fader_from_amp(self.amount.control())
    }

    pub fn set_amount_from_widget(&mut self, fader_val: f32) {
        self.set_amount(math::amp_from_fader(fader_val));
    }
}
