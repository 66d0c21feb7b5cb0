pub mod connections;
pub mod control;
pub mod identifier;

pub use connections::{PortConnection, PortConnectionsManager};
pub use control::{ControlPort, CvInput, PortRange};
pub use identifier::{PortFlag, PortFlags, PortFlow, PortIdentifier, PortKind, PortOwner, PortUuid};

use crate::midi::MidiEvents;

/// A signal endpoint. Audio and CV ports carry a per-block sample buffer,
/// event ports carry MIDI event vectors. Control ports wrap this in
/// [`ControlPort`] and leave both buffers empty.
#[derive(Debug, Clone)]
pub struct Port {
    uuid: PortUuid,
    pub id: PortIdentifier,
    pub buf: Vec<f32>,
    pub midi_events: MidiEvents,
    exposed_to_backend: bool,
}

impl Port {
    pub fn new(id: PortIdentifier, block_size: usize) -> Self {
        let (buf, midi_events) = match id.kind {
            PortKind::Audio | PortKind::Cv => (vec![0.0; block_size], MidiEvents::with_capacity(0)),
            PortKind::Control => (Vec::new(), MidiEvents::with_capacity(0)),
            PortKind::Event => (Vec::new(), MidiEvents::new()),
        };
        Self {
            uuid: PortUuid::next(),
            id,
            buf,
            midi_events,
            exposed_to_backend: false,
        }
    }

    pub fn uuid(&self) -> PortUuid {
        self.uuid
    }

    /// Zeroes audio and drops active events. Queued events survive, they
    /// belong to future blocks.
    pub fn clear_buffer(&mut self) {
        self.buf.fill(0.0);
        self.midi_events.active.clear();
    }

    pub fn is_exposed_to_backend(&self) -> bool {
        self.exposed_to_backend
    }

    pub fn set_exposed_to_backend(&mut self, exposed: bool) {
        self.exposed_to_backend = exposed;
    }

    /// Removes every edge touching this port. Used when its owner goes away.
    pub fn disconnect_all(&self, mgr: &mut PortConnectionsManager) -> usize {
        mgr.disconnect_all_for(self.uuid)
    }
}

/// L/R pair of audio ports sharing a port group.
#[derive(Debug, Clone)]
pub struct StereoPorts {
    pub l: Port,
    pub r: Port,
}

impl StereoPorts {
    pub fn new(
        flow: PortFlow,
        owner: PortOwner,
        label: &str,
        sym: &str,
        flags: PortFlags,
        block_size: usize,
    ) -> Self {
        let l = Port::new(
            PortIdentifier::new(
                PortKind::Audio,
                flow,
                owner,
                format!("{label} L"),
                format!("{sym}_l"),
            )
            .with_flags(flags.with(PortFlag::StereoL))
            .with_group(sym),
            block_size,
        );
        let r = Port::new(
            PortIdentifier::new(
                PortKind::Audio,
                flow,
                owner,
                format!("{label} R"),
                format!("{sym}_r"),
            )
            .with_flags(flags.with(PortFlag::StereoR))
            .with_group(sym),
            block_size,
        );
        Self { l, r }
    }

    pub fn clear_buffers(&mut self) {
        self.l.clear_buffer();
        self.r.clear_buffer();
    }

    pub fn disconnect_all(&self, mgr: &mut PortConnectionsManager) {
        self.l.disconnect_all(mgr);
        self.r.disconnect_all(mgr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::identifier::TrackId;

    #[test]
    fn stereo_pair_flags_and_group() {
        let ports = StereoPorts::new(
            PortFlow::Output,
            PortOwner::TrackProcessor(TrackId(1)),
            "Output",
            "output",
            PortFlags::empty(),
            64,
        );
        assert!(ports.l.id.flags.test(PortFlag::StereoL));
        assert!(ports.r.id.flags.test(PortFlag::StereoR));
        assert_eq!(ports.l.id.port_group.as_deref(), Some("output"));
        assert_eq!(ports.l.buf.len(), 64);
        assert_ne!(ports.l.uuid(), ports.r.uuid());
    }

    #[test]
    fn clear_keeps_queued_events() {
        let mut port = Port::new(
            PortIdentifier::new(
                PortKind::Event,
                PortFlow::Input,
                PortOwner::Engine,
                "MIDI in",
                "midi_in",
            ),
            0,
        );
        port.midi_events.active.add_note_on(1, 60, 100, 0);
        port.midi_events.queued.add_note_on(1, 61, 100, 0);
        port.clear_buffer();
        assert!(port.midi_events.active.is_empty());
        assert_eq!(port.midi_events.queued.len(), 1);
    }
}
