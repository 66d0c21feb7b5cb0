use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_PORT_UUID: AtomicU64 = AtomicU64::new(1);

/// Process-wide stable port id. Connections and lookups use these, never
/// addresses, so a graph survives relocation and cloning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PortUuid(u64);

impl PortUuid {
    pub fn next() -> Self {
        Self(NEXT_PORT_UUID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PortUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginUuid(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Per-sample audio buffer.
    Audio,
    /// Continuous modulation signal, audio rate, consumed by control ports.
    Cv,
    /// Single scalar with a range and a mapping curve.
    Control,
    /// Timed MIDI events.
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

/// Which processing unit a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortOwner {
    Track(TrackId),
    TrackProcessor(TrackId),
    Fader(TrackId),
    ChannelSend { track: TrackId, slot: u8 },
    Plugin(PluginUuid),
    Transport,
    Engine,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortFlag {
    StereoL,
    StereoR,
    Toggle,
    Integer,
    Automatable,
    Logarithmic,
    Amplitude,
    PluginControl,
    PluginEnabled,
    MidiAutomatable,
    ChannelFader,
    ChannelSendEnabled,
    ChannelSendAmount,
    SendReceivable,
    PianoRoll,
    Mono,
    InputGain,
    OutputGain,
    MonitorAudio,
}

impl PortFlag {
    pub const ALL: [PortFlag; 19] = [
        PortFlag::StereoL,
        PortFlag::StereoR,
        PortFlag::Toggle,
        PortFlag::Integer,
        PortFlag::Automatable,
        PortFlag::Logarithmic,
        PortFlag::Amplitude,
        PortFlag::PluginControl,
        PortFlag::PluginEnabled,
        PortFlag::MidiAutomatable,
        PortFlag::ChannelFader,
        PortFlag::ChannelSendEnabled,
        PortFlag::ChannelSendAmount,
        PortFlag::SendReceivable,
        PortFlag::PianoRoll,
        PortFlag::Mono,
        PortFlag::InputGain,
        PortFlag::OutputGain,
        PortFlag::MonitorAudio,
    ];
}

/// Set of [`PortFlag`]s. The representation stays private; callers only
/// set, clear and test named flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFlags(u32);

impl PortFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: PortFlag) -> Self {
        self.set(flag);
        self
    }

    pub fn set(&mut self, flag: PortFlag) {
        self.0 |= 1 << flag as u32;
    }

    pub fn clear(&mut self, flag: PortFlag) {
        self.0 &= !(1 << flag as u32);
    }

    pub fn test(&self, flag: PortFlag) -> bool {
        self.0 & (1 << flag as u32) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = PortFlag> + '_ {
        PortFlag::ALL.into_iter().filter(|f| self.test(*f))
    }
}

/// Immutable value data describing a port. Two ports never share an
/// identifier; equality on the full struct is only used in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortIdentifier {
    pub kind: PortKind,
    pub flow: PortFlow,
    pub owner: PortOwner,
    pub label: String,
    pub sym: String,
    pub flags: PortFlags,
    pub port_group: Option<String>,
    pub midi_channel: Option<u8>,
    pub midi_cc_no: Option<u8>,
}

impl PortIdentifier {
    pub fn new(
        kind: PortKind,
        flow: PortFlow,
        owner: PortOwner,
        label: impl Into<String>,
        sym: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            flow,
            owner,
            label: label.into(),
            sym: sym.into(),
            flags: PortFlags::empty(),
            port_group: None,
            midi_channel: None,
            midi_cc_no: None,
        }
    }

    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.port_group = Some(group.into());
        self
    }
}
