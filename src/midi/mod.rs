pub mod events;

pub use events::{MidiEvent, MidiEventVec, MidiEvents};
