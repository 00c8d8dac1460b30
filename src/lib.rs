//! Bidirectional MIDI <-> serial bridge for a six-string guitar-to-MIDI
//! controller: a byte-stream MIDI parser, a per-string musical transform,
//! and the bridge controller that wires both to a serial link and a MIDI
//! input/output pair.

pub mod bridge;
pub mod midi;
pub mod transform;

pub use bridge::{Bridge, NullObserver, Observer};
pub use midi::MidiMessage;
pub use transform::{Configuration, DiatonicMode, Scale, Transform};
