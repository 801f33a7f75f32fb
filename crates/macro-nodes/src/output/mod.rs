//! Output macros
//!
//! Macros that send workflow results to a MIDI device.

mod midi_control_output;
mod midi_output;

pub use midi_control_output::MidiControlOutput;
pub use midi_output::MidiOutput;
