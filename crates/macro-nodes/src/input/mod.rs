//! Input macros
//!
//! Macros that bring MIDI from a device into a workflow.

mod midi_control_input;
mod midi_input;

pub use midi_control_input::MidiControlInput;
pub use midi_input::MidiInput;
