//! Macro Nodes
//!
//! Built-in macros and workflow templates for the macro engine.
//!
//! # Categories
//!
//! - **Input**: macros that listen to a MIDI input device
//! - **Output**: macros that send to a MIDI output device
//! - **Processing**: macros that transform values in between
//!
//! Every macro submits its type definition through `inventory`, so
//! `MacroTypeRegistry::with_builtins()` lists them. Factories need a MIDI
//! backend and are attached with [`register_builtins`].

pub mod backend;
pub mod builtin;
pub mod config;
pub mod input;
pub mod midi;
pub mod output;
pub mod processing;
pub mod templates;

pub use backend::{LoopbackMidiBackend, MidiBackend, SentMessage};
pub use builtin::{register_builtins, BuiltinFactory, BuiltinMacro};
pub use config::{ControlConfig, PortConfig};
pub use input::*;
pub use midi::{MidiError, MidiMessage};
pub use output::*;
pub use processing::*;
pub use templates::{builtin_templates, MidiCcChainTemplate, MidiThruTemplate, MIDI_CC_CHAIN, MIDI_THRU};
