//! MIDI channel-voice messages
//!
//! Channels are 1-16 as users see them; the wire encoding uses 0-15.

use macro_engine::MacroEngineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the MIDI layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MidiError {
    #[error("MIDI device '{0}' is not connected")]
    DeviceNotFound(String),

    #[error("Invalid MIDI channel {0} (expected 1-16)")]
    InvalidChannel(u8),

    #[error("{field} value {value} out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("Invalid MIDI message: {0}")]
    InvalidMessage(String),
}

impl From<MidiError> for MacroEngineError {
    fn from(e: MidiError) -> Self {
        MacroEngineError::forwarding(e.to_string())
    }
}

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const PITCH_BEND: u8 = 0xE0;

/// Largest 14-bit pitch bend value
pub const PITCH_BEND_MAX: u16 = 0x3FFF;

/// A channel-voice MIDI message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// A validated control change
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Result<Self, MidiError> {
        let message = Self::ControlChange {
            channel,
            controller,
            value,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::PitchBend { channel, .. } => channel,
        }
    }

    /// The same message on another channel
    pub fn with_channel(self, channel: u8) -> Self {
        match self {
            Self::NoteOn { note, velocity, .. } => Self::NoteOn {
                channel,
                note,
                velocity,
            },
            Self::NoteOff { note, velocity, .. } => Self::NoteOff {
                channel,
                note,
                velocity,
            },
            Self::ControlChange {
                controller, value, ..
            } => Self::ControlChange {
                channel,
                controller,
                value,
            },
            Self::ProgramChange { program, .. } => Self::ProgramChange { channel, program },
            Self::PitchBend { value, .. } => Self::PitchBend { channel, value },
        }
    }

    /// Check channel and data ranges
    pub fn validate(&self) -> Result<(), MidiError> {
        let channel = self.channel();
        if !(1..=16).contains(&channel) {
            return Err(MidiError::InvalidChannel(channel));
        }
        let data7 = |field: &'static str, value: u8| {
            if value > 127 {
                Err(MidiError::OutOfRange {
                    field,
                    value: value.into(),
                    max: 127,
                })
            } else {
                Ok(())
            }
        };
        match *self {
            Self::NoteOn { note, velocity, .. } | Self::NoteOff { note, velocity, .. } => {
                data7("note", note)?;
                data7("velocity", velocity)
            }
            Self::ControlChange {
                controller, value, ..
            } => {
                data7("controller", controller)?;
                data7("value", value)
            }
            Self::ProgramChange { program, .. } => data7("program", program),
            Self::PitchBend { value, .. } if value > PITCH_BEND_MAX => Err(MidiError::OutOfRange {
                field: "pitch bend",
                value: value.into(),
                max: PITCH_BEND_MAX.into(),
            }),
            Self::PitchBend { .. } => Ok(()),
        }
    }

    /// Encode to raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, MidiError> {
        self.validate()?;
        let ch = self.channel() - 1;
        let bytes = match *self {
            Self::NoteOn { note, velocity, .. } => vec![NOTE_ON | ch, note, velocity],
            Self::NoteOff { note, velocity, .. } => vec![NOTE_OFF | ch, note, velocity],
            Self::ControlChange {
                controller, value, ..
            } => vec![CONTROL_CHANGE | ch, controller, value],
            Self::ProgramChange { program, .. } => vec![PROGRAM_CHANGE | ch, program],
            Self::PitchBend { value, .. } => {
                vec![PITCH_BEND | ch, (value & 0x7F) as u8, (value >> 7) as u8]
            }
        };
        Ok(bytes)
    }

    /// Parse raw bytes. Running status and system messages are not
    /// supported.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MidiError> {
        let Some(&status) = bytes.first() else {
            return Err(MidiError::InvalidMessage("empty message".to_string()));
        };
        if status & 0x80 == 0 {
            return Err(MidiError::InvalidMessage(format!(
                "expected a status byte, got 0x{:02X}",
                status
            )));
        }

        let channel = (status & 0x0F) + 1;
        let kind = status & 0xF0;
        let expected = if kind == PROGRAM_CHANGE { 2 } else { 3 };
        if bytes.len() < expected {
            return Err(MidiError::InvalidMessage(format!(
                "status 0x{:02X} needs {} bytes, got {}",
                status,
                expected,
                bytes.len()
            )));
        }
        if let Some(&data) = bytes[1..expected].iter().find(|b| **b > 127) {
            return Err(MidiError::InvalidMessage(format!("data byte 0x{:02X} has the high bit set", data)));
        }

        let message = match kind {
            NOTE_ON if bytes[2] == 0 => Self::NoteOff {
                channel,
                note: bytes[1],
                velocity: 0,
            },
            NOTE_ON => Self::NoteOn {
                channel,
                note: bytes[1],
                velocity: bytes[2],
            },
            NOTE_OFF => Self::NoteOff {
                channel,
                note: bytes[1],
                velocity: bytes[2],
            },
            CONTROL_CHANGE => Self::ControlChange {
                channel,
                controller: bytes[1],
                value: bytes[2],
            },
            PROGRAM_CHANGE => Self::ProgramChange {
                channel,
                program: bytes[1],
            },
            PITCH_BEND => Self::PitchBend {
                channel,
                value: u16::from(bytes[1]) | (u16::from(bytes[2]) << 7),
            },
            _ => {
                return Err(MidiError::InvalidMessage(format!(
                    "unsupported status 0x{:02X}",
                    status
                )))
            }
        };
        Ok(message)
    }
}
