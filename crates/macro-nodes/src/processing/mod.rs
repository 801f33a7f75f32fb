//! Processing macros
//!
//! Macros that transform values between an input and an output.

mod value_mapper;

pub use value_mapper::{ValueMapper, ValueMapperConfig};
