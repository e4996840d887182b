//! Error types for MIDI event decoding.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("MIDI data byte out of range: {0} (expected 0-127)")]
    InvalidDataByte(u8),

    #[error("Unsupported MIDI status byte: {0:#04X}")]
    UnsupportedStatus(u8),

    /// Rejected by the wire decoder, e.g. a message cut short.
    #[error("Malformed MIDI message: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
