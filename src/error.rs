//! Centralized error type for the virtuosos crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MIDI: {0}")]
    Midi(#[from] virtuosos_midi::Error),

    #[error("MIDI I/O: {0}")]
    MidiIo(#[from] virtuosos_midi_io::Error),

    #[error("Settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure came from a permanently unusable endpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MidiIo(e) if e.is_fatal())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Settings(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Settings(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
