//! Error types for the MIDI I/O subsystem.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI event error: {0}")]
    Event(#[from] virtuosos_midi::Error),

    #[error("MIDI parse error: {0}")]
    MidiFileParse(String),

    #[error("Unsupported MIDI timing format")]
    MidiUnsupportedTiming,

    #[error("Not a MIDI file: {0}")]
    NotAMidiFile(PathBuf),

    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("MIDI device error: {0}")]
    MidiDevice(String),

    /// The sink rejected a single event. Callers log it and carry on.
    #[error("MIDI send failed: {0}")]
    Send(String),

    /// One read from the source failed. The next poll may succeed.
    #[error("MIDI source read failed: {0}")]
    SourceRead(String),

    /// The source or sink is gone for good.
    #[error("MIDI endpoint disconnected: {0}")]
    Disconnected(String),
}

impl Error {
    /// Whether the endpoint that produced this error is permanently unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Disconnected(_))
    }
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::MidiFileParse(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::MidiDevice(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

/// Malformed data fails one event; any other send failure means the
/// backend lost the port.
#[cfg(feature = "midi-io")]
impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        match e {
            midir::SendError::InvalidData(_) => Error::Send(e.to_string()),
            midir::SendError::Other(_) => Error::Disconnected(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(Error::Disconnected("gone".into()).is_fatal());
        assert!(!Error::Send("busy".into()).is_fatal());
        assert!(!Error::SourceRead("garbled".into()).is_fatal());
        assert!(!Error::MidiUnsupportedTiming.is_fatal());
    }

    #[cfg(feature = "midi-io")]
    #[test]
    fn test_backend_send_failure_is_fatal() {
        let rejected = Error::from(midir::SendError::InvalidData("not a MIDI message"));
        assert!(matches!(rejected, Error::Send(_)));
        assert!(!rejected.is_fatal());

        let lost = Error::from(midir::SendError::Other("could not send message"));
        assert!(matches!(lost, Error::Disconnected(_)));
        assert!(lost.is_fatal());
    }
}
