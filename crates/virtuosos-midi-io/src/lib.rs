//! MIDI I/O subsystem for virtuosos.
//!
//! Provides the event source/sink seams the router talks to, in-memory
//! implementations of both, hardware ports and Standard MIDI File loading.
//!
//! Feature gates: `midi-io` (hardware I/O via midir).

pub mod error;
pub use error::{Error, Result};

pub mod port;
pub use port::{EventSink, EventSource, SharedSink};

pub mod memory;
pub use memory::{ChannelSource, EventFeeder, RecordingSink};

#[cfg(feature = "midi-io")]
pub(crate) mod io;

#[cfg(feature = "midi-io")]
pub use io::{
    list_input_devices, list_output_devices, MidiInputDevice, MidiInputSource, MidiOutputDevice,
    MidiOutputSink,
};

pub(crate) mod file;
pub use file::{
    read_midi_file, smf_ticks_per_beat, smf_tempo, validate_midi_path, MidiFileInfo,
    ParsedMidiFile, TimedMidiEvent, DEFAULT_TEMPO_US_PER_BEAT,
};

pub use virtuosos_midi::{EventKind, MidiEvent, NoteKey, RawMidiEvent};
