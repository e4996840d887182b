//! MIDI event model for virtuosos.
//!
//! Channel voice and system events as immutable values, plus their 1-3 byte
//! wire form. Decoding and encoding go through `midly::live`.
//!
//! A `NoteOn` with velocity 0 is a release everywhere in this workspace:
//! [`MidiEvent::is_note_off`] and [`MidiEvent::note_key`] treat both release
//! forms identically, while `PartialEq` stays structural so that an event's
//! original encoding is never silently swapped for the other form.
//!
//! # Example
//!
//! ```
//! use virtuosos_midi::{EventKind, MidiEvent};
//!
//! let attack = MidiEvent::note_on(0, 0, 60, 100);
//! let release = MidiEvent::note_on(480, 0, 60, 0);
//!
//! assert!(attack.is_note_on());
//! assert!(release.is_note_off());
//! assert_eq!(release.kind(), EventKind::NoteOn);
//! assert_eq!(attack.note_key(), release.note_key());
//!
//! let clock = MidiEvent::from_bytes(&[0xF8], 0).unwrap();
//! assert_eq!(clock.kind(), EventKind::SystemRealtime);
//! assert_eq!(clock.channel(), None);
//! ```

pub mod error;
pub use error::{Error, Result};

pub(crate) mod event;
pub use event::{EventKind, MidiEvent, NoteKey, RawMidiEvent};

pub(crate) mod utils;
pub use utils::{scale_velocity, transpose};

/// Number of MIDI channels.
pub const CHANNEL_COUNT: u8 = 16;

/// Number of MIDI note numbers.
pub const NOTE_COUNT: u8 = 128;

/// Controller numbers used by the stuck-note protection paths.
pub mod cc {
    pub const SUSTAIN: u8 = 64;
    pub const SOSTENUTO: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
}
