//! # Virtuosos - MIDI event router
//!
//! Sits between a MIDI controller and a sound module and fixes up the stream
//! on the way through.
//!
//! ## Architecture
//!
//! - **virtuosos-midi** - Event type, channel/note helpers, controller numbers
//! - **virtuosos-midi-io** - Source/sink seams, hardware ports, MIDI files
//! - **virtuosos** (this crate) - Instruments, router, panic flush, note extender
//!
//! Each instrument watches one input channel. The first instrument that claims
//! an event handles it; unclaimed events are forwarded unchanged. Auto-release
//! instruments end every note themselves after a short delay, so controllers
//! that never send a release cannot leave notes stuck.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use virtuosos::{InstrumentConfig, InstrumentKind, PanicFlush, Session};
//! use virtuosos_midi_io::{ChannelSource, MidiEvent, RecordingSink};
//!
//! let (feeder, source) = ChannelSource::new();
//! let sink = Arc::new(RecordingSink::new());
//!
//! let mut session = Session::builder()
//!     .instrument(InstrumentConfig::new("Pads", 9).output_channel(0))
//!     .instrument(InstrumentConfig::new("Keys", 1).kind(InstrumentKind::PassThrough))
//!     .panic_flush(PanicFlush::immediate())
//!     .build(Box::new(source), sink.clone())?;
//!
//! feeder.send(MidiEvent::note_on(0, 9, 38, 110));
//! drop(feeder);
//! session.run();
//!
//! assert_eq!(sink.events()[0], MidiEvent::note_on(0, 0, 38, 110));
//! # Ok::<(), virtuosos::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-io` (default) - Hardware ports via midir and the `virtuosos` binary

pub mod error;
pub use error::{Error, Result};

pub mod scheduler;
pub use scheduler::{NoteOffScheduler, ReleaseStyle};

pub mod instrument;
pub use instrument::{AutoRelease, Claim, Instrument, InstrumentConfig, InstrumentKind, PassThrough};

pub mod panic;
pub use panic::{FlushReport, PanicFlush};

pub mod router;
pub use router::{Route, Router, RunOutcome, WatchedSink};

pub mod session;
pub use session::{Session, SessionBuilder, SessionHandle};

pub mod extender;
pub use extender::{
    extend_track, fix_file, min_duration_ticks, ExtendReport, NoteAction, NoteExtender,
    TimelineEntry, TimelineEvent,
};

pub mod playback;
pub use playback::{play_events, play_file, PlaybackOptions, PlaybackOutcome};

pub mod settings;
pub use settings::{InstrumentSettings, MidiSettings, Settings};

/// Re-export of the MIDI crates for direct access
pub use virtuosos_midi as midi;
pub use virtuosos_midi_io as midi_io;
