//! MIDI File I/O
//!
//! Standard MIDI File (SMF) loading using the `midly` crate. Tracks are merged
//! into one wall-clock ordered list of channel events for playback; tempo
//! changes anywhere in the file are honoured.

use crate::error::{Error, Result};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use virtuosos_midi::MidiEvent;

/// 120 BPM, used until the file sets a tempo.
pub const DEFAULT_TEMPO_US_PER_BEAT: u32 = 500_000;

/// Rejects paths that do not exist or do not carry a `.mid` / `.midi` extension.
pub fn validate_midi_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("MIDI file not found: {}", path.display()),
        )));
    }
    let is_midi = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"));
    if !is_midi {
        return Err(Error::NotAMidiFile(path.to_path_buf()));
    }
    Ok(())
}

/// Validates `path` and reads the whole file.
pub fn read_midi_file(path: &Path) -> Result<Vec<u8>> {
    validate_midi_path(path)?;
    Ok(std::fs::read(path)?)
}

pub fn smf_ticks_per_beat(smf: &Smf) -> Result<u16> {
    match smf.header.timing {
        Timing::Metrical(tpb) if tpb.as_int() > 0 => Ok(tpb.as_int()),
        Timing::Metrical(_) => Err(Error::InvalidTimeline(
            "ticks per beat must be non-zero".into(),
        )),
        Timing::Timecode(_, _) => Err(Error::MidiUnsupportedTiming),
    }
}

/// First tempo meta event in file order (track by track), else 120 BPM.
pub fn smf_tempo(smf: &Smf) -> u32 {
    smf.tracks
        .iter()
        .flat_map(|track| track.iter())
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(tempo.as_int()),
            _ => None,
        })
        .unwrap_or(DEFAULT_TEMPO_US_PER_BEAT)
}

/// Converts a channel message to a [`MidiEvent`] stamped with `timestamp`.
///
/// Both release forms keep their original encoding. Sysex and meta events
/// have no counterpart and yield `None`.
pub(crate) fn to_midi_event(kind: &TrackEventKind, timestamp: u64) -> Option<MidiEvent> {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            Some(MidiEvent::from_midi(timestamp, channel.as_int(), *message))
        }
        _ => None,
    }
}

struct TimedKind<'s, 'a> {
    time: Duration,
    tick: u64,
    track: usize,
    kind: &'s TrackEventKind<'a>,
}

/// All events of all tracks in tick order with wall-clock times from the tempo map.
fn merged_timeline<'s, 'a>(smf: &'s Smf<'a>, ticks_per_beat: u16) -> Vec<TimedKind<'s, 'a>> {
    let mut merged: Vec<(u64, usize, &'s TrackEventKind<'a>)> = Vec::new();
    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick = 0u64;
        for event in track.iter() {
            tick += event.delta.as_int() as u64;
            merged.push((tick, track_index, &event.kind));
        }
    }
    // Stable: same-tick events keep track order, then in-track order.
    merged.sort_by_key(|(tick, _, _)| *tick);

    let tpb = ticks_per_beat as u64;
    let mut tempo = DEFAULT_TEMPO_US_PER_BEAT as u64;
    let mut segment_start_tick = 0u64;
    let mut segment_start_us = 0u64;

    merged
        .into_iter()
        .map(|(tick, track, kind)| {
            let micros = segment_start_us + (tick - segment_start_tick) * tempo / tpb;
            if let TrackEventKind::Meta(MetaMessage::Tempo(new_tempo)) = kind {
                segment_start_tick = tick;
                segment_start_us = micros;
                tempo = new_tempo.as_int() as u64;
            }
            TimedKind {
                time: Duration::from_micros(micros),
                tick,
                track,
                kind,
            }
        })
        .collect()
}

/// A parsed MIDI file ready for real-time playback.
#[derive(Debug, Clone)]
pub struct ParsedMidiFile {
    /// Channel events of all tracks in playback order.
    pub events: Vec<TimedMidiEvent>,

    pub ticks_per_beat: u16,

    /// Initial tempo in microseconds per beat.
    pub tempo_us_per_beat: u32,

    /// Time of the last event of any kind, end-of-track included.
    pub duration: Duration,

    pub track_count: usize,
}

/// A channel event with its offset from the start of the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedMidiEvent {
    pub time: Duration,

    /// Source track index.
    pub track: usize,

    /// Timestamp is the absolute tick.
    pub event: MidiEvent,
}

impl ParsedMidiFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_midi_file(path.as_ref())?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data)?;
        Self::from_smf(&smf)
    }

    pub fn from_smf(smf: &Smf) -> Result<Self> {
        let ticks_per_beat = smf_ticks_per_beat(smf)?;
        if smf.header.format == Format::Sequential {
            return Err(Error::InvalidTimeline(
                "sequential (format 2) files have no shared timeline".into(),
            ));
        }

        debug!(
            "Parsing MIDI file: {} tracks, {} ticks per beat",
            smf.tracks.len(),
            ticks_per_beat
        );

        let timeline = merged_timeline(smf, ticks_per_beat);
        let duration = timeline.last().map(|t| t.time).unwrap_or_default();
        let events: Vec<TimedMidiEvent> = timeline
            .iter()
            .filter_map(|timed| {
                to_midi_event(timed.kind, timed.tick).map(|event| TimedMidiEvent {
                    time: timed.time,
                    track: timed.track,
                    event,
                })
            })
            .collect();

        debug!(
            "Parsed {} MIDI events, duration: {:.2}s",
            events.len(),
            duration.as_secs_f64()
        );

        Ok(Self {
            events,
            ticks_per_beat,
            tempo_us_per_beat: smf_tempo(smf),
            duration,
            track_count: smf.tracks.len(),
        })
    }
}

/// Summary of a MIDI file without playing it.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiFileInfo {
    /// SMF format: 0, 1 or 2.
    pub format: u8,
    pub tracks: usize,
    pub ticks_per_beat: u16,
    pub length: Duration,
    pub total_messages: usize,
    pub message_types: BTreeMap<&'static str, usize>,
}

impl MidiFileInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_midi_file(path.as_ref())?;
        let smf = Smf::parse(&data)?;
        Self::from_smf(&smf)
    }

    pub fn from_smf(smf: &Smf) -> Result<Self> {
        let ticks_per_beat = smf_ticks_per_beat(smf)?;
        let format = match smf.header.format {
            Format::SingleTrack => 0,
            Format::Parallel => 1,
            Format::Sequential => 2,
        };

        let mut message_types = BTreeMap::new();
        let mut total_messages = 0;
        for event in smf.tracks.iter().flat_map(|track| track.iter()) {
            *message_types.entry(message_type(&event.kind)).or_insert(0) += 1;
            total_messages += 1;
        }

        let length = merged_timeline(smf, ticks_per_beat)
            .last()
            .map(|t| t.time)
            .unwrap_or_default();

        Ok(Self {
            format,
            tracks: smf.tracks.len(),
            ticks_per_beat,
            length,
            total_messages,
            message_types,
        })
    }
}

fn message_type(kind: &TrackEventKind) -> &'static str {
    match kind {
        TrackEventKind::Midi { message, .. } => match message {
            MidiMessage::NoteOn { .. } => "note_on",
            MidiMessage::NoteOff { .. } => "note_off",
            MidiMessage::Controller { .. } => "control_change",
            MidiMessage::ProgramChange { .. } => "program_change",
            MidiMessage::PitchBend { .. } => "pitchwheel",
            MidiMessage::Aftertouch { .. } => "polytouch",
            MidiMessage::ChannelAftertouch { .. } => "aftertouch",
        },
        TrackEventKind::SysEx(_) => "sysex",
        TrackEventKind::Escape(_) => "escape",
        TrackEventKind::Meta(meta) => match meta {
            MetaMessage::Tempo(_) => "set_tempo",
            MetaMessage::EndOfTrack => "end_of_track",
            MetaMessage::TrackName(_) => "track_name",
            MetaMessage::TimeSignature(..) => "time_signature",
            MetaMessage::KeySignature(..) => "key_signature",
            _ => "meta",
        },
    }
}
