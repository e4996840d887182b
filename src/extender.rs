//! Short-note extension over recorded timelines.
//!
//! Some sound modules need a minimum gate time and play nothing for notes
//! released almost immediately. The extender finds every note shorter than a
//! threshold and inserts an extra release at `attack + min_duration_ticks`.
//! Original events are never altered or removed; output is always a superset
//! of the input.
//!
//! Attacks and releases are paired per `(channel, note)` with a stack, so
//! overlapping re-triggers of one key nest last-in-first-out. Attacks still
//! open at the end of a track get a synthetic release as well.

use crate::error::Result;
use midly::num::u28;
use midly::{MetaMessage, MidiMessage, Smf, Track, TrackEvent, TrackEventKind};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use virtuosos_midi::{MidiEvent, NoteKey};
use virtuosos_midi_io::{read_midi_file, smf_tempo, smf_ticks_per_beat, Error as MidiIoError};

pub const DEFAULT_MIN_DURATION_MS: u32 = 50;

/// What an event means to note pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    Attack(NoteKey),
    /// Either release form.
    Release(NoteKey),
}

/// An event type the extender can pair and synthesize.
pub trait TimelineEvent: Clone {
    fn note_action(&self) -> Option<NoteAction>;

    /// A release for `key` placed at absolute tick `tick`.
    fn synthetic_release(key: NoteKey, tick: u64) -> Self;

    /// Track terminator that must stay last.
    fn is_end_of_track(&self) -> bool {
        false
    }
}

impl TimelineEvent for MidiEvent {
    fn note_action(&self) -> Option<NoteAction> {
        let key = self.note_key()?;
        if self.is_note_on() {
            Some(NoteAction::Attack(key))
        } else if self.is_note_off() {
            Some(NoteAction::Release(key))
        } else {
            None
        }
    }

    fn synthetic_release(key: NoteKey, tick: u64) -> Self {
        MidiEvent::note_off(tick, key.channel, key.note, 0)
    }
}

impl<'a> TimelineEvent for TrackEventKind<'a> {
    fn note_action(&self) -> Option<NoteAction> {
        let TrackEventKind::Midi { channel, message } = self else {
            return None;
        };
        let key = |note: midly::num::u7| NoteKey::new(channel.as_int(), note.as_int());
        match *message {
            MidiMessage::NoteOn { key: note, vel } if vel.as_int() > 0 => {
                Some(NoteAction::Attack(key(note)))
            }
            MidiMessage::NoteOn { key: note, .. } | MidiMessage::NoteOff { key: note, .. } => {
                Some(NoteAction::Release(key(note)))
            }
            _ => None,
        }
    }

    fn synthetic_release(key: NoteKey, _tick: u64) -> Self {
        TrackEventKind::Midi {
            channel: key.channel.into(),
            message: MidiMessage::NoteOff {
                key: key.note.into(),
                vel: 0.into(),
            },
        }
    }

    fn is_end_of_track(&self) -> bool {
        matches!(self, TrackEventKind::Meta(MetaMessage::EndOfTrack))
    }
}

/// One event of an extended timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry<E> {
    pub tick: u64,
    pub event: E,
    pub synthetic: bool,
}

/// `round(ms * 1000 * ticks_per_beat / us_per_beat)`. A zero tempo falls back to 120 BPM.
pub fn min_duration_ticks(min_duration_ms: u32, ticks_per_beat: u16, us_per_beat: u32) -> u64 {
    let us_per_beat = if us_per_beat == 0 {
        virtuosos_midi_io::DEFAULT_TEMPO_US_PER_BEAT
    } else {
        us_per_beat
    };
    (min_duration_ms as f64 * 1000.0 * ticks_per_beat as f64 / us_per_beat as f64).round() as u64
}

/// Extends one track given as `(absolute tick, event)` pairs in
/// non-decreasing tick order.
///
/// At equal ticks synthetic releases come before original events, so a
/// re-attack landing exactly on the synthetic release is not cut. An
/// end-of-track event is kept last, moved later if a synthetic release would
/// otherwise follow it. With `min_ticks == 0` nothing is short and the
/// track is returned as is.
pub fn extend_track<E: TimelineEvent>(
    track: &[(u64, E)],
    min_ticks: u64,
) -> Result<Vec<TimelineEntry<E>>> {
    let mut stacks: HashMap<NoteKey, SmallVec<[u64; 4]>> = HashMap::new();
    let mut synthetic: Vec<(u64, NoteKey)> = Vec::new();
    let mut previous = 0u64;

    for (index, (tick, event)) in track.iter().enumerate() {
        if *tick < previous {
            return Err(MidiIoError::InvalidTimeline(format!(
                "event {} at tick {} comes after tick {}",
                index, tick, previous
            ))
            .into());
        }
        previous = *tick;

        if min_ticks == 0 {
            continue;
        }
        match event.note_action() {
            Some(NoteAction::Attack(key)) => stacks.entry(key).or_default().push(*tick),
            Some(NoteAction::Release(key)) => {
                // A release with no open attack is left alone.
                if let Some(attack) = stacks.get_mut(&key).and_then(|stack| stack.pop()) {
                    if tick - attack < min_ticks {
                        synthetic.push((attack + min_ticks, key));
                    }
                }
            }
            None => {}
        }
    }

    for (key, stack) in stacks {
        synthetic.extend(stack.into_iter().map(|attack| (attack + min_ticks, key)));
    }
    synthetic.sort_unstable_by_key(|(tick, key)| (*tick, key.channel, key.note));

    let mut end_of_track = Vec::new();
    let mut merged: Vec<TimelineEntry<E>> = synthetic
        .into_iter()
        .map(|(tick, key)| TimelineEntry {
            tick,
            event: E::synthetic_release(key, tick),
            synthetic: true,
        })
        .collect();
    for (tick, event) in track {
        let entry = TimelineEntry {
            tick: *tick,
            event: event.clone(),
            synthetic: false,
        };
        if event.is_end_of_track() {
            end_of_track.push(entry);
        } else {
            merged.push(entry);
        }
    }
    merged.sort_by_key(|entry| entry.tick);

    let last_tick = merged.last().map(|entry| entry.tick).unwrap_or(0);
    merged.extend(end_of_track.into_iter().map(|mut entry| {
        entry.tick = entry.tick.max(last_tick);
        entry
    }));
    Ok(merged)
}

/// Largest delta a variable-length quantity can carry.
const MAX_DELTA: u64 = (1 << 28) - 1;

/// Re-derives delta times relative to the previous event of the track.
fn encode_track<'a>(entries: &[TimelineEntry<TrackEventKind<'a>>]) -> Result<Track<'a>> {
    let mut previous = 0u64;
    entries
        .iter()
        .map(|entry| -> Result<TrackEvent<'a>> {
            let delta = entry.tick - previous;
            if delta > MAX_DELTA {
                return Err(MidiIoError::InvalidTimeline(format!(
                    "delta of {} ticks does not fit a MIDI file",
                    delta
                ))
                .into());
            }
            previous = entry.tick;
            Ok(TrackEvent {
                delta: u28::from(delta as u32),
                kind: entry.event,
            })
        })
        .collect()
}

/// Summary of one extension pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendReport {
    pub min_duration_ticks: u64,
    pub synthetic_releases: usize,
    pub tracks: usize,
}

/// Standard MIDI File front end of [`extend_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteExtender {
    min_duration_ms: u32,
}

impl Default for NoteExtender {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DURATION_MS)
    }
}

impl NoteExtender {
    pub fn new(min_duration_ms: u32) -> Self {
        Self { min_duration_ms }
    }

    pub fn min_duration_ms(&self) -> u32 {
        self.min_duration_ms
    }

    /// Builds a new file with synthetic releases added. `smf` is not touched;
    /// on error nothing is produced.
    ///
    /// The threshold is converted with the first tempo in the file, or
    /// 120 BPM if there is none.
    pub fn extend_smf<'a>(&self, smf: &Smf<'a>) -> Result<(Smf<'a>, ExtendReport)> {
        let ticks_per_beat = smf_ticks_per_beat(smf)?;
        let tempo = smf_tempo(smf);
        let min_ticks = min_duration_ticks(self.min_duration_ms, ticks_per_beat, tempo);
        debug!(
            min_duration_ms = self.min_duration_ms,
            min_ticks, ticks_per_beat, tempo, "Extending short notes"
        );

        let mut report = ExtendReport {
            min_duration_ticks: min_ticks,
            synthetic_releases: 0,
            tracks: smf.tracks.len(),
        };
        let mut tracks = Vec::with_capacity(smf.tracks.len());
        for track in &smf.tracks {
            let mut tick = 0u64;
            let absolute: Vec<(u64, TrackEventKind<'a>)> = track
                .iter()
                .map(|event| {
                    tick += event.delta.as_int() as u64;
                    (tick, event.kind)
                })
                .collect();

            let extended = extend_track(&absolute, min_ticks)?;
            report.synthetic_releases += extended.iter().filter(|entry| entry.synthetic).count();
            tracks.push(encode_track(&extended)?);
        }

        Ok((
            Smf {
                header: smf.header,
                tracks,
            },
            report,
        ))
    }
}

/// Writes `input` with short notes extended to `output`. The input file is
/// left untouched.
pub fn fix_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    min_duration_ms: u32,
) -> Result<ExtendReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    if same_file(input, output) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to overwrite the input file {}", input.display()),
        )
        .into());
    }

    let data = read_midi_file(input)?;
    let smf = Smf::parse(&data).map_err(MidiIoError::from)?;
    let (fixed, report) = NoteExtender::new(min_duration_ms).extend_smf(&smf)?;

    let mut bytes = Vec::new();
    fixed.write_std(&mut bytes)?;
    std::fs::write(output, bytes)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        synthetic_releases = report.synthetic_releases,
        "Extended short notes"
    );
    Ok(report)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
