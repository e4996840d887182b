//! Immutable MIDI events with a timestamp.
//!
//! The message itself is a `midly` live event; decoding and encoding go
//! through `midly::live`. System exclusive dumps are not carried.

use std::fmt;

use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::num::{u14, u4, u7};
use midly::{MidiMessage, PitchBend};

use crate::error::{Error, Result};

/// Message kinds routed by virtuosos.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOff,
    NoteOn,
    /// Polyphonic key pressure (0xAn).
    PolyPressure,
    ControlChange,
    ProgramChange,
    /// Channel pressure (0xDn).
    ChannelPressure,
    PitchBend,
    /// 0xF1-0xF6: time code, song position, song select, tune request.
    SystemCommon,
    /// 0xF8-0xFF: clock, transport, active sensing, reset.
    SystemRealtime,
}

impl EventKind {
    /// Whether events of this kind belong to a channel.
    #[inline]
    pub fn is_channel_message(self) -> bool {
        !matches!(self, EventKind::SystemCommon | EventKind::SystemRealtime)
    }

    fn of(message: &LiveEvent<'_>) -> Self {
        match message {
            LiveEvent::Midi { message, .. } => match message {
                MidiMessage::NoteOff { .. } => EventKind::NoteOff,
                MidiMessage::NoteOn { .. } => EventKind::NoteOn,
                MidiMessage::Aftertouch { .. } => EventKind::PolyPressure,
                MidiMessage::Controller { .. } => EventKind::ControlChange,
                MidiMessage::ProgramChange { .. } => EventKind::ProgramChange,
                MidiMessage::ChannelAftertouch { .. } => EventKind::ChannelPressure,
                MidiMessage::PitchBend { .. } => EventKind::PitchBend,
            },
            LiveEvent::Common(_) => EventKind::SystemCommon,
            LiveEvent::Realtime(_) => EventKind::SystemRealtime,
        }
    }

    fn name(self) -> &'static str {
        match self {
            EventKind::NoteOn => "note_on",
            EventKind::NoteOff => "note_off",
            EventKind::PolyPressure => "polytouch",
            EventKind::ControlChange => "control_change",
            EventKind::ProgramChange => "program_change",
            EventKind::ChannelPressure => "aftertouch",
            EventKind::PitchBend => "pitch_bend",
            EventKind::SystemCommon => "system_common",
            EventKind::SystemRealtime => "system_realtime",
        }
    }
}

/// Identity of a sounding note: the (channel, note) pair releases are matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteKey {
    pub channel: u8,
    pub note: u8,
}

impl NoteKey {
    #[inline]
    pub fn new(channel: u8, note: u8) -> Self {
        Self { channel, note }
    }
}

/// One control event. Fields are fixed at construction; use the `with_*`
/// methods to derive a modified copy.
///
/// `timestamp` is either a file tick or a wall-clock offset in microseconds,
/// depending on where the event came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MidiEvent {
    timestamp: u64,
    message: LiveEvent<'static>,
}

impl MidiEvent {
    /// Channel message. Out-of-range input is masked the way the wire encoder
    /// would, except the channel, which is clamped to 15.
    #[inline]
    pub fn from_midi(timestamp: u64, channel: u8, message: MidiMessage) -> Self {
        Self {
            timestamp,
            message: LiveEvent::Midi {
                channel: u4::from(channel.min(15)),
                message,
            },
        }
    }

    /// Wraps any live event except a system exclusive dump.
    pub fn from_live(timestamp: u64, message: LiveEvent<'_>) -> Result<Self> {
        if let LiveEvent::Common(SystemCommon::SysEx(_)) = message {
            return Err(Error::UnsupportedStatus(0xF0));
        }
        Ok(Self {
            timestamp,
            message: message.to_static(),
        })
    }

    #[inline]
    pub fn note_on(timestamp: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::NoteOn {
                key: u7::from(note),
                vel: u7::from(velocity),
            },
        )
    }

    #[inline]
    pub fn note_off(timestamp: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::NoteOff {
                key: u7::from(note),
                vel: u7::from(velocity),
            },
        )
    }

    #[inline]
    pub fn poly_pressure(timestamp: u64, channel: u8, note: u8, pressure: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::Aftertouch {
                key: u7::from(note),
                vel: u7::from(pressure),
            },
        )
    }

    #[inline]
    pub fn control_change(timestamp: u64, channel: u8, controller: u8, value: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::Controller {
                controller: u7::from(controller),
                value: u7::from(value),
            },
        )
    }

    #[inline]
    pub fn program_change(timestamp: u64, channel: u8, program: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::ProgramChange {
                program: u7::from(program),
            },
        )
    }

    #[inline]
    pub fn channel_pressure(timestamp: u64, channel: u8, pressure: u8) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::ChannelAftertouch {
                vel: u7::from(pressure),
            },
        )
    }

    /// `bend`: unsigned 14-bit (0-16383), center = 8192.
    #[inline]
    pub fn pitch_bend(timestamp: u64, channel: u8, bend: u16) -> Self {
        Self::from_midi(
            timestamp,
            channel,
            MidiMessage::PitchBend {
                bend: PitchBend(u14::from(bend.min(0x3FFF))),
            },
        )
    }

    /// One-byte system realtime message (0xF8-0xFF).
    #[inline]
    pub fn realtime(timestamp: u64, status: u8) -> Self {
        Self {
            timestamp,
            message: LiveEvent::Realtime(SystemRealtime::new(status)),
        }
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        EventKind::of(&self.message)
    }

    /// The underlying `midly` message.
    #[inline]
    pub fn live(&self) -> LiveEvent<'static> {
        self.message
    }

    /// `None` for system messages.
    #[inline]
    pub fn channel(&self) -> Option<u8> {
        match self.message {
            LiveEvent::Midi { channel, .. } => Some(channel.as_int()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_channel_message(&self) -> bool {
        self.channel().is_some()
    }

    /// First data byte on the wire: note, controller or program number.
    #[inline]
    pub fn data1(&self) -> u8 {
        self.to_raw().data[1]
    }

    /// Second data byte on the wire: velocity or controller value.
    #[inline]
    pub fn data2(&self) -> u8 {
        self.to_raw().data[2]
    }

    /// An attack: `NoteOn` with non-zero velocity.
    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(
            self.message,
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { vel, .. },
                ..
            } if vel.as_int() > 0
        )
    }

    /// A release in either form: `NoteOff`, or `NoteOn` with velocity 0.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        match self.message {
            LiveEvent::Midi { message, .. } => match message {
                MidiMessage::NoteOff { .. } => true,
                MidiMessage::NoteOn { vel, .. } => vel.as_int() == 0,
                _ => false,
            },
            _ => false,
        }
    }

    #[inline]
    pub fn is_control_change(&self, controller: u8) -> bool {
        matches!(
            self.message,
            LiveEvent::Midi {
                message: MidiMessage::Controller { controller: c, .. },
                ..
            } if c.as_int() == controller
        )
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.message {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. },
                ..
            } => Some(key.as_int()),
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        match self.message {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { vel, .. } | MidiMessage::NoteOff { vel, .. },
                ..
            } => Some(vel.as_int()),
            _ => None,
        }
    }

    #[inline]
    pub fn note_key(&self) -> Option<NoteKey> {
        Some(NoteKey::new(self.channel()?, self.note()?))
    }

    /// Unsigned 14-bit bend value for `PitchBend` events.
    #[inline]
    pub fn bend(&self) -> Option<u16> {
        match self.message {
            LiveEvent::Midi {
                message: MidiMessage::PitchBend { bend },
                ..
            } => Some(bend.0.as_int()),
            _ => None,
        }
    }

    /// Same event on another channel. System messages are returned unchanged.
    #[inline]
    pub fn with_channel(&self, channel: u8) -> Self {
        match self.message {
            LiveEvent::Midi { message, .. } => Self::from_midi(self.timestamp, channel, message),
            _ => *self,
        }
    }

    #[inline]
    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        Self { timestamp, ..*self }
    }

    #[inline]
    pub fn to_raw(&self) -> RawMidiEvent {
        RawMidiEvent::from(*self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3);
        // Writing into a Vec cannot fail.
        let _ = self.message.write(&mut bytes);
        bytes
    }

    /// Decodes one complete message. Running status and system exclusive
    /// dumps are not supported.
    pub fn from_bytes(bytes: &[u8], timestamp: u64) -> Result<Self> {
        let status = *bytes.first().ok_or_else(|| Error::Malformed("no status byte".into()))?;
        if status < 0x80 || status == 0xF0 || status == 0xF7 {
            return Err(Error::UnsupportedStatus(status));
        }
        if let Some(&byte) = bytes[1..].iter().find(|byte| **byte > 0x7F) {
            return Err(Error::InvalidDataByte(byte));
        }
        let message = LiveEvent::parse(bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Self::from_live(timestamp, message)
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        write!(f, "{}", kind.name())?;
        if let Some(channel) = self.channel() {
            write!(f, " channel={}", channel)?;
        }
        match kind {
            EventKind::NoteOn | EventKind::NoteOff => {
                write!(f, " note={} velocity={}", self.data1(), self.data2())?
            }
            EventKind::PolyPressure => {
                write!(f, " note={} value={}", self.data1(), self.data2())?
            }
            EventKind::ControlChange => {
                write!(f, " control={} value={}", self.data1(), self.data2())?
            }
            EventKind::ProgramChange => write!(f, " program={}", self.data1())?,
            EventKind::ChannelPressure => write!(f, " value={}", self.data1())?,
            EventKind::PitchBend => write!(f, " bend={}", self.bend().unwrap_or(0x2000))?,
            EventKind::SystemCommon | EventKind::SystemRealtime => {
                write!(f, " status={:#04X}", self.to_raw().data[0])?
            }
        }
        write!(f, " time={}", self.timestamp)
    }
}

/// Raw 3-byte MIDI event for unparsed storage and port I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMidiEvent {
    pub timestamp: u64,
    pub data: [u8; 3],
    /// Valid bytes in `data` (1-3).
    pub len: u8,
}

impl RawMidiEvent {
    #[inline]
    pub fn new(timestamp: u64, data: [u8; 3], len: u8) -> Self {
        Self {
            timestamp,
            data,
            len: len.clamp(1, 3),
        }
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.data[0] & 0x0F
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn to_midi_event(&self) -> Result<MidiEvent> {
        MidiEvent::from_bytes(self.as_bytes(), self.timestamp)
    }
}

impl From<MidiEvent> for RawMidiEvent {
    fn from(event: MidiEvent) -> Self {
        let bytes = event.to_bytes();
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self::new(event.timestamp, data, len as u8)
    }
}
