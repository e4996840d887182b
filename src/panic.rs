//! All-sound-off flush across every channel.
//!
//! Receiving hardware is not trusted to honour a single All Notes Off, or to
//! treat both release encodings the same, so the flush repeats everything
//! several times and releases every note in both forms.

use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use virtuosos_midi::{cc, MidiEvent, CHANNEL_COUNT, NOTE_COUNT};
use virtuosos_midi_io::EventSink;

/// Messages sent per channel per round: six controllers plus two releases
/// per note.
pub const MESSAGES_PER_CHANNEL: usize = 6 + 2 * NOTE_COUNT as usize;

/// The silence sequence for one channel, in send order.
pub fn channel_sequence(channel: u8) -> impl Iterator<Item = MidiEvent> {
    let head = [
        MidiEvent::control_change(0, channel, cc::ALL_SOUND_OFF, 0),
        MidiEvent::control_change(0, channel, cc::ALL_NOTES_OFF, 0),
    ];
    let notes = (0..NOTE_COUNT).flat_map(move |note| {
        [
            MidiEvent::note_on(0, channel, note, 0),
            MidiEvent::note_off(0, channel, note, 0),
        ]
    });
    let tail = [
        MidiEvent::control_change(0, channel, cc::RESET_ALL_CONTROLLERS, 0),
        MidiEvent::control_change(0, channel, cc::SUSTAIN, 0),
        MidiEvent::control_change(0, channel, cc::SOFT_PEDAL, 0),
        MidiEvent::control_change(0, channel, cc::SOSTENUTO, 0),
    ];
    head.into_iter().chain(notes).chain(tail)
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
}

/// Redundant multi-round panic flush.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use virtuosos::PanicFlush;
/// use virtuosos_midi_io::RecordingSink;
///
/// let sink = Arc::new(RecordingSink::new());
/// let report = PanicFlush::immediate().flush(&*sink);
/// assert_eq!(report.sent, 3 * 16 * 262);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanicFlush {
    rounds: usize,
    lead_in: Duration,
    round_gap: Duration,
    settle: Duration,
}

impl Default for PanicFlush {
    fn default() -> Self {
        Self {
            rounds: 3,
            lead_in: Duration::from_millis(200),
            round_gap: Duration::from_millis(50),
            settle: Duration::from_millis(200),
        }
    }
}

impl PanicFlush {
    /// Default rounds with no delays.
    pub fn immediate() -> Self {
        Self {
            lead_in: Duration::ZERO,
            round_gap: Duration::ZERO,
            settle: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Default: 3
    pub fn rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Pause before the first round. Default: 200 ms
    pub fn lead_in(mut self, delay: Duration) -> Self {
        self.lead_in = delay;
        self
    }

    /// Pause after each round. Default: 50 ms
    pub fn round_gap(mut self, delay: Duration) -> Self {
        self.round_gap = delay;
        self
    }

    /// Pause after the last round. Default: 200 ms
    pub fn settle(mut self, delay: Duration) -> Self {
        self.settle = delay;
        self
    }

    pub fn total_messages(&self) -> usize {
        self.rounds * CHANNEL_COUNT as usize * MESSAGES_PER_CHANNEL
    }

    /// Sends the full sequence. Each send failure is counted and the flush
    /// carries on.
    pub fn flush(&self, sink: &dyn EventSink) -> FlushReport {
        debug!("Sending comprehensive all notes off...");
        let mut report = FlushReport::default();
        pause(self.lead_in);

        for round in 0..self.rounds {
            if round > 0 {
                debug!("Sending all notes off round {}...", round + 1);
            }
            for channel in 0..CHANNEL_COUNT {
                for event in channel_sequence(channel) {
                    match sink.send(&event) {
                        Ok(()) => report.sent += 1,
                        Err(e) => {
                            if report.failed == 0 {
                                warn!(channel, "Error sending all notes off: {}", e);
                            }
                            report.failed += 1;
                        }
                    }
                }
            }
            pause(self.round_gap);
        }

        pause(self.settle);
        if report.failed > 0 {
            warn!(
                sent = report.sent,
                failed = report.failed,
                "All notes off completed with failures"
            );
        } else {
            debug!("Comprehensive all notes off completed");
        }
        report
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
