//! Delayed note releases with an exactly-once guarantee.
//!
//! Each scheduler owns one timer thread holding a min-heap of
//! `(deadline, note, generation)`. Every mutation of the pending table, the
//! sounding set and the released set happens under a single per-instrument
//! lock, and a timer only fires if its generation is still the live one for
//! that note. Re-attacking a note or cancelling bumps the generation, so a
//! stale heap entry can never release a newer attack early.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use virtuosos_midi::{cc, MidiEvent};
use virtuosos_midi_io::{EventSink, SharedSink};

/// How a scheduled or emergency release is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStyle {
    /// `NoteOn` with velocity 0. Some drum modules only honour this form.
    #[default]
    NoteOnZero,
    NoteOff,
}

impl ReleaseStyle {
    pub fn release(self, channel: u8, note: u8) -> MidiEvent {
        match self {
            ReleaseStyle::NoteOnZero => MidiEvent::note_on(0, channel, note, 0),
            ReleaseStyle::NoteOff => MidiEvent::note_off(0, channel, note, 0),
        }
    }
}

#[derive(Default)]
struct NoteTable {
    /// Live timer generation per note.
    pending: HashMap<u8, u64>,
    /// Note -> output channel it was attacked on.
    sounding: HashMap<u8, u8>,
    released: HashSet<u8>,
    next_generation: u64,
    /// Set by emergency stop and shutdown. No timer is armed afterwards.
    stopped: bool,
}

impl NoteTable {
    fn arm(&mut self, note: u8) -> u64 {
        self.next_generation += 1;
        self.pending.insert(note, self.next_generation);
        self.next_generation
    }

    /// Sends a release for `note` and records it, whether or not the send succeeded.
    fn release(&mut self, sink: &dyn EventSink, style: ReleaseStyle, label: &str, note: u8, channel: u8) {
        if let Err(e) = sink.send(&style.release(channel, note)) {
            error!(instrument = %label, note, channel, "Error sending note off: {}", e);
        }
        self.pending.remove(&note);
        self.sounding.remove(&note);
        self.released.insert(note);
    }
}

enum TimerCommand {
    Arm {
        deadline: Instant,
        note: u8,
        generation: u64,
    },
    Shutdown,
}

/// Per-instrument release scheduler.
pub struct NoteOffScheduler {
    label: Arc<str>,
    table: Arc<Mutex<NoteTable>>,
    sink: SharedSink,
    style: ReleaseStyle,
    command_tx: Sender<TimerCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NoteOffScheduler {
    /// Spawns the timer thread. `label` names the owning instrument in logs.
    pub fn new(label: &str, sink: SharedSink, style: ReleaseStyle) -> std::io::Result<Self> {
        let label: Arc<str> = Arc::from(label);
        let table = Arc::new(Mutex::new(NoteTable::default()));
        let (command_tx, command_rx) = unbounded();

        let thread_handle = {
            let label = Arc::clone(&label);
            let table = Arc::clone(&table);
            let sink = Arc::clone(&sink);
            thread::Builder::new()
                .name(format!("virtuosos-note-off-{}", label))
                .spawn(move || timer_loop(command_rx, table, sink, style, label))?
        };

        Ok(Self {
            label,
            table,
            sink,
            style,
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn style(&self) -> ReleaseStyle {
        self.style
    }

    /// Sends `attack` and tracks its note as sounding, replacing any pending
    /// release for the same note. With `release_after`, a release is armed.
    ///
    /// Returns `false` without sending anything once the scheduler has been
    /// emergency-stopped or shut down.
    pub fn start_note(&self, attack: &MidiEvent, release_after: Option<Duration>) -> bool {
        let (Some(note), Some(channel)) = (attack.note(), attack.channel()) else {
            return false;
        };
        let mut table = self.table.lock();
        if table.stopped {
            debug!(instrument = %self.label, note, "Dropping attack after stop");
            return false;
        }

        table.pending.remove(&note);
        table.released.remove(&note);
        if let Err(e) = self.sink.send(attack) {
            warn!(instrument = %self.label, note, "Error sending note on: {}", e);
        }
        table.sounding.insert(note, channel);

        if let Some(delay) = release_after {
            let generation = table.arm(note);
            self.post(note, generation, delay);
        }
        true
    }

    /// Arms a release for a sounding note, replacing any pending one.
    pub fn schedule(&self, note: u8, delay: Duration) -> bool {
        let mut table = self.table.lock();
        if table.stopped || !table.sounding.contains_key(&note) {
            return false;
        }
        let generation = table.arm(note);
        self.post(note, generation, delay);
        true
    }

    /// Forwards a release that arrived from the source and retires the note,
    /// cancelling its pending timer. A note the timer already released is not
    /// released twice.
    pub fn forward_release(&self, release: &MidiEvent) {
        let Some(note) = release.note() else {
            return;
        };
        let mut table = self.table.lock();
        if !table.sounding.contains_key(&note) && table.released.contains(&note) {
            debug!(instrument = %self.label, note, "Dropping note off for already released note");
            return;
        }
        if let Err(e) = self.sink.send(release) {
            warn!(instrument = %self.label, note, "Error forwarding note off: {}", e);
        }
        table.pending.remove(&note);
        if table.sounding.remove(&note).is_some() {
            table.released.insert(note);
        }
    }

    /// Cancels every pending release without firing it.
    pub fn cancel_all(&self) {
        self.table.lock().pending.clear();
    }

    /// Silent reset: cancels timers and forgets all note state.
    pub fn reset(&self) {
        let mut table = self.table.lock();
        table.pending.clear();
        table.sounding.clear();
        table.released.clear();
    }

    /// Cancels all timers, releases every sounding note that has not been
    /// released yet (or `fallback` on `channel` if there are none), then
    /// sends All Notes Off on `channel`. No timer is armed afterwards.
    ///
    /// Returns the number of releases attempted.
    pub fn emergency_stop(&self, channel: u8, fallback: Option<RangeInclusive<u8>>) -> usize {
        let mut table = self.table.lock();
        table.stopped = true;
        table.pending.clear();

        let mut targets: SmallVec<[(u8, u8); 16]> = table
            .sounding
            .iter()
            .filter(|(note, _)| !table.released.contains(*note))
            .map(|(&note, &ch)| (note, ch))
            .collect();
        targets.sort_unstable();

        if targets.is_empty() {
            if let Some(range) = fallback {
                debug!(instrument = %self.label, "No sounding notes, releasing fallback range {:?}", range);
                targets.extend(range.map(|note| (note, channel)));
            }
        }

        for &(note, ch) in &targets {
            table.release(&*self.sink, self.style, &self.label, note, ch);
        }

        if let Err(e) = self
            .sink
            .send(&MidiEvent::control_change(0, channel, cc::ALL_NOTES_OFF, 0))
        {
            error!(instrument = %self.label, channel, "Error sending all notes off: {}", e);
        }
        targets.len()
    }

    /// Notes currently sounding, ascending.
    pub fn sounding_notes(&self) -> Vec<u8> {
        let mut notes: Vec<u8> = self.table.lock().sounding.keys().copied().collect();
        notes.sort_unstable();
        notes
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.table.lock().stopped
    }

    /// Cancels all timers and joins the timer thread. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut table = self.table.lock();
            table.stopped = true;
            table.pending.clear();
        }
        let _ = self.command_tx.send(TimerCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!(instrument = %self.label, "Note off timer thread panicked");
            }
        }
    }

    fn post(&self, note: u8, generation: u64, delay: Duration) {
        let command = TimerCommand::Arm {
            deadline: Instant::now() + delay,
            note,
            generation,
        };
        if self.command_tx.send(command).is_err() {
            warn!(instrument = %self.label, note, "Note off timer is not running");
        }
    }
}

impl Drop for NoteOffScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(
    command_rx: Receiver<TimerCommand>,
    table: Arc<Mutex<NoteTable>>,
    sink: SharedSink,
    style: ReleaseStyle,
    label: Arc<str>,
) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, u8, u64)>> = BinaryHeap::new();

    loop {
        let command = match deadlines.peek() {
            Some(Reverse((deadline, _, _))) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match command_rx.recv_timeout(timeout) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match command_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(TimerCommand::Arm {
                deadline,
                note,
                generation,
            }) => deadlines.push(Reverse((deadline, note, generation))),
            Some(TimerCommand::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        while let Some(&Reverse((deadline, note, generation))) = deadlines.peek() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            fire(&table, &*sink, style, &label, note, generation);
        }
    }
}

fn fire(
    table: &Mutex<NoteTable>,
    sink: &dyn EventSink,
    style: ReleaseStyle,
    label: &str,
    note: u8,
    generation: u64,
) {
    let mut table = table.lock();
    if table.pending.get(&note) != Some(&generation) {
        // Superseded by a newer attack, or cancelled.
        return;
    }
    table.pending.remove(&note);
    if table.released.contains(&note) {
        return;
    }
    if let Some(&channel) = table.sounding.get(&note) {
        table.release(sink, style, label, note, channel);
        debug!(instrument = %label, note, channel, "Auto note off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtuosos_midi_io::RecordingSink;

    fn scheduler() -> (Arc<RecordingSink>, NoteOffScheduler) {
        let sink = Arc::new(RecordingSink::new());
        let scheduler =
            NoteOffScheduler::new("test", sink.clone(), ReleaseStyle::NoteOnZero).unwrap();
        (sink, scheduler)
    }

    fn releases_of(events: &[MidiEvent], note: u8) -> usize {
        events
            .iter()
            .filter(|e| e.is_note_off() && e.note() == Some(note))
            .count()
    }

    #[test]
    fn test_release_fires_once_after_delay() {
        let (sink, scheduler) = scheduler();
        let start = Instant::now();
        assert!(scheduler.start_note(&MidiEvent::note_on(0, 0, 60, 100), Some(Duration::from_millis(100))));

        assert!(sink.wait_for(Duration::from_secs(2), |events| releases_of(events, 60) == 1));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(95), "fired early: {:?}", elapsed);

        thread::sleep(Duration::from_millis(150));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], MidiEvent::note_on(0, 0, 60, 0));
        assert!(scheduler.sounding_notes().is_empty());
    }

    #[test]
    fn test_retrigger_cancels_stale_release() {
        let (sink, scheduler) = scheduler();
        let attack = MidiEvent::note_on(0, 0, 64, 100);
        scheduler.start_note(&attack, Some(Duration::from_millis(80)));
        thread::sleep(Duration::from_millis(50));
        let retrigger_at = Instant::now();
        scheduler.start_note(&attack, Some(Duration::from_millis(80)));

        assert!(sink.wait_for(Duration::from_secs(2), |events| releases_of(events, 64) == 1));
        let arrivals = sink.events_with_arrival();
        let (released_at, _) = arrivals
            .iter()
            .find(|(_, e)| e.is_note_off())
            .copied()
            .unwrap();
        assert!(released_at.duration_since(retrigger_at) >= Duration::from_millis(75));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(releases_of(&sink.events(), 64), 1);
    }

    #[test]
    fn test_cancel_all_prevents_firing() {
        let (sink, scheduler) = scheduler();
        scheduler.start_note(&MidiEvent::note_on(0, 0, 60, 100), Some(Duration::from_millis(30)));
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(releases_of(&sink.events(), 60), 0);
        assert_eq!(scheduler.sounding_notes(), vec![60]);
    }

    #[test]
    fn test_forwarded_release_suppresses_timer() {
        let (sink, scheduler) = scheduler();
        scheduler.start_note(&MidiEvent::note_on(0, 2, 60, 100), Some(Duration::from_millis(40)));
        scheduler.forward_release(&MidiEvent::note_off(0, 2, 60, 64));

        thread::sleep(Duration::from_millis(100));
        let events = sink.events();
        assert_eq!(releases_of(&events, 60), 1);
        assert_eq!(events[1], MidiEvent::note_off(0, 2, 60, 64));
    }

    #[test]
    fn test_emergency_stop_releases_unreleased_notes() {
        let (sink, scheduler) = scheduler();
        scheduler.start_note(&MidiEvent::note_on(0, 1, 60, 100), Some(Duration::from_secs(10)));
        scheduler.start_note(&MidiEvent::note_on(0, 1, 62, 100), Some(Duration::from_secs(10)));

        assert_eq!(scheduler.emergency_stop(1, Some(36..=81)), 2);
        let events = sink.events();
        assert_eq!(releases_of(&events, 60), 1);
        assert_eq!(releases_of(&events, 62), 1);
        assert_eq!(
            *events.last().unwrap(),
            MidiEvent::control_change(0, 1, cc::ALL_NOTES_OFF, 0)
        );

        // No new timers or attacks after the stop.
        assert!(!scheduler.start_note(&MidiEvent::note_on(0, 1, 64, 100), Some(Duration::from_millis(1))));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_emergency_stop_fallback_range() {
        let (sink, scheduler) = scheduler();
        assert_eq!(scheduler.emergency_stop(3, Some(36..=81)), 46);
        let events = sink.events();
        assert_eq!(events.len(), 47);
        assert!(events[..46].iter().all(|e| e.is_note_off() && e.channel() == Some(3)));
    }

    #[test]
    fn test_emergency_stop_without_fallback() {
        let (sink, scheduler) = scheduler();
        assert_eq!(scheduler.emergency_stop(0, None), 0);
        assert_eq!(sink.events(), vec![MidiEvent::control_change(0, 0, cc::ALL_NOTES_OFF, 0)]);
    }

    #[test]
    fn test_failed_release_still_counts_as_released() {
        let (sink, scheduler) = scheduler();
        sink.reject_if(|e| e.is_note_off());
        scheduler.start_note(&MidiEvent::note_on(0, 0, 60, 100), Some(Duration::from_millis(20)));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.rejected().len(), 1);
        assert!(scheduler.sounding_notes().is_empty());

        // Already released: emergency stop goes to the fallback instead.
        sink.accept_all();
        assert_eq!(scheduler.emergency_stop(0, None), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (_sink, mut scheduler) = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_stopped());
        assert!(!scheduler.schedule(60, Duration::from_millis(1)));
    }
}
