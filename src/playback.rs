//! Real-time playback of a MIDI file to a sink.
//!
//! Events are sent from a dedicated playback thread while a second thread
//! logs progress. Once playback ends or a stop is requested, each thread gets
//! at most `join_timeout` to finish, and a panic flush always follows,
//! however playback ended.

use crate::error::{Error, Result};
use crate::extender::{NoteExtender, DEFAULT_MIN_DURATION_MS};
use crate::panic::PanicFlush;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use midly::Smf;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use virtuosos_midi_io::{read_midi_file, EventSink, ParsedMidiFile, SharedSink, TimedMidiEvent};

/// Longest single sleep while waiting for the next event, so a stop request
/// is noticed promptly.
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    fix_short_notes: bool,
    min_duration_ms: u32,
    panic_flush: PanicFlush,
    progress_interval: Duration,
    join_timeout: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            fix_short_notes: false,
            min_duration_ms: DEFAULT_MIN_DURATION_MS,
            panic_flush: PanicFlush::default(),
            progress_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl PlaybackOptions {
    /// Run the short-note extender over the file before playing it.
    pub fn fix_short_notes(mut self, enabled: bool) -> Self {
        self.fix_short_notes = enabled;
        self
    }

    /// Default: 50 ms
    pub fn min_duration_ms(mut self, min_duration_ms: u32) -> Self {
        self.min_duration_ms = min_duration_ms;
        self
    }

    pub fn panic_flush(mut self, flush: PanicFlush) -> Self {
        self.panic_flush = flush;
        self
    }

    /// Default: 1 s
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// How long to wait for the playback and progress threads after a stop
    /// or at the end. Default: 1 s
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub enum PlaybackOutcome {
    Completed { elapsed: Duration },
    Interrupted,
    Failed(Error),
}

/// Loads `path` and plays it to `sink` in real time. Setting `stop` ends
/// playback early.
///
/// Errors are returned only for problems found before playback starts
/// (missing file, bad extension, unparsable data); anything after that is
/// reported through [`PlaybackOutcome`].
pub fn play_file(
    path: impl AsRef<Path>,
    sink: SharedSink,
    options: &PlaybackOptions,
    stop: Arc<AtomicBool>,
) -> Result<PlaybackOutcome> {
    let path = path.as_ref();
    let data = read_midi_file(path)?;
    let smf = Smf::parse(&data).map_err(virtuosos_midi_io::Error::from)?;

    let file = if options.fix_short_notes {
        let (fixed, report) = NoteExtender::new(options.min_duration_ms).extend_smf(&smf)?;
        info!(
            synthetic_releases = report.synthetic_releases,
            min_duration_ticks = report.min_duration_ticks,
            "Extended short notes"
        );
        ParsedMidiFile::from_smf(&fixed)?
    } else {
        ParsedMidiFile::from_smf(&smf)?
    };

    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(
        "Playing {} ({} events, {:.1}s)",
        label,
        file.events.len(),
        file.duration.as_secs_f64()
    );
    Ok(play_events(file.events, file.duration, &label, sink, options, stop))
}

/// Plays pre-timed events. Used by [`play_file`].
pub fn play_events(
    events: Vec<TimedMidiEvent>,
    total: Duration,
    label: &str,
    sink: SharedSink,
    options: &PlaybackOptions,
    stop: Arc<AtomicBool>,
) -> PlaybackOutcome {
    let (progress_stop_tx, progress_stop_rx) = bounded::<()>(1);
    let (progress_done_tx, progress_done_rx) = bounded::<()>(1);

    let progress = spawn_progress(
        label.to_string(),
        total,
        options.progress_interval,
        progress_stop_rx,
        progress_done_tx,
    );

    let start = Instant::now();
    let outcome = match spawn_player(events, Arc::clone(&sink), Arc::clone(&stop)) {
        Ok((player, outcome_rx)) => {
            await_player(player, &outcome_rx, &stop, options.join_timeout)
        }
        Err(e) => PlaybackOutcome::Failed(e.into()),
    };

    // Stop the progress reporter, waiting at most `join_timeout`.
    drop(progress_stop_tx);
    if let Some(progress) = progress {
        match progress_done_rx.recv_timeout(options.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = progress.join();
            }
            Err(RecvTimeoutError::Timeout) => warn!("Progress thread did not stop in time"),
        }
    }

    match &outcome {
        PlaybackOutcome::Completed { .. } => {
            info!("Playback completed in {:.2} seconds", start.elapsed().as_secs_f64())
        }
        PlaybackOutcome::Interrupted => info!("Playback interrupted by user"),
        PlaybackOutcome::Failed(e) => error!("Error sending MIDI message: {}", e),
    }

    debug!("Sending final all notes off...");
    options.panic_flush.flush(&*sink);
    outcome
}

fn spawn_player(
    events: Vec<TimedMidiEvent>,
    sink: SharedSink,
    stop: Arc<AtomicBool>,
) -> std::io::Result<(JoinHandle<()>, Receiver<PlaybackOutcome>)> {
    let (outcome_tx, outcome_rx) = bounded::<PlaybackOutcome>(1);
    let player = thread::Builder::new()
        .name("virtuosos-playback".into())
        .spawn(move || {
            let _ = outcome_tx.send(play(&events, &*sink, &stop));
        })?;
    Ok((player, outcome_rx))
}

fn play(events: &[TimedMidiEvent], sink: &dyn EventSink, stop: &AtomicBool) -> PlaybackOutcome {
    let start = Instant::now();
    for timed in events {
        if !wait_until(start, timed.time, stop) {
            return PlaybackOutcome::Interrupted;
        }
        if let Err(e) = sink.send(&timed.event) {
            return PlaybackOutcome::Failed(e.into());
        }
    }
    PlaybackOutcome::Completed {
        elapsed: start.elapsed(),
    }
}

/// Waits for the player's outcome. Once `stop` is set the player gets at most
/// `join_timeout`; a player still stuck after that is left behind.
fn await_player(
    player: JoinHandle<()>,
    outcome_rx: &Receiver<PlaybackOutcome>,
    stop: &AtomicBool,
    join_timeout: Duration,
) -> PlaybackOutcome {
    let received = loop {
        match outcome_rx.recv_timeout(STOP_POLL) {
            Err(RecvTimeoutError::Timeout) if stop.load(Ordering::Acquire) => {
                break outcome_rx.recv_timeout(join_timeout);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            received => break received,
        }
    };

    match received {
        Ok(outcome) => {
            let _ = player.join();
            outcome
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("Playback thread did not stop in time");
            PlaybackOutcome::Interrupted
        }
        Err(RecvTimeoutError::Disconnected) => PlaybackOutcome::Failed(Error::Io(
            std::io::Error::other("playback thread panicked"),
        )),
    }
}

/// Sleeps until `at` after `start`. Returns `false` if `stop` was set first.
fn wait_until(start: Instant, at: Duration, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = start.elapsed();
        if now >= at {
            return true;
        }
        thread::sleep((at - now).min(STOP_POLL));
    }
}

fn spawn_progress(
    label: String,
    total: Duration,
    interval: Duration,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("virtuosos-progress".into())
        .spawn(move || {
            let start = Instant::now();
            let total_secs = total.as_secs() + 1;
            while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                let elapsed = start.elapsed().as_secs().min(total_secs);
                info!("♪ {}: {}/{}s", label, elapsed, total_secs);
            }
            let _ = done_tx.send(());
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Progress reporting disabled: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtuosos_midi::MidiEvent;
    use virtuosos_midi_io::RecordingSink;

    fn timed(ms: u64, event: MidiEvent) -> TimedMidiEvent {
        TimedMidiEvent {
            time: Duration::from_millis(ms),
            track: 0,
            event,
        }
    }

    fn quiet() -> PlaybackOptions {
        PlaybackOptions::default()
            .panic_flush(PanicFlush::immediate().rounds(1))
            .progress_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_events_played_on_schedule_then_flushed() {
        let sink = Arc::new(RecordingSink::new());
        let events = vec![
            timed(0, MidiEvent::note_on(0, 0, 60, 100)),
            timed(80, MidiEvent::note_off(96, 0, 60, 0)),
        ];

        let outcome = play_events(
            events,
            Duration::from_millis(80),
            "test",
            sink.clone(),
            &quiet(),
            Arc::new(AtomicBool::new(false)),
        );
        let elapsed = match outcome {
            PlaybackOutcome::Completed { elapsed } => elapsed,
            other => panic!("expected completion, got {:?}", other),
        };
        assert!(elapsed >= Duration::from_millis(80));

        let arrivals = sink.events_with_arrival();
        assert_eq!(arrivals[0].1, MidiEvent::note_on(0, 0, 60, 100));
        assert_eq!(arrivals[1].1, MidiEvent::note_off(96, 0, 60, 0));
        assert!(arrivals[1].0.duration_since(arrivals[0].0) >= Duration::from_millis(70));
        assert_eq!(sink.len(), 2 + 16 * crate::panic::MESSAGES_PER_CHANNEL);
    }

    #[test]
    fn test_stop_interrupts_and_still_flushes() {
        let sink = Arc::new(RecordingSink::new());
        let stop = Arc::new(AtomicBool::new(false));
        let events = vec![
            timed(0, MidiEvent::note_on(0, 0, 60, 100)),
            timed(5_000, MidiEvent::note_off(0, 0, 60, 0)),
        ];

        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                stop.store(true, Ordering::Release);
            })
        };

        let started = Instant::now();
        let outcome = play_events(
            events,
            Duration::from_secs(5),
            "test",
            sink.clone(),
            &quiet(),
            stop,
        );
        stopper.join().unwrap();

        assert!(matches!(outcome, PlaybackOutcome::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sink.len(), 1 + 16 * crate::panic::MESSAGES_PER_CHANNEL);
    }

    /// Blocks every attack for `stall`.
    struct StallingSink {
        inner: RecordingSink,
        stall: Duration,
    }

    impl EventSink for StallingSink {
        fn send(&self, event: &MidiEvent) -> virtuosos_midi_io::Result<()> {
            if event.is_note_on() {
                thread::sleep(self.stall);
            }
            self.inner.send(event)
        }
    }

    #[test]
    fn test_stuck_player_is_abandoned_after_join_timeout() {
        let sink = Arc::new(StallingSink {
            inner: RecordingSink::new(),
            stall: Duration::from_secs(5),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let events = vec![timed(0, MidiEvent::note_on(0, 0, 60, 100))];

        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                stop.store(true, Ordering::Release);
            })
        };

        let started = Instant::now();
        let outcome = play_events(
            events,
            Duration::from_millis(10),
            "test",
            sink.clone(),
            &quiet().join_timeout(Duration::from_millis(100)),
            stop,
        );
        stopper.join().unwrap();

        assert!(matches!(outcome, PlaybackOutcome::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(2));
        // The flush went out even though the player never returned.
        assert_eq!(sink.inner.len(), 16 * crate::panic::MESSAGES_PER_CHANNEL);
    }

    #[test]
    fn test_send_failure_ends_playback() {
        let sink = Arc::new(RecordingSink::new());
        sink.reject_if(|e| e.is_note_on() && e.note() == Some(61));
        let events = vec![
            timed(0, MidiEvent::note_on(0, 0, 61, 100)),
            timed(10, MidiEvent::note_on(0, 0, 62, 100)),
        ];

        let outcome = play_events(
            events,
            Duration::from_millis(10),
            "test",
            sink.clone(),
            &quiet(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(outcome, PlaybackOutcome::Failed(_)));
        // 62 never played; the flush still ran.
        assert!(sink.events().iter().all(|e| !e.is_note_on()));
        assert_eq!(sink.len(), 16 * crate::panic::MESSAGES_PER_CHANNEL);
    }

    #[test]
    fn test_play_file_rejects_non_midi_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"x").unwrap();

        let result = play_file(
            &path,
            Arc::new(RecordingSink::new()),
            &quiet(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(
            result,
            Err(Error::MidiIo(virtuosos_midi_io::Error::NotAMidiFile(_)))
        ));
    }
}
