//! In-memory event source and sink.
//!
//! `ChannelSource` is fed from any thread through an [`EventFeeder`];
//! `RecordingSink` keeps everything it is sent, with arrival times, and can
//! be told to reject or disconnect to exercise failure paths.

use crate::error::{Error, Result};
use crate::port::{EventSink, EventSource};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use virtuosos_midi::MidiEvent;

enum Feed {
    Event(MidiEvent),
    ReadFailure(String),
}

/// Producer side of a [`ChannelSource`]. Dropping every feeder closes the source.
#[derive(Clone)]
pub struct EventFeeder {
    tx: Sender<Feed>,
}

impl EventFeeder {
    /// Returns `false` if the source is gone.
    pub fn send(&self, event: MidiEvent) -> bool {
        self.tx.send(Feed::Event(event)).is_ok()
    }

    /// Makes the next poll report a recoverable read failure.
    pub fn send_read_failure(&self, message: impl Into<String>) -> bool {
        self.tx.send(Feed::ReadFailure(message.into())).is_ok()
    }
}

/// Non-blocking source backed by a crossbeam channel.
pub struct ChannelSource {
    rx: Receiver<Feed>,
    closed: bool,
}

impl ChannelSource {
    pub fn new() -> (EventFeeder, ChannelSource) {
        let (tx, rx) = unbounded();
        (EventFeeder { tx }, ChannelSource { rx, closed: false })
    }

    pub fn with_capacity(capacity: usize) -> (EventFeeder, ChannelSource) {
        let (tx, rx) = bounded(capacity);
        (EventFeeder { tx }, ChannelSource { rx, closed: false })
    }
}

impl EventSource for ChannelSource {
    fn poll(&mut self) -> Result<Option<MidiEvent>> {
        if self.closed {
            return Err(Error::Disconnected("source closed".into()));
        }
        match self.rx.try_recv() {
            Ok(Feed::Event(event)) => Ok(Some(event)),
            Ok(Feed::ReadFailure(message)) => Err(Error::SourceRead(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(Error::Disconnected("all feeders dropped".into()))
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

type RejectFilter = Box<dyn Fn(&MidiEvent) -> bool + Send + Sync>;

#[derive(Default)]
struct Recording {
    events: Vec<MidiEvent>,
    arrivals: Vec<Instant>,
    rejected: Vec<MidiEvent>,
    reject_filter: Option<RejectFilter>,
    disconnected: bool,
    closed: bool,
}

/// Sink that records every accepted event.
pub struct RecordingSink {
    recording: Mutex<Recording>,
    changed: Condvar,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            recording: Mutex::new(Recording::default()),
            changed: Condvar::new(),
        }
    }

    /// Accepted events in arrival order.
    pub fn events(&self) -> Vec<MidiEvent> {
        self.recording.lock().events.clone()
    }

    pub fn events_with_arrival(&self) -> Vec<(Instant, MidiEvent)> {
        let recording = self.recording.lock();
        recording
            .arrivals
            .iter()
            .copied()
            .zip(recording.events.iter().copied())
            .collect()
    }

    /// Events that were refused by the reject filter.
    pub fn rejected(&self) -> Vec<MidiEvent> {
        self.recording.lock().rejected.clone()
    }

    pub fn len(&self) -> usize {
        self.recording.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.recording.lock().closed
    }

    pub fn clear(&self) {
        let mut recording = self.recording.lock();
        recording.events.clear();
        recording.arrivals.clear();
        recording.rejected.clear();
    }

    /// Refuse (with [`Error::Send`]) every event matching `filter`.
    pub fn reject_if(&self, filter: impl Fn(&MidiEvent) -> bool + Send + Sync + 'static) {
        self.recording.lock().reject_filter = Some(Box::new(filter));
    }

    pub fn accept_all(&self) {
        self.recording.lock().reject_filter = None;
    }

    /// Every later send fails with [`Error::Disconnected`].
    pub fn disconnect(&self) {
        self.recording.lock().disconnected = true;
    }

    /// Blocks until `predicate` holds over the accepted events or `timeout`
    /// elapses. Returns the final predicate value.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&[MidiEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recording = self.recording.lock();
        loop {
            if predicate(&recording.events) {
                return true;
            }
            if self
                .changed
                .wait_until(&mut recording, deadline)
                .timed_out()
            {
                return predicate(&recording.events);
            }
        }
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: &MidiEvent) -> Result<()> {
        let mut recording = self.recording.lock();
        if recording.disconnected {
            return Err(Error::Disconnected("recording sink disconnected".into()));
        }
        if recording
            .reject_filter
            .as_ref()
            .is_some_and(|filter| filter(event))
        {
            recording.rejected.push(*event);
            return Err(Error::Send(format!("rejected {}", event)));
        }
        recording.events.push(*event);
        recording.arrivals.push(Instant::now());
        drop(recording);
        self.changed.notify_all();
        Ok(())
    }

    fn close(&self) {
        self.recording.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_channel_source_poll() {
        let (feeder, mut source) = ChannelSource::new();
        assert!(source.poll().unwrap().is_none());

        feeder.send(MidiEvent::note_on(0, 0, 60, 100));
        feeder.send_read_failure("garbled");

        assert_eq!(
            source.poll().unwrap(),
            Some(MidiEvent::note_on(0, 0, 60, 100))
        );
        let err = source.poll().unwrap_err();
        assert!(matches!(err, Error::SourceRead(_)));
        assert!(!err.is_fatal());
        assert!(source.poll().unwrap().is_none());
    }

    #[test]
    fn test_channel_source_disconnects_when_feeders_drop() {
        let (feeder, mut source) = ChannelSource::new();
        feeder.send(MidiEvent::note_on(0, 0, 60, 100));
        drop(feeder);

        // Queued events are still delivered first.
        assert!(source.poll().unwrap().is_some());
        assert!(source.poll().unwrap_err().is_fatal());
    }

    #[test]
    fn test_channel_source_close() {
        let (_feeder, mut source) = ChannelSource::new();
        source.close();
        assert!(source.poll().unwrap_err().is_fatal());
    }

    #[test]
    fn test_recording_sink_records_in_order() {
        let sink = RecordingSink::new();
        sink.send(&MidiEvent::note_on(0, 0, 60, 100)).unwrap();
        sink.send(&MidiEvent::note_off(1, 0, 60, 0)).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert!(events[1].is_note_off());
        assert_eq!(sink.events_with_arrival().len(), 2);
    }

    #[test]
    fn test_recording_sink_reject_filter() {
        let sink = RecordingSink::new();
        sink.reject_if(|e| e.note() == Some(61));

        assert!(sink.send(&MidiEvent::note_on(0, 0, 60, 100)).is_ok());
        let err = sink.send(&MidiEvent::note_on(0, 0, 61, 100)).unwrap_err();
        assert!(matches!(err, Error::Send(_)));

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.rejected().len(), 1);

        sink.accept_all();
        assert!(sink.send(&MidiEvent::note_on(0, 0, 61, 100)).is_ok());
    }

    #[test]
    fn test_recording_sink_disconnect_is_fatal() {
        let sink = RecordingSink::new();
        sink.disconnect();
        assert!(sink
            .send(&MidiEvent::note_on(0, 0, 60, 100))
            .unwrap_err()
            .is_fatal());
    }

    #[test]
    fn test_wait_for_sees_sends_from_other_threads() {
        let sink = Arc::new(RecordingSink::new());
        let sender = Arc::clone(&sink);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.send(&MidiEvent::note_on(0, 0, 60, 100)).unwrap();
        });

        assert!(sink.wait_for(Duration::from_secs(2), |events| events.len() == 1));
        handle.join().unwrap();
        assert!(!sink.wait_for(Duration::from_millis(10), |events| events.len() == 2));
    }
}
