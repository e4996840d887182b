//! First-claim-wins event routing.

use crate::error::Error;
use crate::instrument::Instrument;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};
use virtuosos_midi::MidiEvent;
use virtuosos_midi_io::{Error as MidiIoError, EventSink, EventSource, SharedSink};

/// Sink wrapper shared by the router and every timer thread. Remembers the
/// first fatal failure so the router can end the session.
pub struct WatchedSink {
    inner: SharedSink,
    lost: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl WatchedSink {
    pub fn new(inner: SharedSink) -> Self {
        Self {
            inner,
            lost: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn lost_error(&self) -> MidiIoError {
        let reason = self.reason.lock().clone().unwrap_or_default();
        MidiIoError::Disconnected(reason)
    }
}

impl EventSink for WatchedSink {
    fn send(&self, event: &MidiEvent) -> virtuosos_midi_io::Result<()> {
        let result = self.inner.send(event);
        if let Err(e) = &result {
            if e.is_fatal() && !self.lost.swap(true, Ordering::AcqRel) {
                error!("MIDI output lost: {}", e);
                *self.reason.lock() = Some(e.to_string());
            }
        }
        result
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// Where one event went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Claimed by the instrument at this index.
    Claimed(usize),
    Forwarded,
}

/// Why [`Router::run`] returned.
#[derive(Debug)]
pub enum RunOutcome {
    Stopped,
    SourceFailed(Error),
    SinkFailed(Error),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, RunOutcome::Stopped)
    }
}

pub struct Router {
    instruments: Vec<Instrument>,
    sink: Arc<WatchedSink>,
    idle_sleep: Duration,
}

impl Router {
    pub fn new(instruments: Vec<Instrument>, sink: Arc<WatchedSink>) -> Self {
        Self {
            instruments,
            sink,
            idle_sleep: Duration::from_millis(1),
        }
    }

    /// Pause when the source has nothing. Default: 1 ms
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instruments_mut(&mut self) -> &mut [Instrument] {
        &mut self.instruments
    }

    pub fn sink(&self) -> &Arc<WatchedSink> {
        &self.sink
    }

    /// Offers `event` to each instrument in order. Unclaimed events are sent
    /// to the sink unchanged.
    pub fn route(&self, event: &MidiEvent) -> virtuosos_midi_io::Result<Route> {
        debug!("Received: {}", event);
        for (index, instrument) in self.instruments.iter().enumerate() {
            if instrument.process(event).is_claimed() {
                return Ok(Route::Claimed(index));
            }
        }
        self.sink.send(event)?;
        debug!("Forwarded: {}", event);
        Ok(Route::Forwarded)
    }

    /// Polls `source` until `stop` is set or an endpoint fails for good.
    /// Bad events and recoverable read failures are logged and skipped.
    pub fn run(&self, source: &mut dyn EventSource, stop: &AtomicBool) -> RunOutcome {
        while !stop.load(Ordering::Acquire) {
            if self.sink.is_lost() {
                return RunOutcome::SinkFailed(self.sink.lost_error().into());
            }

            match source.poll() {
                Ok(Some(event)) => {
                    if let Err(e) = self.route(&event) {
                        if !e.is_fatal() {
                            error!("Error processing message: {}", e);
                        }
                    }
                }
                Ok(None) => thread::sleep(self.idle_sleep),
                Err(e) if e.is_fatal() => {
                    error!("MIDI input lost: {}", e);
                    return RunOutcome::SourceFailed(e.into());
                }
                Err(e) => warn!("Error reading MIDI input: {}", e),
            }
        }

        if self.sink.is_lost() {
            return RunOutcome::SinkFailed(self.sink.lost_error().into());
        }
        RunOutcome::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentConfig, InstrumentKind};
    use virtuosos_midi_io::{ChannelSource, RecordingSink};

    fn router(configs: Vec<InstrumentConfig>) -> (Arc<RecordingSink>, Router) {
        let recording = Arc::new(RecordingSink::new());
        let sink = Arc::new(WatchedSink::new(recording.clone()));
        let instruments = configs
            .into_iter()
            .map(|config| Instrument::new(config, sink.clone()).unwrap())
            .collect();
        (recording, Router::new(instruments, sink))
    }

    #[test]
    fn test_first_claim_wins() {
        let (recording, router) = router(vec![
            InstrumentConfig::new("Pads", 0).output_channel(1),
            InstrumentConfig::new("Keys", 0)
                .kind(InstrumentKind::PassThrough)
                .output_channel(2),
        ]);

        let route = router
            .route(&MidiEvent::control_change(0, 0, 7, 100))
            .unwrap();
        assert_eq!(route, Route::Claimed(0));
        assert_eq!(recording.events(), vec![MidiEvent::control_change(0, 1, 7, 100)]);
    }

    #[test]
    fn test_unclaimed_forwarded_unchanged() {
        let (recording, router) = router(vec![InstrumentConfig::new("Pads", 0)]);
        let event = MidiEvent::note_on(3, 9, 42, 80);
        assert_eq!(router.route(&event).unwrap(), Route::Forwarded);
        assert_eq!(recording.events(), vec![event]);
    }

    #[test]
    fn test_pressure_and_system_messages_forwarded_unchanged() {
        let (recording, router) = router(vec![InstrumentConfig::new("Pads", 0)]);
        let (feeder, mut source) = ChannelSource::new();
        let incoming = vec![
            MidiEvent::from_bytes(&[0xA9, 49, 127], 1).unwrap(),
            MidiEvent::from_bytes(&[0xD3, 64], 2).unwrap(),
            MidiEvent::from_bytes(&[0xF8], 3).unwrap(),
            MidiEvent::from_bytes(&[0xF2, 0x10, 0x01], 4).unwrap(),
        ];
        for event in &incoming {
            feeder.send(*event);
        }
        drop(feeder);

        router.run(&mut source, &AtomicBool::new(false));
        assert_eq!(recording.events(), incoming);
        assert_eq!(recording.events()[0].to_bytes(), vec![0xA9, 49, 127]);
        assert!(router.instruments()[0].sounding_notes().is_empty());
    }

    #[test]
    fn test_clock_never_claimed_by_channel_zero_instrument() {
        let (recording, router) = router(vec![InstrumentConfig::new("Pads", 0).output_channel(5)]);
        let clock = MidiEvent::realtime(0, 0xF8);
        assert_eq!(router.route(&clock).unwrap(), Route::Forwarded);
        assert_eq!(recording.events(), vec![clock]);
    }

    #[test]
    fn test_run_skips_read_failures_and_stops_on_disconnect() {
        let (recording, router) = router(vec![]);
        let (feeder, mut source) = ChannelSource::new();
        feeder.send(MidiEvent::note_on(0, 0, 60, 100));
        feeder.send_read_failure("garbled");
        feeder.send(MidiEvent::note_on(0, 0, 61, 100));
        drop(feeder);

        let stop = AtomicBool::new(false);
        let outcome = router.run(&mut source, &stop);
        assert!(matches!(outcome, RunOutcome::SourceFailed(_)));
        assert_eq!(recording.len(), 2);
    }

    #[test]
    fn test_run_skips_rejected_sends() {
        let (recording, router) = router(vec![]);
        recording.reject_if(|e| e.note() == Some(60));
        let (feeder, mut source) = ChannelSource::new();
        feeder.send(MidiEvent::note_on(0, 0, 60, 100));
        feeder.send(MidiEvent::note_on(0, 0, 61, 100));
        drop(feeder);

        router.run(&mut source, &AtomicBool::new(false));
        assert_eq!(recording.events(), vec![MidiEvent::note_on(0, 0, 61, 100)]);
    }

    #[test]
    fn test_run_ends_when_sink_lost() {
        let (recording, router) = router(vec![]);
        recording.disconnect();
        let (feeder, mut source) = ChannelSource::new();
        feeder.send(MidiEvent::note_on(0, 0, 60, 100));

        let outcome = router.run(&mut source, &AtomicBool::new(false));
        assert!(matches!(outcome, RunOutcome::SinkFailed(_)));
        assert!(router.sink().is_lost());
    }

    #[test]
    fn test_run_returns_when_stop_set() {
        let (_recording, router) = router(vec![]);
        let (_feeder, mut source) = ChannelSource::new();
        let outcome = router.run(&mut source, &AtomicBool::new(true));
        assert!(matches!(outcome, RunOutcome::Stopped));
    }
}
