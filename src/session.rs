//! Live routing session: `build -> run -> shutdown`.
//!
//! The session owns the source, the sink, the router and its instruments.
//! Interrupt handlers get a [`SessionHandle`] instead of global state.

use crate::error::Result;
use crate::instrument::{Instrument, InstrumentConfig};
use crate::panic::PanicFlush;
use crate::router::{Router, RunOutcome, WatchedSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use virtuosos_midi_io::{EventSink, EventSource, SharedSink};

/// Cloneable stop switch for a running [`Session`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Asks the session to stop. The shutdown sequence runs on the session's
    /// own thread once the router loop sees the request.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// # Example
///
/// ```
/// use std::sync::Arc;
/// use virtuosos::{InstrumentConfig, PanicFlush, Session};
/// use virtuosos_midi_io::{ChannelSource, RecordingSink};
///
/// let (feeder, source) = ChannelSource::new();
/// let sink = Arc::new(RecordingSink::new());
///
/// let mut session = Session::builder()
///     .instrument(InstrumentConfig::new("Pads", 0))
///     .panic_flush(PanicFlush::immediate())
///     .build(Box::new(source), sink.clone())?;
///
/// drop(feeder);
/// let outcome = session.run();
/// assert!(outcome.is_failure());
/// # Ok::<(), virtuosos::Error>(())
/// ```
pub struct SessionBuilder {
    instruments: Vec<InstrumentConfig>,
    panic_flush: PanicFlush,
    idle_sleep: Duration,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            panic_flush: PanicFlush::default(),
            idle_sleep: Duration::from_millis(1),
        }
    }
}

impl SessionBuilder {
    /// Instruments are offered events in the order they are added.
    pub fn instrument(mut self, config: InstrumentConfig) -> Self {
        self.instruments.push(config);
        self
    }

    pub fn instruments(mut self, configs: impl IntoIterator<Item = InstrumentConfig>) -> Self {
        self.instruments.extend(configs);
        self
    }

    pub fn panic_flush(mut self, flush: PanicFlush) -> Self {
        self.panic_flush = flush;
        self
    }

    /// Default: 1 ms
    pub fn idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Starts one release timer thread per instrument.
    pub fn build(self, source: Box<dyn EventSource>, sink: SharedSink) -> Result<Session> {
        let sink = Arc::new(WatchedSink::new(sink));
        let instruments = self
            .instruments
            .into_iter()
            .map(|config| Instrument::new(config, sink.clone()))
            .collect::<Result<Vec<_>>>()?;

        info!("Loaded instruments:");
        for instrument in &instruments {
            info!("  - {}", instrument);
        }

        Ok(Session {
            router: Router::new(instruments, Arc::clone(&sink)).with_idle_sleep(self.idle_sleep),
            source,
            sink,
            panic_flush: self.panic_flush,
            stop: Arc::new(AtomicBool::new(false)),
            shut_down: false,
        })
    }
}

pub struct Session {
    router: Router,
    source: Box<dyn EventSource>,
    sink: Arc<WatchedSink>,
    panic_flush: PanicFlush,
    stop: Arc<AtomicBool>,
    shut_down: bool,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        self.router.instruments()
    }

    pub fn instruments_mut(&mut self) -> &mut [Instrument] {
        self.router.instruments_mut()
    }

    /// Routes until a stop is requested or an endpoint fails for good, then
    /// runs [`Session::shutdown`].
    pub fn run(&mut self) -> RunOutcome {
        let outcome = if self.shut_down {
            RunOutcome::Stopped
        } else {
            self.router.run(&mut *self.source, &self.stop)
        };

        match &outcome {
            RunOutcome::Stopped => info!("Stop requested"),
            RunOutcome::SourceFailed(e) | RunOutcome::SinkFailed(e) => {
                warn!("Session ended by I/O failure: {}", e)
            }
        }
        self.shutdown();
        outcome
    }

    /// Stops intake, sends a panic flush, emergency-stops every instrument,
    /// stops their timers and closes both endpoints. Runs once; later calls
    /// do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.stop.store(true, Ordering::Release);

        info!("Performing emergency stop...");
        self.panic_flush.flush(&*self.sink);
        for instrument in self.router.instruments() {
            instrument.emergency_stop();
        }
        for instrument in self.router.instruments_mut() {
            instrument.shutdown();
        }

        self.source.close();
        self.sink.close();
        info!("Session closed");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use virtuosos_midi::{cc, MidiEvent};
    use virtuosos_midi_io::{ChannelSource, RecordingSink};

    fn session(
        configs: Vec<InstrumentConfig>,
    ) -> (virtuosos_midi_io::EventFeeder, Arc<RecordingSink>, Session) {
        let (feeder, source) = ChannelSource::new();
        let sink = Arc::new(RecordingSink::new());
        let session = Session::builder()
            .instruments(configs)
            .panic_flush(PanicFlush::immediate().rounds(1))
            .build(Box::new(source), sink.clone())
            .unwrap();
        (feeder, sink, session)
    }

    #[test]
    fn test_stop_request_runs_shutdown_sequence() {
        let (feeder, sink, mut session) = session(vec![InstrumentConfig::new("Pads", 0)
            .release_delay(Duration::from_secs(10))]);
        let handle = session.handle();

        feeder.send(MidiEvent::note_on(0, 0, 60, 100));
        let stopper = {
            let sink = sink.clone();
            thread::spawn(move || {
                sink.wait_for(Duration::from_secs(2), |events| !events.is_empty());
                handle.request_stop();
            })
        };

        let outcome = session.run();
        stopper.join().unwrap();
        assert!(matches!(outcome, RunOutcome::Stopped));
        assert!(session.is_shut_down());

        let events = sink.events();
        assert_eq!(events[0], MidiEvent::note_on(0, 0, 60, 100));
        // Panic flush comes first, then the instrument's own release and CC123.
        assert!(events[1].is_control_change(cc::ALL_SOUND_OFF));
        let tail = &events[events.len() - 2..];
        assert_eq!(tail[0], MidiEvent::note_on(0, 0, 60, 0));
        assert_eq!(tail[1], MidiEvent::control_change(0, 0, cc::ALL_NOTES_OFF, 0));
        assert!(sink.is_closed());
    }

    #[test]
    fn test_shutdown_runs_once() {
        let (_feeder, sink, mut session) = session(vec![]);
        session.shutdown();
        let after_first = sink.len();
        assert_eq!(after_first, 16 * crate::panic::MESSAGES_PER_CHANNEL);

        session.shutdown();
        assert!(matches!(session.run(), RunOutcome::Stopped));
        drop(session);
        assert_eq!(sink.len(), after_first);
    }

    #[test]
    fn test_source_failure_still_flushes() {
        let (feeder, sink, mut session) = session(vec![]);
        drop(feeder);
        let outcome = session.run();
        assert!(matches!(outcome, RunOutcome::SourceFailed(_)));
        assert_eq!(sink.len(), 16 * crate::panic::MESSAGES_PER_CHANNEL);
    }
}
