//! Event source and sink seams.
//!
//! The router pulls from one [`EventSource`] and pushes into one
//! [`EventSink`]. The sink is shared with every instrument's timer thread,
//! so implementations must tolerate concurrent `send` calls.

use crate::error::Result;
use std::sync::Arc;
use virtuosos_midi::MidiEvent;

pub trait EventSource: Send {
    /// Next pending event, or `None` if nothing is waiting.
    ///
    /// Must not block for longer than a few milliseconds. A fatal error
    /// (see [`crate::Error::is_fatal`]) ends the routing session.
    fn poll(&mut self) -> Result<Option<MidiEvent>>;

    fn close(&mut self) {}
}

pub trait EventSink: Send + Sync {
    /// Best-effort delivery of one event.
    fn send(&self, event: &MidiEvent) -> Result<()>;

    fn close(&self) {}
}

/// Sink handle shared between the router and timer threads.
pub type SharedSink = Arc<dyn EventSink>;

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn poll(&mut self) -> Result<Option<MidiEvent>> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
