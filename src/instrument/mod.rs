//! Per-channel instruments.
//!
//! An instrument claims every event on its input channel while enabled and
//! re-emits it on its output channel. The variants differ in who decides when
//! a note ends:
//!
//! - [`AutoRelease`] swallows releases from the source and ends every note
//!   itself after a fixed delay.
//! - [`PassThrough`] forwards releases as they arrive and only tracks notes
//!   so an emergency stop can silence them.

mod auto_release;
mod pass_through;

pub use auto_release::AutoRelease;
pub use pass_through::PassThrough;

use crate::error::Result;
use crate::scheduler::{NoteOffScheduler, ReleaseStyle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{info, warn};
use virtuosos_midi::MidiEvent;
use virtuosos_midi_io::SharedSink;

pub const DEFAULT_RELEASE_DELAY: Duration = Duration::from_millis(100);
pub const MIN_RELEASE_DELAY: Duration = Duration::from_millis(50);

/// Notes released by an emergency stop when nothing is tracked as sounding.
/// A heuristic covering the usual drum-pad span; it is configurable because
/// no range is right for every device.
pub const DEFAULT_FALLBACK_RANGE: RangeInclusive<u8> = 36..=81;

/// Outcome of offering an event to an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    NotClaimed,
}

impl Claim {
    pub fn is_claimed(self) -> bool {
        self == Claim::Claimed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstrumentKind {
    #[default]
    AutoRelease,
    PassThrough,
}

/// Construction parameters for an [`Instrument`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use virtuosos::{InstrumentConfig, InstrumentKind};
///
/// let config = InstrumentConfig::new("Pads", 9)
///     .output_channel(1)
///     .release_delay(Duration::from_millis(150));
/// assert_eq!(config.kind_of(), InstrumentKind::AutoRelease);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    name: String,
    kind: InstrumentKind,
    input_channel: u8,
    output_channel: Option<u8>,
    release_delay: Option<Duration>,
    release_style: ReleaseStyle,
    fallback: Option<RangeInclusive<u8>>,
    enabled: bool,
}

impl InstrumentConfig {
    pub fn new(name: impl Into<String>, input_channel: u8) -> Self {
        Self {
            name: name.into(),
            kind: InstrumentKind::default(),
            input_channel: input_channel.min(15),
            output_channel: None,
            release_delay: None,
            release_style: ReleaseStyle::default(),
            fallback: Some(DEFAULT_FALLBACK_RANGE),
            enabled: true,
        }
    }

    pub fn kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Default: the input channel.
    pub fn output_channel(mut self, channel: u8) -> Self {
        self.output_channel = Some(channel.min(15));
        self
    }

    /// Auto-release instruments default to 100 ms. Pass-through instruments
    /// only arm a timer when this is set. Floored at 50 ms.
    pub fn release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = Some(delay);
        self
    }

    pub fn release_style(mut self, style: ReleaseStyle) -> Self {
        self.release_style = style;
        self
    }

    pub fn fallback(mut self, range: RangeInclusive<u8>) -> Self {
        self.fallback = Some(range);
        self
    }

    pub fn no_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_of(&self) -> InstrumentKind {
        self.kind
    }

    pub fn input_channel(&self) -> u8 {
        self.input_channel
    }

    pub fn resolved_output_channel(&self) -> u8 {
        self.output_channel.unwrap_or(self.input_channel)
    }
}

/// State shared by every instrument variant.
pub(crate) struct InstrumentCore {
    name: String,
    input_channel: u8,
    output_channel: u8,
    enabled: bool,
    release_delay: Option<Duration>,
    fallback: Option<RangeInclusive<u8>>,
    scheduler: NoteOffScheduler,
    sink: SharedSink,
}

impl InstrumentCore {
    fn new(config: &InstrumentConfig, sink: SharedSink) -> Result<Self> {
        let release_delay = match config.kind {
            InstrumentKind::AutoRelease => {
                Some(config.release_delay.unwrap_or(DEFAULT_RELEASE_DELAY))
            }
            InstrumentKind::PassThrough => config.release_delay,
        }
        .map(|delay| delay.max(MIN_RELEASE_DELAY));

        let scheduler = NoteOffScheduler::new(&config.name, sink.clone(), config.release_style)?;
        Ok(Self {
            name: config.name.clone(),
            input_channel: config.input_channel,
            output_channel: config.resolved_output_channel(),
            enabled: config.enabled,
            release_delay,
            fallback: config.fallback.clone(),
            scheduler,
            sink,
        })
    }

    pub(crate) fn claims(&self, event: &MidiEvent) -> bool {
        self.enabled && event.channel() == Some(self.input_channel)
    }

    pub(crate) fn remap(&self, event: &MidiEvent) -> MidiEvent {
        event.with_channel(self.output_channel)
    }

    /// Sends `event` remapped to the output channel. Failures are logged.
    pub(crate) fn forward(&self, event: &MidiEvent) {
        let remapped = self.remap(event);
        if let Err(e) = self.sink.send(&remapped) {
            warn!(instrument = %self.name, "Error forwarding {}: {}", remapped, e);
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn release_delay(&self) -> Option<Duration> {
        self.release_delay
    }

    pub(crate) fn scheduler(&self) -> &NoteOffScheduler {
        &self.scheduler
    }
}

/// One configured instrument. The set of variants is closed; new behaviours
/// are added as variants.
pub enum Instrument {
    AutoRelease(AutoRelease),
    PassThrough(PassThrough),
}

impl Instrument {
    /// Builds the instrument and starts its release timer thread.
    pub fn new(config: InstrumentConfig, sink: SharedSink) -> Result<Self> {
        let core = InstrumentCore::new(&config, sink)?;
        Ok(match config.kind {
            InstrumentKind::AutoRelease => Instrument::AutoRelease(AutoRelease::new(core)),
            InstrumentKind::PassThrough => Instrument::PassThrough(PassThrough::new(core)),
        })
    }

    fn core(&self) -> &InstrumentCore {
        match self {
            Instrument::AutoRelease(inner) => &inner.core,
            Instrument::PassThrough(inner) => &inner.core,
        }
    }

    fn core_mut(&mut self) -> &mut InstrumentCore {
        match self {
            Instrument::AutoRelease(inner) => &mut inner.core,
            Instrument::PassThrough(inner) => &mut inner.core,
        }
    }

    /// Offers one event. Emits zero or more events to the sink as a side effect.
    pub fn process(&self, event: &MidiEvent) -> Claim {
        match self {
            Instrument::AutoRelease(inner) => inner.process(event),
            Instrument::PassThrough(inner) => inner.process(event),
        }
    }

    /// Silent reset: cancels pending releases and forgets sounding notes.
    pub fn stop(&self) {
        self.core().scheduler.reset();
    }

    /// Releases everything this instrument may have left sounding, then
    /// sends All Notes Off on the output channel. Never fails.
    pub fn emergency_stop(&self) {
        let core = self.core();
        warn!(instrument = %core.name, "Emergency stop");
        let released = core
            .scheduler
            .emergency_stop(core.output_channel, core.fallback.clone());
        info!(instrument = %core.name, released, "Emergency stop complete");
    }

    /// Stops the release timer thread. Pending releases are discarded.
    pub fn shutdown(&mut self) {
        self.core_mut().scheduler.shutdown();
    }

    pub fn kind(&self) -> InstrumentKind {
        match self {
            Instrument::AutoRelease(_) => InstrumentKind::AutoRelease,
            Instrument::PassThrough(_) => InstrumentKind::PassThrough,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn input_channel(&self) -> u8 {
        self.core().input_channel
    }

    pub fn output_channel(&self) -> u8 {
        self.core().output_channel
    }

    pub fn is_enabled(&self) -> bool {
        self.core().enabled
    }

    pub fn enable(&mut self) {
        self.core_mut().enabled = true;
    }

    pub fn disable(&mut self) {
        self.core_mut().enabled = false;
    }

    /// Clamped to 0..=15. Notes already sounding are still released on the
    /// channel they were attacked on.
    pub fn set_output_channel(&mut self, channel: u8) {
        let core = self.core_mut();
        core.output_channel = channel.min(15);
        info!(instrument = %core.name, "Output channel set to {}", core.output_channel);
    }

    pub fn release_delay(&self) -> Option<Duration> {
        self.core().release_delay
    }

    /// Floored at 50 ms.
    pub fn set_release_delay(&mut self, delay: Duration) {
        let core = self.core_mut();
        let delay = delay.max(MIN_RELEASE_DELAY);
        core.release_delay = Some(delay);
        info!(instrument = %core.name, "Note off delay set to {:?}", delay);
    }

    pub fn sounding_notes(&self) -> Vec<u8> {
        self.core().scheduler.sounding_notes()
    }

    pub fn pending_releases(&self) -> usize {
        self.core().scheduler.pending_count()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        write!(
            f,
            "{} (Input Ch: {}, Output Ch: {})",
            core.name, core.input_channel, core.output_channel
        )
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("input_channel", &self.input_channel())
            .field("output_channel", &self.output_channel())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
