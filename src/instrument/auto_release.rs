use super::{Claim, InstrumentCore, DEFAULT_RELEASE_DELAY};
use tracing::debug;
use virtuosos_midi::MidiEvent;

/// Ends every note itself after the release delay.
///
/// Releases arriving from the source are swallowed: pads that send a
/// note-off the instant they are struck would otherwise cut the sample.
pub struct AutoRelease {
    pub(super) core: InstrumentCore,
}

impl AutoRelease {
    pub(super) fn new(core: InstrumentCore) -> Self {
        Self { core }
    }

    pub(crate) fn process(&self, event: &MidiEvent) -> Claim {
        let core = &self.core;
        if !core.claims(event) {
            return Claim::NotClaimed;
        }

        if event.is_note_on() {
            let delay = core.release_delay().unwrap_or(DEFAULT_RELEASE_DELAY);
            core.scheduler().start_note(&core.remap(event), Some(delay));
        } else if event.is_note_off() {
            debug!(instrument = %core.name(), note = ?event.note(), "Ignoring incoming note off");
        } else {
            core.forward(event);
        }
        Claim::Claimed
    }
}
