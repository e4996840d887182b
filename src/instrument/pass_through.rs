use super::{Claim, InstrumentCore};
use virtuosos_midi::MidiEvent;

/// Forwards attacks and releases to the output channel unchanged.
///
/// Notes are tracked so that an emergency stop can release whatever the
/// source left hanging. A safety release is armed only when a release delay
/// is configured.
pub struct PassThrough {
    pub(super) core: InstrumentCore,
}

impl PassThrough {
    pub(super) fn new(core: InstrumentCore) -> Self {
        Self { core }
    }

    pub(crate) fn process(&self, event: &MidiEvent) -> Claim {
        let core = &self.core;
        if !core.claims(event) {
            return Claim::NotClaimed;
        }

        if event.is_note_on() {
            core.scheduler()
                .start_note(&core.remap(event), core.release_delay());
        } else if event.is_note_off() {
            core.scheduler().forward_release(&core.remap(event));
        } else {
            core.forward(event);
        }
        Claim::Claimed
    }
}
