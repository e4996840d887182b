//! Property tests for the short-note extender on random timelines.

use proptest::prelude::*;
use std::collections::HashMap;
use virtuosos::{extend_track, NoteAction, TimelineEvent};
use virtuosos_midi_io::{MidiEvent, NoteKey};

/// Random single-channel timeline over a handful of notes so that overlaps
/// and re-attacks are common.
fn timeline() -> impl Strategy<Value = Vec<(u64, MidiEvent)>> {
    prop::collection::vec((0u64..40, 0u8..2, 60u8..63, any::<bool>()), 0..40).prop_map(
        |steps| {
            let mut tick = 0;
            steps
                .into_iter()
                .map(|(delta, channel, note, attack)| {
                    tick += delta;
                    let event = if attack {
                        MidiEvent::note_on(tick, channel, note, 100)
                    } else {
                        MidiEvent::note_off(tick, channel, note, 0)
                    };
                    (tick, event)
                })
                .collect()
        },
    )
}

fn count(events: impl IntoIterator<Item = (u64, MidiEvent)>) -> HashMap<(u64, MidiEvent), usize> {
    let mut counts = HashMap::new();
    for event in events {
        *counts.entry(event).or_insert(0) += 1;
    }
    counts
}

proptest! {
    #[test]
    fn originals_are_kept_and_only_releases_are_added(
        track in timeline(),
        min_ticks in 0u64..50,
    ) {
        let extended = extend_track(&track, min_ticks).unwrap();

        let originals: Vec<_> = extended
            .iter()
            .filter(|entry| !entry.synthetic)
            .map(|entry| (entry.tick, entry.event))
            .collect();
        prop_assert_eq!(count(originals), count(track.iter().copied()));

        for entry in extended.iter().filter(|entry| entry.synthetic) {
            prop_assert!(matches!(entry.event.note_action(), Some(NoteAction::Release(_))));
        }
        prop_assert!(extended.windows(2).all(|pair| pair[0].tick <= pair[1].tick));
    }

    #[test]
    fn every_synthetic_release_lands_min_ticks_after_an_attack(
        track in timeline(),
        min_ticks in 1u64..50,
    ) {
        let extended = extend_track(&track, min_ticks).unwrap();
        let attacks: Vec<(u64, NoteKey)> = track
            .iter()
            .filter_map(|(tick, event)| match event.note_action() {
                Some(NoteAction::Attack(key)) => Some((*tick, key)),
                _ => None,
            })
            .collect();

        for entry in extended.iter().filter(|entry| entry.synthetic) {
            let Some(NoteAction::Release(key)) = entry.event.note_action() else {
                unreachable!();
            };
            prop_assert!(attacks
                .iter()
                .any(|(tick, attack)| *attack == key && tick + min_ticks == entry.tick));
        }
    }

    #[test]
    fn zero_minimum_changes_nothing(track in timeline()) {
        let extended = extend_track(&track, 0).unwrap();
        let ticks: Vec<_> = extended.iter().map(|entry| (entry.tick, entry.event)).collect();
        prop_assert_eq!(ticks, track);
    }
}

#[test]
fn test_unterminated_attack_gets_release() {
    let track = vec![(0, MidiEvent::note_on(0, 0, 60, 100))];
    let extended = extend_track(&track, 10).unwrap();
    assert_eq!(extended.len(), 2);
    assert_eq!(extended[1].tick, 10);
    assert!(extended[1].synthetic);
    assert_eq!(extended[1].event, MidiEvent::note_off(10, 0, 60, 0));
}

#[test]
fn test_out_of_order_ticks_rejected() {
    let track = vec![
        (5, MidiEvent::note_on(5, 0, 60, 100)),
        (3, MidiEvent::note_off(3, 0, 60, 0)),
    ];
    assert!(extend_track(&track, 10).is_err());
}
