use std::time::Duration;

use keylight_core::{
    EnvelopeStage, KeylightConfig, LightEngine, MoodChannel, NoteChange,
};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn engine_with(configure: impl FnOnce(&mut KeylightConfig)) -> LightEngine {
    let mut config = KeylightConfig::default();
    configure(&mut config);
    LightEngine::new(&config).expect("config should be valid")
}

#[test]
fn struck_note_attacks_releases_and_is_purged() {
    let mut engine = engine_with(|_| {});
    let envelope = engine.envelopes().config().clone();

    engine.feed(&[0x90, 60, 100], ms(0));
    engine.render(ms(0));
    let note = engine.envelopes().get(60).unwrap();
    assert_eq!(note.stage(), Some(EnvelopeStage::Attack));
    assert_eq!(note.amplitude(), 0.0);

    let mut previous = 0.0;
    for t in 1..envelope.attack_ms as u64 {
        engine.render(ms(t));
        let amplitude = engine.envelopes().get(60).unwrap().amplitude();
        assert!(amplitude > previous);
        previous = amplitude;
    }

    engine.feed(&[0x80, 60, 0], ms(50));
    assert!(engine.registry().is_empty());
    engine.render(ms(60));
    assert_eq!(
        engine.envelopes().get(60).unwrap().stage(),
        Some(EnvelopeStage::Release)
    );

    let release_end = 50 + envelope.release_ms as u64;
    engine.render(ms(release_end - 1));
    assert!(engine.envelopes().get(60).unwrap().amplitude() > 0.0);

    engine.render(ms(release_end));
    assert!(engine.envelopes().get(60).is_none());
}

#[test]
fn twenty_notes_on_sixteen_voices_evict_four_oldest() {
    let mut engine = engine_with(|config| config.notes.polyphony = Some(16));

    let mut evicted = Vec::new();
    for i in 0..20u8 {
        let changes = engine.feed(&[0x90, 40 + i, 80], ms(i as u64 * 50));
        for change in changes {
            if let NoteChange::Removed(note) = change {
                let oldest = 40 + evicted.len() as u8;
                assert_eq!(note.pitch, oldest);
                evicted.push(note.pitch);
            }
        }
        assert!(engine.registry().len() <= 16);
    }

    assert_eq!(evicted, vec![40, 41, 42, 43]);
    // evicted notes keep rendering their release tail
    assert_eq!(engine.envelopes().len(), 20);
}

#[test]
fn sustain_pedal_holds_then_releases_everything() {
    let mut engine = engine_with(|_| {});
    engine.feed(&[0xB0, 64, 127], ms(0));
    engine.feed(&[0x90, 60, 90, 0x90, 64, 90], ms(10));
    engine.feed(&[0x80, 60, 0, 0x80, 64, 0], ms(20));

    let held = engine.active_notes();
    assert_eq!(held.len(), 2);
    assert!(held.iter().all(|note| note.is_sustained));

    let changes = engine.feed(&[0xB0, 64, 0], ms(30));
    assert_eq!(changes.len(), 2);
    assert!(changes
        .iter()
        .all(|change| matches!(change, NoteChange::Removed(_))));
    assert!(engine.registry().is_empty());
}

#[test]
fn retrigger_during_release_is_continuous() {
    let mut engine = engine_with(|_| {});
    engine.feed(&[0x90, 60, 100], ms(0));
    let mut previous = 0.0;
    for t in 0..1500u64 {
        match t {
            300 => {
                engine.feed(&[0x80, 60, 0], ms(t));
            }
            500 => {
                engine.feed(&[0x90, 60, 70], ms(t));
            }
            _ => {}
        }
        engine.render(ms(t));
        let amplitude = engine.envelopes().get(60).unwrap().amplitude();
        assert!((amplitude - previous).abs() < 0.06, "jump at {t} ms");
        previous = amplitude;
    }
}

#[test]
fn playing_fast_rotates_hue_and_fast_notes_expire() {
    let mut engine = engine_with(|_| {});
    for i in 0..80u64 {
        let pitch = 50 + (i % 24) as u8;
        engine.feed(&[0x90, pitch, 110], ms(i * 100));
        engine.feed(&[0x80, pitch, 0], ms(i * 100 + 50));
        engine.render(ms(i * 100));
    }
    for t in (8_000..9_000).step_by(16) {
        engine.render(ms(t));
    }
    let mood = engine.last_mood().unwrap();
    assert!(mood.hue > 0.0);
    assert!(mood.levels[MoodChannel::Force] > 0.2);

    // long after playing stops, the mood list drains completely
    for t in (9_000..40_000).step_by(100) {
        engine.render(ms(t));
    }
    assert!(engine.mood().is_empty());
    assert!(engine.envelopes().is_empty());
}
