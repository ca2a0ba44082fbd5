//! Attack/decay/sustain/release amplitude tracking for every sounding pitch.
//!
//! Amplitude is a function of the note's timestamps alone. Each stage starts
//! from the value the previous stage reached at the boundary, so the result
//! does not depend on how often a note is sampled.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::EnvelopeConfig;
use crate::curves;
use crate::notes::{ActiveNote, NoteChange};

const VELOCITY_MAX: f64 = 127.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

#[derive(Debug, Clone)]
pub struct EnvelopedNote {
    note: ActiveNote,
    stop_time: Option<Duration>,
    /// `None` until the first tick, and again after a retrigger.
    stage: Option<EnvelopeStage>,
    amplitude: f64,
    /// Where the attack starts: 0 for a fresh note, the carried amplitude
    /// for a retrigger.
    attack_from: f64,
    velocity_scale: f64,
}

impl EnvelopedNote {
    pub fn new(note: ActiveNote, config: &EnvelopeConfig) -> Self {
        Self {
            note,
            stop_time: None,
            stage: None,
            amplitude: 0.0,
            attack_from: 0.0,
            velocity_scale: velocity_scale(note.velocity, config),
        }
    }

    pub fn note(&self) -> &ActiveNote {
        &self.note
    }

    pub fn pitch(&self) -> u8 {
        self.note.pitch
    }

    pub fn stage(&self) -> Option<EnvelopeStage> {
        self.stage
    }

    pub fn stop_time(&self) -> Option<Duration> {
        self.stop_time
    }

    pub fn velocity_scale(&self) -> f64 {
        self.velocity_scale
    }

    /// Unscaled envelope amplitude as of the last [`tick`](Self::tick).
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn is_off(&self) -> bool {
        self.stage == Some(EnvelopeStage::Off)
    }

    /// Re-arms a note struck again while still tracked. The attack starts
    /// from the amplitude in effect at the new strike.
    pub fn retrigger(&mut self, note: ActiveNote, config: &EnvelopeConfig) {
        let (_, carried) = self.evaluate(note.start_time, config);
        self.note = note;
        self.stop_time = None;
        self.stage = None;
        self.attack_from = carried;
        self.velocity_scale = velocity_scale(note.velocity, config);
    }

    /// Starts the release tail. A note already releasing keeps its stop time.
    pub fn release(&mut self, now: Duration) {
        if self.stop_time.is_none() {
            self.stop_time = Some(now);
        }
    }

    pub fn tick(&mut self, now: Duration, config: &EnvelopeConfig) -> EnvelopeStage {
        let (stage, amplitude) = self.evaluate(now, config);
        self.stage = Some(stage);
        self.amplitude = amplitude;
        stage
    }

    /// Amplitude as reported to the compositor: velocity-scaled, then passed
    /// through the perceptual curve.
    pub fn output(&self, config: &EnvelopeConfig) -> f64 {
        curves::amplitude_curve(self.velocity_scale * self.amplitude, &config.curve)
    }

    fn evaluate(&self, now: Duration, config: &EnvelopeConfig) -> (EnvelopeStage, f64) {
        match self.stop_time {
            Some(stop) if now >= stop => {
                let elapsed = millis_between(stop, now);
                if elapsed >= config.release_ms {
                    return (EnvelopeStage::Off, 0.0);
                }
                let (_, from) = self.held(stop, config);
                let amplitude =
                    curves::envelope(elapsed, from, 0.0, config.release_ms, config.power);
                (EnvelopeStage::Release, amplitude)
            }
            _ => self.held(now, config),
        }
    }

    /// Attack, decay or sustain as if the key were still down at `at`.
    fn held(&self, at: Duration, config: &EnvelopeConfig) -> (EnvelopeStage, f64) {
        let elapsed = millis_between(self.note.start_time, at);
        if elapsed < config.attack_ms {
            let amplitude =
                curves::envelope(elapsed, self.attack_from, 1.0, config.attack_ms, config.power);
            (EnvelopeStage::Attack, amplitude)
        } else if elapsed - config.attack_ms < config.decay_ms {
            let amplitude = curves::envelope(
                elapsed - config.attack_ms,
                1.0,
                config.sustain_level,
                config.decay_ms,
                config.power,
            );
            (EnvelopeStage::Decay, amplitude)
        } else {
            (EnvelopeStage::Sustain, config.sustain_level)
        }
    }
}

fn velocity_scale(velocity: u8, config: &EnvelopeConfig) -> f64 {
    (velocity as f64 / VELOCITY_MAX).powf(config.velocity_power)
}

fn millis_between(earlier: Duration, later: Duration) -> f64 {
    later.saturating_sub(earlier).as_secs_f64() * 1000.0
}

/// Envelopes keyed by pitch. Outlives the registry entry of a note until its
/// release tail finishes.
#[derive(Debug, Clone)]
pub struct EnvelopeBank {
    config: EnvelopeConfig,
    notes: BTreeMap<u8, EnvelopedNote>,
}

impl EnvelopeBank {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            notes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, pitch: u8) -> Option<&EnvelopedNote> {
        self.notes.get(&pitch)
    }

    pub fn apply(&mut self, change: &NoteChange, now: Duration) {
        match change {
            NoteChange::Added(note) => match self.notes.get_mut(&note.pitch) {
                Some(existing) => existing.retrigger(*note, &self.config),
                None => {
                    self.notes
                        .insert(note.pitch, EnvelopedNote::new(*note, &self.config));
                }
            },
            NoteChange::Removed(note) => {
                if let Some(existing) = self.notes.get_mut(&note.pitch) {
                    existing.release(now);
                }
            }
        }
    }

    /// Advances every envelope to `now` and drops those whose release has
    /// completed. Returns the number dropped.
    pub fn tick(&mut self, now: Duration) -> usize {
        let before = self.notes.len();
        let config = &self.config;
        self.notes
            .retain(|_, note| note.tick(now, config) != EnvelopeStage::Off);
        before - self.notes.len()
    }

    /// Perceptual output amplitude per pitch, as of the last tick.
    pub fn amplitudes(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.notes
            .iter()
            .map(|(&pitch, note)| (pitch, note.output(&self.config)))
    }
}
