//! Slow-moving "mood" signals derived from recent playing.
//!
//! Every note activation is appended to a time-ordered list. Once per frame the
//! list is folded into one total per channel, each over its own sliding window,
//! then shaped and rate-limited into a smoothed level. Levels drive the
//! background tint, background brightness, global hue offset and global
//! brightness.

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::color::{self, Hsv, Rgb};
use crate::curves::{self, Curve};
use crate::notes::{ActiveNote, NoteChange};
use crate::{KeylightError, Result};

const VELOCITY_MAX: f64 = 127.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodChannel {
    /// How hard recent notes were struck.
    Force,
    /// How many notes per unit time.
    Speed,
    /// Bias towards the bass register.
    Lows,
    /// Bias towards the treble register.
    Highs,
}

impl MoodChannel {
    pub const ALL: [MoodChannel; 4] = [
        MoodChannel::Force,
        MoodChannel::Speed,
        MoodChannel::Lows,
        MoodChannel::Highs,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// One `f64` per [`MoodChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelValues([f64; 4]);

impl Index<MoodChannel> for ChannelValues {
    type Output = f64;

    fn index(&self, channel: MoodChannel) -> &f64 {
        &self.0[channel.index()]
    }
}

impl IndexMut<MoodChannel> for ChannelValues {
    fn index_mut(&mut self, channel: MoodChannel) -> &mut f64 {
        &mut self.0[channel.index()]
    }
}

/// What a channel's level feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodTarget {
    /// Adds the channel tint, weighted by level, to the background.
    Background,
    /// Averaged into the background brightness multiplier.
    BackgroundScale,
    /// Averaged into the global hue rotation, in radians.
    Hue,
    /// Averaged into the global brightness multiplier.
    Scale,
}

/// How one list item is folded into a channel total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reduction {
    /// Peak of `velocity * fraction of window remaining`.
    VelocityPeak,
    /// Onsets per ms above `above_pitch`, ignoring onsets closer than
    /// `min_spacing_ms` to the previous list item.
    OnsetRate { above_pitch: u8, min_spacing_ms: f64 },
    /// Sum of `pitch_curve(pitch) * fraction of window remaining`.
    PitchWeighted { pitch_curve: Curve },
}

impl Reduction {
    fn fold(
        &self,
        total: f64,
        note: &ActiveNote,
        previous: Option<&ActiveNote>,
        time_left_ms: f64,
        window_ms: f64,
    ) -> f64 {
        match self {
            Reduction::VelocityPeak => {
                total.max(note.velocity as f64 / VELOCITY_MAX * time_left_ms / window_ms)
            }
            Reduction::OnsetRate {
                above_pitch,
                min_spacing_ms,
            } => {
                let spaced = previous
                    .map(|prev| millis_between(prev.start_time, note.start_time) >= *min_spacing_ms)
                    .unwrap_or(true);
                if note.pitch > *above_pitch && spaced {
                    total + 1.0 / window_ms
                } else {
                    total
                }
            }
            Reduction::PitchWeighted { pitch_curve } => {
                total + pitch_curve.eval(note.pitch as f64) * time_left_ms / window_ms
            }
        }
    }
}

/// Per-pixel shaping for channels that vary along the strip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchShaping {
    /// Maps the channel total to a level.
    pub total: Curve,
    /// Weight of the level at a given pitch.
    pub pitch: Curve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodChannelConfig {
    pub name: MoodChannel,
    pub target: MoodTarget,
    pub window_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_up: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_down: Option<f64>,
    pub reduction: Reduction,
    /// Uniform shaping of the total into a level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Curve>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_shape: Option<PitchShaping>,
    /// Required by background and per-pitch channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<Hsv>,
}

impl MoodChannelConfig {
    pub fn validate(&self) -> Result<()> {
        let name = self.name;
        if !(self.window_ms > 0.0) {
            return Err(KeylightError::config(format!(
                "mood channel {name:?} needs a positive window_ms"
            )));
        }
        if self.shape.is_none() && self.pitch_shape.is_none() {
            return Err(KeylightError::config(format!(
                "mood channel {name:?} must provide shape or pitch_shape"
            )));
        }
        let needs_tint = self.pitch_shape.is_some()
            || (self.shape.is_some() && self.target == MoodTarget::Background);
        if needs_tint && self.tint.is_none() {
            return Err(KeylightError::config(format!(
                "mood channel {name:?} targets the background but has no tint"
            )));
        }
        Ok(())
    }
}

/// The stock force/speed/lows/highs channels.
pub fn default_channels() -> Vec<MoodChannelConfig> {
    vec![
        MoodChannelConfig {
            name: MoodChannel::Force,
            target: MoodTarget::BackgroundScale,
            window_ms: 20_000.0,
            max_rate_up: None,
            max_rate_down: None,
            reduction: Reduction::VelocityPeak,
            shape: Some(Curve::Parabolic {
                exp: 3.0,
                start: 0.3,
                end: 0.9,
                min: 0.2,
                max: 1.0,
            }),
            pitch_shape: None,
            tint: None,
        },
        MoodChannelConfig {
            name: MoodChannel::Speed,
            target: MoodTarget::Hue,
            window_ms: 10_000.0,
            max_rate_up: Some(0.0005),
            max_rate_down: Some(0.0002),
            reduction: Reduction::OnsetRate {
                above_pitch: 21,
                min_spacing_ms: 30.0,
            },
            shape: Some(Curve::Parabolic {
                exp: 1.5,
                start: 0.0005,
                end: 0.008,
                min: 0.0,
                max: 2.0,
            }),
            pitch_shape: None,
            tint: None,
        },
        MoodChannelConfig {
            name: MoodChannel::Lows,
            target: MoodTarget::Background,
            window_ms: 5_000.0,
            max_rate_up: None,
            max_rate_down: None,
            reduction: Reduction::PitchWeighted {
                pitch_curve: Curve::parabolic(2.5, 60.0, 30.0),
            },
            shape: None,
            pitch_shape: Some(PitchShaping {
                total: Curve::parabolic(2.0, 0.0, 1.0),
                pitch: Curve::parabolic(2.0, 70.0, 30.0),
            }),
            tint: Some(Hsv::new(320.0, 80.0, 19.0)),
        },
        MoodChannelConfig {
            name: MoodChannel::Highs,
            target: MoodTarget::Background,
            window_ms: 8_000.0,
            max_rate_up: None,
            max_rate_down: None,
            reduction: Reduction::PitchWeighted {
                pitch_curve: Curve::parabolic(2.5, 60.0, 90.0),
            },
            shape: None,
            pitch_shape: Some(PitchShaping {
                total: Curve::parabolic(2.0, 0.0, 1.0),
                pitch: Curve::parabolic(2.0, 50.0, 90.0),
            }),
            tint: Some(Hsv::new(40.0, 80.0, 19.0)),
        },
    ]
}

/// A contribution that varies along the strip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchLayer {
    pub channel: MoodChannel,
    pub tint: Rgb,
    pub level: f64,
    pub pitch_curve: Curve,
}

impl PitchLayer {
    pub fn amplitude_at(&self, pitch: f64) -> f64 {
        self.level * self.pitch_curve.eval(pitch)
    }
}

/// Everything the compositor needs from the aggregator for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Mood {
    pub background_scale: f64,
    pub background: Rgb,
    /// Raw windowed totals.
    pub totals: ChannelValues,
    /// Shaped and rate-limited levels.
    pub levels: ChannelValues,
    pub pitch_layers: Vec<PitchLayer>,
    /// Radians.
    pub hue: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodListItem {
    pub note: ActiveNote,
}

#[derive(Debug, Clone)]
pub struct MoodAggregator {
    channels: Vec<MoodChannelConfig>,
    tints: Vec<Option<Rgb>>,
    default_rate_up: f64,
    default_rate_down: f64,
    ambient: Rgb,
    /// Appended at the back, pruned from the front.
    items: VecDeque<MoodListItem>,
    levels: ChannelValues,
    last_frame: Option<Duration>,
}

impl MoodAggregator {
    pub fn new(settings: &crate::config::MoodSettings, ambient: Rgb) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            tints: settings
                .channels
                .iter()
                .map(|channel| channel.tint.map(|hsv| hsv.to_rgb()))
                .collect(),
            channels: settings.channels.clone(),
            default_rate_up: settings.max_rate_up,
            default_rate_down: settings.max_rate_down,
            ambient,
            items: VecDeque::new(),
            levels: ChannelValues::default(),
            last_frame: None,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn levels(&self) -> &ChannelValues {
        &self.levels
    }

    pub fn push(&mut self, note: ActiveNote) {
        self.items.push_back(MoodListItem { note });
    }

    /// Only activations feed the mood; releases are ignored.
    pub fn apply(&mut self, change: &NoteChange) {
        if let NoteChange::Added(note) = change {
            self.push(*note);
        }
    }

    /// Folds the list into a [`Mood`] for the frame at `now`. Rate limits scale
    /// with the time since the previous call, so levels hold still on the
    /// first call.
    pub fn update(&mut self, now: Duration) -> Mood {
        let dt = self
            .last_frame
            .map(|last| millis_between(last, now))
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        let totals = self.fold(now);

        let mut background = color::BLACK;
        let mut hues = Vec::new();
        let mut scales = Vec::new();
        let mut background_scales = Vec::new();
        let mut pitch_layers = Vec::new();

        for (channel, tint) in self.channels.iter().zip(&self.tints) {
            let total = totals[channel.name];
            let target = match (&channel.shape, &channel.pitch_shape) {
                (Some(shape), _) => shape.eval(total),
                (None, Some(pitch_shape)) => pitch_shape.total.eval(total),
                (None, None) => continue,
            };
            let up = channel.max_rate_up.unwrap_or(self.default_rate_up) * dt;
            let down = channel.max_rate_down.unwrap_or(self.default_rate_down) * dt;
            let level = curves::approach(self.levels[channel.name], target, up, down);
            self.levels[channel.name] = level;

            if let (Some(pitch_shape), Some(tint)) = (&channel.pitch_shape, tint) {
                pitch_layers.push(PitchLayer {
                    channel: channel.name,
                    tint: *tint,
                    level,
                    pitch_curve: pitch_shape.pitch,
                });
            }
            if channel.shape.is_none() {
                continue;
            }
            match channel.target {
                MoodTarget::Background => {
                    if let Some(tint) = tint {
                        background = color::add(background, color::scale(*tint, level));
                    }
                }
                MoodTarget::BackgroundScale => background_scales.push(level),
                MoodTarget::Hue => hues.push(level),
                MoodTarget::Scale => scales.push(level),
            }
        }

        let background_scale = mean(&background_scales).unwrap_or(1.0);
        background = color::floor_blend(color::scale(background, background_scale), self.ambient);

        Mood {
            background_scale,
            background,
            totals,
            levels: self.levels,
            pitch_layers,
            hue: mean(&hues).unwrap_or(0.0),
            scale: mean(&scales).unwrap_or(1.0),
        }
    }

    /// Folds every in-window item into per-channel totals and prunes the
    /// expired prefix of the list.
    fn fold(&mut self, now: Duration) -> ChannelValues {
        let mut totals = ChannelValues::default();
        let mut previous: Option<&ActiveNote> = None;
        let mut expired = 0;
        let mut in_prefix = true;

        for item in &self.items {
            let age = millis_between(item.note.start_time, now);
            let mut within = 0;
            for channel in &self.channels {
                let time_left = channel.window_ms - age;
                if time_left > 0.0 {
                    within += 1;
                    totals[channel.name] = channel.reduction.fold(
                        totals[channel.name],
                        &item.note,
                        previous,
                        time_left,
                        channel.window_ms,
                    );
                }
            }
            if within == 0 && in_prefix {
                expired += 1;
            } else {
                in_prefix = false;
            }
            previous = Some(&item.note);
        }

        if expired > 0 {
            trace!(expired, remaining = self.items.len() - expired, "pruned mood list");
            self.items.drain(..expired);
        }
        totals
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn millis_between(earlier: Duration, later: Duration) -> f64 {
    later.saturating_sub(earlier).as_secs_f64() * 1000.0
}
