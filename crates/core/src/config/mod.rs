use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::color::Hsv;
use crate::curves::AmplitudeCurve;
use crate::mood::{self, MoodChannelConfig};
use crate::{KeylightError, Result};

/// Top-level configuration. Every section falls back to its defaults when
/// omitted from the JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeylightConfig {
    pub notes: NotesConfig,
    pub strip: StripConfig,
    pub frame: FrameConfig,
    pub envelope: EnvelopeConfig,
    pub palette: PaletteConfig,
    pub mood: MoodSettings,
}

impl KeylightConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects configurations that would render garbage.
    pub fn validate(&self) -> Result<()> {
        self.strip.validate()?;
        self.frame.validate()?;
        self.envelope.validate()?;
        self.mood.validate()?;
        if !(self.palette.gamma > 0.0) {
            return Err(KeylightError::config("palette.gamma must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Maximum simultaneously tracked notes; `null` for unlimited.
    pub polyphony: Option<usize>,
    /// Minimum spacing of the coalesced "update" notification.
    pub update_debounce_ms: u64,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            polyphony: Some(16),
            update_debounce_ms: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    pub length: usize,
    /// Pitch shown at pixel 0.
    pub pitch_min: f64,
    /// Pitch shown one pixel past the end of the strip.
    pub pitch_max: f64,
    /// Radius in pixels over which a note cursor fades out.
    pub note_width: f64,
    /// Strip is mounted with pixel 0 at the treble end.
    pub reverse: bool,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            length: 144,
            pitch_min: 21.0,
            pitch_max: 108.0,
            note_width: 3.0,
            reverse: false,
        }
    }
}

impl StripConfig {
    fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(KeylightError::config("strip.length must be at least 1"));
        }
        if !(self.pitch_max > self.pitch_min) {
            return Err(KeylightError::config(
                "strip.pitch_max must be greater than strip.pitch_min",
            ));
        }
        if !(self.note_width > 0.0) {
            return Err(KeylightError::config("strip.note_width must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub rate: f64,
    /// How often the achieved frame rate is logged.
    pub report_interval_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            rate: 60.0,
            report_interval_ms: 5_000,
        }
    }
}

impl FrameConfig {
    fn validate(&self) -> Result<()> {
        if !(self.rate > 0.0 && self.rate.is_finite()) {
            return Err(KeylightError::config("frame.rate must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub attack_ms: f64,
    pub decay_ms: f64,
    pub sustain_level: f64,
    pub release_ms: f64,
    /// Shaping exponent of every stage.
    pub power: f64,
    /// Exponent applied to `velocity / 127`.
    pub velocity_power: f64,
    pub curve: AmplitudeCurve,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack_ms: 40.0,
            decay_ms: 400.0,
            sustain_level: 0.5,
            release_ms: 600.0,
            power: 2.0,
            velocity_power: 0.8,
            curve: AmplitudeCurve {
                scale: 1.0,
                sigmoid: 0.6,
                power: 0.6,
            },
        }
    }
}

impl EnvelopeConfig {
    fn validate(&self) -> Result<()> {
        let durations = [self.attack_ms, self.decay_ms, self.release_ms];
        if durations.iter().any(|d| !(*d >= 0.0)) {
            return Err(KeylightError::config(
                "envelope durations must be zero or positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.sustain_level) {
            return Err(KeylightError::config(
                "envelope.sustain_level must be within 0..=1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub gamma: f64,
    /// Colour of a fully lit note cursor.
    pub cursor: Hsv,
    /// Ambient floor the background never drops below.
    pub ambient: Hsv,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            gamma: 2.2,
            cursor: Hsv::new(0.0, 60.0, 100.0),
            ambient: Hsv::new(0.0, 75.0, 4.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodSettings {
    /// Rate limits for channels that don't declare their own, per ms.
    pub max_rate_up: f64,
    pub max_rate_down: f64,
    pub channels: Vec<MoodChannelConfig>,
}

impl Default for MoodSettings {
    fn default() -> Self {
        Self {
            max_rate_up: 0.002,
            max_rate_down: 0.0005,
            channels: mood::default_channels(),
        }
    }
}

impl MoodSettings {
    pub fn validate(&self) -> Result<()> {
        for (index, channel) in self.channels.iter().enumerate() {
            channel.validate()?;
            if self.channels[..index]
                .iter()
                .any(|other| other.name == channel.name)
            {
                return Err(KeylightError::config(format!(
                    "mood channel {:?} is declared twice",
                    channel.name
                )));
            }
        }
        Ok(())
    }
}
