use crate::color::{self, Rgb, Rgb8};
use crate::config::{PaletteConfig, StripConfig};
use crate::mood::Mood;

/// Linear mapping between pixel positions and (fractional) pitches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchMap {
    length: f64,
    pitch_min: f64,
    pitch_max: f64,
}

impl PitchMap {
    pub fn new(strip: &StripConfig) -> Self {
        Self {
            length: strip.length as f64,
            pitch_min: strip.pitch_min,
            pitch_max: strip.pitch_max,
        }
    }

    pub fn pitch_to_pixel(&self, pitch: f64) -> f64 {
        (pitch - self.pitch_min) / (self.pitch_max - self.pitch_min) * self.length
    }

    pub fn pixel_to_pitch(&self, pixel: f64) -> f64 {
        pixel / self.length * (self.pitch_max - self.pitch_min) + self.pitch_min
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    center: f64,
    rgb: Rgb,
}

/// Turns a [`Mood`] and the live note amplitudes into one frame of pixels.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    map: PitchMap,
    note_width: f64,
    reverse: bool,
    gamma: f64,
    cursor_rgb: Rgb,
    cursors: Vec<Cursor>,
    frame: Vec<Rgb8>,
}

impl FrameCompositor {
    pub fn new(strip: &StripConfig, palette: &PaletteConfig) -> Self {
        Self {
            map: PitchMap::new(strip),
            note_width: strip.note_width,
            reverse: strip.reverse,
            gamma: palette.gamma,
            cursor_rgb: palette.cursor.to_rgb(),
            cursors: Vec::new(),
            frame: vec![[0; 3]; strip.length],
        }
    }

    pub fn pitch_map(&self) -> &PitchMap {
        &self.map
    }

    /// The most recently composed frame.
    pub fn frame(&self) -> &[Rgb8] {
        &self.frame
    }

    /// `notes` yields `(pitch, amplitude)` for every note still sounding.
    pub fn compose<I>(&mut self, mood: &Mood, notes: I) -> &[Rgb8]
    where
        I: IntoIterator<Item = (u8, f64)>,
    {
        self.cursors.clear();
        for (pitch, amplitude) in notes {
            if amplitude <= 0.0 {
                continue;
            }
            self.cursors.push(Cursor {
                center: self.map.pitch_to_pixel(pitch as f64),
                rgb: color::scale(self.cursor_rgb, amplitude),
            });
        }
        self.cursors
            .sort_by(|a, b| a.center.total_cmp(&b.center));

        let hue = color::hue_matrix(mood.hue);
        let length = self.frame.len();
        let mut first_cursor = 0;

        for pixel in 0..length {
            let position = pixel as f64;
            let pitch = self.map.pixel_to_pitch(position);
            let mut rgb = mood.background;

            for layer in &mood.pitch_layers {
                let weight = mood.background_scale * layer.amplitude_at(pitch);
                rgb = color::add(rgb, color::scale(layer.tint, weight));
            }

            // cursors are sorted, so those left behind never matter again
            while first_cursor < self.cursors.len()
                && self.cursors[first_cursor].center <= position - self.note_width
            {
                first_cursor += 1;
            }
            for cursor in &self.cursors[first_cursor..] {
                let distance = cursor.center - position;
                if distance >= self.note_width {
                    break;
                }
                let falloff = 1.0 - distance.abs() / self.note_width;
                rgb = color::add(rgb, color::scale(cursor.rgb, falloff));
            }

            let rgb = color::scale(color::clamp_rgb(rgb), mood.scale);
            let rgb = color::clamp_rgb(color::rotate_hue(rgb, &hue));
            let out = if self.reverse { length - 1 - pixel } else { pixel };
            self.frame[out] = color::to_rgb8(color::gamma_rgb(rgb, self.gamma));
        }

        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Hsv;
    use crate::mood::ChannelValues;

    fn strip(length: usize) -> StripConfig {
        StripConfig {
            length,
            pitch_min: 0.0,
            pitch_max: 100.0,
            note_width: 3.0,
            reverse: false,
        }
    }

    fn palette() -> PaletteConfig {
        PaletteConfig {
            gamma: 1.0,
            cursor: Hsv::new(0.0, 100.0, 100.0),
            ambient: Hsv::new(0.0, 0.0, 0.0),
        }
    }

    fn dark_mood() -> Mood {
        Mood {
            background_scale: 1.0,
            background: color::BLACK,
            totals: ChannelValues::default(),
            levels: ChannelValues::default(),
            pitch_layers: Vec::new(),
            hue: 0.0,
            scale: 1.0,
        }
    }

    #[test]
    fn pitch_map_round_trips() {
        let map = PitchMap::new(&StripConfig::default());
        for pixel in [0.0, 17.5, 100.0, 143.0] {
            let back = map.pitch_to_pixel(map.pixel_to_pitch(pixel));
            assert!((back - pixel).abs() < 1e-9);
        }
        assert_eq!(map.pitch_to_pixel(21.0), 0.0);
    }

    #[test]
    fn cursor_fades_linearly_with_distance() {
        let mut compositor = FrameCompositor::new(&strip(100), &palette());
        let frame = compositor.compose(&dark_mood(), [(50, 1.0)]).to_vec();
        assert_eq!(frame[50], [255, 0, 0]);
        assert_eq!(frame[49], [170, 0, 0]);
        assert_eq!(frame[51], [170, 0, 0]);
        assert_eq!(frame[52], [85, 0, 0]);
        assert_eq!(frame[53], [0, 0, 0]);
        assert_eq!(frame[47], [0, 0, 0]);
    }

    #[test]
    fn overlapping_cursors_add() {
        let mut compositor = FrameCompositor::new(&strip(100), &palette());
        let frame = compositor
            .compose(&dark_mood(), [(50, 0.25), (52, 0.25)])
            .to_vec();
        // 0.25 * 255 * (2/3 + 2/3)
        assert_eq!(frame[51], [85, 0, 0]);
    }

    #[test]
    fn silent_notes_leave_background() {
        let mut compositor = FrameCompositor::new(&strip(10), &palette());
        let mut mood = dark_mood();
        mood.background = [20.0, 40.0, 60.0];
        let frame = compositor.compose(&mood, [(5, 0.0)]).to_vec();
        assert!(frame.iter().all(|pixel| *pixel == [20, 40, 60]));
    }

    #[test]
    fn reverse_mirrors_the_strip() {
        let mut config = strip(100);
        config.reverse = true;
        let mut compositor = FrameCompositor::new(&config, &palette());
        let frame = compositor.compose(&dark_mood(), [(10, 1.0)]).to_vec();
        assert_eq!(frame[89], [255, 0, 0]);
        assert_eq!(frame[10], [0, 0, 0]);
    }

    #[test]
    fn hue_offset_rotates_output() {
        let mut compositor = FrameCompositor::new(&strip(100), &palette());
        let mut mood = dark_mood();
        mood.hue = 2.0 * std::f64::consts::PI / 3.0;
        let frame = compositor.compose(&mood, [(50, 1.0)]).to_vec();
        assert_eq!(frame[50], [0, 255, 0]);
    }

    #[test]
    fn gamma_darkens_midtones() {
        let mut config = palette();
        config.gamma = 2.2;
        let mut compositor = FrameCompositor::new(&strip(4), &config);
        let mut mood = dark_mood();
        mood.background = [128.0, 128.0, 128.0];
        let frame = compositor.compose(&mood, std::iter::empty()).to_vec();
        assert!(frame[0][0] < 128);
    }

    #[test]
    fn global_scale_dims_everything() {
        let mut compositor = FrameCompositor::new(&strip(4), &palette());
        let mut mood = dark_mood();
        mood.background = [200.0, 100.0, 50.0];
        mood.scale = 0.5;
        let frame = compositor.compose(&mood, std::iter::empty()).to_vec();
        assert_eq!(frame[0], [100, 50, 25]);
    }
}
