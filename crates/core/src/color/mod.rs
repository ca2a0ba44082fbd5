use serde::{Deserialize, Serialize};

/// Floating point colour in the 8-bit scale (`0.0..=255.0` when in range).
pub type Rgb = [f64; 3];

/// Output pixel.
pub type Rgb8 = [u8; 3];

pub const BLACK: Rgb = [0.0; 3];

/// 3×3 matrix applied to an [`Rgb`] column vector.
pub type HueMatrix = [[f64; 3]; 3];

/// Colour declared in configuration as hue/saturation/value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    /// Degrees, `0..360`.
    pub hue: f64,
    /// Percent, `0..=100`.
    pub saturation: f64,
    /// Percent, `0..=100`.
    pub value: f64,
}

impl Hsv {
    pub const fn new(hue: f64, saturation: f64, value: f64) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }

    pub fn to_rgb(&self) -> Rgb {
        let rgba = colorgrad::Color::from_hsva(
            self.hue.rem_euclid(360.0),
            (self.saturation / 100.0).clamp(0.0, 1.0),
            (self.value / 100.0).clamp(0.0, 1.0),
            1.0,
        )
        .to_rgba8();
        [rgba[0] as f64, rgba[1] as f64, rgba[2] as f64]
    }
}

pub fn to_rgb8(rgb: Rgb) -> Rgb8 {
    rgb.map(clamp_channel)
}

pub fn clamp_channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

pub fn clamp_rgb(rgb: Rgb) -> Rgb {
    rgb.map(|value| if value.is_nan() { 0.0 } else { value.clamp(0.0, 255.0) })
}

pub fn add(a: Rgb, b: Rgb) -> Rgb {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn scale(rgb: Rgb, factor: f64) -> Rgb {
    rgb.map(|value| value * factor)
}

/// Lifts `base` up to the total brightness of `floor`, adding `floor`'s hue in
/// proportion to the shortfall. A base at least as bright as the floor is
/// returned unchanged.
pub fn floor_blend(base: Rgb, floor: Rgb) -> Rgb {
    let floor_sum: f64 = floor.iter().sum();
    let difference = floor_sum - base.iter().sum::<f64>();
    if difference <= 0.0 || floor_sum <= 0.0 {
        return base;
    }
    let weight = difference / floor_sum;
    [
        base[0] + weight * floor[0],
        base[1] + weight * floor[1],
        base[2] + weight * floor[2],
    ]
}

pub fn gamma(value: f64, exponent: f64) -> f64 {
    255.0 * (value.max(0.0) / 255.0).powf(exponent)
}

pub fn gamma_rgb(rgb: Rgb, exponent: f64) -> Rgb {
    rgb.map(|value| gamma(value, exponent))
}

/// Rotation about the grey axis by `radians`, preserving luminance of neutral
/// colours.
pub fn hue_matrix(radians: f64) -> HueMatrix {
    const K0: f64 = 1.0 / 3.0;
    let k1 = K0.sqrt();
    let cos = radians.cos();
    let sin = radians.sin();
    let diagonal = cos + K0 * (1.0 - cos);
    let plus = K0 * (1.0 - cos) + k1 * sin;
    let minus = K0 * (1.0 - cos) - k1 * sin;
    [
        [diagonal, minus, plus],
        [plus, diagonal, minus],
        [minus, plus, diagonal],
    ]
}

pub fn rotate_hue(rgb: Rgb, matrix: &HueMatrix) -> Rgb {
    let row = |r: &[f64; 3]| r[0] * rgb[0] + r[1] * rgb[1] + r[2] * rgb[2];
    [row(&matrix[0]), row(&matrix[1]), row(&matrix[2])]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Rgb, b: Rgb) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(Hsv::new(0.0, 100.0, 100.0).to_rgb(), [255.0, 0.0, 0.0]);
        assert_eq!(Hsv::new(120.0, 100.0, 100.0).to_rgb(), [0.0, 255.0, 0.0]);
        assert_eq!(Hsv::new(0.0, 0.0, 0.0).to_rgb(), BLACK);
    }

    #[test]
    fn zero_rotation_is_identity() {
        let color = [200.0, 40.0, 7.0];
        assert!(close(rotate_hue(color, &hue_matrix(0.0)), color));
    }

    #[test]
    fn third_turn_cycles_channels() {
        let rotated = rotate_hue([255.0, 0.0, 0.0], &hue_matrix(2.0 * std::f64::consts::PI / 3.0));
        assert!(close(rotated, [0.0, 255.0, 0.0]));
    }

    #[test]
    fn grey_survives_any_rotation() {
        let grey = [90.0, 90.0, 90.0];
        assert!(close(rotate_hue(grey, &hue_matrix(1.234)), grey));
    }

    #[test]
    fn floor_blend_only_brightens() {
        let floor = [10.0, 2.0, 2.0];
        assert_eq!(floor_blend([50.0, 50.0, 50.0], floor), [50.0, 50.0, 50.0]);
        let lifted = floor_blend(BLACK, floor);
        assert!(close(lifted, floor));
        let partial = floor_blend([4.0, 0.0, 3.0], floor);
        assert!((partial.iter().sum::<f64>() - 14.0).abs() < 1e-9);
    }

    #[test]
    fn gamma_keeps_endpoints() {
        assert_eq!(gamma(0.0, 2.2), 0.0);
        assert!((gamma(255.0, 2.2) - 255.0).abs() < 1e-9);
        assert!(gamma(128.0, 2.2) < 128.0);
    }

    #[test]
    fn clamping_rounds_and_saturates() {
        assert_eq!(to_rgb8([-4.0, 127.6, 300.0]), [0, 128, 255]);
        assert_eq!(clamp_channel(f64::NAN), 0);
    }
}
