//! Stateless shaping functions shared by the envelope, mood and colour code.
//!
//! Ranged curves take an input domain `start..end` and map it onto
//! `min..max`. Inputs outside the domain saturate to the nearest bound, and a
//! domain with `end < start` is walked backwards (so `parabolic(x, 2.0, 60.0,
//! 30.0, ..)` grows as `x` falls from 60 towards 30).

use serde::{Deserialize, Serialize};

/// Maps `x` from `start..end` onto `min..max` linearly.
pub fn linear(x: f64, start: f64, end: f64, min: f64, max: f64) -> f64 {
    bounded(x, start, end, min, max, || {
        (max - min) * (x - start) / (end - start) + min
    })
}

/// Maps `x` from `start..end` onto `min..max` through `t^exp`.
pub fn parabolic(x: f64, exp: f64, start: f64, end: f64, min: f64, max: f64) -> f64 {
    bounded(x, start, end, min, max, || {
        (max - min) * ((x - start) / (end - start)).powf(exp) + min
    })
}

/// Logistic "S" whose transition spans roughly `0..width`.
///
/// The logistic function converges at about ±6, so the slope is normalised by
/// `12 / width` and the midpoint shifted to `width / 2`.
pub fn logistic(x: f64, width: f64) -> f64 {
    1.0 / (1.0 + (-12.0 / width * (x - 0.5 * width)).exp())
}

/// Moves `current` towards `target` by half the remaining gap, capped by the
/// per-call step limits. Never overshoots.
pub fn approach(current: f64, target: f64, max_step_up: f64, max_step_down: f64) -> f64 {
    let change = (target - current) / 2.0;
    if change > 0.0 {
        current + max_step_up.max(0.0).min(change)
    } else {
        current - max_step_down.max(0.0).min(-change)
    }
}

/// One segment of a piecewise power-law envelope.
///
/// Returns `start_amplitude` at `t = 0` and `end_amplitude` at `t = duration`.
pub fn envelope(t: f64, start_amplitude: f64, end_amplitude: f64, duration: f64, power: f64) -> f64 {
    if duration <= 0.0 {
        return end_amplitude;
    }
    let remaining = (1.0 - t / duration).clamp(0.0, 1.0);
    (start_amplitude - end_amplitude) * remaining.powf(power) + end_amplitude
}

/// Parameters for [`amplitude_curve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeCurve {
    pub scale: f64,
    pub sigmoid: f64,
    pub power: f64,
}

impl Default for AmplitudeCurve {
    fn default() -> Self {
        Self {
            scale: 1.0,
            sigmoid: 1.0,
            power: 1.0,
        }
    }
}

/// Perceptual amplitude shaping: a blend of identity and a raised-cosine "S",
/// raised to a power.
///
/// With `sigmoid = power = scale = 1` this is the identity; `sigmoid = 0`
/// gives a pure S curve, `power = 2` a parabola, `power = 0.5` a square root.
pub fn amplitude_curve(amplitude: f64, curve: &AmplitudeCurve) -> f64 {
    let s_curve = -0.5 * (std::f64::consts::PI * amplitude).cos() + 0.5;
    let blended = curve.sigmoid * amplitude + (1.0 - curve.sigmoid) * s_curve;
    curve.scale * blended.max(0.0).powf(curve.power)
}

fn bounded(x: f64, start: f64, end: f64, min: f64, max: f64, calc: impl FnOnce() -> f64) -> f64 {
    if end > start {
        if x < start {
            return min;
        }
        if x > end {
            return max;
        }
    } else if end < start {
        if x > start {
            return min;
        }
        if x < end {
            return max;
        }
    } else {
        // degenerate domain: a step at `start`
        return if x < start { min } else { max };
    }
    calc()
}

/// Serializable description of a ranged curve, used by mood channel
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Curve {
    Identity,
    Linear {
        start: f64,
        end: f64,
        #[serde(default)]
        min: f64,
        #[serde(default = "one")]
        max: f64,
    },
    Parabolic {
        exp: f64,
        start: f64,
        end: f64,
        #[serde(default)]
        min: f64,
        #[serde(default = "one")]
        max: f64,
    },
    Logistic {
        width: f64,
    },
}

fn one() -> f64 {
    1.0
}

impl Curve {
    /// Parabolic curve over `start..end` with the default `0..1` output range.
    pub fn parabolic(exp: f64, start: f64, end: f64) -> Self {
        Curve::Parabolic {
            exp,
            start,
            end,
            min: 0.0,
            max: 1.0,
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            Curve::Identity => x,
            Curve::Linear {
                start,
                end,
                min,
                max,
            } => linear(x, start, end, min, max),
            Curve::Parabolic {
                exp,
                start,
                end,
                min,
                max,
            } => parabolic(x, exp, start, end, min, max),
            Curve::Logistic { width } => logistic(x, width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn linear_saturates_outside_domain() {
        assert_eq!(linear(-1.0, 0.0, 10.0, 2.0, 4.0), 2.0);
        assert_eq!(linear(11.0, 0.0, 10.0, 2.0, 4.0), 4.0);
        assert!((linear(5.0, 0.0, 10.0, 2.0, 4.0) - 3.0).abs() < EPSILON);
    }

    #[test]
    fn reversed_domain_runs_backwards() {
        assert_eq!(parabolic(70.0, 2.0, 60.0, 30.0, 0.0, 1.0), 0.0);
        assert_eq!(parabolic(20.0, 2.0, 60.0, 30.0, 0.0, 1.0), 1.0);
        let mid = parabolic(45.0, 2.0, 60.0, 30.0, 0.0, 1.0);
        assert!((mid - 0.25).abs() < EPSILON);
    }

    #[test]
    fn degenerate_domain_is_a_step() {
        assert_eq!(linear(0.5, 1.0, 1.0, 0.0, 1.0), 0.0);
        assert_eq!(linear(1.0, 1.0, 1.0, 0.0, 1.0), 1.0);
    }

    #[test]
    fn logistic_is_centred_on_half_width() {
        assert!((logistic(5.0, 10.0) - 0.5).abs() < EPSILON);
        assert!(logistic(0.0, 10.0) < 0.01);
        assert!(logistic(10.0, 10.0) > 0.99);
    }

    #[test]
    fn approach_moves_half_the_gap_then_clamps() {
        assert!((approach(0.0, 1.0, 10.0, 10.0) - 0.5).abs() < EPSILON);
        assert!((approach(0.0, 1.0, 0.1, 10.0) - 0.1).abs() < EPSILON);
        assert!((approach(1.0, 0.0, 10.0, 0.2) - 0.8).abs() < EPSILON);
    }

    #[test]
    fn approach_never_overshoots() {
        let values = [-3.0, -1.0, -0.25, 0.0, 0.1, 0.5, 1.0, 7.5];
        let steps = [0.0, 0.001, 0.3, 1.0, 100.0];
        for &current in &values {
            for &target in &values {
                for &up in &steps {
                    for &down in &steps {
                        let next = approach(current, target, up, down);
                        let (lo, hi) = if current < target {
                            (current, target)
                        } else {
                            (target, current)
                        };
                        assert!(
                            next >= lo - EPSILON && next <= hi + EPSILON,
                            "approach({current}, {target}, {up}, {down}) = {next}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn envelope_hits_both_ends() {
        assert!((envelope(0.0, 0.2, 1.0, 50.0, 2.0) - 0.2).abs() < EPSILON);
        assert!((envelope(50.0, 0.2, 1.0, 50.0, 2.0) - 1.0).abs() < EPSILON);
        assert_eq!(envelope(10.0, 0.2, 1.0, 0.0, 2.0), 1.0);
    }

    #[test]
    fn amplitude_curve_identity_and_bounds() {
        let identity = AmplitudeCurve::default();
        assert!((amplitude_curve(0.3, &identity) - 0.3).abs() < EPSILON);

        let shaped = AmplitudeCurve {
            scale: 1.0,
            sigmoid: 0.6,
            power: 0.6,
        };
        assert!(amplitude_curve(0.0, &shaped).abs() < EPSILON);
        assert!((amplitude_curve(1.0, &shaped) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn curve_descriptions_deserialize() {
        let curve: Curve =
            serde_json::from_str(r#"{"kind":"parabolic","exp":2.0,"start":0.0,"end":1.0}"#)
                .unwrap();
        assert_eq!(curve, Curve::parabolic(2.0, 0.0, 1.0));
        assert!((curve.eval(0.5) - 0.25).abs() < EPSILON);
    }
}
