use crate::params::{IntensityDir, Timing};
use std::f64::consts::PI;

/// Colour modulation factor for a stim at `t = (frame - start) / draw_duration`.
///
/// Single-direction factors lie in 0..=1, bidirectional ones in -1..=1; `step`
/// is always 1.
pub fn factor(timing: Timing, t: f64, cycles: f64, dir: IntensityDir) -> f64 {
    let single = dir == IntensityDir::Single;
    let x = cycles * PI * t;
    match timing {
        Timing::Step => 1.0,
        Timing::Sine => {
            if single {
                (x - PI / 2.0).sin() / 2.0 + 0.5
            } else {
                x.sin()
            }
        }
        Timing::Square => {
            if single {
                if (x - PI / 2.0).sin() >= 0.0 { 1.0 } else { 0.0 }
            } else if x.sin() >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        Timing::Sawtooth => {
            let ramp = sawtooth(x);
            if single { (ramp + 1.0) / 2.0 } else { ramp }
        }
        Timing::Linear => {
            if single {
                t
            } else {
                2.0 * t - 1.0
            }
        }
    }
}

/// Width-1 sawtooth with period 2π, rising from -1 to 1.
fn sawtooth(x: f64) -> f64 {
    let tau = 2.0 * PI;
    let phase = x.rem_euclid(tau);
    -1.0 + phase / PI
}

/// Fraction of the draw window elapsed at `frame`.
pub fn time_fraction(frame: u64, start: u64, draw_duration: u64) -> f64 {
    if draw_duration == 0 {
        return 0.0;
    }
    frame.saturating_sub(start) as f64 / draw_duration as f64
}
