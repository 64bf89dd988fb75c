use crate::config::GlobalConfig;
use crate::gamma::GammaHandle;
use crate::params::{Channel, ColorMode, IntensityDir, StimParams};

/// Signed display colour (-1..=1) into the 0..=1 working space.
pub fn scale(c: [f64; 3]) -> [f64; 3] {
    c.map(|v| (v + 1.0) / 2.0)
}

/// Working space back to signed display colour.
pub fn unscale(c: [f64; 3]) -> [f64; 3] {
    c.map(|v| v * 2.0 - 1.0)
}

/// `(high, low, delta, background)` for one stim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbLevels {
    pub high: [f64; 3],
    pub low: [f64; 3],
    pub delta: [f64; 3],
    pub background: [f64; 3],
}

impl RgbLevels {
    fn map(&self, f: impl Fn([f64; 3]) -> [f64; 3]) -> Self {
        RgbLevels {
            high: f(self.high),
            low: f(self.low),
            delta: f(self.delta),
            background: f(self.background),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RgbModel {
    working: RgbLevels,
    channel: Channel,
    single: bool,
    gamma: Option<GammaHandle>,
}

impl RgbModel {
    pub fn new(params: &StimParams, config: &GlobalConfig) -> Self {
        Self::from_parts(
            params.color,
            config.background,
            params.color_mode,
            params.intensity,
            params.intensity_dir,
            params.contrast_channel,
            config.gamma(),
        )
    }

    pub fn from_parts(
        color: [f64; 3],
        background: [f64; 3],
        mode: ColorMode,
        intensity: f64,
        dir: IntensityDir,
        channel: Channel,
        gamma: Option<GammaHandle>,
    ) -> Self {
        let single = dir == IntensityDir::Single;
        let mask = channel.mask();
        let bg_full = scale(background);
        let mut bg = [0.0; 3];
        for i in 0..3 {
            bg[i] = bg_full[i] * mask[i];
        }

        let working = match mode {
            ColorMode::Rgb => {
                let high = scale(color);
                let low = bg_full;
                let mut delta = [0.0; 3];
                let mut background = bg;
                for &i in channel.indices() {
                    delta[i] = high[i] - low[i];
                    if single {
                        background[i] = (high[i] + low[i]) / 2.0;
                        delta[i] /= 2.0;
                    }
                }
                RgbLevels {
                    high,
                    low,
                    delta,
                    background,
                }
            }
            ColorMode::Intensity => {
                let mut delta = bg.map(|b| b * intensity);
                let high = [bg[0] + delta[0], bg[1] + delta[1], bg[2] + delta[2]];
                let mut low = [bg[0] - delta[0], bg[1] - delta[1], bg[2] - delta[2]];
                let mut background = bg;
                if single {
                    for i in 0..3 {
                        low[i] += delta[i];
                        delta[i] /= 2.0;
                        background[i] += delta[i];
                    }
                }
                RgbLevels {
                    high,
                    low,
                    delta,
                    background,
                }
            }
        };

        Self {
            working,
            channel,
            single,
            gamma,
        }
    }

    /// Levels in display space. Every component goes through the same
    /// `2x - 1` map; gamma touches only the three colour components.
    pub fn gen_rgb(&self) -> RgbLevels {
        let corrected = match &self.gamma {
            Some(g) => RgbLevels {
                high: g.correct_rgb(self.working.high),
                low: g.correct_rgb(self.working.low),
                delta: self.working.delta,
                background: g.correct_rgb(self.working.background),
            },
            None => self.working,
        };
        corrected.map(unscale)
    }

    pub fn working(&self) -> &RgbLevels {
        &self.working
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Working-space value of channel `i` for a timing factor.
    pub fn level(&self, i: usize, factor: f64) -> f64 {
        let w = &self.working;
        if !self.channel.indices().contains(&i) {
            return w.high[i];
        }
        let v = if self.single {
            (w.background[i] - w.delta[i]) + 2.0 * w.delta[i] * factor
        } else {
            w.background[i] + w.delta[i] * factor
        };
        v.clamp(0.0, 1.0)
    }

    /// Display colour for a timing factor (1 is the full `high` colour).
    pub fn color_at(&self, factor: f64) -> [f64; 3] {
        let working = [
            self.level(0, factor),
            self.level(1, factor),
            self.level(2, factor),
        ];
        self.finish(working)
    }

    /// Display colour for a working-space value sampled anywhere in low..=high.
    pub fn finish(&self, working: [f64; 3]) -> [f64; 3] {
        let corrected = match &self.gamma {
            Some(g) => g.correct_rgb(working),
            None => working,
        };
        unscale(corrected)
    }

    pub fn high_color(&self) -> [f64; 3] {
        self.finish(self.working.high)
    }

    pub fn low_color(&self) -> [f64; 3] {
        self.color_at(if self.single { 0.0 } else { -1.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intensity(intensity: f64, dir: IntensityDir) -> RgbModel {
        RgbModel::from_parts(
            [-1.0, 1.0, -1.0],
            [0.0, 0.0, 0.0],
            ColorMode::Intensity,
            intensity,
            dir,
            Channel::Global,
            None,
        )
    }

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-12)
    }

    #[test]
    fn single_direction_keeps_low_at_background() {
        let up = intensity(1.0, IntensityDir::Single).gen_rgb();
        assert!(close(up.high, [1.0; 3]));
        assert!(close(up.low, [0.0; 3]));
        assert!(close(up.delta, [-0.5; 3]));

        let down = intensity(-1.0, IntensityDir::Single).gen_rgb();
        assert!(close(down.high, [-1.0; 3]));
        assert!(close(down.low, [0.0; 3]));
    }

    #[test]
    fn low_tracks_background_for_any_intensity() {
        for i in [-1.0, -0.4, 0.0, 0.3, 1.0] {
            let levels = intensity(i, IntensityDir::Single).gen_rgb();
            assert!(close(levels.low, [0.0; 3]), "intensity {i}");
        }
    }

    #[test]
    fn bidirectional_intensity_swings_both_ways() {
        let model = intensity(0.5, IntensityDir::Both);
        let w = model.working();
        assert!(close(w.high, [0.75; 3]));
        assert!(close(w.low, [0.25; 3]));
        assert!(close(model.color_at(1.0), [0.5; 3]));
        assert!(close(model.color_at(-1.0), [-0.5; 3]));
    }

    #[test]
    fn rgb_mode_only_modulates_contrast_channel() {
        let model = RgbModel::from_parts(
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, -1.0],
            ColorMode::Rgb,
            1.0,
            IntensityDir::Single,
            Channel::Green,
            None,
        );
        let w = model.working();
        assert_eq!(w.delta, [0.0, 0.5, 0.0]);
        assert!(close(model.color_at(1.0), [-1.0, 1.0, -1.0]));
        assert!(close(model.color_at(0.0), [-1.0, -1.0, -1.0]));
        assert!(close(model.color_at(0.5), [-1.0, 0.0, -1.0]));
    }

    #[test]
    fn output_never_leaves_range_for_unit_intensity() {
        for dir in [IntensityDir::Single, IntensityDir::Both] {
            for i in [-1.0, 1.0] {
                let model = intensity(i, dir);
                for f in [-1.0, -0.5, 0.0, 0.5, 1.0] {
                    let c = model.color_at(f);
                    assert!(c.iter().all(|v| (-1.0..=1.0).contains(v)));
                }
            }
        }
    }

    #[test]
    fn gamma_is_applied_last() {
        let model = RgbModel::from_parts(
            [1.0, 1.0, 1.0],
            [-1.0, -1.0, -1.0],
            ColorMode::Rgb,
            1.0,
            IntensityDir::Single,
            Channel::Global,
            Some(GammaHandle::new(crate::gamma::GammaFn(|_c: usize, v: f64| v * v))),
        );
        // halfway in working space is 0.5, squared 0.25, displayed as -0.5
        assert!(close(model.color_at(0.5), [-0.5; 3]));
        assert!(close(model.gen_rgb().high, [1.0; 3]));
    }
}
