//! Board and grating textures.

use patchstim_core::params::{Fill, Frame, IntensityDir, StimParams};
use patchstim_core::{RgbModel, Texture};
use rand::Rng;
use rand::rngs::StdRng;
use std::f64::consts::PI;

/// Upper bound on grating texels; wider drawables stretch the texture.
const MAX_GRATING_TEXELS: usize = 2048;

/// Factor of the "off" elements of a two-level pattern.
fn off_factor(dir: IntensityDir, on: f64) -> f64 {
    match dir {
        IntensityDir::Single => 0.0,
        IntensityDir::Both => -on,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Pattern {
    Checker,
    /// Fixed seeded on/off cells.
    Random(Vec<bool>),
    /// Fresh uniform samples every frame.
    Noise,
}

/// A `cols` x `rows` grid of discrete elements covering the drawable.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub cols: usize,
    pub rows: usize,
    pattern: Pattern,
}

impl Board {
    pub fn new(params: &StimParams, rng: &mut StdRng) -> Self {
        let extent = params.extent();
        let cols = (extent[0] / params.check_size[0]).ceil().max(1.0) as usize;
        let rows = (extent[1] / params.check_size[1]).ceil().max(1.0) as usize;
        let pattern = match params.fill {
            Fill::Random => {
                Pattern::Random((0..cols * rows).map(|_| rng.random::<bool>()).collect())
            }
            Fill::Noise => Pattern::Noise,
            _ => Pattern::Checker,
        };
        Self {
            cols,
            rows,
            pattern,
        }
    }

    pub fn is_noise(&self) -> bool {
        self.pattern == Pattern::Noise
    }

    /// Texture for a timing factor. Noise boards draw one sample per element
    /// from `rng`; the other patterns never touch it.
    pub fn texture(
        &self,
        rgb: &RgbModel,
        dir: IntensityDir,
        factor: f64,
        rng: &mut StdRng,
    ) -> Texture {
        let n = self.cols * self.rows;
        let texels = match &self.pattern {
            Pattern::Checker => {
                let on = rgb.color_at(factor);
                let off = rgb.color_at(off_factor(dir, factor));
                (0..n)
                    .map(|i| {
                        let (r, c) = (i / self.cols, i % self.cols);
                        if (r + c) % 2 == 0 { on } else { off }
                    })
                    .collect()
            }
            Pattern::Random(cells) => {
                let on = rgb.color_at(factor);
                let off = rgb.color_at(off_factor(dir, factor));
                cells.iter().map(|lit| if *lit { on } else { off }).collect()
            }
            Pattern::Noise => (0..n)
                .map(|_| {
                    let u: f64 = rng.random();
                    let f = match dir {
                        IntensityDir::Single => u,
                        IntensityDir::Both => 2.0 * u - 1.0,
                    };
                    rgb.color_at(f)
                })
                .collect(),
        };
        Texture::grid(self.cols, self.rows, texels)
    }
}

/// Sine or square grating along the drawable's x axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Grating {
    square: bool,
    /// Pixels per cycle.
    period: f64,
    /// Starting phase in cycles.
    phase: f64,
    /// Cycles per frame.
    drift: f64,
    texels: usize,
    width: f64,
}

impl Grating {
    pub fn new(params: &StimParams) -> Self {
        let width = params.extent()[0].max(1.0);
        Self {
            square: params.fill == Fill::Square,
            period: params.period,
            phase: params.phase / 360.0,
            drift: params.drift,
            texels: (width.ceil() as usize).clamp(1, MAX_GRATING_TEXELS),
            width,
        }
    }

    pub fn drifts(&self) -> bool {
        self.drift != 0.0
    }

    /// Luminance profile in -1..=1 at `elapsed` frames into the window.
    pub fn profile(&self, elapsed: Frame) -> Vec<f64> {
        let shift = self.phase + self.drift * elapsed as f64;
        let px_per_texel = self.width / self.texels as f64;
        (0..self.texels)
            .map(|i| {
                let x = (i as f64 + 0.5) * px_per_texel;
                let v = (2.0 * PI * (x / self.period - shift)).sin();
                if self.square {
                    if v >= 0.0 { 1.0 } else { -1.0 }
                } else {
                    v
                }
            })
            .collect()
    }

    pub fn texture(
        &self,
        rgb: &RgbModel,
        dir: IntensityDir,
        factor: f64,
        elapsed: Frame,
    ) -> Texture {
        let texels = self
            .profile(elapsed)
            .into_iter()
            .map(|v| {
                let g = match dir {
                    IntensityDir::Single => (v + 1.0) / 2.0 * factor,
                    IntensityDir::Both => v * factor,
                };
                rgb.color_at(g)
            })
            .collect();
        Texture::grid(self.texels, 1, texels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchstim_core::{GlobalConfig, StimDescriptor, StimKind};
    use rand::SeedableRng;

    fn params(desc: StimDescriptor) -> StimParams {
        StimParams::normalize(&desc, &GlobalConfig::default()).unwrap()
    }

    fn rgb(p: &StimParams) -> RgbModel {
        RgbModel::new(p, &GlobalConfig::default())
    }

    #[test]
    fn checkerboard_alternates() {
        let p = params(
            StimDescriptor::new(StimKind::Static)
                .with("shape", "rectangle")
                .with("size", serde_json::json!([50, 40]))
                .with("fill", "checkerboard"),
        );
        let mut rng = StdRng::seed_from_u64(1);
        let board = Board::new(&p, &mut rng);
        assert_eq!((board.cols, board.rows), (3, 2));
        let texture = board.texture(&rgb(&p), p.intensity_dir, 1.0, &mut rng);
        let Texture::Grid { texels, .. } = texture else {
            panic!("expected a grid");
        };
        assert_eq!(texels[0], [-1.0, 1.0, -1.0]);
        assert_ne!(texels[0], texels[1]);
        assert_eq!(texels[0], texels[2]);
        assert_eq!(texels[1], texels[3]);
    }

    #[test]
    fn noise_resamples_every_call_but_follows_the_seed() {
        let p = params(StimDescriptor::new(StimKind::Static).with("fill", "noise"));
        let model = rgb(&p);
        let sample = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let board = Board::new(&p, &mut rng);
            let a = board.texture(&model, p.intensity_dir, 1.0, &mut rng);
            let b = board.texture(&model, p.intensity_dir, 1.0, &mut rng);
            (a, b)
        };
        let (a1, b1) = sample(3);
        let (a2, b2) = sample(3);
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn grating_drifts_by_whole_periods() {
        let mut cfg = GlobalConfig::default();
        cfg.frame_rate = 10.0;
        let desc = StimDescriptor::new(StimKind::Static)
            .with("fill", "sine")
            .with("period", 20.0)
            .with("drift", 1.0);
        let p = StimParams::normalize(&desc, &cfg).unwrap();
        let grating = Grating::new(&p);
        assert!(grating.drifts());
        let a = grating.profile(0);
        let b = grating.profile(10);
        let c = grating.profile(5);
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-9));
        assert!(a.iter().zip(&c).all(|(x, y)| (x + y).abs() < 1e-9));
    }
}
