use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Monotone per-channel remapping applied to working-space colours (0..=1)
/// right before they reach the display.
pub trait GammaCorrection: Send + Sync {
    fn correct(&self, channel: usize, value: f64) -> f64;

    fn correct_rgb(&self, rgb: [f64; 3]) -> [f64; 3] {
        [
            self.correct(0, rgb[0]),
            self.correct(1, rgb[1]),
            self.correct(2, rgb[2]),
        ]
    }
}

/// Serializable description of a precomputed correction curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GammaSpec {
    /// `out = in ^ (1 / exponent)` per channel.
    Power { exponents: [f64; 3] },
    /// Evenly spaced samples over 0..=1 per channel, linearly interpolated.
    Lookup { tables: [Vec<f64>; 3] },
}

impl GammaSpec {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            GammaSpec::Power { exponents } => {
                if exponents.iter().any(|e| !e.is_finite() || *e <= 0.0) {
                    return Err("gamma exponents must be positive".into());
                }
            }
            GammaSpec::Lookup { tables } => {
                for (channel, table) in tables.iter().enumerate() {
                    if table.len() < 2 {
                        return Err(format!("gamma table {channel} needs two or more samples"));
                    }
                    if table.windows(2).any(|w| w[1] < w[0]) {
                        return Err(format!("gamma table {channel} is not monotone"));
                    }
                }
            }
        }
        Ok(())
    }
}

impl GammaCorrection for GammaSpec {
    fn correct(&self, channel: usize, value: f64) -> f64 {
        let value = value.clamp(0.0, 1.0);
        match self {
            GammaSpec::Power { exponents } => value.powf(1.0 / exponents[channel]),
            GammaSpec::Lookup { tables } => {
                let table = &tables[channel];
                let pos = value * (table.len() - 1) as f64;
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(table.len() - 1);
                let frac = pos - lo as f64;
                table[lo] + (table[hi] - table[lo]) * frac
            }
        }
    }
}

/// Shared handle to whichever correction function the session uses.
#[derive(Clone)]
pub struct GammaHandle(Arc<dyn GammaCorrection>);

impl GammaHandle {
    pub fn new(f: impl GammaCorrection + 'static) -> Self {
        GammaHandle(Arc::new(f))
    }

    pub fn correct_rgb(&self, rgb: [f64; 3]) -> [f64; 3] {
        self.0.correct_rgb(rgb)
    }

    pub fn correct(&self, channel: usize, value: f64) -> f64 {
        self.0.correct(channel, value)
    }
}

impl fmt::Debug for GammaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GammaHandle(..)")
    }
}

/// Adapts a plain function or closure, e.g. a curve fitted elsewhere.
pub struct GammaFn<F>(pub F);

impl<F> GammaCorrection for GammaFn<F>
where
    F: Fn(usize, f64) -> f64 + Send + Sync,
{
    fn correct(&self, channel: usize, value: f64) -> f64 {
        (self.0)(channel, value)
    }
}
