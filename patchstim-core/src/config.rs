use crate::error::{Result, StimError};
use crate::gamma::{GammaHandle, GammaSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Session-wide settings every normalization reads.
///
/// A run takes its own clone, so frame rate and scale stay fixed for the run
/// even if the session patches fields in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub frame_rate: f64,
    pub pix_per_micron: f64,
    pub display_size: [u32; 2],
    /// Offset of the stimulus origin from the display centre, in pixels.
    pub offset: [f64; 2],
    /// Signed colour, -1..=1 per channel.
    pub background: [f64; 3],
    pub gamma: Option<GammaSpec>,
    /// Overrides every descriptor's `start_dir` when set.
    pub pref_dir: Option<f64>,
    pub trigger_wait_frames: u32,
    pub trigger_line: u8,
    pub log: LogSettings,
    pub capture: CaptureSettings,
    #[serde(skip)]
    gamma_fn: Option<GammaHandle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            pix_per_micron: 1.0,
            display_size: [800, 600],
            offset: [0.0, 0.0],
            background: [0.0, 0.0, 0.0],
            gamma: None,
            pref_dir: None,
            trigger_wait_frames: 0,
            trigger_line: 0,
            log: LogSettings::default(),
            capture: CaptureSettings::default(),
            gamma_fn: None,
        }
    }
}

impl GlobalConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StimError::io(path, e))?;
        let config: GlobalConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| StimError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(StimError::InvalidConfig(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !(self.pix_per_micron.is_finite() && self.pix_per_micron > 0.0) {
            return Err(StimError::InvalidConfig(format!(
                "pix_per_micron must be positive, got {}",
                self.pix_per_micron
            )));
        }
        if self.display_size.contains(&0) {
            return Err(StimError::InvalidConfig("display_size must be non-zero".into()));
        }
        if self.background.iter().any(|c| !(-1.0..=1.0).contains(c)) {
            return Err(StimError::InvalidConfig(
                "background channels must lie in -1..=1".into(),
            ));
        }
        if let Some(gamma) = &self.gamma {
            gamma.validate().map_err(StimError::InvalidConfig)?;
        }
        Ok(())
    }

    /// Replaces a single top-level field, e.g. `patch("frame_rate", json!(75.0))`.
    ///
    /// The patched configuration is validated before it replaces `self`.
    pub fn patch(&mut self, field: &str, value: serde_json::Value) -> Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        let obj = current
            .as_object_mut()
            .ok_or_else(|| StimError::InvalidConfig("config is not an object".into()))?;
        if !obj.contains_key(field) {
            return Err(StimError::InvalidConfig(format!("no config field `{field}`")));
        }
        obj.insert(field.to_string(), value);
        let mut patched: GlobalConfig = serde_json::from_value(current)?;
        patched.validate()?;
        patched.gamma_fn = self.gamma_fn.take();
        *self = patched;
        log::info!("config field `{field}` patched");
        Ok(())
    }

    /// Installs a correction function that takes precedence over `gamma`.
    pub fn with_gamma_fn(mut self, gamma: GammaHandle) -> Self {
        self.gamma_fn = Some(gamma);
        self
    }

    pub fn gamma(&self) -> Option<GammaHandle> {
        self.gamma_fn
            .clone()
            .or_else(|| self.gamma.clone().map(GammaHandle::new))
    }

    /// A position guaranteed to be outside the visible area.
    pub fn offscreen(&self) -> [f64; 2] {
        [
            self.display_size[0] as f64 * 4.0,
            self.display_size[1] as f64 * 4.0,
        ]
    }

    pub fn display_size_f64(&self) -> [f64; 2] {
        [self.display_size[0] as f64, self.display_size[1] as f64]
    }
}
