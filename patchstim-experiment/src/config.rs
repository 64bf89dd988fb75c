use patchstim_core::{Result, StimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-run settings that are not part of the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub repetitions: u32,
    /// Sleep to the configured frame rate after each flip. Off when the
    /// display already blocks on vsync.
    pub pace: bool,
    pub keep_motion_log: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            pace: false,
            keep_motion_log: true,
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StimError::io(path, e))?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repetitions == 0 {
            return Err(StimError::InvalidConfig("repetitions must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: RunConfig = serde_json::from_str(r#"{"repetitions": 3}"#).unwrap();
        assert_eq!(config.repetitions, 3);
        assert!(config.keep_motion_log);
        assert!(!config.pace);
    }

    #[test]
    fn zero_repetitions_are_rejected() {
        assert!(RunConfig::default().with_repetitions(0).validate().is_err());
    }
}
