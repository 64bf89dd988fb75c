use crate::error::{Result, StimError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One stimulus as the caller wrote it down, in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimDescriptor {
    pub stim_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, alias = "order")]
    pub order_index: usize,
    /// Fields written by newer tools; kept out of the way and ignored.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StimDescriptor {
    pub fn new(kind: StimKind) -> Self {
        Self {
            stim_type: kind.as_str().to_string(),
            parameters: BTreeMap::new(),
            order_index: 0,
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> Result<StimKind> {
        self.stim_type.parse()
    }
}

/// The closed set of stim behaviours, resolved once at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StimKind {
    Static,
    Moving,
    Random,
    Table,
    ImageJump,
}

impl StimKind {
    pub const ALL: [StimKind; 5] = [
        StimKind::Static,
        StimKind::Moving,
        StimKind::Random,
        StimKind::Table,
        StimKind::ImageJump,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StimKind::Static => "static",
            StimKind::Moving => "moving",
            StimKind::Random => "random",
            StimKind::Table => "table",
            StimKind::ImageJump => "imagejump",
        }
    }
}

impl FromStr for StimKind {
    type Err = StimError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        StimKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered)
            .ok_or_else(|| StimError::UnknownStimType(s.to_string()))
    }
}

impl fmt::Display for StimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads a descriptor list, warning once per ignored field.
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<StimDescriptor>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| StimError::io(path, e))?;
    parse_descriptors(&text)
}

pub fn parse_descriptors(text: &str) -> Result<Vec<StimDescriptor>> {
    let list: Vec<StimDescriptor> = serde_json::from_str(text)?;
    for (index, desc) in list.iter().enumerate() {
        for field in desc.extra.keys() {
            log::warn!("stim {index}: ignoring unknown descriptor field `{field}`");
        }
    }
    Ok(list)
}

pub fn save_descriptors(path: impl AsRef<Path>, list: &[StimDescriptor]) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(list)?;
    std::fs::write(path, text).map_err(|e| StimError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_resolve_case_insensitively() {
        assert_eq!("Moving".parse::<StimKind>().unwrap(), StimKind::Moving);
        assert_eq!("imagejump".parse::<StimKind>().unwrap(), StimKind::ImageJump);
        assert!(matches!(
            "spiral".parse::<StimKind>(),
            Err(StimError::UnknownStimType(_))
        ));
    }

    #[test]
    fn unknown_fields_are_set_aside() {
        let list = parse_descriptors(
            r#"[{"stim_type": "static", "parameters": {"delay": 1.0},
                 "order": 3, "colour_profile": "v2"}]"#,
        )
        .unwrap();
        assert_eq!(list[0].order_index, 3);
        assert_eq!(list[0].parameters["delay"], 1.0);
        assert!(list[0].extra.contains_key("colour_profile"));
    }

    #[test]
    fn descriptors_round_trip_through_a_file() {
        let list = vec![
            StimDescriptor::new(StimKind::Moving)
                .with("speed", 400.0)
                .with("num_dirs", 8),
            StimDescriptor::new(StimKind::Static).with("fill", "checkerboard"),
        ];
        let path = std::env::temp_dir().join(format!("patchstim-desc-{}.json", std::process::id()));
        save_descriptors(&path, &list).unwrap();
        let loaded = load_descriptors(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, list);
    }
}
