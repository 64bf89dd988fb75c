use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between reading a descriptor and flipping the
/// last frame of a run.
#[derive(Debug, Error)]
pub enum StimError {
    #[error("parameter `{name}` is invalid: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unknown stim type `{0}`")]
    UnknownStimType(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported table file {path}: {reason}")]
    UnsupportedTable { path: PathBuf, reason: String },

    #[error("malformed table {path} at line {line}: {reason}")]
    TableFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("missing capability: {0}")]
    MissingCapability(&'static str),

    #[error("image {path}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("position buffer exhausted twice at frame {frame} (stim {stim})")]
    BufferExhausted { stim: usize, frame: u64 },

    #[error("display: {0}")]
    Display(String),

    #[error("trigger device: {0}")]
    Trigger(String),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StimError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        StimError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StimError::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration errors abort before the run starts; everything else can
    /// only happen once frames are flowing.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            StimError::BufferExhausted { .. } | StimError::Display(_) | StimError::Trigger(_)
        )
    }
}

pub type Result<T, E = StimError> = std::result::Result<T, E>;
