pub mod color;
pub mod config;
pub mod descriptor;
pub mod display;
pub mod error;
pub mod gamma;
pub mod params;
pub mod trigger;
pub mod waveform;

pub use color::{RgbLevels, RgbModel};
pub use config::GlobalConfig;
pub use descriptor::{StimDescriptor, StimKind, load_descriptors, save_descriptors};
pub use display::{CancelToken, Display, DrawShape, DrawableId, DrawableSpec, Headless, Texture};
pub use error::{Result, StimError};
pub use gamma::{GammaCorrection, GammaFn, GammaHandle, GammaSpec};
pub use params::{Frame, StimParams};
pub use trigger::{NullTrigger, RecordingTrigger, TriggerDevice, TriggerSchedule};
