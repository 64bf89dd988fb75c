pub mod render;

pub use render::{SkiaDisplay, level_u8, skia_color};
