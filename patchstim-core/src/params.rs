//! Converts a descriptor's physical units into the frame and pixel domain.

use crate::config::GlobalConfig;
use crate::descriptor::{StimDescriptor, StimKind};
use crate::error::{Result, StimError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub type Frame = u64;

/// Products closer than this to an integer count as that integer, so
/// `0.1 s * 60 Hz` is 6 frames and not 7.
const ROUNDING_SLACK: f64 = 1e-9;

/// `round_up(seconds * frame_rate)`.
pub fn frames(seconds: f64, frame_rate: f64) -> Frame {
    let exact = seconds * frame_rate;
    if exact <= 0.0 {
        return 0;
    }
    (exact - ROUNDING_SLACK).ceil() as Frame
}

pub fn pixels(microns: f64, pix_per_micron: f64) -> f64 {
    microns * pix_per_micron
}

/// Microns per second to pixels per frame.
pub fn speed(microns_per_sec: f64, pix_per_micron: f64, frame_rate: f64) -> f64 {
    microns_per_sec * pix_per_micron / frame_rate
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Circle,
    #[serde(alias = "rect", alias = "square")]
    Rectangle,
    Annulus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    Uniform,
    Sine,
    Square,
    Checkerboard,
    Random,
    Noise,
    Image,
    Movie,
}

impl Fill {
    pub fn is_board(&self) -> bool {
        matches!(self, Fill::Checkerboard | Fill::Random | Fill::Noise)
    }

    pub fn is_grating(&self) -> bool {
        matches!(self, Fill::Sine | Fill::Square)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    Step,
    Sine,
    Square,
    Sawtooth,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityDir {
    Single,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Rgb,
    Intensity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
    #[serde(alias = "all")]
    Global,
}

impl Channel {
    /// Indices of the RGB channels this selector modulates.
    pub fn indices(&self) -> &'static [usize] {
        match self {
            Channel::Red => &[0],
            Channel::Green => &[1],
            Channel::Blue => &[2],
            Channel::Global => &[0, 1, 2],
        }
    }

    pub fn mask(&self) -> [f64; 3] {
        let mut mask = [0.0; 3];
        for &i in self.indices() {
            mask[i] = 1.0;
        }
        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSchema {
    Polar,
    #[serde(alias = "coord", alias = "xy")]
    Coordinate,
    Direction,
}

/// A descriptor after unit conversion: frames, pixels and pixels per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StimParams {
    pub kind: StimKind,
    pub order_index: usize,

    pub shape: Shape,
    pub fill: Fill,
    pub timing: Timing,
    pub num_cycles: f64,

    pub delay: Frame,
    pub duration: Frame,
    pub force_stop: Frame,
    pub end_delay: Frame,
    pub move_delay: Frame,

    pub size: [f64; 2],
    pub location: [f64; 2],
    pub outer_diameter: f64,
    pub inner_diameter: f64,
    pub start_radius: f64,
    pub travel_distance: f64,
    pub check_size: [f64; 2],
    pub period: f64,
    pub orientation: f64,

    pub speed: f64,
    pub drift: f64,
    pub phase: f64,
    pub start_dir: f64,
    pub num_dirs: u32,
    pub num_jumps: u32,

    pub color: [f64; 3],
    pub intensity: f64,
    pub intensity_dir: IntensityDir,
    pub color_mode: ColorMode,
    pub contrast_channel: Channel,

    pub fill_seed: u64,
    pub move_seed: u64,
    pub trigger: bool,

    pub table_file: Option<PathBuf>,
    pub table_schema: TableSchema,
    pub image_file: Option<PathBuf>,
    pub shuffle: bool,
    pub movie_file: Option<PathBuf>,
}

impl StimParams {
    pub fn normalize(desc: &StimDescriptor, config: &GlobalConfig) -> Result<Self> {
        config.validate()?;
        let kind = desc.kind()?;
        let rate = config.frame_rate;
        let ppm = config.pix_per_micron;
        let mut r = ParamReader::new(&desc.parameters);

        let seconds = |r: &mut ParamReader, name: &str, default: f64| -> Result<Frame> {
            let s = r.f64(name, default)?;
            if s < 0.0 {
                return Err(StimError::invalid(name, format!("must not be negative, got {s}")));
            }
            Ok(frames(s, rate))
        };

        let delay = seconds(&mut r, "delay", 0.0)?;
        let duration = seconds(&mut r, "duration", 1.0)?;
        let force_stop = seconds(&mut r, "force_stop", 0.0)?;
        let end_delay = seconds(&mut r, "end_delay", 0.0)?;
        let move_delay = seconds(&mut r, "move_delay", 0.0)?;

        let speed_um = r.f64("speed", 100.0)?;
        if speed_um <= 0.0 && matches!(kind, StimKind::Moving | StimKind::Random) {
            return Err(StimError::invalid("speed", "must be positive for moving stims"));
        }
        let num_dirs = r.u32("num_dirs", 4)?;
        if num_dirs == 0 {
            return Err(StimError::invalid("num_dirs", "must be at least 1"));
        }
        let mut start_dir = r.f64("start_dir", 0.0)?;
        if let Some(pref) = config.pref_dir {
            start_dir = pref;
        }
        let size = r.pair("size", [100.0, 100.0])?;
        let check_size = r.pair("check_size", [20.0, 20.0])?;
        if check_size.iter().any(|c| *c <= 0.0) {
            return Err(StimError::invalid("check_size", "must be positive"));
        }
        let period = r.f64("period", 100.0)?;
        if period <= 0.0 {
            return Err(StimError::invalid("period", "must be positive"));
        }
        let color = r.triple("color", [-1.0, 1.0, -1.0])?;
        if color.iter().any(|c| !(-1.0..=1.0).contains(c)) {
            return Err(StimError::invalid("color", "channels must lie in -1..=1"));
        }

        let params = StimParams {
            kind,
            order_index: desc.order_index,
            shape: r.choice("shape", Shape::Circle)?,
            fill: r.choice("fill", Fill::Uniform)?,
            timing: r.choice("timing", Timing::Step)?,
            num_cycles: r.f64("num_cycles", 2.0)?,

            delay,
            duration,
            force_stop,
            end_delay,
            move_delay,

            size: size.map(|v| pixels(v, ppm)),
            location: r.pair("location", [0.0, 0.0])?.map(|v| pixels(v, ppm)),
            outer_diameter: pixels(r.f64("outer_diameter", 100.0)?, ppm),
            inner_diameter: pixels(r.f64("inner_diameter", 50.0)?, ppm),
            start_radius: pixels(r.f64("start_radius", 300.0)?, ppm),
            travel_distance: pixels(r.f64("travel_distance", 50.0)?, ppm),
            check_size: check_size.map(|v| pixels(v, ppm)),
            period: pixels(period, ppm),
            orientation: r.f64("orientation", 0.0)?,

            speed: speed(speed_um, ppm, rate),
            drift: r.f64("drift", 0.0)? / rate,
            phase: r.f64("phase", 0.0)?,
            start_dir,
            num_dirs,
            num_jumps: r.u32("num_jumps", 10)?,

            color,
            intensity: r.f64("intensity", 1.0)?,
            intensity_dir: r.choice("intensity_dir", IntensityDir::Single)?,
            color_mode: r.choice("color_mode", ColorMode::Rgb)?,
            contrast_channel: r.choice("contrast_channel", Channel::Green)?,

            fill_seed: r.u64("fill_seed", 1)?,
            move_seed: r.u64("move_seed", 1)?,
            trigger: r.flag("trigger", false)?,

            table_file: r.path("table_file")?,
            table_schema: r.choice("table_schema", TableSchema::Polar)?,
            image_file: r.path("image_file")?,
            shuffle: r.flag("shuffle", false)?,
            movie_file: r.path("movie_file")?,
        };

        if !(-1.0..=1.0).contains(&params.intensity) {
            return Err(StimError::invalid("intensity", "must lie in -1..=1"));
        }
        params.check_resources()?;

        for name in r.unused() {
            log::warn!(
                "{} stim {}: ignoring unknown parameter `{name}`",
                kind,
                desc.order_index
            );
        }
        Ok(params)
    }

    /// Bounding box of the drawable: `size` for rectangles, the outer
    /// diameter for discs and annuli.
    pub fn extent(&self) -> [f64; 2] {
        match self.shape {
            Shape::Rectangle => self.size,
            Shape::Circle | Shape::Annulus => [self.outer_diameter; 2],
        }
    }

    fn check_resources(&self) -> Result<()> {
        if self.kind == StimKind::Table && self.table_file.is_none() {
            return Err(StimError::invalid("table_file", "table stims need a coordinate file"));
        }
        let needs_image = self.kind == StimKind::ImageJump || self.fill == Fill::Image;
        if needs_image && self.image_file.is_none() {
            return Err(StimError::invalid("image_file", "required by this fill/stim type"));
        }
        if self.fill == Fill::Movie && self.movie_file.is_none() {
            return Err(StimError::invalid("movie_file", "movie fill needs a movie file"));
        }
        if self.kind == StimKind::ImageJump && (self.num_jumps == 0 || self.move_delay == 0) {
            return Err(StimError::invalid(
                "move_delay",
                "image jumps need num_jumps > 0 and a non-zero move_delay",
            ));
        }
        Ok(())
    }
}

/// Typed, field-by-field access to the parameter map that remembers which
/// names were consumed.
pub struct ParamReader<'a> {
    map: &'a BTreeMap<String, Value>,
    used: BTreeSet<&'a str>,
}

impl<'a> ParamReader<'a> {
    pub fn new(map: &'a BTreeMap<String, Value>) -> Self {
        Self {
            map,
            used: BTreeSet::new(),
        }
    }

    fn get(&mut self, name: &str) -> Option<&'a Value> {
        let (key, value) = self.map.get_key_value(name)?;
        self.used.insert(key.as_str());
        if value.is_null() { None } else { Some(value) }
    }

    pub fn f64(&mut self, name: &str, default: f64) -> Result<f64> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => number(name, v),
        }
    }

    pub fn u32(&mut self, name: &str, default: u32) -> Result<u32> {
        let v = self.u64(name, default as u64)?;
        u32::try_from(v).map_err(|_| StimError::invalid(name, "out of range"))
    }

    pub fn u64(&mut self, name: &str, default: u64) -> Result<u64> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => {
                let n = number(name, v)?;
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(StimError::invalid(
                        name,
                        format!("expected a whole number, got {n}"),
                    ));
                }
                Ok(n as u64)
            }
        }
    }

    pub fn flag(&mut self, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(v) => match v.as_f64() {
                Some(n) if n == 0.0 => Ok(false),
                Some(n) if n == 1.0 => Ok(true),
                _ => Err(StimError::invalid(name, format!("expected true/false, got {v}"))),
            },
        }
    }

    /// Accepts `[x, y]` or a single number used for both.
    pub fn pair(&mut self, name: &str, default: [f64; 2]) -> Result<[f64; 2]> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Array(items)) if items.len() == 2 => {
                Ok([number(name, &items[0])?, number(name, &items[1])?])
            }
            Some(v @ Value::Number(_)) => {
                let n = number(name, v)?;
                Ok([n, n])
            }
            Some(v) => Err(StimError::invalid(name, format!("expected [x, y], got {v}"))),
        }
    }

    pub fn triple(&mut self, name: &str, default: [f64; 3]) -> Result<[f64; 3]> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Array(items)) if items.len() == 3 => Ok([
                number(name, &items[0])?,
                number(name, &items[1])?,
                number(name, &items[2])?,
            ]),
            Some(v) => Err(StimError::invalid(name, format!("expected [r, g, b], got {v}"))),
        }
    }

    /// Case-insensitive enum lookup through the enum's serde names.
    pub fn choice<T: DeserializeOwned>(&mut self, name: &str, default: T) -> Result<T> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::String(s)) => {
                serde_json::from_value(Value::String(s.trim().to_ascii_lowercase()))
                    .map_err(|_| StimError::invalid(name, format!("unknown option `{s}`")))
            }
            Some(v) => Err(StimError::invalid(name, format!("expected a name, got {v}"))),
        }
    }

    pub fn path(&mut self, name: &str) -> Result<Option<PathBuf>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(PathBuf::from(s))),
            Some(v) => Err(StimError::invalid(name, format!("expected a file path, got {v}"))),
        }
    }

    pub fn unused(&self) -> Vec<&'a str> {
        self.map
            .keys()
            .map(String::as_str)
            .filter(|k| !self.used.contains(k))
            .collect()
    }
}

fn number(name: &str, v: &Value) -> Result<f64> {
    match v.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(StimError::invalid(name, format!("expected a number, got {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GlobalConfig {
        GlobalConfig::default()
    }

    #[test]
    fn seconds_become_rounded_up_frames() {
        assert_eq!(frames(0.5, 60.0), 30);
        assert_eq!(frames(0.1, 60.0), 6);
        assert_eq!(frames(0.101, 60.0), 7);
        assert_eq!(frames(0.0, 60.0), 0);
    }

    #[test]
    fn normalizing_normalized_values_is_identity() {
        for seconds in [0.0, 0.25, 1.0 / 3.0, 2.7, 10.0] {
            let once = frames(seconds, 75.0);
            assert_eq!(frames(once as f64, 1.0), once);
        }
        for microns in [0.0, 12.5, 300.0] {
            let once = pixels(microns, 1.7);
            assert_eq!(pixels(once, 1.0), once);
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let p = StimParams::normalize(&StimDescriptor::new(StimKind::Static), &config()).unwrap();
        assert_eq!(p.size, [100.0, 100.0]);
        assert_eq!(p.color, [-1.0, 1.0, -1.0]);
        assert_eq!(p.duration, 60);
        assert_eq!(p.timing, Timing::Step);
        assert_eq!(p.contrast_channel, Channel::Green);
    }

    #[test]
    fn physical_units_are_scaled() {
        let mut cfg = config();
        cfg.pix_per_micron = 2.0;
        cfg.frame_rate = 50.0;
        let desc = StimDescriptor::new(StimKind::Moving)
            .with("speed", 500.0)
            .with("size", serde_json::json!([10, 20]))
            .with("delay", 0.2)
            .with("drift", 5.0);
        let p = StimParams::normalize(&desc, &cfg).unwrap();
        assert_eq!(p.size, [20.0, 40.0]);
        assert_eq!(p.delay, 10);
        assert!((p.speed - 20.0).abs() < 1e-12);
        assert!((p.drift - 0.1).abs() < 1e-12);
    }

    #[test]
    fn pref_dir_overrides_start_dir() {
        let mut cfg = config();
        cfg.pref_dir = Some(135.0);
        let desc = StimDescriptor::new(StimKind::Moving).with("start_dir", 10.0);
        assert_eq!(StimParams::normalize(&desc, &cfg).unwrap().start_dir, 135.0);
        assert_eq!(StimParams::normalize(&desc, &config()).unwrap().start_dir, 10.0);
    }

    #[test]
    fn malformed_fields_fail_fast_with_their_name() {
        let desc = StimDescriptor::new(StimKind::Static).with("duration", "long");
        match StimParams::normalize(&desc, &config()) {
            Err(StimError::InvalidParameter { name, .. }) => assert_eq!(name, "duration"),
            other => panic!("expected invalid duration, got {other:?}"),
        }
        let desc = StimDescriptor::new(StimKind::Moving).with("num_dirs", 2.5);
        assert!(StimParams::normalize(&desc, &config()).is_err());
        let desc = StimDescriptor::new(StimKind::Static).with("timing", "wobble");
        assert!(StimParams::normalize(&desc, &config()).is_err());
    }

    #[test]
    fn enum_names_ignore_case_and_unknown_names_are_tolerated() {
        let desc = StimDescriptor::new(StimKind::Static)
            .with("contrast_channel", "Global")
            .with("fill", "CheckerBoard")
            .with("outer_diamater", 30.0);
        let p = StimParams::normalize(&desc, &config()).unwrap();
        assert_eq!(p.contrast_channel, Channel::Global);
        assert_eq!(p.fill, Fill::Checkerboard);
        assert_eq!(p.outer_diameter, 100.0);
    }

    #[test]
    fn discs_are_sized_by_their_outer_diameter() {
        let desc = StimDescriptor::new(StimKind::Static)
            .with("outer_diameter", 80.0)
            .with("size", serde_json::json!([10, 20]));
        let disc = StimParams::normalize(&desc, &config()).unwrap();
        assert_eq!(disc.extent(), [80.0, 80.0]);
        let rect = StimParams::normalize(&desc.with("shape", "rect"), &config()).unwrap();
        assert_eq!(rect.extent(), [10.0, 20.0]);
    }

    #[test]
    fn file_driven_kinds_require_their_files() {
        let desc = StimDescriptor::new(StimKind::Table);
        assert!(StimParams::normalize(&desc, &config()).is_err());
        let desc = StimDescriptor::new(StimKind::ImageJump).with("move_delay", 0.5);
        assert!(StimParams::normalize(&desc, &config()).is_err());
    }
}
