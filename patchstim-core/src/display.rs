//! The graphics capability the frame loop draws through.

use crate::error::{Result, StimError};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawShape {
    Ellipse,
    Rectangle,
}

/// Everything needed to create a drawable. Positions and sizes are pixels in
/// stimulus coordinates: origin at the display centre, y pointing up.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawableSpec {
    pub shape: DrawShape,
    pub size: [f64; 2],
    pub position: [f64; 2],
    /// Degrees, counter-clockwise.
    pub orientation: f64,
    /// Signed colour, -1..=1.
    pub color: [f64; 3],
    pub texture: Texture,
}

/// Signed RGB texels in row-major order; row 0 is the top of the drawable.
#[derive(Debug, Clone, PartialEq)]
pub enum Texture {
    Solid,
    Grid {
        cols: usize,
        rows: usize,
        texels: Vec<[f64; 3]>,
    },
    /// Straight 8-bit RGB pixels, shared so slices are not copied per frame.
    Image {
        width: u32,
        height: u32,
        rgb: Arc<Vec<u8>>,
    },
}

impl Texture {
    pub fn grid(cols: usize, rows: usize, texels: Vec<[f64; 3]>) -> Self {
        debug_assert_eq!(cols * rows, texels.len());
        Texture::Grid { cols, rows, texels }
    }
}

/// Drawing, presenting and key polling.
pub trait Display {
    fn create_drawable(&mut self, spec: DrawableSpec) -> Result<DrawableId>;
    fn set_color(&mut self, id: DrawableId, color: [f64; 3]);
    fn set_position(&mut self, id: DrawableId, position: [f64; 2]);
    fn set_texture(&mut self, id: DrawableId, texture: Texture);
    fn draw(&mut self, id: DrawableId);
    /// Presents the frame. Blocks until the next refresh on real displays.
    fn flip(&mut self) -> Result<()>;
    fn poll_cancel_key(&mut self) -> bool;

    /// Attaches a movie to a drawable; each draw advances it one frame while
    /// it plays.
    fn load_movie(&mut self, _id: DrawableId, _path: &Path) -> Result<()> {
        Err(StimError::MissingCapability("movie playback on this display"))
    }
    fn pause_movie(&mut self, _id: DrawableId) {}
    fn release(&mut self, _id: DrawableId) {}
}

/// Cooperative stop request shared between the frame loop and whoever wants
/// it to end (key handler, another thread, a signal handler).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a headless display saw during one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub id: DrawableId,
    pub position: [f64; 2],
    pub color: [f64; 3],
}

/// Display that renders nothing and remembers every draw. Used for dry runs
/// and for checking frame-by-frame behaviour.
#[derive(Debug, Default)]
pub struct Headless {
    drawables: Vec<DrawableSpec>,
    paused: Vec<bool>,
    current: Vec<DrawRecord>,
    pub frames: Vec<Vec<DrawRecord>>,
    pub cancel_after: Option<usize>,
    pub keep_frames: bool,
}

impl Headless {
    pub fn new() -> Self {
        Self {
            keep_frames: true,
            ..Self::default()
        }
    }

    /// Display that reports the cancel key once `frames` flips have happened.
    pub fn cancelling_after(frames: usize) -> Self {
        Self {
            cancel_after: Some(frames),
            ..Self::new()
        }
    }

    pub fn flips(&self) -> usize {
        self.frames.len()
    }

    pub fn spec(&self, id: DrawableId) -> Option<&DrawableSpec> {
        self.drawables.get(id.0)
    }

    pub fn is_paused(&self, id: DrawableId) -> bool {
        self.paused.get(id.0).copied().unwrap_or(false)
    }

    /// Draw records of `frame`, counting from the first flip.
    pub fn frame(&self, frame: usize) -> &[DrawRecord] {
        self.frames.get(frame).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Display for Headless {
    fn create_drawable(&mut self, spec: DrawableSpec) -> Result<DrawableId> {
        self.drawables.push(spec);
        self.paused.push(false);
        Ok(DrawableId(self.drawables.len() - 1))
    }

    fn set_color(&mut self, id: DrawableId, color: [f64; 3]) {
        if let Some(d) = self.drawables.get_mut(id.0) {
            d.color = color;
        }
    }

    fn set_position(&mut self, id: DrawableId, position: [f64; 2]) {
        if let Some(d) = self.drawables.get_mut(id.0) {
            d.position = position;
        }
    }

    fn set_texture(&mut self, id: DrawableId, texture: Texture) {
        if let Some(d) = self.drawables.get_mut(id.0) {
            d.texture = texture;
        }
    }

    fn draw(&mut self, id: DrawableId) {
        if let Some(d) = self.drawables.get(id.0) {
            self.current.push(DrawRecord {
                id,
                position: d.position,
                color: d.color,
            });
        }
    }

    fn flip(&mut self) -> Result<()> {
        let frame = std::mem::take(&mut self.current);
        if self.keep_frames {
            self.frames.push(frame);
        } else {
            self.frames.push(Vec::new());
        }
        Ok(())
    }

    fn poll_cancel_key(&mut self) -> bool {
        self.cancel_after.is_some_and(|n| self.frames.len() >= n)
    }

    fn load_movie(&mut self, id: DrawableId, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(StimError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "movie not found"),
            ));
        }
        if let Some(p) = self.paused.get_mut(id.0) {
            *p = false;
        }
        Ok(())
    }

    fn pause_movie(&mut self, id: DrawableId) {
        if let Some(p) = self.paused.get_mut(id.0) {
            *p = true;
        }
    }
}
