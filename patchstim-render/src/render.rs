use anyhow::{Context, anyhow};
use bytemuck::{cast_slice, cast_slice_mut};
use patchstim_core::{
    CancelToken, Display, DrawShape, DrawableId, DrawableSpec, GlobalConfig, Result, StimError,
    Texture,
};
use patchstim_timing::{FrameStats, HighPrecisionTimer, Timer};
use std::path::{Path, PathBuf};
use tiny_skia::{
    Color, FillRule, FilterQuality, IntSize, Paint, PathBuilder, Pattern, Pixmap, Rect,
    SpreadMode, Transform,
};

/// Signed colour channel to an 8-bit level.
pub fn level_u8(v: f64) -> u8 {
    (((v.clamp(-1.0, 1.0) + 1.0) / 2.0) * 255.0).round() as u8
}

pub fn skia_color(c: [f64; 3]) -> Color {
    Color::from_rgba8(level_u8(c[0]), level_u8(c[1]), level_u8(c[2]), 255)
}

fn display_err(e: anyhow::Error) -> StimError {
    StimError::Display(format!("{e:#}"))
}

/// Rasterizes a texture into an opaque pixmap. `Solid` has none.
fn texture_pixmap(texture: &Texture) -> anyhow::Result<Option<Pixmap>> {
    let (w, h, data) = match texture {
        Texture::Solid => return Ok(None),
        Texture::Grid { cols, rows, texels } => {
            let data = texels
                .iter()
                .flat_map(|t| [level_u8(t[0]), level_u8(t[1]), level_u8(t[2]), 255])
                .collect::<Vec<u8>>();
            (*cols as u32, *rows as u32, data)
        }
        Texture::Image { width, height, rgb } => {
            let data = rgb
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect::<Vec<u8>>();
            (*width, *height, data)
        }
    };
    let size = IntSize::from_wh(w, h).ok_or_else(|| anyhow!("empty texture {w}x{h}"))?;
    let pixmap = Pixmap::from_vec(data, size)
        .ok_or_else(|| anyhow!("texture data does not match {w}x{h}"))?;
    Ok(Some(pixmap))
}

/// Movie frames premultiplied once at load time.
fn movie_pixmaps(path: &Path) -> anyhow::Result<Vec<Pixmap>> {
    let movie = patchstim_cache::load_movie(path).map_err(|e| anyhow!(e))?;
    movie
        .frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let (w, h) = frame.dimensions();
            let data = frame
                .as_raw()
                .chunks_exact(4)
                .flat_map(|px| {
                    let a = px[3] as u16;
                    let pm = |c: u8| ((c as u16 * a + 127) / 255) as u8;
                    [pm(px[0]), pm(px[1]), pm(px[2]), px[3]]
                })
                .collect::<Vec<u8>>();
            let size = IntSize::from_wh(w, h).context("empty movie frame")?;
            Pixmap::from_vec(data, size).with_context(|| format!("movie frame {i} is malformed"))
        })
        .collect()
}

struct Playback {
    frames: Vec<Pixmap>,
    next: usize,
    paused: bool,
}

impl Playback {
    fn current(&self) -> Option<&Pixmap> {
        self.frames.get(self.next)
    }

    /// Holds the last frame once the movie runs out.
    fn advance(&mut self) {
        if !self.paused && self.next + 1 < self.frames.len() {
            self.next += 1;
        }
    }
}

struct Slot {
    spec: DrawableSpec,
    texture: Option<Pixmap>,
    movie: Option<Playback>,
}

/// Software display. Draws into an offscreen canvas; `flip` publishes the
/// canvas as the presented frame and clears it to the background.
pub struct SkiaDisplay {
    width: u32,
    height: u32,
    /// Canvas position of stimulus coordinate (0, 0).
    origin: (f32, f32),
    background: Color,
    canvas: Pixmap,
    presented: Vec<u32>,
    slots: Vec<Option<Slot>>,
    cancel: CancelToken,
    capture_dir: Option<PathBuf>,
    flips: u64,
    frame_started: Option<u64>,
    timer: HighPrecisionTimer,
}

impl SkiaDisplay {
    pub fn new(config: &GlobalConfig) -> Result<Self> {
        let [width, height] = config.display_size;
        let mut canvas = Pixmap::new(width, height).ok_or_else(|| {
            StimError::Display(format!("cannot allocate a {width}x{height} canvas"))
        })?;
        let background = skia_color(config.background);
        canvas.fill(background);
        let mut presented = vec![0u32; width as usize * height as usize];
        cast_slice_mut::<u32, u8>(&mut presented).copy_from_slice(canvas.data());

        let capture_dir = if config.capture.enabled {
            std::fs::create_dir_all(&config.capture.dir)
                .map_err(|e| StimError::io(&config.capture.dir, e))?;
            Some(config.capture.dir.clone())
        } else {
            None
        };
        log::debug!(
            "skia display {width}x{height}, offset {:?}, capture {:?}",
            config.offset,
            capture_dir
        );
        Ok(Self {
            width,
            height,
            origin: (
                width as f32 / 2.0 + config.offset[0] as f32,
                height as f32 / 2.0 - config.offset[1] as f32,
            ),
            background,
            canvas,
            presented,
            slots: Vec::new(),
            cancel: CancelToken::new(),
            capture_dir,
            flips: 0,
            frame_started: None,
            timer: HighPrecisionTimer::new(),
        })
    }

    /// Reports the cancel key whenever `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    /// RGBA bytes of the last presented frame.
    pub fn frame_rgba(&self) -> &[u8] {
        cast_slice(&self.presented)
    }

    /// Copies the presented frame into a window surface of the same size.
    pub fn copy_to(&self, frame: &mut [u8]) {
        let src = self.frame_rgba();
        let n = src.len().min(frame.len());
        frame[..n].copy_from_slice(&src[..n]);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let px = self.presented[(y * self.width + x) as usize];
        Some(px.to_ne_bytes())
    }

    /// Canvas coordinates of a point in stimulus space.
    pub fn to_canvas(&self, p: [f64; 2]) -> (f32, f32) {
        (self.origin.0 + p[0] as f32, self.origin.1 - p[1] as f32)
    }

    /// Time spent drawing and presenting each frame.
    pub fn draw_stats(&self) -> FrameStats {
        self.timer.frame_stats()
    }

    fn slot_mut(&mut self, id: DrawableId) -> Option<&mut Slot> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn capture(&self) -> anyhow::Result<()> {
        let Some(dir) = &self.capture_dir else {
            return Ok(());
        };
        let path = dir.join(format!("frame_{:06}.png", self.flips));
        image::save_buffer(
            &path,
            self.frame_rgba(),
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("writing {}", path.display()))
    }
}

impl Display for SkiaDisplay {
    fn create_drawable(&mut self, spec: DrawableSpec) -> Result<DrawableId> {
        let texture = texture_pixmap(&spec.texture).map_err(display_err)?;
        self.slots.push(Some(Slot {
            spec,
            texture,
            movie: None,
        }));
        Ok(DrawableId(self.slots.len() - 1))
    }

    fn set_color(&mut self, id: DrawableId, color: [f64; 3]) {
        if let Some(slot) = self.slot_mut(id) {
            slot.spec.color = color;
        }
    }

    fn set_position(&mut self, id: DrawableId, position: [f64; 2]) {
        if let Some(slot) = self.slot_mut(id) {
            slot.spec.position = position;
        }
    }

    fn set_texture(&mut self, id: DrawableId, texture: Texture) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        match texture_pixmap(&texture) {
            Ok(pixmap) => {
                slot.texture = pixmap;
                slot.spec.texture = texture;
            }
            Err(e) => log::warn!("drawable {}: texture rejected: {e:#}", id.0),
        }
    }

    fn draw(&mut self, id: DrawableId) {
        if self.frame_started.is_none() {
            self.frame_started = Some(self.timer.now());
        }
        let origin = self.origin;
        let Some(Some(slot)) = self.slots.get(id.0) else {
            return;
        };
        let spec = &slot.spec;
        let (w, h) = (spec.size[0] as f32, spec.size[1] as f32);
        let Some(rect) = Rect::from_xywh(-w / 2.0, -h / 2.0, w, h) else {
            return;
        };
        let path = match spec.shape {
            DrawShape::Ellipse => PathBuilder::from_oval(rect),
            DrawShape::Rectangle => Some(PathBuilder::from_rect(rect)),
        };
        let Some(path) = path else {
            return;
        };

        let mut paint = Paint::default();
        paint.anti_alias = spec.shape == DrawShape::Ellipse;
        let source = slot
            .movie
            .as_ref()
            .and_then(Playback::current)
            .or(slot.texture.as_ref());
        match source {
            Some(pixmap) => {
                let scale = Transform::from_row(
                    w / pixmap.width() as f32,
                    0.0,
                    0.0,
                    h / pixmap.height() as f32,
                    -w / 2.0,
                    -h / 2.0,
                );
                paint.shader = Pattern::new(
                    pixmap.as_ref(),
                    SpreadMode::Pad,
                    FilterQuality::Nearest,
                    1.0,
                    scale,
                );
            }
            None => paint.set_color(skia_color(spec.color)),
        }
        // canvas y points down, so counter-clockwise is a negative angle
        let transform = Transform::from_translate(
            origin.0 + spec.position[0] as f32,
            origin.1 - spec.position[1] as f32,
        )
        .pre_rotate(-(spec.orientation as f32));
        self.canvas
            .fill_path(&path, &paint, FillRule::Winding, transform, None);

        if let Some(movie) = self.slot_mut(id).and_then(|s| s.movie.as_mut()) {
            movie.advance();
        }
    }

    fn flip(&mut self) -> Result<()> {
        cast_slice_mut::<u32, u8>(&mut self.presented).copy_from_slice(self.canvas.data());
        self.capture().map_err(display_err)?;
        self.canvas.fill(self.background);
        self.flips += 1;
        if let Some(started) = self.frame_started.take() {
            let took = self.timer.elapsed(started);
            self.timer.record_frame(took);
        }
        Ok(())
    }

    fn poll_cancel_key(&mut self) -> bool {
        self.cancel.is_cancelled()
    }

    fn load_movie(&mut self, id: DrawableId, path: &Path) -> Result<()> {
        let frames = movie_pixmaps(path).map_err(|e| StimError::Image {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })?;
        log::debug!("drawable {}: {} movie frames from {}", id.0, frames.len(), path.display());
        let slot = self
            .slot_mut(id)
            .ok_or_else(|| StimError::Display(format!("no drawable {}", id.0)))?;
        slot.movie = Some(Playback {
            frames,
            next: 0,
            paused: false,
        });
        Ok(())
    }

    fn pause_movie(&mut self, id: DrawableId) {
        if let Some(movie) = self.slot_mut(id).and_then(|s| s.movie.as_mut()) {
            movie.paused = true;
        }
    }

    fn release(&mut self, id: DrawableId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};
    use std::sync::Arc;

    fn config() -> GlobalConfig {
        let mut config = GlobalConfig::default();
        config.display_size = [200, 100];
        config.background = [-1.0, -1.0, -1.0];
        config
    }

    fn disc(position: [f64; 2], color: [f64; 3]) -> DrawableSpec {
        DrawableSpec {
            shape: DrawShape::Ellipse,
            size: [20.0, 20.0],
            position,
            orientation: 0.0,
            color,
            texture: Texture::Solid,
        }
    }

    #[test]
    fn flip_presents_then_clears() {
        let mut display = SkiaDisplay::new(&config()).unwrap();
        let id = display.create_drawable(disc([0.0, 0.0], [1.0, 1.0, 1.0])).unwrap();
        display.draw(id);
        display.flip().unwrap();
        assert_eq!(display.pixel(100, 50), Some([255, 255, 255, 255]));
        assert_eq!(display.pixel(0, 0), Some([0, 0, 0, 255]));
        display.flip().unwrap();
        assert_eq!(display.pixel(100, 50), Some([0, 0, 0, 255]));
        assert_eq!(display.flips(), 2);
    }

    #[test]
    fn stimulus_y_points_up_and_offset_shifts_the_origin() {
        let mut cfg = config();
        cfg.offset = [10.0, 0.0];
        let mut display = SkiaDisplay::new(&cfg).unwrap();
        let id = display.create_drawable(disc([0.0, 30.0], [1.0, -1.0, -1.0])).unwrap();
        display.draw(id);
        display.flip().unwrap();
        assert_eq!(display.to_canvas([0.0, 30.0]), (110.0, 20.0));
        assert_eq!(display.pixel(110, 20), Some([255, 0, 0, 255]));
        assert_eq!(display.pixel(110, 80), Some([0, 0, 0, 255]));
    }

    #[test]
    fn grid_textures_cover_the_drawable() {
        let mut display = SkiaDisplay::new(&config()).unwrap();
        let spec = DrawableSpec {
            shape: DrawShape::Rectangle,
            size: [40.0, 20.0],
            texture: Texture::grid(2, 1, vec![[1.0; 3], [-1.0, 1.0, -1.0]]),
            ..disc([0.0, 0.0], [0.0; 3])
        };
        let id = display.create_drawable(spec).unwrap();
        display.draw(id);
        display.flip().unwrap();
        assert_eq!(display.pixel(85, 50), Some([255, 255, 255, 255]));
        assert_eq!(display.pixel(115, 50), Some([0, 255, 0, 255]));
    }

    #[test]
    fn image_textures_are_drawn_unscaled_in_colour() {
        let mut display = SkiaDisplay::new(&config()).unwrap();
        let spec = DrawableSpec {
            shape: DrawShape::Rectangle,
            size: [2.0, 2.0],
            texture: Texture::Image {
                width: 1,
                height: 1,
                rgb: Arc::new(vec![10, 20, 30]),
            },
            ..disc([0.0, 0.0], [0.0; 3])
        };
        let id = display.create_drawable(spec).unwrap();
        display.draw(id);
        display.flip().unwrap();
        assert_eq!(display.pixel(100, 50), Some([10, 20, 30, 255]));
    }

    #[test]
    fn released_drawables_are_not_drawn() {
        let mut display = SkiaDisplay::new(&config()).unwrap();
        let id = display.create_drawable(disc([0.0, 0.0], [1.0; 3])).unwrap();
        display.release(id);
        display.draw(id);
        display.flip().unwrap();
        assert_eq!(display.pixel(100, 50), Some([0, 0, 0, 255]));
    }

    #[test]
    fn movies_advance_per_draw_until_paused() {
        let dir = std::env::temp_dir().join(format!("patchstim-render-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flash.gif");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            let frames = [[255u8, 0, 0], [0, 0, 255], [0, 255, 0]].map(|[r, g, b]| {
                Frame::from_parts(
                    RgbaImage::from_pixel(4, 4, Rgba([r, g, b, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }
        let mut display = SkiaDisplay::new(&config()).unwrap();
        let spec = DrawableSpec {
            shape: DrawShape::Rectangle,
            ..disc([0.0, 0.0], [0.0; 3])
        };
        let id = display.create_drawable(spec).unwrap();
        display.load_movie(id, &path).unwrap();
        let mut seen = Vec::new();
        for i in 0..4 {
            if i == 2 {
                display.pause_movie(id);
            }
            display.draw(id);
            display.flip().unwrap();
            seen.push(display.pixel(100, 50).unwrap());
        }
        patchstim_cache::cache::evict(&path);
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(seen[0], [255, 0, 0, 255]);
        assert_eq!(seen[1], [0, 0, 255, 255]);
        assert_eq!(seen[2], [0, 255, 0, 255]);
        assert_eq!(seen[3], [0, 255, 0, 255]);
    }

    #[test]
    fn capture_writes_one_png_per_flip() {
        let dir = std::env::temp_dir().join(format!("patchstim-capture-{}", std::process::id()));
        let mut cfg = config();
        cfg.capture.enabled = true;
        cfg.capture.dir = dir.clone();
        let mut display = SkiaDisplay::new(&cfg).unwrap();
        display.flip().unwrap();
        display.flip().unwrap();
        let written = std::fs::read_dir(&dir).unwrap().count();
        let first = image::open(dir.join("frame_000000.png")).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(written, 2);
        assert_eq!((first.width(), first.height()), (200, 100));
    }

    #[test]
    fn signed_levels_map_to_bytes() {
        assert_eq!(level_u8(-1.0), 0);
        assert_eq!(level_u8(0.0), 128);
        assert_eq!(level_u8(1.0), 255);
        assert_eq!(level_u8(3.0), 255);
    }
}
