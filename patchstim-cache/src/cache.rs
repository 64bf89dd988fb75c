use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbImage, RgbaImage};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use string_cache::DefaultAtom as Atom;

/// Decoded frames of a movie file, in display order.
#[derive(Debug)]
pub struct Movie {
    pub frames: Vec<RgbaImage>,
    /// Per-frame display time from the file, in milliseconds.
    pub delays_ms: Vec<f64>,
}

impl Movie {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn size(&self) -> (u32, u32) {
        self.frames.first().map(|f| f.dimensions()).unwrap_or((0, 0))
    }
}

lazy_static! {
    static ref IMAGES: RwLock<HashMap<Atom, Arc<RgbImage>>> = RwLock::new(HashMap::new());
    static ref MOVIES: RwLock<HashMap<Atom, Arc<Movie>>> = RwLock::new(HashMap::new());
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cache key for a file path.
pub fn path_atom(path: &Path) -> Atom {
    Atom::from(path.to_string_lossy().as_ref())
}

/// Decodes `path` as 8-bit RGB, or hands out the copy decoded earlier.
pub fn load_image(path: &Path) -> Result<Arc<RgbImage>, String> {
    let key = path_atom(path);
    if let Some(img) = read(&IMAGES).get(&key) {
        return Ok(Arc::clone(img));
    }
    let decoded = image::open(path).map_err(|e| e.to_string())?.to_rgb8();
    log::debug!(
        "decoded image {} ({}x{})",
        path.display(),
        decoded.width(),
        decoded.height()
    );
    let img = Arc::new(decoded);
    write(&IMAGES).insert(key, Arc::clone(&img));
    Ok(img)
}

/// Decodes every frame of an animated GIF. Other formats load as a
/// single-frame movie.
pub fn load_movie(path: &Path) -> Result<Arc<Movie>, String> {
    let key = path_atom(path);
    if let Some(movie) = read(&MOVIES).get(&key) {
        return Ok(Arc::clone(movie));
    }
    let is_gif = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"));
    let movie = if is_gif {
        decode_gif(path)?
    } else {
        let still = image::open(path).map_err(|e| e.to_string())?.to_rgba8();
        Movie {
            frames: vec![still],
            delays_ms: vec![0.0],
        }
    };
    if movie.is_empty() {
        return Err(format!("{} has no frames", path.display()));
    }
    log::debug!("decoded movie {} ({} frames)", path.display(), movie.len());
    let movie = Arc::new(movie);
    write(&MOVIES).insert(key, Arc::clone(&movie));
    Ok(movie)
}

fn decode_gif(path: &Path) -> Result<Movie, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| e.to_string())?;
    let mut movie = Movie {
        frames: Vec::with_capacity(frames.len()),
        delays_ms: Vec::with_capacity(frames.len()),
    };
    for frame in frames {
        let (num, den) = frame.delay().numer_denom_ms();
        movie
            .delays_ms
            .push(if den == 0 { 0.0 } else { num as f64 / den as f64 });
        movie.frames.push(frame.into_buffer());
    }
    Ok(movie)
}

pub fn cached_images() -> usize {
    read(&IMAGES).len()
}

pub fn cached_movies() -> usize {
    read(&MOVIES).len()
}

/// Forgets the decoded copy of `path` so the next load reads the file again.
pub fn evict(path: &Path) {
    let key = path_atom(path);
    write(&IMAGES).remove(&key);
    write(&MOVIES).remove(&key);
}

pub fn clear() {
    write(&IMAGES).clear();
    write(&MOVIES).clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, Rgb, Rgba};

    fn temp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("patchstim-cache-{}-{name}", std::process::id()))
    }

    #[test]
    fn images_are_decoded_once() {
        let path = temp("once.png");
        RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        let a = load_image(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let b = load_image(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get_pixel(3, 2), &Rgb([10, 20, 30]));
        evict(&path);
        assert!(load_image(&path).is_err());
    }

    #[test]
    fn gif_frames_come_out_in_order() {
        let path = temp("movie.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            let frames = (0..3u8).map(|i| {
                Frame::new(RgbaImage::from_pixel(2, 2, Rgba([i * 100, 0, 0, 255])))
            });
            encoder.encode_frames(frames).unwrap();
        }
        let movie = load_movie(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(movie.len(), 3);
        assert_eq!(movie.size(), (2, 2));
        assert!(movie.frames[2].get_pixel(0, 0)[0] > movie.frames[0].get_pixel(0, 0)[0]);
    }

    #[test]
    fn missing_files_report_an_error() {
        assert!(load_image(&temp("nope.png")).is_err());
        assert!(load_movie(&temp("nope.gif")).is_err());
    }
}
