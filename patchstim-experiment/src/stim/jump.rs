use image::RgbImage;
use image::imageops::crop_imm;
use patchstim_core::params::{Channel, Frame};
use patchstim_core::Texture;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Pre-cut windows of a source image, shown one after another.
#[derive(Debug, Clone)]
pub struct ImageJumps {
    slices: Vec<Texture>,
    origins: Vec<[u32; 2]>,
    size: [u32; 2],
    move_delay: Frame,
    shown: Option<usize>,
}

impl ImageJumps {
    /// Cuts `num_jumps` windows of `window` size (clamped to the image) at
    /// origins drawn from `move_rng`. With `shuffle`, every slice has its
    /// pixels permuted using `fill_rng`.
    pub fn cut(
        image: &RgbImage,
        window: [u32; 2],
        num_jumps: u32,
        move_delay: Frame,
        shuffle: Option<Channel>,
        move_rng: &mut StdRng,
        fill_rng: &mut StdRng,
    ) -> Self {
        let (iw, ih) = image.dimensions();
        let w = window[0].min(iw).max(1);
        let h = window[1].min(ih).max(1);
        let mut slices = Vec::with_capacity(num_jumps as usize);
        let mut origins = Vec::with_capacity(num_jumps as usize);
        for _ in 0..num_jumps {
            let x = move_rng.random_range(0..=iw.saturating_sub(w));
            let y = move_rng.random_range(0..=ih.saturating_sub(h));
            let mut rgb = crop_imm(image, x, y, w, h).to_image().into_raw();
            if let Some(channel) = shuffle {
                shuffle_pixels(&mut rgb, channel, fill_rng);
            }
            origins.push([x, y]);
            slices.push(Texture::Image {
                width: w,
                height: h,
                rgb: Arc::new(rgb),
            });
        }
        Self {
            slices,
            origins,
            size: [w, h],
            move_delay: move_delay.max(1),
            shown: None,
        }
    }

    pub fn size(&self) -> [u32; 2] {
        self.size
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn origins(&self) -> &[[u32; 2]] {
        &self.origins
    }

    pub fn slice_index(&self, elapsed: Frame) -> usize {
        ((elapsed / self.move_delay) as usize).min(self.slices.len().saturating_sub(1))
    }

    /// The slice to upload at `elapsed`, or `None` when it is already showing.
    pub fn texture_at(&mut self, elapsed: Frame) -> Option<Texture> {
        let idx = self.slice_index(elapsed);
        if self.shown == Some(idx) {
            return None;
        }
        let tex = self.slices.get(idx)?.clone();
        self.shown = Some(idx);
        Some(tex)
    }
}

/// Permutes whole pixels for `Global`, otherwise only the values of the
/// selected channel, leaving the other channels in place.
pub fn shuffle_pixels(rgb: &mut [u8], channel: Channel, rng: &mut StdRng) {
    let n = rgb.len() / 3;
    match channel {
        Channel::Global => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            let src = rgb.to_vec();
            for (dst, from) in order.into_iter().enumerate() {
                rgb[dst * 3..dst * 3 + 3].copy_from_slice(&src[from * 3..from * 3 + 3]);
            }
        }
        single => {
            let c = single.indices()[0];
            let mut values: Vec<u8> = (0..n).map(|i| rgb[i * 3 + c]).collect();
            values.shuffle(rng);
            for (i, v) in values.into_iter().enumerate() {
                rgb[i * 3 + c] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn windows_follow_the_move_seed() {
        let cut = |seed| {
            let mut mv = StdRng::seed_from_u64(seed);
            let mut fill = StdRng::seed_from_u64(1);
            ImageJumps::cut(&gradient(), [16, 8], 5, 3, None, &mut mv, &mut fill)
        };
        let a = cut(9);
        assert_eq!(a.origins(), cut(9).origins());
        assert_eq!(a.len(), 5);
        assert!(a.origins().iter().all(|[x, y]| *x <= 48 && *y <= 40));
    }

    #[test]
    fn slices_change_every_move_delay() {
        let mut mv = StdRng::seed_from_u64(2);
        let mut fill = StdRng::seed_from_u64(2);
        let mut jumps = ImageJumps::cut(&gradient(), [100, 100], 3, 4, None, &mut mv, &mut fill);
        assert_eq!(jumps.size(), [64, 48]);
        assert!(jumps.texture_at(0).is_some());
        assert!(jumps.texture_at(3).is_none());
        assert!(jumps.texture_at(4).is_some());
        assert_eq!(jumps.slice_index(100), 2);
    }

    #[test]
    fn channel_shuffle_leaves_other_channels_alone() {
        let original: Vec<u8> = (0..30u8).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let mut shuffled = original.clone();
        shuffle_pixels(&mut shuffled, Channel::Green, &mut rng);
        for i in 0..10 {
            assert_eq!(shuffled[i * 3], original[i * 3]);
            assert_eq!(shuffled[i * 3 + 2], original[i * 3 + 2]);
        }
        let mut greens: Vec<u8> = (0..10).map(|i| shuffled[i * 3 + 1]).collect();
        greens.sort();
        assert_eq!(greens, (0..10).map(|i| original[i * 3 + 1]).collect::<Vec<_>>());
    }

    #[test]
    fn global_shuffle_moves_whole_pixels() {
        let original: Vec<u8> = (0..30u8).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let mut shuffled = original.clone();
        shuffle_pixels(&mut shuffled, Channel::Global, &mut rng);
        for px in shuffled.chunks(3) {
            assert_eq!(px[1], px[0] + 1);
            assert_eq!(px[2], px[0] + 2);
        }
    }
}
