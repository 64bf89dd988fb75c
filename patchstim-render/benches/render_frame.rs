use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use patchstim_core::{Display, DrawShape, DrawableSpec, GlobalConfig, Texture};
use patchstim_render::SkiaDisplay;

fn checkerboard(cols: usize, rows: usize) -> Texture {
    let texels = (0..cols * rows)
        .map(|i| if (i / cols + i % cols) % 2 == 0 { [1.0; 3] } else { [-1.0; 3] })
        .collect();
    Texture::grid(cols, rows, texels)
}

fn harness() -> (SkiaDisplay, Vec<u8>) {
    let mut config = GlobalConfig::default();
    config.display_size = [1280, 720];
    let display = SkiaDisplay::new(&config).unwrap();
    let fb = vec![0u8; 1280 * 720 * 4];
    (display, fb)
}

pub fn bench_frame(c: &mut Criterion) {
    let mut g = c.benchmark_group("render_frame");
    g.sample_size(40);

    g.bench_function("moving_disc", |b| {
        b.iter_batched(
            || {
                let (mut display, fb) = harness();
                let id = display
                    .create_drawable(DrawableSpec {
                        shape: DrawShape::Ellipse,
                        size: [200.0, 200.0],
                        position: [0.0, 0.0],
                        orientation: 0.0,
                        color: [1.0, -1.0, 1.0],
                        texture: Texture::Solid,
                    })
                    .unwrap();
                (display, fb, id)
            },
            |(mut display, mut fb, id)| {
                for x in 0..30 {
                    display.set_position(id, [x as f64 * 10.0 - 150.0, 0.0]);
                    display.draw(id);
                    display.flip().unwrap();
                }
                display.copy_to(&mut fb);
                black_box(fb);
            },
            BatchSize::SmallInput,
        )
    });

    g.bench_function("noise_board", |b| {
        b.iter_batched(
            || {
                let (mut display, fb) = harness();
                let id = display
                    .create_drawable(DrawableSpec {
                        shape: DrawShape::Rectangle,
                        size: [600.0, 600.0],
                        position: [0.0, 0.0],
                        orientation: 30.0,
                        color: [0.0; 3],
                        texture: checkerboard(30, 30),
                    })
                    .unwrap();
                (display, fb, id)
            },
            |(mut display, mut fb, id)| {
                for cols in [30, 31, 32] {
                    display.set_texture(id, checkerboard(cols, 30));
                    display.draw(id);
                    display.flip().unwrap();
                }
                display.copy_to(&mut fb);
                black_box(fb);
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
