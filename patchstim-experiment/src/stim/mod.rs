//! A stim instance: draw window, motion strategy and render strategy.

mod jump;
mod texture;

pub use jump::{ImageJumps, shuffle_pixels};
pub use texture::{Board, Grating};

use crate::motion::{DirectionCycle, MotionRecord, Point, RadialSweep, RandomWalk, TablePath};
use crate::plan::StimPlan;
use patchstim_core::params::{Fill, Frame, Shape, StimParams, Timing};
use patchstim_core::waveform::{factor, time_fraction};
use patchstim_core::{
    Display, DrawShape, DrawableId, DrawableSpec, GlobalConfig, Result, RgbModel, StimError,
    StimKind, Texture, TriggerSchedule,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Active frames of a stim: it draws on `start_stim..end_stim` and the run
/// lasts at least until `end_stim + end_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawWindow {
    pub start_stim: Frame,
    pub end_stim: Frame,
    pub end_delay: Frame,
    pub draw_duration: Frame,
}

impl DrawWindow {
    /// A non-zero `force_stop` replaces the natural end and drops the end
    /// delay.
    pub fn new(start: Frame, natural_end: Frame, end_delay: Frame, force_stop: Frame) -> Self {
        let (end, end_delay) = if force_stop != 0 {
            (force_stop, 0)
        } else {
            (natural_end, end_delay)
        };
        Self {
            start_stim: start,
            end_stim: end,
            end_delay,
            draw_duration: end.saturating_sub(start),
        }
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.start_stim <= frame && frame < self.end_stim
    }

    /// First frame after everything this stim needs, delay included.
    pub fn run_end(&self) -> Frame {
        self.end_stim + self.end_delay
    }
}

/// Where the stim is drawn each frame.
#[derive(Debug, Clone)]
pub enum Motion {
    Static,
    Moving(RadialSweep),
    Random(RandomWalk),
    Table(TablePath),
    Jump(ImageJumps),
}

/// What the drawable shows.
#[derive(Debug, Clone)]
pub enum Render {
    Plain,
    Board(Board),
    Grating(Grating),
    Movie(PathBuf),
    Image(Texture),
}

#[derive(Debug)]
pub struct Stim {
    index: usize,
    params: StimParams,
    rgb: RgbModel,
    window: DrawWindow,
    motion: Motion,
    render: Render,
    fill_rng: StdRng,
    move_rng: StdRng,
    drawable: Option<DrawableId>,
    buffer: VecDeque<Point>,
    regen_attempted_this_frame: bool,
    log: Vec<MotionRecord>,
}

impl Stim {
    /// Fresh instance for one repetition; both random streams restart from
    /// their seeds.
    pub fn instantiate(index: usize, plan: &StimPlan, config: &GlobalConfig) -> Result<Self> {
        let params = plan.params.clone();
        let mut fill_rng = StdRng::seed_from_u64(params.fill_seed);
        let mut move_rng = StdRng::seed_from_u64(params.move_seed);
        let offscreen = config.offscreen();

        let motion = match params.kind {
            StimKind::Static => Motion::Static,
            StimKind::Moving => Motion::Moving(RadialSweep {
                location: params.location,
                radius: params.start_radius,
                speed: params.speed,
                move_delay: params.move_delay,
                offscreen,
                dirs: DirectionCycle::new(params.start_dir, params.num_dirs),
            }),
            StimKind::Random => Motion::Random(RandomWalk {
                position: params.location,
                travel: params.travel_distance,
                speed: params.speed,
            }),
            StimKind::Table => {
                let table = plan.resources.table.clone().ok_or_else(|| {
                    StimError::invalid("table_file", "table was not loaded")
                })?;
                Motion::Table(TablePath {
                    table,
                    location: params.location,
                    pix_per_micron: config.pix_per_micron,
                    frame_rate: config.frame_rate,
                    move_delay: params.move_delay,
                    offscreen,
                    dirs: DirectionCycle::new(params.start_dir, params.num_dirs),
                })
            }
            StimKind::ImageJump => {
                let image = plan.resources.image.as_ref().ok_or_else(|| {
                    StimError::invalid("image_file", "image was not loaded")
                })?;
                Motion::Jump(ImageJumps::cut(
                    image,
                    config.display_size,
                    params.num_jumps,
                    params.move_delay,
                    params.shuffle.then_some(params.contrast_channel),
                    &mut move_rng,
                    &mut fill_rng,
                ))
            }
        };

        let render = match params.fill {
            _ if params.kind == StimKind::ImageJump => Render::Plain,
            Fill::Uniform => Render::Plain,
            Fill::Sine | Fill::Square => Render::Grating(Grating::new(&params)),
            Fill::Checkerboard | Fill::Random | Fill::Noise => {
                Render::Board(Board::new(&params, &mut fill_rng))
            }
            Fill::Image => {
                let image = plan.resources.image.as_ref().ok_or_else(|| {
                    StimError::invalid("image_file", "image was not loaded")
                })?;
                Render::Image(Texture::Image {
                    width: image.width(),
                    height: image.height(),
                    rgb: std::sync::Arc::new(image.as_raw().clone()),
                })
            }
            Fill::Movie => match &params.movie_file {
                Some(path) => Render::Movie(path.clone()),
                None => {
                    return Err(StimError::invalid(
                        "movie_file",
                        "movie fill needs a movie file",
                    ));
                }
            },
        };

        Ok(Self {
            index,
            rgb: RgbModel::new(&params, config),
            params,
            window: DrawWindow::default(),
            motion,
            render,
            fill_rng,
            move_rng,
            drawable: None,
            buffer: VecDeque::new(),
            regen_attempted_this_frame: false,
            log: Vec::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn params(&self) -> &StimParams {
        &self.params
    }

    pub fn window(&self) -> DrawWindow {
        self.window
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn drawable(&self) -> Option<DrawableId> {
        self.drawable
    }

    pub fn motion_log(&self) -> &[MotionRecord] {
        &self.log
    }

    pub fn take_motion_log(&mut self) -> Vec<MotionRecord> {
        std::mem::take(&mut self.log)
    }

    fn is_step(&self) -> bool {
        self.params.timing == Timing::Step
    }

    /// Creates the drawable. Step-timed colours are computed here and never
    /// again.
    pub fn make_drawable<D: Display + ?Sized>(&mut self, display: &mut D) -> Result<DrawableId> {
        let p = &self.params;
        let initial = self.initial_factor();
        let (shape, size, texture) = match &mut self.motion {
            Motion::Jump(jumps) => {
                let [w, h] = jumps.size();
                let texture = jumps.texture_at(0).unwrap_or(Texture::Solid);
                (DrawShape::Rectangle, [w as f64, h as f64], texture)
            }
            _ => {
                let shape = match p.shape {
                    Shape::Rectangle => DrawShape::Rectangle,
                    Shape::Circle | Shape::Annulus => DrawShape::Ellipse,
                };
                let texture = match &self.render {
                    Render::Plain | Render::Movie(_) => Texture::Solid,
                    Render::Board(board) => {
                        board.texture(&self.rgb, p.intensity_dir, initial, &mut self.fill_rng)
                    }
                    Render::Grating(grating) => {
                        grating.texture(&self.rgb, p.intensity_dir, initial, 0)
                    }
                    Render::Image(texture) => texture.clone(),
                };
                (shape, p.extent(), texture)
            }
        };
        let id = display.create_drawable(DrawableSpec {
            shape,
            size,
            position: p.location,
            orientation: p.orientation,
            color: self.rgb.color_at(initial),
            texture,
        })?;
        if let Render::Movie(path) = &self.render {
            display.load_movie(id, path)?;
        }
        self.drawable = Some(id);
        Ok(id)
    }

    fn initial_factor(&self) -> f64 {
        if self.is_step() {
            1.0
        } else {
            factor(
                self.params.timing,
                0.0,
                self.params.num_cycles,
                self.params.intensity_dir,
            )
        }
    }

    /// Computes the draw window and registers this stim's trigger frames.
    pub fn draw_times(&mut self, schedule: &mut TriggerSchedule) -> DrawWindow {
        let p = &self.params;
        let start = p.delay;
        let dirs = p.num_dirs as Frame;
        let natural_end = match &self.motion {
            Motion::Static | Motion::Random(_) => start + p.duration,
            Motion::Moving(sweep) => start + sweep.frames_per_dir() * dirs,
            Motion::Table(path) => start + path.frames_per_dir() * dirs,
            Motion::Jump(_) => start + p.num_jumps as Frame * p.move_delay,
        };
        let window = DrawWindow::new(start, natural_end, p.end_delay, p.force_stop);
        self.window = window;
        self.buffer.clear();
        self.regen_attempted_this_frame = false;

        if p.trigger {
            let end = window.end_stim;
            let inside = |f: &Frame| *f < end;
            // a segment starts every `per` frames for as long as the window lasts
            let segment_starts = |per: Frame| -> Vec<Frame> {
                if per == 0 {
                    vec![start]
                } else {
                    (start..end.max(start + 1)).step_by(per as usize).collect()
                }
            };
            match &self.motion {
                Motion::Static => schedule.insert(start),
                Motion::Moving(sweep) => {
                    let starts = segment_starts(sweep.frames_per_dir());
                    schedule.extend(starts.into_iter().filter(inside));
                }
                Motion::Random(walk) => {
                    let leg = walk.frames_per_leg();
                    if leg == 0 {
                        schedule.insert(start);
                    } else {
                        schedule.extend((start..end).step_by(leg as usize));
                    }
                }
                Motion::Table(path) => {
                    let content = path.content_frames();
                    let rows = path.flagged_rows();
                    for base in segment_starts(path.frames_per_dir()) {
                        schedule.extend(rows.iter().map(|r| base + r).filter(inside));
                        if content > 0 {
                            schedule.extend([base, base + content - 1].into_iter().filter(inside));
                        }
                    }
                    if end > start {
                        schedule.extend([start, end - 1]);
                    }
                }
                Motion::Jump(_) => {
                    let md = p.move_delay.max(1);
                    schedule.extend(
                        (0..=p.num_jumps as Frame)
                            .map(|k| start + k * md)
                            .filter(|f| *f <= end),
                    );
                }
            }
        }
        log::debug!(
            "stim {} ({}): frames {}..{} end delay {}",
            self.index,
            p.kind,
            window.start_stim,
            window.end_stim,
            window.end_delay
        );
        window
    }

    /// Draws this stim's state for `frame`; frames outside the window are a
    /// no-op.
    pub fn animate<D: Display + ?Sized>(&mut self, frame: Frame, display: &mut D) -> Result<()> {
        if !self.window.contains(frame) {
            return Ok(());
        }
        let id = self
            .drawable
            .ok_or_else(|| StimError::Display(format!("stim {} has no drawable", self.index)))?;
        self.regen_attempted_this_frame = false;
        let elapsed = frame - self.window.start_stim;

        let moves = matches!(
            self.motion,
            Motion::Moving(_) | Motion::Random(_) | Motion::Table(_)
        );
        if moves {
            let position = self.next_position(frame)?;
            display.set_position(id, position);
        } else if let Motion::Jump(jumps) = &mut self.motion {
            if let Some(texture) = jumps.texture_at(elapsed) {
                display.set_texture(id, texture);
            }
        }

        let step = self.is_step();
        let f = if step {
            1.0
        } else {
            let t = time_fraction(frame, self.window.start_stim, self.window.draw_duration);
            factor(
                self.params.timing,
                t,
                self.params.num_cycles,
                self.params.intensity_dir,
            )
        };
        let dir = self.params.intensity_dir;
        match &self.render {
            Render::Plain | Render::Image(_) => {
                if !step {
                    display.set_color(id, self.rgb.color_at(f));
                }
            }
            Render::Board(board) => {
                if !step || board.is_noise() {
                    display.set_texture(id, board.texture(&self.rgb, dir, f, &mut self.fill_rng));
                }
            }
            Render::Grating(grating) => {
                if !step || grating.drifts() {
                    display.set_texture(id, grating.texture(&self.rgb, dir, f, elapsed));
                }
            }
            Render::Movie(_) => {
                if !step {
                    display.set_color(id, self.rgb.color_at(f));
                }
                if frame + 1 == self.window.end_stim {
                    display.pause_movie(id);
                }
            }
        }
        display.draw(id);
        Ok(())
    }

    /// Pops the next buffered position, regenerating the motion segment at
    /// most once per frame.
    fn next_position(&mut self, frame: Frame) -> Result<Point> {
        loop {
            if let Some(p) = self.buffer.pop_front() {
                return Ok(p);
            }
            if self.regen_attempted_this_frame {
                return Err(StimError::BufferExhausted {
                    stim: self.index,
                    frame,
                });
            }
            self.regen_attempted_this_frame = true;
            self.regenerate(frame);
        }
    }

    fn regenerate(&mut self, frame: Frame) {
        let segment = match &mut self.motion {
            Motion::Moving(sweep) => sweep.next_segment(),
            Motion::Random(walk) => walk.next_segment(&mut self.move_rng),
            Motion::Table(path) => path.next_segment(),
            Motion::Static | Motion::Jump(_) => return,
        };
        let position = segment.positions.first().copied().unwrap_or(self.params.location);
        log::debug!(
            "stim {}: segment at {:.1} deg, {} frames, from frame {frame}",
            self.index,
            segment.angle,
            segment.positions.len()
        );
        self.log.push(MotionRecord {
            angle: segment.angle,
            frame,
            position,
        });
        self.buffer.extend(segment.positions);
    }

    pub fn dispose<D: Display + ?Sized>(&mut self, display: &mut D) {
        if let Some(id) = self.drawable.take() {
            display.release(id);
        }
    }
}
