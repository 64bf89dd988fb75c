//! Position generators: radial sweeps, random walks and table passes.

use crate::table::{RowAngle, TableData};
use patchstim_core::params::{Frame, frames, pixels, speed};
use rand::Rng;
use serde::Serialize;

pub type Point = [f64; 2];

/// Unit vector for an angle in degrees, counter-clockwise from +x.
pub fn heading(degrees: f64) -> Point {
    let rad = degrees.to_radians();
    [rad.cos(), rad.sin()]
}

/// Frames needed to cover `distance` at `speed` px/frame, rounded up.
pub fn travel_frames(distance: f64, speed: f64) -> Frame {
    if speed <= 0.0 {
        return 0;
    }
    frames(distance / speed, 1.0)
}

/// `n` positions starting at `from`, stepping `speed` px along `degrees`.
pub fn linear_path(from: Point, degrees: f64, speed: f64, n: Frame) -> Vec<Point> {
    let [dx, dy] = heading(degrees);
    (0..n)
        .map(|i| {
            let d = i as f64 * speed;
            [from[0] + dx * d, from[1] + dy * d]
        })
        .collect()
}

/// Rotates `p` counter-clockwise by `degrees` about the origin.
pub fn rotate(p: Point, degrees: f64) -> Point {
    let [c, s] = heading(degrees);
    [p[0] * c - p[1] * s, p[0] * s + p[1] * c]
}

/// One contiguous stretch of frames produced by a generator call.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub angle: f64,
    pub positions: Vec<Point>,
}

/// `num_dirs` evenly spaced directions. The index wraps, so after `num_dirs`
/// advances the current angle is exactly the starting one again.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionCycle {
    start: f64,
    num_dirs: u32,
    index: u32,
}

impl DirectionCycle {
    pub fn new(start: f64, num_dirs: u32) -> Self {
        Self {
            start,
            num_dirs: num_dirs.max(1),
            index: 0,
        }
    }

    pub fn step(&self) -> f64 {
        360.0 / self.num_dirs as f64
    }

    pub fn current(&self) -> f64 {
        (self.start + self.step() * self.index as f64).rem_euclid(360.0)
    }

    /// Offset of the current direction from the first one.
    pub fn offset(&self) -> f64 {
        self.step() * self.index as f64
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.num_dirs;
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Straight passes through the stim location, one direction per call.
#[derive(Debug, Clone)]
pub struct RadialSweep {
    pub location: Point,
    pub radius: f64,
    pub speed: f64,
    pub move_delay: Frame,
    pub offscreen: Point,
    pub dirs: DirectionCycle,
}

impl RadialSweep {
    /// Frames of one pass, pause included.
    pub fn frames_per_dir(&self) -> Frame {
        travel_frames(2.0 * self.radius, self.speed) + self.move_delay
    }

    /// The pass for the current direction; the direction advances afterwards.
    pub fn next_segment(&mut self) -> Segment {
        let angle = self.dirs.current();
        let [dx, dy] = heading(angle);
        let from = [
            self.location[0] - self.radius * dx,
            self.location[1] - self.radius * dy,
        ];
        let n = travel_frames(2.0 * self.radius, self.speed);
        let mut positions = linear_path(from, angle, self.speed, n);
        positions.extend(std::iter::repeat_n(self.offscreen, self.move_delay as usize));
        self.dirs.advance();
        Segment { angle, positions }
    }
}

/// Fixed-length legs in seeded random directions, each starting where the
/// previous one stopped.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    pub position: Point,
    pub travel: f64,
    pub speed: f64,
}

impl RandomWalk {
    pub fn frames_per_leg(&self) -> Frame {
        travel_frames(self.travel, self.speed)
    }

    pub fn next_segment<R: Rng>(&mut self, rng: &mut R) -> Segment {
        let angle = rng.random_range(0.0..360.0);
        let n = self.frames_per_leg();
        let positions = linear_path(self.position, angle, self.speed, n);
        let [dx, dy] = heading(angle);
        let d = n as f64 * self.speed;
        self.position = [self.position[0] + dx * d, self.position[1] + dy * d];
        Segment { angle, positions }
    }
}

/// Replays a table once per direction, rotated by the direction.
#[derive(Debug, Clone)]
pub struct TablePath {
    pub table: std::sync::Arc<TableData>,
    pub location: Point,
    pub pix_per_micron: f64,
    pub frame_rate: f64,
    pub move_delay: Frame,
    pub offscreen: Point,
    pub dirs: DirectionCycle,
}

impl TablePath {
    /// Frame offsets, within one pass, of the rows flagged as triggers.
    pub fn flagged_rows(&self) -> Vec<Frame> {
        match &*self.table {
            TableData::Polar(rows) => flagged(rows.iter().map(|r| r.trigger)),
            TableData::Coordinate(rows) => flagged(rows.iter().map(|r| r.trigger)),
            TableData::Direction(_) => Vec::new(),
        }
    }

    /// Frames of table content in one pass, without the pause.
    pub fn content_frames(&self) -> Frame {
        match &*self.table {
            TableData::Direction(rows) => rows.iter().map(|r| self.row_frames(r.duration_ms)).sum(),
            other => other.len() as Frame,
        }
    }

    pub fn frames_per_dir(&self) -> Frame {
        self.content_frames() + self.move_delay
    }

    fn row_frames(&self, duration_ms: f64) -> Frame {
        frames(duration_ms / 1000.0, self.frame_rate)
    }

    fn place(&self, p: Point, angle: f64) -> Point {
        let r = rotate(p.map(|v| pixels(v, self.pix_per_micron)), angle);
        [self.location[0] + r[0], self.location[1] + r[1]]
    }

    pub fn next_segment(&mut self) -> Segment {
        let angle = self.dirs.current();
        let mut positions = match &*self.table {
            TableData::Polar(rows) => rows
                .iter()
                .map(|row| self.place([row.radius, 0.0], angle))
                .collect(),
            TableData::Coordinate(rows) => {
                rows.iter().map(|row| self.place(row.xy, angle)).collect()
            }
            TableData::Direction(rows) => {
                let mut out = Vec::new();
                let mut at = self.location;
                for row in rows {
                    let heading_deg = match row.angle {
                        RowAngle::Preferred => angle,
                        RowAngle::Degrees(d) => angle + d,
                    };
                    let v = speed(row.speed, self.pix_per_micron, self.frame_rate);
                    let n = self.row_frames(row.duration_ms);
                    out.extend(linear_path(at, heading_deg, v, n));
                    let [dx, dy] = heading(heading_deg);
                    at = [at[0] + dx * v * n as f64, at[1] + dy * v * n as f64];
                }
                out
            }
        };
        positions.extend(std::iter::repeat_n(self.offscreen, self.move_delay as usize));
        self.dirs.advance();
        Segment { angle, positions }
    }
}

fn flagged(flags: impl Iterator<Item = bool>) -> Vec<Frame> {
    flags
        .enumerate()
        .filter(|(_, t)| *t)
        .map(|(i, _)| i as Frame)
        .collect()
}

/// One motion-log entry: the direction a segment took, the frame it was
/// generated on and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionRecord {
    pub angle: f64,
    pub frame: Frame,
    pub position: Point,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PolarRow;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn close(a: Point, b: Point) -> bool {
        (a[0] - b[0]).abs() < 1e-9 && (a[1] - b[1]).abs() < 1e-9
    }

    #[test]
    fn directions_wrap_back_to_the_start() {
        let mut sweep = RadialSweep {
            location: [0.0, 0.0],
            radius: 100.0,
            speed: 10.0,
            move_delay: 0,
            offscreen: [1e4, 1e4],
            dirs: DirectionCycle::new(0.0, 4),
        };
        let angles: Vec<f64> = (0..4).map(|_| sweep.next_segment().angle).collect();
        assert_eq!(angles, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(sweep.dirs.current(), 0.0);
    }

    #[test]
    fn sweep_crosses_the_location() {
        let mut sweep = RadialSweep {
            location: [5.0, -5.0],
            radius: 30.0,
            speed: 7.0,
            move_delay: 3,
            offscreen: [1e4, 1e4],
            dirs: DirectionCycle::new(90.0, 2),
        };
        assert_eq!(sweep.frames_per_dir(), 9 + 3);
        let seg = sweep.next_segment();
        assert_eq!(seg.positions.len(), 12);
        assert!(close(seg.positions[0], [5.0, -35.0]));
        assert!(close(seg.positions[8], [5.0, 21.0]));
        assert_eq!(seg.positions[11], [1e4, 1e4]);
    }

    #[test]
    fn random_walk_is_reproducible_and_chained() {
        let walk = RandomWalk {
            position: [0.0, 0.0],
            travel: 50.0,
            speed: 5.0,
        };
        let run = |mut walk: RandomWalk| {
            let mut rng = StdRng::seed_from_u64(7);
            (0..5).map(|_| walk.next_segment(&mut rng)).collect::<Vec<_>>()
        };
        let a = run(walk.clone());
        let b = run(walk);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| (0.0..360.0).contains(&s.angle)));
        let [dx, dy] = heading(a[0].angle);
        assert!(close(a[1].positions[0], [dx * 50.0, dy * 50.0]));
    }

    #[test]
    fn polar_passes_rotate_with_direction() {
        let table = TableData::Polar(vec![
            PolarRow { radius: 10.0, trigger: true },
            PolarRow { radius: 20.0, trigger: false },
        ]);
        let mut path = TablePath {
            table: Arc::new(table),
            location: [0.0, 0.0],
            pix_per_micron: 2.0,
            frame_rate: 60.0,
            move_delay: 0,
            offscreen: [1e4, 1e4],
            dirs: DirectionCycle::new(0.0, 4),
        };
        assert_eq!(path.flagged_rows(), vec![0]);
        let first = path.next_segment();
        assert!(close(first.positions[1], [40.0, 0.0]));
        let second = path.next_segment();
        assert!(close(second.positions[1], [0.0, 40.0]));
    }
}
