use crate::timer::{HighPrecisionTimer, Timer, high_precision_sleep};
use std::time::{Duration, Instant};

/// Final stretch before a deadline that is busy-waited instead of slept.
const SPIN_MARGIN: Duration = Duration::from_micros(200);

/// Holds a fixed frame cadence for displays without vsync.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    deadline: Option<Instant>,
    last: Option<Instant>,
    timer: HighPrecisionTimer,
    late_frames: u64,
}

impl FramePacer {
    pub fn new(frame_rate: f64) -> Self {
        let period = if frame_rate.is_finite() && frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / frame_rate)
        } else {
            Duration::ZERO
        };
        Self {
            period,
            deadline: None,
            last: None,
            timer: HighPrecisionTimer::new(),
            late_frames: 0,
        }
    }

    /// A pacer that never waits; frames are only counted.
    pub fn unpaced() -> Self {
        Self::new(0.0)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Blocks until the next frame boundary and records the interval.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let deadline = *self.deadline.get_or_insert(now + self.period);
        if deadline > now {
            let remaining = deadline - now;
            if remaining > SPIN_MARGIN {
                high_precision_sleep(remaining - SPIN_MARGIN);
            }
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
            self.deadline = Some(deadline + self.period);
        } else {
            // more than a frame behind: start a fresh cadence instead of bursting
            if now - deadline > self.period && !self.period.is_zero() {
                self.late_frames += 1;
            }
            self.deadline = Some(now + self.period);
        }
        let flipped = Instant::now();
        if let Some(last) = self.last.replace(flipped) {
            self.timer.record_frame(flipped - last);
        }
    }

    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    pub fn timer(&self) -> &HighPrecisionTimer {
        &self.timer
    }

    pub fn reset(&mut self) {
        self.deadline = None;
        self.last = None;
        self.late_frames = 0;
        self.timer.clear();
    }
}

/// Wall-clock accounting for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    start: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Frames per second over the whole run so far.
    pub fn fps(&self, frames: u64) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 { frames as f64 / secs } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paced_frames_hold_the_cadence() {
        let mut pacer = FramePacer::new(500.0);
        let clock = RunClock::start();
        for _ in 0..20 {
            pacer.wait();
        }
        assert!(clock.elapsed() >= Duration::from_millis(38));
        let stats = pacer.timer().frame_stats();
        assert_eq!(stats.frames, 19);
    }

    #[test]
    fn unpaced_never_sleeps() {
        let mut pacer = FramePacer::unpaced();
        assert_eq!(pacer.period(), Duration::ZERO);
        let clock = RunClock::start();
        for _ in 0..1000 {
            pacer.wait();
        }
        assert!(clock.elapsed() < Duration::from_secs(1));
    }
}
