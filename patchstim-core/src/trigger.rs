use crate::error::Result;
use crate::params::Frame;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hardware line that marks a frame for an external recorder.
pub trait TriggerDevice {
    /// Drives `line` high and immediately low again.
    fn pulse(&mut self, line: u8) -> Result<()>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in used when no trigger hardware is present. Warns on the first
/// pulse and ignores all of them.
#[derive(Debug, Default)]
pub struct NullTrigger {
    warned: AtomicBool,
    pub pulses: u64,
}

impl NullTrigger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerDevice for NullTrigger {
    fn pulse(&mut self, line: u8) -> Result<()> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!("no trigger device available, pulses on line {line} are dropped");
        }
        self.pulses += 1;
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

impl<T: TriggerDevice + ?Sized> TriggerDevice for Box<T> {
    fn pulse(&mut self, line: u8) -> Result<()> {
        (**self).pulse(line)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Device that remembers the frames it was pulsed on.
#[derive(Debug, Default, Clone)]
pub struct RecordingTrigger {
    pub lines: Vec<u8>,
}

impl TriggerDevice for RecordingTrigger {
    fn pulse(&mut self, line: u8) -> Result<()> {
        self.lines.push(line);
        Ok(())
    }
}

/// Frames that must fire a trigger, in ascending order, always terminated by
/// [`TriggerSchedule::SENTINEL`] so there is a next element to look at.
#[derive(Debug, Clone)]
pub struct TriggerSchedule {
    frames: BTreeSet<Frame>,
    next: Frame,
}

impl Default for TriggerSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSchedule {
    pub const SENTINEL: Frame = Frame::MAX;

    pub fn new() -> Self {
        let mut frames = BTreeSet::new();
        frames.insert(Self::SENTINEL);
        Self { frames, next: 0 }
    }

    /// Back to just the sentinel, cursor at the start.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.frames.insert(Self::SENTINEL);
        self.next = 0;
    }

    /// Registers `frame`; registering it again is a no-op.
    pub fn insert(&mut self, frame: Frame) {
        self.frames.insert(frame);
    }

    pub fn extend(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.frames.extend(frames);
    }

    pub fn contains(&self, frame: Frame) -> bool {
        frame != Self::SENTINEL && self.frames.contains(&frame)
    }

    /// Scheduled frames without the sentinel.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.frames.iter().copied().filter(|f| *f != Self::SENTINEL)
    }

    pub fn len(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first scheduled frame not yet consumed. Never empty: the sentinel
    /// is returned once real frames run out.
    pub fn peek(&self) -> Frame {
        self.frames
            .range(self.next..)
            .next()
            .copied()
            .unwrap_or(Self::SENTINEL)
    }

    /// Consumes every scheduled frame `<= frame` and reports whether `frame`
    /// itself was one of them.
    pub fn take_due(&mut self, frame: Frame) -> bool {
        let mut hit = false;
        while self.peek() <= frame && self.peek() != Self::SENTINEL {
            hit |= self.peek() == frame;
            self.next = self.peek() + 1;
        }
        hit
    }
}
