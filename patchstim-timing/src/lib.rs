pub mod pacer;
pub mod timer;

pub use pacer::{FramePacer, RunClock};
pub use timer::{FrameStats, HighPrecisionTimer, Timer};
