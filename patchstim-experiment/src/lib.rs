//! Stim planning, per-frame animation and the run controller.

pub mod config;
pub mod motion;
pub mod plan;
pub mod report;
pub mod state;
pub mod stim;
pub mod table;

pub use config::RunConfig;
pub use motion::MotionRecord;
pub use plan::{RunPlan, StimPlan};
pub use report::{MotionEntry, RunOutcome, RunReport, write_run_log};
pub use state::{RunController, RunEvent};
pub use stim::{DrawWindow, Stim};
pub use table::{TableData, load_table};
