use crate::motion::MotionRecord;
use crate::plan::RunPlan;
use patchstim_core::{Frame, Result, StimError};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A motion-log record tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionEntry {
    pub repetition: u32,
    pub stim: usize,
    #[serde(flatten)]
    pub record: MotionRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub fps: f64,
    pub elapsed: Duration,
    /// Stem of the run-log files, when a log was written.
    pub log_id: Option<String>,
    /// Stim frames drawn over all repetitions.
    pub frames: Frame,
    /// Repetitions that ran to their last frame.
    pub repetitions: u32,
    pub triggers: u64,
    pub motion_log: Vec<MotionEntry>,
}

/// How a run ended. Failures are values, not errors, so a caller always gets
/// its frame accounting back.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    Cancelled(RunReport),
    Failed { error: String, frames: Frame },
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Cancelled(r) => Some(r),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn frames(&self) -> Frame {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Cancelled(r) => r.frames,
            RunOutcome::Failed { frames, .. } => *frames,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Cancelled(_) => "cancelled",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}

/// Human-readable run summary followed by every stim's parameters.
pub fn summary(plan: &RunPlan, report: &RunReport, status: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "status: {status}");
    let _ = writeln!(out, "repetitions: {}", report.repetitions);
    let _ = writeln!(out, "frames: {}", report.frames);
    let _ = writeln!(out, "triggers: {}", report.triggers);
    let _ = writeln!(out, "mean fps: {:.3}", report.fps);
    let _ = writeln!(out, "elapsed: {:.3} s", report.elapsed.as_secs_f64());
    let _ = writeln!(out, "frame rate: {} Hz", plan.config.frame_rate);
    let _ = writeln!(out, "pix per micron: {}", plan.config.pix_per_micron);
    for (i, stim) in plan.stims.iter().enumerate() {
        let _ = writeln!(out);
        let hole = if stim.annulus_hole { " (annulus hole)" } else { "" };
        let _ = writeln!(out, "[stim {i}: {}{hole}]", stim.params.kind);
        match serde_json::to_value(&stim.params) {
            Ok(serde_json::Value::Object(fields)) => {
                for (name, value) in fields {
                    let _ = writeln!(out, "{name} = {value}");
                }
            }
            _ => {
                let _ = writeln!(out, "{:?}", stim.params);
            }
        }
    }
    out
}

/// Picks `run_YYYYmmdd_HHMMSS`, with a numeric suffix if that name is taken.
fn fresh_id(dir: &Path) -> String {
    let base = chrono::Local::now().format("run_%Y%m%d_%H%M%S").to_string();
    let taken = |id: &str| dir.join(format!("{id}.txt")).exists();
    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !taken(id))
        .unwrap_or(base)
}

/// Writes `<id>.txt` (summary) and `<id>.json` (the exact descriptor list)
/// and returns the id.
pub fn write_run_log(
    dir: &Path,
    plan: &RunPlan,
    report: &RunReport,
    status: &str,
) -> Result<String> {
    std::fs::create_dir_all(dir).map_err(|e| StimError::io(dir, e))?;
    let id = fresh_id(dir);
    let text_path: PathBuf = dir.join(format!("{id}.txt"));
    std::fs::write(&text_path, summary(plan, report, status))
        .map_err(|e| StimError::io(&text_path, e))?;
    patchstim_core::save_descriptors(dir.join(format!("{id}.json")), &plan.descriptors)?;
    if !report.motion_log.is_empty() {
        let motion_path = dir.join(format!("{id}_motion.json"));
        let text = serde_json::to_string_pretty(&report.motion_log)?;
        std::fs::write(&motion_path, text).map_err(|e| StimError::io(&motion_path, e))?;
    }
    log::info!("run log written to {}", text_path.display());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchstim_core::{GlobalConfig, StimDescriptor, StimKind, load_descriptors};

    fn report() -> RunReport {
        RunReport {
            fps: 59.9,
            elapsed: Duration::from_millis(1500),
            log_id: None,
            frames: 90,
            repetitions: 1,
            triggers: 2,
            motion_log: Vec::new(),
        }
    }

    #[test]
    fn summary_lists_counts_and_parameters() {
        let list = vec![StimDescriptor::new(StimKind::Static).with("duration", 1.5)];
        let plan = RunPlan::build(&list, &GlobalConfig::default()).unwrap();
        let text = summary(&plan, &report(), "completed");
        assert!(text.contains("frames: 90"));
        assert!(text.contains("mean fps: 59.900"));
        assert!(text.contains("[stim 0: static]"));
        assert!(text.contains("duration = 90"));
    }

    #[test]
    fn log_keeps_an_exact_copy_of_the_descriptors() {
        let dir = std::env::temp_dir().join(format!("patchstim-log-{}", std::process::id()));
        let list = vec![
            StimDescriptor::new(StimKind::Moving).with("speed", 250.0),
            StimDescriptor::new(StimKind::Static),
        ];
        let plan = RunPlan::build(&list, &GlobalConfig::default()).unwrap();
        let first = write_run_log(&dir, &plan, &report(), "completed").unwrap();
        let second = write_run_log(&dir, &plan, &report(), "completed").unwrap();
        assert!(first.starts_with("run_"));
        assert_ne!(first, second);
        let replay = load_descriptors(dir.join(format!("{first}.json"))).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(replay, list);
    }
}
