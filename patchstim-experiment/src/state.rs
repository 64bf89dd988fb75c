use crate::config::RunConfig;
use crate::plan::RunPlan;
use crate::report::{MotionEntry, RunOutcome, RunReport, write_run_log};
use crate::stim::Stim;
use patchstim_core::{
    CancelToken, Display, Frame, GlobalConfig, Result, StimDescriptor, TriggerDevice,
    TriggerSchedule,
};
use patchstim_timing::{FramePacer, RunClock, Timer};

/// Things that happened during one [`RunController::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RepetitionStarted(u32),
    StartTrigger,
    TriggerFired(Frame),
    RepetitionFinished(u32),
    Cancelled,
    Failed(String),
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Next step starts a repetition.
    Idle,
    /// Blank flips after the run-start trigger.
    TriggerWait { remaining: u32 },
    Frames,
    Done,
}

/// Drives a run one flip at a time: per frame it checks for cancellation,
/// animates every stim, flips and then fires the triggers due on that frame.
pub struct RunController<D: Display, T: TriggerDevice> {
    plan: RunPlan,
    run: RunConfig,
    display: D,
    trigger: T,
    cancel: CancelToken,
    stims: Vec<Stim>,
    schedule: TriggerSchedule,
    stage: Stage,
    repetition: u32,
    frame: Frame,
    total_frames: Frame,
    frames_drawn: Frame,
    triggers: u64,
    clock: Option<RunClock>,
    pacer: FramePacer,
    motion_log: Vec<MotionEntry>,
    outcome: Option<RunOutcome>,
}

impl<D: Display, T: TriggerDevice> RunController<D, T> {
    /// Validates everything up front. Any configuration problem is returned
    /// here, before a single frame is drawn.
    pub fn prepare(
        descriptors: &[StimDescriptor],
        config: &GlobalConfig,
        run: RunConfig,
        display: D,
        trigger: T,
    ) -> Result<Self> {
        run.validate()?;
        let plan = RunPlan::build(descriptors, config)?;
        for (i, stim) in plan.stims.iter().enumerate() {
            Stim::instantiate(i, stim, &plan.config)?;
        }
        if !trigger.is_available() {
            log::warn!("running without a trigger device");
        }
        let pacer = if run.pace {
            FramePacer::new(plan.config.frame_rate)
        } else {
            FramePacer::unpaced()
        };
        Ok(Self {
            plan,
            run,
            display,
            trigger,
            cancel: CancelToken::new(),
            stims: Vec::new(),
            schedule: TriggerSchedule::new(),
            stage: Stage::Idle,
            repetition: 0,
            frame: 0,
            total_frames: 0,
            frames_drawn: 0,
            triggers: 0,
            clock: None,
            pacer,
            motion_log: Vec::new(),
            outcome: None,
        })
    }

    /// Shares an externally owned stop flag with this run.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    pub fn schedule(&self) -> &TriggerSchedule {
        &self.schedule
    }

    pub fn stims(&self) -> &[Stim] {
        &self.stims
    }

    /// Frame index within the current repetition.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn total_frames(&self) -> Frame {
        self.total_frames
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn into_parts(self) -> (D, T) {
        (self.display, self.trigger)
    }

    /// Runs to the end. Never fails: errors come back as
    /// [`RunOutcome::Failed`].
    pub fn run(&mut self) -> RunOutcome {
        loop {
            self.step();
            if let Some(outcome) = &self.outcome {
                return outcome.clone();
            }
        }
    }

    /// Advances by one flip.
    pub fn step(&mut self) -> Vec<RunEvent> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        let mut events = Vec::new();
        if let Err(e) = self.try_step(&mut events) {
            self.fail(e.to_string());
            events.push(RunEvent::Failed(e.to_string()));
        }
        events
    }

    fn try_step(&mut self, events: &mut Vec<RunEvent>) -> Result<()> {
        self.clock.get_or_insert_with(RunClock::start);
        if self.cancel.is_cancelled() || self.display.poll_cancel_key() {
            self.finish_cancelled();
            events.push(RunEvent::Cancelled);
            return Ok(());
        }
        if self.stage == Stage::Idle {
            self.begin_repetition(events)?;
        }
        match self.stage {
            Stage::TriggerWait { remaining } => {
                self.flip()?;
                self.stage = if remaining > 1 {
                    Stage::TriggerWait {
                        remaining: remaining - 1,
                    }
                } else {
                    Stage::Frames
                };
            }
            Stage::Frames => {
                if self.frame < self.total_frames {
                    self.draw_frame(events)?;
                }
                if self.frame >= self.total_frames {
                    self.end_repetition(events)?;
                }
            }
            Stage::Idle | Stage::Done => {}
        }
        Ok(())
    }

    fn flip(&mut self) -> Result<()> {
        self.display.flip()?;
        self.pacer.wait();
        Ok(())
    }

    fn pulse(&mut self) -> Result<()> {
        self.trigger.pulse(self.plan.config.trigger_line)?;
        self.triggers += 1;
        Ok(())
    }

    fn begin_repetition(&mut self, events: &mut Vec<RunEvent>) -> Result<()> {
        self.schedule.reset();
        self.stims.clear();
        let mut total = 0;
        for (i, plan) in self.plan.stims.iter().enumerate() {
            let mut stim = Stim::instantiate(i, plan, &self.plan.config)?;
            stim.make_drawable(&mut self.display)?;
            let window = stim.draw_times(&mut self.schedule);
            total = total.max(window.run_end());
            self.stims.push(stim);
        }
        self.total_frames = total;
        self.frame = 0;
        log::info!(
            "repetition {} of {}: {} frames, {} triggers",
            self.repetition + 1,
            self.run.repetitions,
            total,
            self.schedule.len()
        );
        events.push(RunEvent::RepetitionStarted(self.repetition));

        let wait = self.plan.config.trigger_wait_frames;
        if wait > 0 {
            self.pulse()?;
            events.push(RunEvent::StartTrigger);
            self.stage = Stage::TriggerWait { remaining: wait };
        } else {
            self.stage = Stage::Frames;
        }
        Ok(())
    }

    fn draw_frame(&mut self, events: &mut Vec<RunEvent>) -> Result<()> {
        let frame = self.frame;
        for stim in &mut self.stims {
            stim.animate(frame, &mut self.display)?;
        }
        self.flip()?;
        if self.schedule.take_due(frame) {
            self.pulse()?;
            events.push(RunEvent::TriggerFired(frame));
        }
        self.frame += 1;
        self.frames_drawn += 1;
        Ok(())
    }

    fn collect_motion(&mut self) {
        for stim in &mut self.stims {
            let index = stim.index();
            let records = stim.take_motion_log();
            if self.run.keep_motion_log {
                self.motion_log
                    .extend(records.into_iter().map(|record| MotionEntry {
                        repetition: self.repetition,
                        stim: index,
                        record,
                    }));
            }
        }
    }

    fn release_stims(&mut self) {
        for stim in &mut self.stims {
            stim.dispose(&mut self.display);
        }
        self.stims.clear();
    }

    fn end_repetition(&mut self, events: &mut Vec<RunEvent>) -> Result<()> {
        // boundaries that coincide with the end of the run
        if self.schedule.take_due(self.total_frames) {
            self.pulse()?;
            events.push(RunEvent::TriggerFired(self.total_frames));
        }
        self.collect_motion();
        self.release_stims();
        events.push(RunEvent::RepetitionFinished(self.repetition));
        self.repetition += 1;

        if self.repetition < self.run.repetitions {
            self.stage = Stage::Idle;
            return Ok(());
        }
        self.display.flip()?;
        let report = self.report();
        let report = self.attach_log(report, "completed");
        log::info!(
            "run completed: {} frames in {:.3} s ({:.2} fps)",
            report.frames,
            report.elapsed.as_secs_f64(),
            report.fps
        );
        self.stage = Stage::Done;
        self.outcome = Some(RunOutcome::Completed(report));
        events.push(RunEvent::Completed);
        Ok(())
    }

    fn finish_cancelled(&mut self) {
        self.collect_motion();
        self.release_stims();
        if let Err(e) = self.display.flip() {
            log::warn!("clearing flip after cancel failed: {e}");
        }
        let report = self.report();
        let report = self.attach_log(report, "cancelled");
        log::info!("run cancelled after {} frames", report.frames);
        self.stage = Stage::Done;
        self.outcome = Some(RunOutcome::Cancelled(report));
    }

    fn fail(&mut self, error: String) {
        log::error!("run failed at frame {}: {error}", self.frame);
        self.release_stims();
        if let Err(e) = self.display.flip() {
            log::warn!("clearing flip after failure failed: {e}");
        }
        self.stage = Stage::Done;
        self.outcome = Some(RunOutcome::Failed {
            error,
            frames: self.frames_drawn,
        });
    }

    fn report(&mut self) -> RunReport {
        let clock = *self.clock.get_or_insert_with(RunClock::start);
        let stats = self.pacer.timer().frame_stats();
        if stats.frames > 0 {
            log::debug!(
                "frame interval {:.3} ms, jitter {:.3} ms",
                stats.mean_frame_ns / 1e6,
                stats.jitter_ns / 1e6
            );
        }
        RunReport {
            fps: clock.fps(self.frames_drawn),
            elapsed: clock.elapsed(),
            log_id: None,
            frames: self.frames_drawn,
            repetitions: self.repetition,
            triggers: self.triggers,
            motion_log: std::mem::take(&mut self.motion_log),
        }
    }

    fn attach_log(&self, mut report: RunReport, status: &str) -> RunReport {
        let settings = &self.plan.config.log;
        if settings.enabled {
            match write_run_log(&settings.dir, &self.plan, &report, status) {
                Ok(id) => report.log_id = Some(id),
                Err(e) => log::warn!("could not write run log: {e}"),
            }
        }
        report
    }
}
