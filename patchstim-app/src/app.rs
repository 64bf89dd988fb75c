use anyhow::{Result, anyhow};
use patchstim_core::{CancelToken, GlobalConfig, StimDescriptor, TriggerDevice};
use patchstim_experiment::{RunConfig, RunController, RunEvent, RunOutcome};
use patchstim_render::SkiaDisplay;
use patchstim_timing::{HighPrecisionTimer, Timer};
use pixels::{Pixels, SurfaceTexture};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

type Controller = RunController<SkiaDisplay, Box<dyn TriggerDevice>>;

/// Window that presents one run frame per redraw; pixels' vsync holds the
/// cadence.
pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    controller: Controller,
    cancel: CancelToken,
    fullscreen: bool,
    size: (u32, u32),
    refresh_rate: Option<f64>,
    frame_rate: f64,
    present_timer: HighPrecisionTimer,
    error: Option<anyhow::Error>,
    should_exit: bool,
}

impl App {
    /// Prepares the run up front so configuration errors are reported
    /// before a window opens.
    pub fn new(
        stims: &[StimDescriptor],
        config: &GlobalConfig,
        run: RunConfig,
        trigger: Box<dyn TriggerDevice>,
        fullscreen: bool,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let display = SkiaDisplay::new(config)?.with_cancel(cancel.clone());
        let size = display.size();
        let controller = RunController::prepare(stims, config, run, display, trigger)?
            .with_cancel(cancel.clone());
        Ok(Self {
            window: None,
            pixels: None,
            controller,
            cancel,
            fullscreen,
            size,
            refresh_rate: None,
            frame_rate: config.frame_rate,
            present_timer: HighPrecisionTimer::new(),
            error: None,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<RunOutcome> {
        let event_loop = EventLoop::new()?;
        println!("Press ESC to stop the run.\n");
        event_loop.run_app(&mut self)?;

        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let stats = self.present_timer.frame_stats();
        if stats.frames > 0 {
            log::info!(
                "present interval {:.3} ms (jitter {:.3} ms, {:.1} fps)",
                stats.mean_frame_ns / 1e6,
                stats.jitter_ns / 1e6,
                stats.effective_fps
            );
        }
        self.controller
            .outcome()
            .cloned()
            .ok_or_else(|| anyhow!("window closed before the run started"))
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next());
        self.refresh_rate = monitor
            .as_ref()
            .and_then(|m| m.refresh_rate_millihertz())
            .map(|mhz| mhz as f64 / 1000.0);

        let (w, h) = self.size;
        let mut attributes = Window::default_attributes()
            .with_title("patchstim")
            .with_inner_size(PhysicalSize::new(w, h))
            .with_resizable(false);
        if self.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(monitor)));
        }
        let window = Arc::new(event_loop.create_window(attributes)?);
        let physical = window.inner_size();

        println!("Display Configuration:");
        println!("  Window: {}x{}", physical.width, physical.height);
        println!("  Stimulus buffer: {w}x{h}");
        if let Some(rate) = self.refresh_rate {
            println!("  Refresh rate: {rate:.1} Hz");
            if (rate - self.frame_rate).abs() > 0.5 {
                log::warn!(
                    "monitor refreshes at {rate:.1} Hz but stims are timed for {} Hz",
                    self.frame_rate
                );
            }
        }

        let surface = SurfaceTexture::new(physical.width, physical.height, window.clone());
        self.pixels = Some(Pixels::new(w, h, surface)?);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    /// One controller step, then present whatever it flipped.
    fn render(&mut self) -> Result<()> {
        let started = self.present_timer.now();
        for event in self.controller.step() {
            match event {
                RunEvent::RepetitionStarted(rep) => log::info!("repetition {} started", rep + 1),
                RunEvent::TriggerFired(frame) => log::trace!("trigger at frame {frame}"),
                RunEvent::Failed(e) => log::error!("{e}"),
                RunEvent::Cancelled | RunEvent::Completed => self.should_exit = true,
                _ => {}
            }
        }
        let pixels = self
            .pixels
            .as_mut()
            .ok_or_else(|| anyhow!("no surface to present on"))?;
        self.controller.display().copy_to(pixels.frame_mut());
        pixels.render()?;
        self.present_timer.record_frame(self.present_timer.elapsed(started));
        if self.controller.is_finished() {
            self.should_exit = true;
        }
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(size.width, size.height) {
                log::warn!("failed to resize surface: {e}");
            }
        }
    }

    fn stop(&mut self) {
        if !self.controller.is_finished() {
            log::info!("stop requested");
            self.cancel.cancel();
        }
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                log::error!("failed to create window and surface: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.stop();
                // one more step lets the controller clear the display and report
                if let Err(e) = self.render() {
                    log::warn!("final frame failed: {e:#}");
                }
                self.cleanup_and_exit(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    log::error!("presenting failed: {e:#}");
                    self.error = Some(e);
                    self.stop();
                }
                if self.should_exit && self.controller.is_finished() {
                    self.cleanup_and_exit(event_loop);
                } else if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    self.stop();
                }
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit && self.controller.is_finished() {
            event_loop.exit();
        }
    }
}
