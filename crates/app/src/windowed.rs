//! Windowed mode: the sample renders into a Vulkan swap chain until the
//! window closes, Escape is pressed or the frame limit is reached.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use samples_core::{FileResolver, SampleConfig};
use samples_platform::{
    ActiveEventLoop, ApplicationHandler, ControlFlow, EventLoop, InputState, KeyCode, Window,
    WindowEvent, WindowId,
};
use samples_renderer::SampleRunner;
use samples_rhi::vulkan::{Instance, Surface, VulkanDevice};
use tracing::{error, info};

use crate::samples::Demo;

type Runner = SampleRunner<VulkanDevice, Demo<VulkanDevice>>;

struct App {
    config: SampleConfig,
    resolver: FileResolver,
    // Dropped before the window its surface was created for.
    runner: Option<Runner>,
    window: Option<Window>,
    input: InputState,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: SampleConfig, resolver: FileResolver) -> Self {
        Self {
            config,
            resolver,
            runner: None,
            window: None,
            input: InputState::new(),
            error: None,
        }
    }

    fn create_runner(&self, window: &Window) -> Result<Runner> {
        let display = window.raw_display_handle()?;
        let instance = Instance::new(&self.config.title, self.config.validation, Some(display))?;
        // SAFETY: the window outlives the surface, which the runner owns and
        // drops first.
        let surface = unsafe { Surface::new(&instance, display, window.raw_window_handle()?)? };
        let device = Arc::new(VulkanDevice::new(&instance, Some(&surface))?);

        let (width, height) = window.size();
        let swap_chain =
            device.create_swap_chain(surface, self.config.frame_count, width, height)?;
        let sample = Demo::by_name(&self.config.sample, &self.resolver)
            .with_context(|| format!("unknown sample '{}'", self.config.sample))?;

        Ok(SampleRunner::new(
            device,
            swap_chain,
            sample,
            self.config.wait_timeout(),
        )?)
    }

    /// Drains the GPU and leaves the event loop, keeping the first error.
    /// Validation errors seen during the run count as a failure.
    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(runner) = self.runner.take() {
            let device = runner.scheduler().device().clone();
            if let Err(e) = runner.shutdown() {
                self.fail(e.into());
            }
            let errors = device.validation_error_count();
            if errors > 0 {
                self.fail(anyhow!("{} Vulkan validation error(s)", errors));
            }
        }
        event_loop.exit();
    }

    fn fail(&mut self, e: anyhow::Error) {
        error!("{:#}", e);
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(runner), Some(window)) = (self.runner.as_mut(), self.window.as_ref()) else {
            return;
        };
        if window.is_minimized() {
            return;
        }

        if let Err(e) = runner.render_frame() {
            self.fail(e.into());
            self.shut_down(event_loop);
            return;
        }
        self.input.begin_frame();

        if let Some(limit) = self.config.frame_limit()
            && runner.frames_rendered() >= limit
        {
            info!("Rendered {} frame(s), exiting", limit);
            self.shut_down(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config) {
            Ok(window) => window,
            Err(e) => {
                self.fail(e.into());
                event_loop.exit();
                return;
            }
        };
        match self.create_runner(&window) {
            Ok(runner) => {
                info!("Initialization complete, entering main loop");
                self.runner = Some(runner);
                self.window = Some(window);
            }
            Err(e) => {
                self.fail(e.context("failed to initialize Vulkan"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.input.handle_event(&event) {
            if self.input.is_key_just_pressed(KeyCode::Escape) {
                info!("Escape pressed, shutting down");
                self.shut_down(event_loop);
            }
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shut_down(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(runner) = self.runner.as_mut() {
                    runner.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

pub fn run(config: SampleConfig, resolver: FileResolver) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, resolver);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
