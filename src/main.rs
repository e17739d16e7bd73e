// =============================================================================
// VULKAN MESH RENDERER - Rotating textured models on a live swapchain
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer (explicit context object)                       │
// │          ├── VulkanDevice + Uploader + TextureTable             │
// │          ├── ModelRegistry (meshes, per-model transform)        │
// │          └── SwapchainManager (one generation at a time)        │
// │                └── FrameScheduler (K frames in flight)          │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Update model transforms from elapsed time
// 2. Wait for the current frame slot's fence
// 3. Acquire a swapchain image (rebuild if out of date)
// 4. Record the image's command buffer and write its uniform buffer
// 5. Submit, then present
// 6. Rebuild the generation if the surface changed
//
// =============================================================================

mod backend;
mod config;
mod error;
mod loader;
mod renderer;
mod scene;
mod scheduler;

use anyhow::Result;
use config::Config;
use renderer::Renderer;
use scheduler::FrameOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Logger first, so config warnings are not lost
    init_logging();
    let config = Config::load();

    log::info!("Starting Vulkan mesh renderer");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!(
        "Present mode: {}, frames in flight: {}",
        config.graphics.present_mode,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    // Sleep between events; redraws are requested only while there is a swapchain
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // A fatal error stops the loop; surface it so the exit code is non-zero
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    // RUST_LOG overrides the Info default
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// FPS COUNTER
// =============================================================================

/// Counts presented frames and reports once per interval
struct FpsCounter {
    frames: u32,
    last_update: Instant,
    interval: Duration,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            last_update: now,
            interval: Duration::from_secs(1),
        }
    }

    /// Returns (fps, average frame time in ms) when an interval has elapsed
    fn tick(&mut self, now: Instant) -> Option<(f64, f64)> {
        self.frames += 1;
        let elapsed = now.duration_since(self.last_update);
        if elapsed < self.interval {
            return None;
        }

        let seconds = elapsed.as_secs_f64();
        let fps = self.frames as f64 / seconds;
        let frame_ms = seconds * 1000.0 / self.frames as f64;

        self.frames = 0;
        self.last_update = now;
        Some((fps, frame_ms))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer goes before the
/// window it presents to.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    /// First fatal error; returned from `main` after the loop exits
    error: Option<anyhow::Error>,
    start_time: Instant,
    fps: FpsCounter,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            error: None,
            start_time: now,
            fps: FpsCounter::new(now),
        }
    }

    /// Create the renderer and load the configured models
    fn init_renderer(&mut self, window: Arc<Window>) -> Result<()> {
        let mut renderer = Renderer::new(window, &self.config)?;

        if self.config.assets.models.is_empty() {
            renderer.load_model("demo", loader::demo_meshes())?;
        } else {
            for path in &self.config.assets.models {
                renderer.load_obj(path)?;
            }
        }
        log::info!("Scene ready: {} models", renderer.model_count());

        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn render_frame(&mut self) -> Result<FrameOutcome> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(FrameOutcome::Skipped);
        };

        let elapsed = self.start_time.elapsed().as_secs_f32();
        renderer.update_models(elapsed);
        renderer.draw()
    }

    /// No swapchain (minimized) means nothing to draw: wait for a resize
    fn wants_redraw(&self) -> bool {
        self.renderer
            .as_ref()
            .is_some_and(Renderer::has_swapchain)
    }

    fn update_fps(&mut self) {
        let Some((fps, frame_ms)) = self.fps.tick(Instant::now()) else {
            return;
        };

        if self.config.debug.show_fps {
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} | FPS: {:.0} | Frame: {:.2}ms",
                    self.config.window.title, fps, frame_ms
                ));
            }
        }
        log::debug!("FPS: {:.0} ({:.2}ms)", fps, frame_ms);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };
        self.window = Some(Arc::clone(&window));

        if let Err(e) = self.init_renderer(window) {
            self.fail(event_loop, e.context("Failed to initialize renderer"));
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
                // Drawing may have stopped while the window had no area
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(FrameOutcome::Presented | FrameOutcome::PresentedThenRebuilt) => {
                    self.update_fps();
                }
                Ok(FrameOutcome::Rebuilt | FrameOutcome::Skipped) => {}
                Err(e) => self.fail(event_loop, e.context("Render error")),
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws while there is something to draw into
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.wants_redraw() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_once_per_interval() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for i in 1..60 {
            assert!(fps.tick(start + Duration::from_millis(i * 10)).is_none());
        }

        let (rate, frame_ms) = fps.tick(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 60.0).abs() < 1e-6);
        assert!((frame_ms - 1000.0 / 60.0).abs() < 1e-6);

        // Counter resets after reporting
        assert!(fps.tick(start + Duration::from_millis(1010)).is_none());
    }

    #[test]
    fn test_no_redraw_without_renderer() {
        let app = App::new(Config::default());
        assert!(!app.wants_redraw());
    }
}
