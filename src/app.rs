//! Window and event loop for the demos.
//!
//! The setup closure runs once the window and GPU exist and returns a
//! [`Demo`]. Every redraw then advances the orbit camera and the play clock
//! and renders one frame. Escape or closing the window exits.

use std::sync::Arc;
use std::time::Instant;

use glam::Mat4;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::dof::DepthOfField;
use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::instancing::PlayClock;
use crate::orbit_camera::OrbitCamera;
use crate::render_graph::{FrameState, PipelineGraph};

/// Configuration for the app window.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Refract".to_string(),
            width: 640,
            height: 480,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// What renders each frame.
pub enum Renderer {
    DepthOfField(DepthOfField),
    /// Any prebuilt graph, fed a frame state with default focal values.
    Graph(PipelineGraph),
}

impl Renderer {
    pub fn render(&mut self, gpu: &GpuContext, view: Mat4, time: f32) -> RenderResult<()> {
        match self {
            Self::DepthOfField(dof) => dof.update(gpu, view, time),
            Self::Graph(graph) => {
                let frame = FrameState {
                    view,
                    time,
                    ..FrameState::default()
                };
                graph.execute(gpu, &frame)
            }
        }
    }
}

/// A running demo: the renderer plus what drives it each tick.
pub struct Demo {
    pub renderer: Renderer,
    pub orbit: OrbitCamera,
    pub clock: PlayClock,
}

impl Demo {
    pub fn new(renderer: Renderer, orbit: OrbitCamera) -> Self {
        Self {
            renderer,
            orbit,
            clock: PlayClock::new(),
        }
    }

    pub fn with_clock(mut self, clock: PlayClock) -> Self {
        self.clock = clock;
        self
    }

    /// Advances the camera and clock by `dt` seconds and renders one frame.
    pub fn tick(&mut self, gpu: &GpuContext, dt: f32) -> RenderResult<()> {
        self.orbit.update(dt);
        self.clock.tick(dt as f64);
        let view = self.orbit.camera().view_matrix();
        self.renderer
            .render(gpu, view, self.clock.current_time() as f32)
    }
}

type SetupFn = Box<dyn FnOnce(&GpuContext) -> RenderResult<Demo>>;

enum AppState {
    Pending {
        config: AppConfig,
        setup: Option<SetupFn>,
    },
    Running {
        window: Arc<Window>,
        gpu: GpuContext,
        demo: Demo,
        last_frame: Instant,
    },
    Exited,
}

struct RefractApp {
    state: AppState,
    failure: Option<RenderError>,
}

impl RefractApp {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RenderError) {
        error!(error = %err, "demo stopped");
        self.failure = Some(err);
        self.state = AppState::Exited;
        event_loop.exit();
    }
}

/// Opens a window and runs `setup`'s demo until the window closes.
///
/// # Errors
///
/// Returns the first fatal error from window creation, GPU setup, the setup
/// closure, or a frame.
pub fn run_with_config<S>(config: AppConfig, setup: S) -> RenderResult<()>
where
    S: FnOnce(&GpuContext) -> RenderResult<Demo> + 'static,
{
    let event_loop =
        EventLoop::new().map_err(|e| RenderError::device(format!("event loop: {e}")))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = RefractApp {
        state: AppState::Pending {
            config,
            setup: Some(Box::new(setup)),
        },
        failure: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| RenderError::device(format!("event loop: {e}")))?;

    match app.failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl ApplicationHandler for RefractApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Pending { config, setup } = &mut self.state else {
            return;
        };
        let Some(setup) = setup.take() else {
            return;
        };

        let attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, RenderError::device(format!("window: {e}"))),
        };

        let started = GpuContext::new(Arc::clone(&window))
            .and_then(|gpu| setup(&gpu).map(|demo| (gpu, demo)));
        match started {
            Ok((gpu, demo)) => {
                info!("demo running");
                window.request_redraw();
                self.state = AppState::Running {
                    window,
                    gpu,
                    demo,
                    last_frame: Instant::now(),
                };
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let AppState::Running {
            window,
            gpu,
            demo,
            last_frame,
        } = &mut self.state
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => gpu.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(*last_frame).as_secs_f32();
                *last_frame = now;

                match demo.tick(gpu, dt) {
                    Ok(()) => {}
                    // Outdated or lost surfaces recover after a reconfigure.
                    Err(RenderError::Device(msg)) => {
                        warn!(error = %msg, "reconfiguring surface");
                        let size = window.inner_size();
                        gpu.resize(size.width, size.height);
                    }
                    Err(e) if e.is_fatal() => return self.fail(event_loop, e),
                    Err(e) => warn!(error = %e, "frame degraded"),
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}
