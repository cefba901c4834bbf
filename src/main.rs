// =============================================================================
// FRAME CORE DEMO - Drives RenderSystem from a winit event loop
// =============================================================================
//
// Registers a cube mesh, then draws a rotating grid of cubes lit by two
// orbiting point lights. The window can be resized or minimized freely;
// the render system rebuilds its swapchain as needed.
//
// =============================================================================

use anyhow::{Context, Result};
use frame_core::{
    CameraData, Config, FrameRenderData, LightingData, MeshHandle, PointLight, RenderObject,
    RenderSystem, Vertex, WindowHandles,
};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame-core demo");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated with an error")?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// RUST_LOG wins over the config's log level
fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.debug.log_level.as_str());
    env_logger::Builder::from_env(env).init();
}

// =============================================================================
// DEMO SCENE
// =============================================================================

const GRID: i32 = 5;

fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v, color) per face
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y, Vec3::new(0.9, 0.3, 0.3)),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, Vec3::new(0.3, 0.9, 0.3)),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z, Vec3::new(0.3, 0.3, 0.9)),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, Vec3::new(0.9, 0.9, 0.3)),
        (Vec3::Z, Vec3::X, Vec3::Y, Vec3::new(0.9, 0.3, 0.9)),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y, Vec3::new(0.3, 0.9, 0.9)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v, color) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = (normal + u * su + v * sv) * 0.5;
            let uv = Vec2::new((su + 1.0) * 0.5, (sv + 1.0) * 0.5);
            vertices.push(Vertex::new(position, normal, color, uv));
        }
        // Counter-clockwise when viewed from outside
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

fn build_frame(cube: MeshHandle, time: f32, aspect: f32) -> FrameRenderData {
    let eye = Vec3::new(0.0, 6.0, 12.0);
    let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    // Vulkan clip space has Y pointing down
    projection.y_axis.y *= -1.0;

    let camera = CameraData {
        view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
        projection,
        position: eye,
    };

    let mut objects = Vec::with_capacity((GRID * GRID) as usize);
    for x in 0..GRID {
        for z in 0..GRID {
            let offset = Vec3::new((x - GRID / 2) as f32 * 2.0, 0.0, (z - GRID / 2) as f32 * 2.0);
            let spin = Quat::from_rotation_y(time + (x + z) as f32 * 0.3);
            objects.push(RenderObject {
                mesh: cube,
                transform: Mat4::from_rotation_translation(spin, offset),
                color: Vec4::ONE,
            });
        }
    }

    let orbit = |phase: f32| Vec3::new((time + phase).cos() * 6.0, 3.0, (time + phase).sin() * 6.0);
    let lighting = LightingData {
        lights: vec![
            PointLight {
                position: orbit(0.0),
                color: Vec3::new(1.0, 0.85, 0.7),
                intensity: 4.0,
            },
            PointLight {
                position: orbit(std::f32::consts::PI),
                color: Vec3::new(0.6, 0.7, 1.0),
                intensity: 3.0,
            },
        ],
        ambient: Vec3::splat(0.08),
    };

    FrameRenderData {
        camera,
        objects,
        lighting,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it draws to.
struct App {
    config: Config,
    renderer: Option<RenderSystem>,
    window: Option<Arc<Window>>,
    cube: Option<MeshHandle>,
    started: Instant,
    last_fps_update: Instant,
    frames_since_update: u32,
    /// First fatal render error, reported after the event loop exits
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            cube: None,
            started: now,
            last_fps_update: now,
            frames_since_update: 0,
            fatal: None,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let handles = WindowHandles {
            display: window.raw_display_handle(),
            window: window.raw_window_handle(),
        };
        let size = window.inner_size();

        let mut renderer = RenderSystem::initialize(
            self.config.renderer_config(),
            handles,
            (size.width, size.height),
        )
        .context("Failed to initialize render system")?;

        let (vertices, indices) = cube_mesh();
        let cube = renderer
            .register_mesh("cube", &vertices, &indices)
            .context("Failed to upload cube mesh")?;

        self.cube = Some(cube);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window), Some(cube)) =
            (self.renderer.as_mut(), self.window.as_ref(), self.cube)
        else {
            return;
        };

        let size = window.inner_size();
        let aspect = size.width.max(1) as f32 / size.height.max(1) as f32;
        let frame = build_frame(cube, self.started.elapsed().as_secs_f32(), aspect);

        match renderer.draw_frame(&frame) {
            Ok(true) => self.frames_since_update += 1,
            Ok(false) => {}
            Err(err) if err.is_fatal() => {
                log::error!("Fatal render error: {}", err);
                self.fatal = Some(anyhow::Error::new(err).context("Rendering failed"));
                event_loop.exit();
                return;
            }
            Err(err) => log::warn!("Frame skipped: {}", err),
        }

        self.update_title();
    }

    fn update_title(&mut self) {
        let elapsed = self.last_fps_update.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return;
        }
        if let Some(ref window) = self.window {
            let fps = self.frames_since_update as f32 / elapsed;
            window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
        }
        self.frames_since_update = 0;
        self.last_fps_update = Instant::now();
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
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("{:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_close();
                }
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.on_surface_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.render(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.request_close();
                    }
                }
            }

            _ => {}
        }

        if self.renderer.as_ref().is_some_and(RenderSystem::should_close) {
            event_loop.exit();
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }
}
