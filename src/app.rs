//! Windowed demo: drives a [`Fluid`] from winit mouse, touch and keyboard
//! events.
//!
//! Controls: move the cursor to stir, touch with several fingers, `P`
//! pauses, `Space` adds random splats, `S` saves a PNG capture to the
//! working directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, Touch, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::FluidConfig;
use crate::display::RenderTarget;
use crate::error::{FluidError, GpuError};
use crate::fluid::{CapturedFrame, Fluid};
use crate::gpu;
use crate::input::{PointerId, HOVER_POINTER};
use crate::time::FrameClock;

/// Open a window and run the fluid until it is closed.
pub fn run(config: FluidConfig) -> Result<(), FluidError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    fluid: Fluid,
}

impl SurfaceState {
    async fn new(window: Arc<Window>, config: FluidConfig) -> Result<Self, FluidError> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window).map_err(GpuError::from)?;
        let (adapter, device, queue) = gpu::request_device(&instance, Some(&surface)).await?;

        let caps = surface.get_capabilities(&adapter);
        // The display pass writes gamma-encoded values itself.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or(GpuError::NoAdapter)?;
        let alpha_mode = if config.transparent && caps.alpha_modes.contains(&wgpu::CompositeAlphaMode::PreMultiplied) {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);
        log::info!("Surface {}x{} {:?} {:?}", width, height, format, alpha_mode);

        let mut fluid = Fluid::new(device, queue, (width, height), config)?;
        let startup = rand::thread_rng().gen_range(5..25);
        fluid.input_mut().queue_random_splats(startup);

        Ok(Self {
            surface,
            config: surface_config,
            fluid,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.fluid.gpu().device, &self.config);
        self.fluid.resize(width, height);
    }

    fn render(&mut self, dt: f32) -> Result<(), FluidError> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("Surface lost, reconfiguring");
                self.surface.configure(&self.fluid.gpu().device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(GpuError::Surface(e).into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let target = RenderTarget::Screen {
            view: &view,
            format: self.config.format,
            width: self.config.width,
            height: self.config.height,
        };
        self.fluid.update(dt, &target)?;
        output.present();
        Ok(())
    }
}

struct App {
    config: FluidConfig,
    window: Option<Arc<Window>>,
    state: Option<SurfaceState>,
    clock: FrameClock,
    cursor: PhysicalPosition<f64>,
    error: Option<FluidError>,
}

impl App {
    fn new(config: FluidConfig) -> Self {
        Self {
            config,
            window: None,
            state: None,
            clock: FrameClock::new(),
            cursor: PhysicalPosition::new(0.0, 0.0),
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: FluidError) {
        log::error!("{}", err);
        self.error = Some(err);
        event_loop.exit();
    }

    fn handle_touch(&mut self, touch: Touch) {
        let Some(state) = &mut self.state else { return };
        let input = state.fluid.input_mut();
        let id = touch.id as PointerId;
        let (x, y) = (touch.location.x as f32, touch.location.y as f32);
        match touch.phase {
            TouchPhase::Started => input.pointer_down(id, x, y),
            TouchPhase::Moved => input.pointer_move(id, x, y),
            TouchPhase::Ended | TouchPhase::Cancelled => input.pointer_up(id),
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let Some(state) = &mut self.state else { return };
        match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyP) => {
                let paused = !state.fluid.config().paused;
                state.fluid.edit_config(|c| c.paused = paused);
                log::info!("Paused: {}", paused);
            }
            PhysicalKey::Code(KeyCode::Space) => {
                let count = rand::thread_rng().gen_range(5..25);
                state.fluid.input_mut().queue_random_splats(count);
            }
            PhysicalKey::Code(KeyCode::KeyS) => match state.fluid.capture() {
                Ok(frame) => match save_capture(&frame) {
                    Ok(path) => log::info!("Saved capture to {}", path.display()),
                    Err(e) => log::error!("Failed to save capture: {}", e),
                },
                Err(e) => log::error!("Capture failed: {}", e),
            },
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("Splash")
            .with_transparent(self.config.transparent)
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };
        self.window = Some(window.clone());

        match pollster::block_on(SurfaceState::new(window, self.config)) {
            Ok(state) => self.state = Some(state),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.resize(size.width, size.height);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = position;
                if let Some(state) = &mut self.state {
                    state.fluid.input_mut().hover(position.x as f32, position.y as f32);
                }
            }
            WindowEvent::CursorLeft { .. } => {
                if let Some(state) = &mut self.state {
                    state.fluid.input_mut().pointer_up(HOVER_POINTER);
                }
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => {
                let (x, y) = (self.cursor.x as f32, self.cursor.y as f32);
                if let Some(state) = &mut self.state {
                    let input = state.fluid.input_mut();
                    match button_state {
                        ElementState::Pressed => input.pointer_down(HOVER_POINTER, x, y),
                        ElementState::Released => input.pointer_up(HOVER_POINTER),
                    }
                }
            }
            WindowEvent::Touch(touch) => self.handle_touch(touch),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event),
            WindowEvent::RedrawRequested => {
                let dt = self.clock.tick();
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render(dt) {
                        return self.fail(event_loop, e);
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn save_capture(frame: &CapturedFrame) -> Result<PathBuf, image::ImageError> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let path = PathBuf::from(format!("splash-{}.png", stamp));
    image::save_buffer(&path, &frame.rgba, frame.width, frame.height, image::ColorType::Rgba8)?;
    Ok(path)
}
