//! The fluid: owns the device context, fields, materials, configuration
//! and input, and runs one frame per [`Fluid::update`].

use crate::config::{resolution, ConfigSlot, FluidConfig};
use crate::display::{self, RenderTarget};
use crate::error::{FluidError, GpuError, ShaderError};
use crate::field::{Field, FieldPixels, FilterMode};
use crate::gpu::{Frame, GpuContext};
use crate::input::{InputInjector, SplatRequest};
use crate::material::Programs;
use crate::solver;
use crate::targets::{FieldSet, Tiers};
use crate::textures::DitherTexture;
use crate::time::clamp_delta;

/// Which field [`Fluid::read_field`] copies back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Velocity,
    Dye,
    Pressure,
    Divergence,
    Curl,
    Bloom,
    Sunrays,
}

/// An RGBA8 image produced by [`Fluid::capture`], rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// GPU dye simulation with bloom and sunrays.
///
/// ```ignore
/// let (device, queue) = pollster::block_on(splash::gpu::request_headless_device())?;
/// let mut fluid = Fluid::new(device, queue, (1280, 720), FluidConfig::default())?;
/// fluid.input_mut().queue_random_splats(10);
/// fluid.apply_inputs()?;
/// fluid.step(1.0 / 60.0)?;
/// let image = fluid.capture()?;
/// ```
pub struct Fluid {
    gpu: GpuContext,
    programs: Programs,
    config: ConfigSlot,
    input: InputInjector,
    fields: FieldSet,
    tiers: Tiers,
    viewport: (u32, u32),
    pending_viewport: Option<(u32, u32)>,
    dither: Field,
}

impl Fluid {
    /// Negotiate formats, allocate every field for `viewport` and upload
    /// the default dither texture.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        viewport: (u32, u32),
        config: FluidConfig,
    ) -> Result<Self, FluidError> {
        let gpu = GpuContext::new(device, queue);
        let viewport = (viewport.0.max(1), viewport.1.max(1));

        let (fields, tiers) =
            FieldSet::allocate_with_fallback(&gpu, Tiers::from_config(&config), viewport, config.bloom_iterations)?;
        let dither = upload_dither(&gpu, &DitherTexture::default())?;

        log::info!(
            "Fluid ready at {}x{} (formats {:?}/{:?}/{:?}, linear filtering: {})",
            viewport.0,
            viewport.1,
            gpu.caps.rgba,
            gpu.caps.rg,
            gpu.caps.r,
            gpu.caps.linear_filtering
        );

        Ok(Self {
            gpu,
            programs: Programs::new(),
            config: ConfigSlot::new(config),
            input: InputInjector::new(viewport.0, viewport.1),
            fields,
            tiers,
            viewport,
            pending_viewport: None,
            dither,
        })
    }

    /// Replace the dither pattern used on bloom.
    pub fn with_dither(mut self, texture: DitherTexture) -> Result<Self, FluidError> {
        self.dither = upload_dither(&self.gpu, &texture)?;
        Ok(self)
    }

    /// Seed the random startup splats.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.input = InputInjector::with_seed(self.viewport.0, self.viewport.1, seed);
        self
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Configuration in effect for the current frame.
    pub fn config(&self) -> &FluidConfig {
        self.config.active()
    }

    /// Replace the configuration from the next frame on.
    pub fn set_config(&mut self, config: FluidConfig) {
        self.config.set(config);
    }

    /// Edit the configuration from the next frame on.
    pub fn edit_config(&mut self, f: impl FnOnce(&mut FluidConfig)) {
        self.config.edit(f);
    }

    pub fn input(&self) -> &InputInjector {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputInjector {
        &mut self.input
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn programs(&self) -> &Programs {
        &self.programs
    }

    /// Tiers the fields are allocated at. Lower than the configuration
    /// asks for if allocation had to fall back.
    pub fn tiers(&self) -> Tiers {
        self.tiers
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Record a new viewport size. Pointer coordinates switch over
    /// immediately; fields are reallocated at the next frame boundary.
    pub fn resize(&mut self, width: u32, height: u32) {
        let viewport = (width.max(1), height.max(1));
        self.input.set_viewport(viewport.0, viewport.1);
        self.pending_viewport = Some(viewport);
    }

    /// Apply pending configuration and viewport changes, reallocating
    /// fields if their sizes change. [`update`](Self::update) calls this
    /// first.
    ///
    /// If reallocation fails the fields, viewport and configuration stay as
    /// they were and the changes remain pending for the next call.
    pub fn begin_frame(&mut self) -> Result<(), FluidError> {
        self.begin_frame_with(Self::reallocate)
    }

    fn begin_frame_with(
        &mut self,
        reallocate: impl FnOnce(&mut Self, (u32, u32)) -> Result<(), FluidError>,
    ) -> Result<(), FluidError> {
        let applied = self.config.begin_frame();
        let mut realloc = match applied {
            Some(previous) => {
                log::debug!("Applied configuration update");
                self.config.active().needs_realloc(&previous)
            }
            None => false,
        };
        let viewport = self.pending_viewport.take().unwrap_or(self.viewport);
        if viewport != self.viewport {
            log::debug!("Viewport {:?} -> {:?}", self.viewport, viewport);
            realloc = true;
        }
        if !realloc {
            return Ok(());
        }

        if let Err(err) = reallocate(self, viewport) {
            log::warn!("Reallocation for {:?} failed, keeping {:?}: {}", viewport, self.viewport, err);
            if let Some(previous) = applied {
                self.config.rollback(previous);
            }
            self.pending_viewport.get_or_insert(viewport);
            return Err(err);
        }
        self.viewport = viewport;
        Ok(())
    }

    fn reallocate(&mut self, viewport: (u32, u32)) -> Result<(), FluidError> {
        let config = *self.config.active();
        let (fields, tiers) = FieldSet::allocate_with_fallback(
            &self.gpu,
            Tiers::from_config(&config),
            viewport,
            config.bloom_iterations,
        )?;

        let mut frame = self.gpu.begin_frame("resample");
        let programs = &mut self.programs;
        let resampled = solver::resample(&mut frame, programs, self.fields.velocity.read(), fields.velocity.read())
            .and_then(|()| solver::resample(&mut frame, programs, self.fields.dye.read(), fields.dye.read()));
        frame.submit();
        resampled?;

        self.fields = fields;
        self.tiers = tiers;
        Ok(())
    }

    /// One frame: pending changes, colour cycling, input, solver step
    /// (unless paused), then display into `target`.
    ///
    /// Passes recorded before a [`ShaderError`] are still submitted, so the
    /// fields stay consistent with their read/write roles.
    pub fn update(&mut self, dt: f32, target: &RenderTarget<'_>) -> Result<(), FluidError> {
        self.begin_frame()?;
        let dt = clamp_delta(dt);
        let config = *self.config.active();
        self.input.update_colors(dt, &config);

        let mut frame = self.gpu.begin_frame("fluid frame");
        let recorded = record_frame(
            &mut frame,
            &mut self.programs,
            &mut self.fields,
            &mut self.input,
            &self.dither,
            &config,
            dt,
            target,
        );
        frame.submit();
        Ok(recorded?)
    }

    /// Drain queued splats and moved pointers into splat passes.
    pub fn apply_inputs(&mut self) -> Result<(), FluidError> {
        let config = *self.config.active();
        let mut frame = self.gpu.begin_frame("inputs");
        let recorded = apply_inputs(&mut frame, &mut self.programs, &mut self.fields, &mut self.input, &config);
        frame.submit();
        Ok(recorded?)
    }

    /// Inject one splat right away.
    pub fn splat(&mut self, request: &SplatRequest) -> Result<(), FluidError> {
        let config = *self.config.active();
        let aspect = self.input.aspect_ratio();
        let mut frame = self.gpu.begin_frame("splat");
        let recorded = solver::splat(&mut frame, &mut self.programs, &mut self.fields, &config, request, aspect);
        frame.submit();
        Ok(recorded?)
    }

    /// One solver step of `dt` seconds (clamped).
    pub fn step(&mut self, dt: f32) -> Result<(), FluidError> {
        let config = *self.config.active();
        let dt = clamp_delta(dt);
        let mut frame = self.gpu.begin_frame("step");
        let recorded = solver::step(&mut frame, &mut self.programs, &mut self.fields, &config, dt);
        frame.submit();
        Ok(recorded?)
    }

    /// Only the projection part of a step.
    pub fn project(&mut self) -> Result<(), FluidError> {
        let config = *self.config.active();
        let mut frame = self.gpu.begin_frame("project");
        let recorded = solver::project(&mut frame, &mut self.programs, &mut self.fields, &config);
        frame.submit();
        Ok(recorded?)
    }

    /// Only the advection part of a step.
    pub fn advect(&mut self, dt: f32) -> Result<(), FluidError> {
        let config = *self.config.active();
        let dt = clamp_delta(dt);
        let mut frame = self.gpu.begin_frame("advect");
        let recorded = solver::advect(&mut frame, &mut self.programs, &mut self.fields, &config, dt);
        frame.submit();
        Ok(recorded?)
    }

    /// Post-process and composite into `target` without stepping.
    pub fn render(&mut self, target: &RenderTarget<'_>) -> Result<(), FluidError> {
        let config = *self.config.active();
        let mut frame = self.gpu.begin_frame("render");
        let recorded = display::render(&mut frame, &mut self.programs, &self.fields, &self.dither, &config, target);
        frame.submit();
        Ok(recorded?)
    }

    /// Render into a fresh target at the capture resolution and read it
    /// back as RGBA8.
    pub fn capture(&mut self) -> Result<CapturedFrame, FluidError> {
        let config = *self.config.active();
        let (width, height) = resolution(config.capture_resolution, self.viewport.0, self.viewport.1);
        let target = Field::new(&self.gpu, "capture", width, height, self.gpu.caps.rgba, FilterMode::Nearest)?;

        self.render(&RenderTarget::Offscreen(&target))?;
        let pixels = target.read_pixels(&self.gpu)?;
        log::debug!("Captured {}x{}", width, height);

        Ok(CapturedFrame {
            width,
            height,
            rgba: pixels.to_rgba8(),
        })
    }

    /// Copy a field back to the CPU. For the double-buffered ones this is
    /// the current `read` side.
    pub fn read_field(&self, kind: FieldKind) -> Result<FieldPixels, GpuError> {
        let field = match kind {
            FieldKind::Velocity => self.fields.velocity.read(),
            FieldKind::Dye => self.fields.dye.read(),
            FieldKind::Pressure => self.fields.pressure.read(),
            FieldKind::Divergence => &self.fields.divergence,
            FieldKind::Curl => &self.fields.curl,
            FieldKind::Bloom => &self.fields.bloom.target,
            FieldKind::Sunrays => &self.fields.sunrays.rays,
        };
        field.read_pixels(&self.gpu)
    }
}

fn upload_dither(gpu: &GpuContext, texture: &DitherTexture) -> Result<Field, FluidError> {
    Ok(Field::from_rgba8(gpu, "dither", &texture.data, texture.width, texture.height)?)
}

#[allow(clippy::too_many_arguments)]
fn record_frame(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    input: &mut InputInjector,
    dither: &Field,
    config: &FluidConfig,
    dt: f32,
    target: &RenderTarget<'_>,
) -> Result<(), ShaderError> {
    apply_inputs(frame, programs, fields, input, config)?;
    if !config.paused {
        solver::step(frame, programs, fields, config, dt)?;
    }
    display::render(frame, programs, fields, dither, config, target)
}

fn apply_inputs(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    input: &mut InputInjector,
    config: &FluidConfig,
) -> Result<(), ShaderError> {
    let aspect = input.aspect_ratio();
    for request in input.drain(config) {
        solver::splat(frame, programs, fields, config, &request, aspect)?;
    }
    Ok(())
}
