//! Device ownership and the per-frame pass encoder.
//!
//! Every fluid pass is one fullscreen draw with the same two bind groups:
//!
//! - group 0: a [`PassUniforms`] slot in a shared buffer, selected with a
//!   dynamic offset so each draw sees its own values
//! - group 1: the sampler at binding 0, then the pass inputs at 1..=N
//!
//! [`Frame`] records draws into one command encoder and stages the uniform
//! slots in CPU memory. Slots are uploaded once when the frame is
//! submitted. If a frame needs more draws than the buffer has slots, the
//! frame submits what it has and starts over.

mod capabilities;

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

pub use capabilities::{supported_format, Capabilities, FormatQuery, FormatSupport, FALLBACK_FORMAT};

use crate::error::GpuError;
use crate::field::FilterMode;

/// Most inputs any pass binds (the display pass).
pub const MAX_TEXTURES: usize = 4;

/// Uniform slots per submission.
pub const UNIFORM_SLOTS: u32 = 256;

const UNIFORM_SIZE: u64 = std::mem::size_of::<PassUniforms>() as u64;

/// Per-draw parameters. Mirrors `Uniforms` in `common.wgsl`.
///
/// Not every pass reads every field; unused ones stay zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],
    pub dye_texel_size: [f32; 2],
    pub point: [f32; 2],
    pub dither_scale: [f32; 2],
    pub color: [f32; 4],
    pub curve: [f32; 4],
    pub dt: f32,
    pub dissipation: f32,
    pub curl: f32,
    pub value: f32,
    pub aspect_ratio: f32,
    pub radius: f32,
    pub intensity: f32,
    pub weight: f32,
}

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh identity for a render target, used to catch read/write aliasing.
pub(crate) fn next_texture_id() -> u64 {
    NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A texture bound as a pass input.
#[derive(Clone, Copy)]
pub struct Binding<'a> {
    pub view: &'a wgpu::TextureView,
    pub filter: FilterMode,
    pub id: u64,
}

/// Where a pass writes.
#[derive(Clone, Copy)]
pub struct Target<'a> {
    pub view: &'a wgpu::TextureView,
    /// `None` for views the fluid does not own (the window surface).
    pub id: Option<u64>,
}

/// Device, queue and the layouts shared by every pass.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub caps: Capabilities,
    texture_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layouts: Vec<wgpu::PipelineLayout>,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u32,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let caps = Capabilities::negotiate(&device);

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let uniform_stride = align_to(UNIFORM_SIZE as u32, alignment);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: uniform_stride as u64 * UNIFORM_SLOTS as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(UNIFORM_SIZE),
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(UNIFORM_SIZE),
                }),
            }],
        });

        let sampler_type = if caps.linear_filtering {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        };

        let texture_layouts: Vec<wgpu::BindGroupLayout> = (0..=MAX_TEXTURES)
            .map(|count| {
                let mut entries = vec![wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(sampler_type),
                    count: None,
                }];
                entries.extend((1..=count as u32).map(|binding| wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float {
                            filterable: caps.linear_filtering,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                }));
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Pass Texture Layout"),
                    entries: &entries,
                })
            })
            .collect();

        let pipeline_layouts = texture_layouts
            .iter()
            .map(|texture_layout| {
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("Pass Pipeline Layout"),
                    bind_group_layouts: &[&uniform_layout, texture_layout],
                    push_constant_ranges: &[],
                })
            })
            .collect();

        let linear_sampler = create_sampler(&device, wgpu::FilterMode::Linear);
        let nearest_sampler = create_sampler(&device, wgpu::FilterMode::Nearest);

        Self {
            device,
            queue,
            caps,
            texture_layouts,
            pipeline_layouts,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            linear_sampler,
            nearest_sampler,
        }
    }

    /// Pipeline layout for a pass with `textures` inputs.
    pub fn pipeline_layout(&self, textures: usize) -> &wgpu::PipelineLayout {
        &self.pipeline_layouts[textures.min(MAX_TEXTURES)]
    }

    pub fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Linear if self.caps.linear_filtering => &self.linear_sampler,
            _ => &self.nearest_sampler,
        }
    }

    pub fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Start recording passes.
    pub fn begin_frame(&self, label: &'static str) -> Frame<'_> {
        Frame {
            gpu: self,
            label,
            encoder: self.create_encoder(label),
            staging: Vec::new(),
            slots: 0,
            draws: 0,
        }
    }

    fn create_encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Field Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Round `value` up to a multiple of `alignment`.
pub fn align_to(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// Command recording for one frame.
pub struct Frame<'a> {
    gpu: &'a GpuContext,
    label: &'static str,
    encoder: wgpu::CommandEncoder,
    staging: Vec<u8>,
    slots: u32,
    draws: u32,
}

impl<'a> Frame<'a> {
    #[inline]
    pub fn gpu(&self) -> &'a GpuContext {
        self.gpu
    }

    /// Draws recorded so far, across flushes.
    pub fn draws(&self) -> u32 {
        self.draws
    }

    /// Draw a fullscreen triangle with `pipeline` into `target`.
    ///
    /// Inputs bind at 1..=N in order. The sampler follows the first input's
    /// filter. A target must never also be an input.
    pub fn draw(
        &mut self,
        pipeline: &wgpu::RenderPipeline,
        uniforms: &PassUniforms,
        inputs: &[Binding<'_>],
        target: Target<'_>,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        debug_assert!(inputs.len() <= MAX_TEXTURES);
        debug_assert!(
            target.id.map_or(true, |id| inputs.iter().all(|input| input.id != id)),
            "pass reads and writes the same texture"
        );

        if self.slots == UNIFORM_SLOTS {
            log::trace!("{}: uniform slots exhausted, flushing", self.label);
            self.flush();
        }

        let stride = self.gpu.uniform_stride as usize;
        let offset = self.slots as usize * stride;
        self.staging.resize(offset + stride, 0);
        self.staging[offset..offset + UNIFORM_SIZE as usize].copy_from_slice(bytemuck::bytes_of(uniforms));
        self.slots += 1;

        let filter = inputs.first().map_or(FilterMode::Nearest, |input| input.filter);
        let mut entries = Vec::with_capacity(inputs.len() + 1);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(self.gpu.sampler(filter)),
        });
        for (i, input) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(input.view),
            });
        }
        let textures = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Textures"),
            layout: &self.gpu.texture_layouts[inputs.len()],
            entries: &entries,
        });

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.gpu.uniform_bind_group, &[offset as u32]);
        pass.set_bind_group(1, &textures, &[]);
        pass.draw(0..3, 0..1);
        drop(pass);

        self.draws += 1;
    }

    fn flush(&mut self) {
        if !self.staging.is_empty() {
            self.gpu.queue.write_buffer(&self.gpu.uniform_buffer, 0, &self.staging);
        }
        let encoder = std::mem::replace(&mut self.encoder, self.gpu.create_encoder(self.label));
        self.gpu.queue.submit(Some(encoder.finish()));
        self.staging.clear();
        self.slots = 0;
    }

    /// Upload staged uniforms and submit everything recorded.
    pub fn submit(mut self) {
        self.flush();
    }
}

/// Request an adapter and device able to run the fluid.
///
/// Pass the window surface when rendering to screen so the adapter is
/// compatible with it.
pub async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), GpuError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(GpuError::NoAdapter)?;

    let info = adapter.get_info();
    log::info!("Using adapter {} ({:?})", info.name, info.backend);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Fluid Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;

    device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
        log::error!("Uncaptured GPU error: {}", error);
    }));

    Ok((adapter, device, queue))
}

/// Device and queue without a window, for captures and tests.
pub async fn request_headless_device() -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let (_adapter, device, queue) = request_device(&instance, None).await?;
    Ok((device, queue))
}
