//! Render-target fields.
//!
//! A [`Field`] is one 2D texture the solver reads from and renders into:
//! velocity, dye, pressure and friends. Quantities that are updated from
//! their own previous value live in a [`DoubleField`], a read/write pair
//! that is swapped after each pass so no pass ever samples the texture it
//! is writing.

use glam::{Vec2, Vec4};

use crate::error::{AllocationError, GpuError};
use crate::gpu::{next_texture_id, Binding, FormatQuery, GpuContext, Target};

/// Sampling filter for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Bilinear. Used for quantities that are advected or resampled.
    #[default]
    Linear,
    /// Point sampling. Used for the pressure solve.
    Nearest,
}

const FIELD_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A single 2D render target.
#[derive(Debug)]
pub struct Field {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    id: u64,
    label: &'static str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    filter: FilterMode,
}

impl Field {
    /// Allocate a field.
    ///
    /// Fails when the size is outside the device limits, the format cannot
    /// be rendered to, or the device rejects the texture. A filter the
    /// host cannot honour for `format` degrades to [`FilterMode::Nearest`].
    pub fn new(
        gpu: &GpuContext,
        label: &'static str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        filter: FilterMode,
    ) -> Result<Self, AllocationError> {
        let max = gpu.max_texture_size();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(AllocationError::InvalidSize { width, height, max });
        }

        let support = gpu.device.format_support(format);
        if !support.renderable {
            return Err(AllocationError::UnsupportedFormat(format));
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: FIELD_USAGE,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let validation = pollster::block_on(gpu.device.pop_error_scope());
        let out_of_memory = pollster::block_on(gpu.device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            return Err(AllocationError::Device(error.to_string()));
        }

        let filter = if support.filterable && gpu.caps.linear_filtering {
            filter
        } else {
            FilterMode::Nearest
        };

        log::debug!("Allocated {} {}x{} {:?} {:?}", label, width, height, format, filter);

        Ok(Self {
            texture,
            view,
            id: next_texture_id(),
            label,
            width,
            height,
            format,
            filter,
        })
    }

    /// Upload an RGBA8 image as a sampled field.
    pub fn from_rgba8(
        gpu: &GpuContext,
        label: &'static str,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self, AllocationError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(AllocationError::Device(format!(
                "{}: expected {} bytes of RGBA8 data, got {}",
                label,
                expected,
                data.len()
            )));
        }

        let field = Self::new(gpu, label, width, height, wgpu::TextureFormat::Rgba8Unorm, FilterMode::Linear)?;
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &field.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            field.extent(),
        );
        Ok(field)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    #[inline]
    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// `(1 / width, 1 / height)`, the uv distance between texel centres.
    #[inline]
    pub fn texel_size(&self) -> Vec2 {
        Vec2::new(1.0 / self.width as f32, 1.0 / self.height as f32)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// This field as a pass input.
    pub fn binding(&self) -> Binding<'_> {
        Binding {
            view: &self.view,
            filter: self.filter,
            id: self.id,
        }
    }

    /// This field as a pass output.
    pub fn target(&self) -> Target<'_> {
        Target {
            view: &self.view,
            id: Some(self.id),
        }
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Copy the field back to the CPU. Blocks until the GPU is done.
    ///
    /// Channels the format lacks read as zero.
    pub fn read_pixels(&self, gpu: &GpuContext) -> Result<FieldPixels, GpuError> {
        let bytes_per_texel = self
            .format
            .block_copy_size(None)
            .ok_or_else(|| GpuError::BufferMapping(format!("{:?} cannot be copied", self.format)))?;
        let unpadded = self.width * bytes_per_texel;
        let padded = crate::gpu::align_to(unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback"),
            size: padded as u64 * self.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Field Readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            self.extent(),
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let texels = {
            let data = slice.get_mapped_range();
            let mut texels = Vec::with_capacity((self.width * self.height) as usize);
            for row in data.chunks(padded as usize).take(self.height as usize) {
                for texel in row[..unpadded as usize].chunks_exact(bytes_per_texel as usize) {
                    texels.push(decode_texel(self.format, texel));
                }
            }
            texels
        };
        staging.unmap();

        Ok(FieldPixels {
            width: self.width,
            height: self.height,
            texels,
        })
    }
}

/// CPU copy of a field, row-major from the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPixels {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Vec4>,
}

impl FieldPixels {
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.width + x) as usize]
    }

    /// Sum of squared RGB over all texels.
    pub fn energy(&self) -> f32 {
        self.texels.iter().map(|t| t.truncate().length_squared()).sum()
    }

    /// Quantize to RGBA8, clamping each channel to 0..1.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|t| t.to_array())
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }
}

fn decode_texel(format: wgpu::TextureFormat, bytes: &[u8]) -> Vec4 {
    let mut out = [0.0f32; 4];
    match format {
        wgpu::TextureFormat::R16Float | wgpu::TextureFormat::Rg16Float | wgpu::TextureFormat::Rgba16Float => {
            for (c, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *c = half::f16::from_bits(u16::from_le_bytes([pair[0], pair[1]])).to_f32();
            }
        }
        wgpu::TextureFormat::R32Float | wgpu::TextureFormat::Rg32Float | wgpu::TextureFormat::Rgba32Float => {
            for (c, quad) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *c = f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
            }
        }
        wgpu::TextureFormat::Rgba8Unorm => {
            for (c, byte) in out.iter_mut().zip(bytes) {
                *c = *byte as f32 / 255.0;
            }
        }
        wgpu::TextureFormat::Bgra8Unorm => {
            out = [bytes[2], bytes[1], bytes[0], bytes[3]].map(|b| b as f32 / 255.0);
        }
        _ => {}
    }
    Vec4::from_array(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_exchanges_roles() {
        let mut pair = DoubleBuffered::new("a", "b");
        assert_eq!((*pair.read(), *pair.write()), ("a", "b"));
        pair.swap();
        assert_eq!((*pair.read(), *pair.write()), ("b", "a"));
        pair.swap();
        assert_eq!(*pair.read(), "a");
    }

    #[test]
    fn test_f16_decode() {
        let r16 = |bits: u16| decode_texel(wgpu::TextureFormat::R16Float, &bits.to_le_bytes()).x;
        assert_eq!(r16(0x0000), 0.0);
        assert_eq!(r16(0x3c00), 1.0);
        assert_eq!(r16(0xc000), -2.0);
        assert_eq!(r16(0x3800), 0.5);
        assert_eq!(r16(0x7bff), 65504.0);
        assert!(r16(0x7c00).is_infinite());
        assert!(r16(0x7e00).is_nan());
        // Smallest subnormal.
        assert!((r16(0x0001) - 5.960_464_5e-8).abs() < 1e-12);
    }

    #[test]
    fn test_decode_half_float_rg() {
        let bytes = [0x00, 0x3c, 0x00, 0xc0];
        let texel = decode_texel(wgpu::TextureFormat::Rg16Float, &bytes);
        assert_eq!(texel, Vec4::new(1.0, -2.0, 0.0, 0.0));
    }

    #[test]
    fn test_decode_unorm() {
        let texel = decode_texel(wgpu::TextureFormat::Rgba8Unorm, &[255, 0, 51, 255]);
        assert_eq!(texel, Vec4::new(1.0, 0.0, 0.2, 1.0));
        let texel = decode_texel(wgpu::TextureFormat::Bgra8Unorm, &[255, 0, 51, 255]);
        assert_eq!(texel, Vec4::new(0.2, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_pixels_energy_and_quantize() {
        let pixels = FieldPixels {
            width: 2,
            height: 1,
            texels: vec![Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::new(0.0, 2.0, 0.0, -1.0)],
        };
        assert_eq!(pixels.energy(), 5.0);
        assert_eq!(pixels.get(1, 0).y, 2.0);
        assert_eq!(pixels.to_rgba8(), vec![255, 0, 0, 255, 0, 255, 0, 0]);
    }
}
