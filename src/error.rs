//! Error types for the fluid core.
//!
//! Device creation, field allocation and texture loading fail at setup or
//! resize time. Shader variants compile on first bind, so any solver or
//! post-process pass can return a [`ShaderError`] the first frame it uses a
//! new keyword set.

use std::fmt;

/// Errors that can occur during GPU initialization.
#[derive(Debug)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    SurfaceCreation(wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// The swapchain could not hand out a frame.
    Surface(wgpu::SurfaceError),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::SurfaceCreation(e) => write!(f, "Failed to create GPU surface: {}", e),
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::Surface(e) => write!(f, "Failed to acquire surface texture: {}", e),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::SurfaceCreation(e) => Some(e),
            GpuError::DeviceCreation(e) => Some(e),
            GpuError::Surface(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::CreateSurfaceError> for GpuError {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        GpuError::SurfaceCreation(e)
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// A render target could not be allocated.
///
/// Callers that resize fields retry with a smaller resolution tier before
/// surfacing this.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// The host cannot render to or sample from this format.
    UnsupportedFormat(wgpu::TextureFormat),
    /// Width or height is zero or above the device limit.
    InvalidSize {
        width: u32,
        height: u32,
        max: u32,
    },
    /// The device rejected the texture.
    Device(String),
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::UnsupportedFormat(format) => {
                write!(f, "Render target format {:?} is not renderable and sampleable on this device", format)
            }
            AllocationError::InvalidSize { width, height, max } => {
                write!(f, "Render target size {}x{} is outside 1..={}", width, height, max)
            }
            AllocationError::Device(msg) => write!(f, "Render target allocation failed: {}", msg),
        }
    }
}

impl std::error::Error for AllocationError {}

/// Shader variant failed to build.
///
/// Fatal for the variant: a pass with a broken shader cannot be skipped
/// without breaking the solver's pass order.
#[derive(Debug, Clone)]
pub struct ShaderError {
    /// Material label, e.g. `"advection"`.
    pub material: &'static str,
    /// Keywords defined for the failing variant.
    pub keywords: String,
    /// Compiler diagnostic log.
    pub message: String,
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shader [{}] failed to compile:\n{}", self.material, self.keywords, self.message)
    }
}

impl std::error::Error for ShaderError {}

/// Errors that can occur during texture loading.
#[derive(Debug)]
pub enum TextureError {
    /// Failed to load image file.
    ImageLoad(image::ImageError),
    /// Failed to read file from disk.
    Io(std::io::Error),
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureError::ImageLoad(e) => write!(f, "Failed to load image: {}", e),
            TextureError::Io(e) => write!(f, "Failed to read texture file: {}", e),
        }
    }
}

impl std::error::Error for TextureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TextureError::ImageLoad(e) => Some(e),
            TextureError::Io(e) => Some(e),
        }
    }
}

impl From<image::ImageError> for TextureError {
    fn from(e: image::ImageError) -> Self {
        TextureError::ImageLoad(e)
    }
}

impl From<std::io::Error> for TextureError {
    fn from(e: std::io::Error) -> Self {
        TextureError::Io(e)
    }
}

/// Errors surfaced by [`Fluid`](crate::Fluid) and the demo app.
#[derive(Debug)]
pub enum FluidError {
    /// Failed to create event loop.
    EventLoop(winit::error::EventLoopError),
    /// Failed to create window.
    Window(winit::error::OsError),
    /// GPU initialization failed.
    Gpu(GpuError),
    /// A field could not be allocated even at the lowest resolution tier.
    Allocation(AllocationError),
    /// A shader variant failed to compile.
    Shader(ShaderError),
    /// A texture could not be loaded.
    Texture(TextureError),
}

impl fmt::Display for FluidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluidError::EventLoop(e) => write!(f, "Failed to create event loop: {}", e),
            FluidError::Window(e) => write!(f, "Failed to create window: {}", e),
            FluidError::Gpu(e) => write!(f, "GPU error: {}", e),
            FluidError::Allocation(e) => write!(f, "{}", e),
            FluidError::Shader(e) => write!(f, "{}", e),
            FluidError::Texture(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FluidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FluidError::EventLoop(e) => Some(e),
            FluidError::Window(e) => Some(e),
            FluidError::Gpu(e) => Some(e),
            FluidError::Allocation(e) => Some(e),
            FluidError::Shader(e) => Some(e),
            FluidError::Texture(e) => Some(e),
        }
    }
}

impl From<winit::error::EventLoopError> for FluidError {
    fn from(e: winit::error::EventLoopError) -> Self {
        FluidError::EventLoop(e)
    }
}

impl From<winit::error::OsError> for FluidError {
    fn from(e: winit::error::OsError) -> Self {
        FluidError::Window(e)
    }
}

impl From<GpuError> for FluidError {
    fn from(e: GpuError) -> Self {
        FluidError::Gpu(e)
    }
}

impl From<AllocationError> for FluidError {
    fn from(e: AllocationError) -> Self {
        FluidError::Allocation(e)
    }
}

impl From<ShaderError> for FluidError {
    fn from(e: ShaderError) -> Self {
        FluidError::Shader(e)
    }
}

impl From<TextureError> for FluidError {
    fn from(e: TextureError) -> Self {
        FluidError::Texture(e)
    }
}
