//! # Splash - GPU fluid dye simulation
//!
//! A stable-fluids solver on the GPU with dye advection, vorticity
//! confinement, bloom and sunrays, composited onto a window surface or an
//! offscreen texture.
//!
//! ## Quick Start
//!
//! ```ignore
//! use splash::prelude::*;
//!
//! fn main() -> Result<(), FluidError> {
//!     env_logger::init();
//!     splash::app::run(FluidConfig::default().with_curl(30.0))
//! }
//! ```
//!
//! ## Headless use
//!
//! [`Fluid`] only needs a `wgpu::Device` and `wgpu::Queue`, so it can run
//! without a window:
//!
//! ```ignore
//! let (device, queue) = pollster::block_on(splash::gpu::request_headless_device())?;
//! let mut fluid = Fluid::new(device, queue, (800, 600), FluidConfig::default())?;
//! fluid.splat(&SplatRequest::new(Vec2::new(0.5, 0.5), Vec2::new(400.0, 0.0), Vec3::new(0.3, 0.1, 0.0)))?;
//! fluid.step(1.0 / 60.0)?;
//! let frame = fluid.capture()?;
//! ```
//!
//! ## Frame structure
//!
//! Each [`Fluid::update`] runs, in order:
//!
//! | Stage | Passes |
//! |-------|--------|
//! | Boundary | pending config and viewport, field reallocation |
//! | Input | one splat pass pair per queued splat and moved pointer |
//! | Step | curl, vorticity, divergence, pressure clear, Jacobi, gradient subtract, advection |
//! | Post | bloom prefilter/down/up/final, sunrays mask/rays/blur |
//! | Display | background, composite with optional shading |
//!
//! The step is skipped while [`FluidConfig::paused`] is set.

pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod field;
pub mod fluid;
pub mod gpu;
pub mod input;
pub mod material;
pub mod post_process;
pub mod shader;
pub mod solver;
pub mod targets;
pub mod textures;
pub mod time;

pub use config::{resolution, FluidConfig, MIN_TIER};
pub use display::RenderTarget;
pub use error::{AllocationError, FluidError, GpuError, ShaderError, TextureError};
pub use field::{Field, FieldPixels, FilterMode};
pub use fluid::{CapturedFrame, FieldKind, Fluid};
pub use glam::{Vec2, Vec3, Vec4};
pub use input::{InputInjector, PointerId, SplatRequest, HOVER_POINTER};
pub use shader::{Keyword, KeywordSet};
pub use targets::Tiers;
pub use textures::DitherTexture;
pub use time::FrameClock;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use splash::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::FluidConfig;
    pub use crate::display::RenderTarget;
    pub use crate::error::FluidError;
    pub use crate::fluid::{CapturedFrame, FieldKind, Fluid};
    pub use crate::input::{SplatRequest, HOVER_POINTER};
    pub use crate::textures::DitherTexture;
    pub use crate::time::FrameClock;
    pub use crate::{Vec2, Vec3, Vec4};
}
