//! Images the fluid samples but never renders into.
//!
//! The only one is the dither pattern the display pass adds to bloom to
//! break up 8-bit banding. It can be loaded from an image file or
//! generated.
//!
//! ```ignore
//! let fluid = Fluid::new(device, queue, (1280, 720), FluidConfig::default())?
//!     .with_dither(DitherTexture::from_file("assets/blue_noise.png")?)?;
//! ```

use std::path::Path;

use crate::error::TextureError;

/// RGBA8 image used as the display pass's dither noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DitherTexture {
    /// Raw RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Edge length of the generated dither tile.
pub const DEFAULT_DITHER_SIZE: u32 = 128;

impl DitherTexture {
    /// Wrap raw RGBA data. Returns `None` if the length does not match.
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self { data, width, height })
    }

    /// Load any format the `image` crate is built with (PNG and JPEG here).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let bytes = std::fs::read(path.as_ref())?;
        let img = image::load_from_memory(&bytes)?.into_rgba8();
        let (width, height) = img.dimensions();
        log::debug!("Loaded dither texture {} ({}x{})", path.as_ref().display(), width, height);
        Ok(Self {
            data: img.into_raw(),
            width,
            height,
        })
    }

    /// Hash-based white noise, grey in RGB, opaque alpha.
    pub fn noise(size: u32, seed: u32) -> Self {
        let size = size.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let v = hash_noise(x, y, seed);
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Self {
            data,
            width: size,
            height: size,
        }
    }
}

impl Default for DitherTexture {
    fn default() -> Self {
        Self::noise(DEFAULT_DITHER_SIZE, 0)
    }
}

fn hash_noise(x: u32, y: u32, seed: u32) -> u8 {
    let mut n = x
        .wrapping_mul(374761393)
        .wrapping_add(y.wrapping_mul(668265263))
        .wrapping_add(seed.wrapping_mul(1013904223));
    n = (n ^ (n >> 13)).wrapping_mul(1274126177);
    n = n ^ (n >> 16);
    (n & 255) as u8
}
