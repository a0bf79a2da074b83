//! Final composite of dye, bloom and sunrays onto a target.

use crate::config::FluidConfig;
use crate::error::ShaderError;
use crate::field::Field;
use crate::gpu::{Frame, PassUniforms, Target};
use crate::material::{BlendMode, Programs};
use crate::post_process;
use crate::shader::{Keyword, KeywordSet};
use crate::targets::FieldSet;

/// Where [`render`] draws.
#[derive(Clone, Copy)]
pub enum RenderTarget<'a> {
    /// A window surface texture.
    Screen {
        view: &'a wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    },
    /// A field owned by the fluid, e.g. a capture target.
    Offscreen(&'a Field),
}

impl<'a> RenderTarget<'a> {
    pub fn size(&self) -> (u32, u32) {
        match self {
            RenderTarget::Screen { width, height, .. } => (*width, *height),
            RenderTarget::Offscreen(field) => field.size(),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match self {
            RenderTarget::Screen { format, .. } => *format,
            RenderTarget::Offscreen(field) => field.format(),
        }
    }

    pub fn is_screen(&self) -> bool {
        matches!(self, RenderTarget::Screen { .. })
    }

    fn target(&self) -> Target<'a> {
        match *self {
            RenderTarget::Screen { view, .. } => Target { view, id: None },
            RenderTarget::Offscreen(field) => field.target(),
        }
    }
}

/// Display shader keywords for a configuration.
pub fn display_keywords(config: &FluidConfig, fields: &FieldSet) -> KeywordSet {
    KeywordSet::EMPTY
        .with_if(Keyword::Shading, config.shading)
        .with_if(Keyword::Bloom, config.bloom && fields.bloom.mips.len() >= 2)
        .with_if(Keyword::Sunrays, config.sunrays)
}

/// Run the enabled post-process chains, then composite into `target`.
pub fn render(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &FieldSet,
    dither: &Field,
    config: &FluidConfig,
    target: &RenderTarget<'_>,
) -> Result<(), ShaderError> {
    if config.bloom {
        post_process::bloom(frame, programs, fields, config)?;
    }
    if config.sunrays {
        post_process::sunrays(frame, programs, fields, config)?;
    }

    let gpu = frame.gpu();
    let (width, height) = target.size();
    let (width, height) = (width.max(1), height.max(1));
    let format = target.format();
    let aspect_ratio = width as f32 / height as f32;

    let mut load = if config.transparent {
        wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
    } else {
        let c = config.back_color;
        wgpu::LoadOp::Clear(wgpu::Color {
            r: c.x as f64,
            g: c.y as f64,
            b: c.z as f64,
            a: 1.0,
        })
    };

    if config.transparent && target.is_screen() {
        let checkerboard = programs
            .checkerboard
            .bind(gpu, KeywordSet::EMPTY, format, BlendMode::Opaque)?;
        let uniforms = PassUniforms {
            aspect_ratio,
            ..Default::default()
        };
        frame.draw(checkerboard, &uniforms, &[], target.target(), load);
        load = wgpu::LoadOp::Load;
    }

    // A transparent capture keeps the dye's own alpha.
    let blend = if config.transparent && !target.is_screen() {
        BlendMode::Opaque
    } else {
        BlendMode::Premultiplied
    };

    let keywords = display_keywords(config, fields);
    let display = programs.display.bind(gpu, keywords, format, blend)?;
    let uniforms = PassUniforms {
        texel_size: [1.0 / width as f32, 1.0 / height as f32],
        dither_scale: [
            width as f32 / dither.width() as f32,
            height as f32 / dither.height() as f32,
        ],
        aspect_ratio,
        ..Default::default()
    };
    frame.draw(
        display,
        &uniforms,
        &[
            fields.dye.read().binding(),
            fields.bloom.target.binding(),
            fields.sunrays.rays.binding(),
            dither.binding(),
        ],
        target.target(),
        load,
    );
    Ok(())
}
