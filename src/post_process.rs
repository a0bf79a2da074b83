//! Bloom and sunrays.
//!
//! Both chains read the current dye and write their own targets, which the
//! display pass then samples. Neither changes `dye.read`.

use glam::Vec2;

use crate::config::FluidConfig;
use crate::error::ShaderError;
use crate::field::Field;
use crate::gpu::{Frame, PassUniforms};
use crate::material::{BlendMode, Programs};
use crate::shader::KeywordSet;
use crate::solver::OVERWRITE;
use crate::targets::FieldSet;

fn texel_uniforms(texel_size: Vec2) -> PassUniforms {
    PassUniforms {
        texel_size: texel_size.to_array(),
        ..Default::default()
    }
}

/// Prefilter, downsample, additive upsample, final scale.
///
/// Does nothing when the chain has fewer than two mips.
pub fn bloom(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &FieldSet,
    config: &FluidConfig,
) -> Result<(), ShaderError> {
    let mips = &fields.bloom.mips;
    if mips.len() < 2 {
        return Ok(());
    }

    let gpu = frame.gpu();
    let target = &fields.bloom.target;
    let source = fields.dye.read();
    let format = target.format();

    let curve = config.bloom_curve();
    let prefilter = programs
        .bloom_prefilter
        .bind(gpu, KeywordSet::EMPTY, format, BlendMode::Opaque)?;
    let uniforms = PassUniforms {
        texel_size: source.texel_size().to_array(),
        curve: curve.extend(config.bloom_threshold).to_array(),
        ..Default::default()
    };
    frame.draw(prefilter, &uniforms, &[source.binding()], target.target(), OVERWRITE);

    let mut last: &Field = target;
    let down = programs.bloom_blur.bind(gpu, KeywordSet::EMPTY, format, BlendMode::Opaque)?;
    for mip in mips {
        frame.draw(down, &texel_uniforms(last.texel_size()), &[last.binding()], mip.target(), OVERWRITE);
        last = mip;
    }

    let up = programs.bloom_blur.bind(gpu, KeywordSet::EMPTY, format, BlendMode::Additive)?;
    for mip in mips.iter().rev().skip(1) {
        frame.draw(
            up,
            &texel_uniforms(last.texel_size()),
            &[last.binding()],
            mip.target(),
            wgpu::LoadOp::Load,
        );
        last = mip;
    }

    let finish = programs.bloom_final.bind(gpu, KeywordSet::EMPTY, format, BlendMode::Opaque)?;
    let uniforms = PassUniforms {
        intensity: config.bloom_intensity,
        ..texel_uniforms(last.texel_size())
    };
    frame.draw(finish, &uniforms, &[last.binding()], target.target(), OVERWRITE);
    Ok(())
}

/// Luminance mask, radial blur, one separable blur iteration.
///
/// The mask is written into `dye.write`, which the next dye pass
/// overwrites anyway.
pub fn sunrays(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &FieldSet,
    config: &FluidConfig,
) -> Result<(), ShaderError> {
    let gpu = frame.gpu();
    let source = fields.dye.read();
    let scratch = fields.dye.write();
    let rays = &fields.sunrays.rays;

    let mask = programs
        .sunrays_mask
        .bind(gpu, KeywordSet::EMPTY, scratch.format(), BlendMode::Opaque)?;
    frame.draw(
        mask,
        &texel_uniforms(source.texel_size()),
        &[source.binding()],
        scratch.target(),
        OVERWRITE,
    );

    let radial = programs.sunrays.bind(gpu, KeywordSet::EMPTY, rays.format(), BlendMode::Opaque)?;
    let uniforms = PassUniforms {
        weight: config.sunrays_weight,
        ..texel_uniforms(rays.texel_size())
    };
    frame.draw(radial, &uniforms, &[scratch.binding()], rays.target(), OVERWRITE);

    blur(frame, programs, rays, &fields.sunrays.temp, 1)
}

/// Separable blur of `target`, horizontal into `temp` then vertical back.
pub fn blur(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    target: &Field,
    temp: &Field,
    iterations: u32,
) -> Result<(), ShaderError> {
    let pipeline = programs
        .blur
        .bind(frame.gpu(), KeywordSet::EMPTY, target.format(), BlendMode::Opaque)?;
    let texel = target.texel_size();
    let horizontal = texel_uniforms(Vec2::new(texel.x, 0.0));
    let vertical = texel_uniforms(Vec2::new(0.0, texel.y));

    for _ in 0..iterations {
        frame.draw(pipeline, &horizontal, &[target.binding()], temp.target(), OVERWRITE);
        frame.draw(pipeline, &vertical, &[temp.binding()], target.target(), OVERWRITE);
    }
    Ok(())
}
