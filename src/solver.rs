//! The stable-fluids step.
//!
//! Each function records passes into a [`Frame`]; nothing here touches
//! the queue directly. Pass order within a step is fixed:
//! curl, vorticity, divergence, pressure clear, Jacobi iterations,
//! gradient subtraction, velocity advection, dye advection.

use glam::{Vec2, Vec3};

use crate::config::{splat_falloff, FluidConfig};
use crate::error::ShaderError;
use crate::field::{DoubleField, Field};
use crate::gpu::{Frame, PassUniforms};
use crate::input::SplatRequest;
use crate::material::{BlendMode, Programs};
use crate::shader::{Keyword, KeywordSet};
use crate::targets::FieldSet;

/// Every solver pass overwrites its whole target.
pub(crate) const OVERWRITE: wgpu::LoadOp<wgpu::Color> = wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT);

fn uniforms_for(texel_size: Vec2) -> PassUniforms {
    PassUniforms {
        texel_size: texel_size.to_array(),
        ..Default::default()
    }
}

/// One full solver step of `dt` seconds.
pub fn step(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    config: &FluidConfig,
    dt: f32,
) -> Result<(), ShaderError> {
    vorticity(frame, programs, fields, config, dt)?;
    project(frame, programs, fields, config)?;
    advect(frame, programs, fields, config, dt)
}

/// Curl of the velocity, then the confinement force that feeds it back.
pub fn vorticity(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    config: &FluidConfig,
    dt: f32,
) -> Result<(), ShaderError> {
    let gpu = frame.gpu();
    let texel = uniforms_for(fields.velocity.texel_size());

    let curl = programs.curl.bind(gpu, KeywordSet::EMPTY, fields.curl.format(), BlendMode::Opaque)?;
    frame.draw(curl, &texel, &[fields.velocity.read().binding()], fields.curl.target(), OVERWRITE);

    let uniforms = PassUniforms {
        curl: config.curl,
        dt,
        ..texel
    };
    let vorticity = programs
        .vorticity
        .bind(gpu, KeywordSet::EMPTY, fields.velocity.format(), BlendMode::Opaque)?;
    frame.draw(
        vorticity,
        &uniforms,
        &[fields.velocity.read().binding(), fields.curl.binding()],
        fields.velocity.write().target(),
        OVERWRITE,
    );
    fields.velocity.swap();
    Ok(())
}

/// Make the velocity divergence-free: divergence, pressure solve,
/// gradient subtraction.
pub fn project(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    config: &FluidConfig,
) -> Result<(), ShaderError> {
    let gpu = frame.gpu();
    let texel = uniforms_for(fields.velocity.texel_size());

    let divergence = programs
        .divergence
        .bind(gpu, KeywordSet::EMPTY, fields.divergence.format(), BlendMode::Opaque)?;
    frame.draw(
        divergence,
        &texel,
        &[fields.velocity.read().binding()],
        fields.divergence.target(),
        OVERWRITE,
    );

    // Last step's pressure, decayed, is the initial guess.
    let clear = programs
        .clear
        .bind(gpu, KeywordSet::EMPTY, fields.pressure.format(), BlendMode::Opaque)?;
    let decay = PassUniforms {
        value: config.pressure,
        ..texel
    };
    frame.draw(
        clear,
        &decay,
        &[fields.pressure.read().binding()],
        fields.pressure.write().target(),
        OVERWRITE,
    );
    fields.pressure.swap();

    let jacobi = programs
        .pressure
        .bind(gpu, KeywordSet::EMPTY, fields.pressure.format(), BlendMode::Opaque)?;
    for _ in 0..config.pressure_iterations {
        frame.draw(
            jacobi,
            &texel,
            &[fields.pressure.read().binding(), fields.divergence.binding()],
            fields.pressure.write().target(),
            OVERWRITE,
        );
        fields.pressure.swap();
    }

    let subtract = programs
        .gradient_subtract
        .bind(gpu, KeywordSet::EMPTY, fields.velocity.format(), BlendMode::Opaque)?;
    frame.draw(
        subtract,
        &texel,
        &[fields.pressure.read().binding(), fields.velocity.read().binding()],
        fields.velocity.write().target(),
        OVERWRITE,
    );
    fields.velocity.swap();
    Ok(())
}

/// Semi-Lagrangian advection of velocity through itself, then of dye
/// through the updated velocity.
pub fn advect(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    config: &FluidConfig,
    dt: f32,
) -> Result<(), ShaderError> {
    let gpu = frame.gpu();
    let keywords = KeywordSet::EMPTY.with_if(Keyword::ManualFiltering, !gpu.caps.linear_filtering);
    let velocity_texel = fields.velocity.texel_size();

    let pipeline = programs
        .advection
        .bind(gpu, keywords, fields.velocity.format(), BlendMode::Opaque)?;
    let uniforms = PassUniforms {
        texel_size: velocity_texel.to_array(),
        dye_texel_size: velocity_texel.to_array(),
        dt,
        dissipation: config.velocity_dissipation,
        ..Default::default()
    };
    // The velocity is both the flow and the advected quantity, so it is
    // bound twice as input.
    frame.draw(
        pipeline,
        &uniforms,
        &[fields.velocity.read().binding(), fields.velocity.read().binding()],
        fields.velocity.write().target(),
        OVERWRITE,
    );
    fields.velocity.swap();

    let pipeline = programs.advection.bind(gpu, keywords, fields.dye.format(), BlendMode::Opaque)?;
    let uniforms = PassUniforms {
        texel_size: velocity_texel.to_array(),
        dye_texel_size: fields.dye.texel_size().to_array(),
        dt,
        dissipation: config.density_dissipation,
        ..Default::default()
    };
    frame.draw(
        pipeline,
        &uniforms,
        &[fields.velocity.read().binding(), fields.dye.read().binding()],
        fields.dye.write().target(),
        OVERWRITE,
    );
    fields.dye.swap();
    Ok(())
}

/// Add a Gaussian blob of velocity and dye.
///
/// `aspect` is the viewport aspect ratio; the falloff is stretched to
/// match so splats stay round on screen.
pub fn splat(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    fields: &mut FieldSet,
    config: &FluidConfig,
    request: &SplatRequest,
    aspect: f32,
) -> Result<(), ShaderError> {
    let radius = splat_falloff(request.radius.unwrap_or(config.splat_radius), aspect);
    let base = PassUniforms {
        point: request.position.to_array(),
        aspect_ratio: aspect,
        radius,
        ..Default::default()
    };

    let velocity = PassUniforms {
        texel_size: fields.velocity.texel_size().to_array(),
        color: Vec3::new(request.velocity.x, request.velocity.y, 0.0).extend(1.0).to_array(),
        ..base
    };
    splat_into(frame, programs, &mut fields.velocity, &velocity)?;

    let dye = PassUniforms {
        texel_size: fields.dye.texel_size().to_array(),
        color: request.color.extend(1.0).to_array(),
        ..base
    };
    splat_into(frame, programs, &mut fields.dye, &dye)
}

fn splat_into(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    field: &mut DoubleField,
    uniforms: &PassUniforms,
) -> Result<(), ShaderError> {
    let pipeline = programs
        .splat
        .bind(frame.gpu(), KeywordSet::EMPTY, field.format(), BlendMode::Opaque)?;
    frame.draw(pipeline, uniforms, &[field.read().binding()], field.write().target(), OVERWRITE);
    field.swap();
    Ok(())
}

/// Bilinear copy of `source` into `target`, used when a field is
/// reallocated at a new size.
pub fn resample(
    frame: &mut Frame<'_>,
    programs: &mut Programs,
    source: &Field,
    target: &Field,
) -> Result<(), ShaderError> {
    let pipeline = programs
        .copy
        .bind(frame.gpu(), KeywordSet::EMPTY, target.format(), BlendMode::Opaque)?;
    let uniforms = uniforms_for(target.texel_size());
    frame.draw(pipeline, &uniforms, &[source.binding()], target.target(), OVERWRITE);
    Ok(())
}
