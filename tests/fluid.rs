//! End-to-end tests against a real device.
//!
//! Each test asks for a headless adapter and returns early when the host
//! has none, so CI without a GPU still passes.

use splash::config::splat_falloff;
use splash::gpu::request_headless_device;
use splash::prelude::*;
use splash::FieldPixels;

fn fluid(viewport: (u32, u32), config: FluidConfig) -> Option<Fluid> {
    let (device, queue) = match pollster::block_on(request_headless_device()) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("skipping, no device: {}", e);
            return None;
        }
    };
    Some(Fluid::new(device, queue, viewport, config).expect("fluid").with_seed(7))
}

fn quiet_config() -> FluidConfig {
    FluidConfig::default()
        .with_sim_resolution(64)
        .with_dye_resolution(128)
        .with_colorful(false)
        .with_bloom(false)
        .with_sunrays(false)
}

/// Mean absolute divergence over interior cells, same stencil as the GPU.
fn mean_divergence(velocity: &FieldPixels) -> f32 {
    let (w, h) = (velocity.width, velocity.height);
    let mut total = 0.0;
    let mut count = 0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = velocity.get(x + 1, y).x - velocity.get(x - 1, y).x;
            let dy = velocity.get(x, y + 1).y - velocity.get(x, y - 1).y;
            total += (0.5 * (dx + dy)).abs();
            count += 1;
        }
    }
    total / count as f32
}

fn divergence_after_projection(iterations: u32) -> Option<f32> {
    let config = quiet_config().with_pressure(0.0, iterations);
    let mut fluid = fluid((512, 512), config)?;
    let splat = SplatRequest::new(Vec2::new(0.5, 0.5), Vec2::new(300.0, 150.0), Vec3::ZERO).with_radius(1.0);
    fluid.splat(&splat).expect("splat");
    fluid.project().expect("project");
    Some(mean_divergence(&fluid.read_field(FieldKind::Velocity).expect("readback")))
}

#[test]
fn test_projection_reduces_divergence() {
    let Some(none) = divergence_after_projection(0) else { return };
    assert!(none > 0.0);

    let mut previous = (0, none);
    for iterations in [1, 5, 20, 40] {
        let divergence = divergence_after_projection(iterations).expect("device went away");
        assert!(
            divergence < previous.1,
            "{} iterations: {} vs {} after {}",
            iterations,
            divergence,
            previous.1,
            previous.0
        );
        previous = (iterations, divergence);
    }
    assert!(previous.1 < none * 0.9, "40 iterations: {} vs {}", previous.1, none);
}

#[test]
fn test_advection_at_rest_keeps_dye() {
    let config = quiet_config().with_dissipation(0.0, 0.0);
    let Some(mut fluid) = fluid((256, 256), config) else { return };

    fluid
        .splat(&SplatRequest::new(Vec2::new(0.4, 0.6), Vec2::ZERO, Vec3::new(0.5, 0.25, 0.1)).with_radius(2.0))
        .expect("splat");
    let before = fluid.read_field(FieldKind::Dye).expect("readback");
    fluid.advect(1.0 / 60.0).expect("advect");
    let after = fluid.read_field(FieldKind::Dye).expect("readback");

    assert!(before.energy() > 0.0);
    for (a, b) in before.texels.iter().zip(&after.texels) {
        assert!((*a - *b).abs().max_element() < 1e-3, "{} -> {}", a, b);
    }
}

/// Distance in uv from the texel centre at `(x, y)` to `centre`, with x
/// scaled by the field aspect the way the splat shader does.
fn uv_distance(pixels: &FieldPixels, x: u32, y: u32, centre: Vec2) -> f32 {
    let (w, h) = (pixels.width as f32, pixels.height as f32);
    let uv = Vec2::new((x as f32 + 0.5) / w, (y as f32 + 0.5) / h);
    let mut p = uv - centre;
    p.x *= w / h;
    p.length()
}

fn argmax(pixels: &FieldPixels, value: impl Fn(Vec4) -> f32) -> (u32, u32, f32) {
    let mut best = (0, 0, f32::MIN);
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            let v = value(pixels.get(x, y));
            if v > best.2 {
                best = (x, y, v);
            }
        }
    }
    best
}

/// Largest value among texels further than `radius` from `centre`.
fn max_beyond(pixels: &FieldPixels, centre: Vec2, radius: f32, value: impl Fn(Vec4) -> f32) -> f32 {
    let mut max = 0.0f32;
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            if uv_distance(pixels, x, y, centre) > radius {
                max = max.max(value(pixels.get(x, y)));
            }
        }
    }
    max
}

/// Fraction of `pixels.energy()` held by texels further than `radius`
/// from `centre`.
fn energy_beyond(pixels: &FieldPixels, centre: Vec2, radius: f32) -> f32 {
    let mut outside = 0.0;
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            if uv_distance(pixels, x, y, centre) > radius {
                outside += pixels.get(x, y).truncate().length_squared();
            }
        }
    }
    outside / pixels.energy()
}

#[test]
fn test_splat_is_local() {
    let Some(mut fluid) = fluid((256, 256), quiet_config()) else { return };
    let centre = Vec2::new(0.5, 0.5);
    let push = Vec2::new(100.0, 0.0);
    let reach = 3.0 * splat_falloff(fluid.config().splat_radius, 1.0).sqrt();

    fluid
        .splat(&SplatRequest::new(centre, push, Vec3::new(1.0, 0.0, 0.0)))
        .expect("splat");

    let dye = fluid.read_field(FieldKind::Dye).expect("readback");
    let (x, y, peak) = argmax(&dye, |t| t.x);
    assert!(peak > 0.9, "peak {}", peak);
    assert!(x.abs_diff(dye.width / 2) <= 1 && y.abs_diff(dye.height / 2) <= 1, "peak at {},{}", x, y);
    let far = max_beyond(&dye, centre, reach, |t| t.truncate().abs().max_element());
    assert!(far < 1e-3, "dye beyond {}: {}", reach, far);

    let velocity = fluid.read_field(FieldKind::Velocity).expect("readback");
    let (x, y, peak) = argmax(&velocity, |t| t.truncate().truncate().length());
    assert!(peak > 0.9 * push.length(), "peak {}", peak);
    assert!(
        x.abs_diff(velocity.width / 2) <= 1 && y.abs_diff(velocity.height / 2) <= 1,
        "peak at {},{}",
        x,
        y
    );
    let far = max_beyond(&velocity, centre, reach, |t| t.truncate().truncate().length());
    assert!(far < push.length() * 1e-3, "velocity beyond {}: {}", reach, far);
}

#[test]
fn test_centre_drag_decays_in_place() {
    let Some(mut fluid) = fluid((400, 300), quiet_config()) else { return };
    let (w, h) = fluid.viewport();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);

    let input = fluid.input_mut();
    input.pointer_down(3, cx - 1.0, cy);
    input.pointer_move(3, cx, cy);
    input.pointer_up(3);
    fluid.apply_inputs().expect("inputs");
    assert!(fluid.input().pending().is_empty());

    let aspect = w as f32 / h as f32;
    let reach = 3.0 * splat_falloff(fluid.config().splat_radius, aspect).sqrt();
    let centre = Vec2::new(0.5, 0.5);

    let mut energy = fluid.read_field(FieldKind::Dye).expect("readback").energy();
    assert!(energy > 0.0);
    for step in 0..30 {
        fluid.step(1.0 / 60.0).expect("step");
        let dye = fluid.read_field(FieldKind::Dye).expect("readback");
        let next = dye.energy();
        assert!(next < energy, "step {}: {} -> {}", step, energy, next);
        let outside = energy_beyond(&dye, centre, reach);
        assert!(outside < 1e-3, "step {}: {} of the energy beyond {}", step, outside, reach);
        energy = next;
    }
}

#[test]
fn test_resize_keeps_dye_in_place() {
    let Some(mut fluid) = fluid((256, 256), quiet_config()) else { return };
    let position = Vec2::new(0.25, 0.5);
    fluid
        .splat(&SplatRequest::new(position, Vec2::ZERO, Vec3::new(1.0, 0.5, 0.0)).with_radius(1.0))
        .expect("splat");
    let before = fluid.read_field(FieldKind::Dye).expect("readback").energy();

    fluid.resize(256, 128);
    fluid.begin_frame().expect("begin frame");
    let dye = fluid.read_field(FieldKind::Dye).expect("readback");
    assert_eq!((dye.width, dye.height), (128, 64));

    // Half the texels, so roughly half the energy.
    let after = dye.energy();
    assert!(after > before * 0.25 && after < before, "{} -> {}", before, after);
    let (x, y, _) = argmax(&dye, |t| t.x);
    let expected = (position.x * dye.width as f32, position.y * dye.height as f32);
    assert!((x as f32 + 0.5 - expected.0).abs() <= 2.0, "peak x {} vs {}", x, expected.0);
    assert!((y as f32 + 0.5 - expected.1).abs() <= 2.0, "peak y {} vs {}", y, expected.1);
}

#[test]
fn test_resize_reallocates_at_frame_boundary() {
    let config = FluidConfig::default().with_sim_resolution(128).with_dye_resolution(256);
    let Some(mut fluid) = fluid((800, 800), config) else { return };
    assert_eq!(fluid.fields().velocity.size(), (128, 128));

    fluid.resize(1920, 1080);
    assert_eq!(fluid.fields().velocity.size(), (128, 128));
    fluid.begin_frame().expect("begin frame");

    assert_eq!(fluid.viewport(), (1920, 1080));
    assert_eq!(fluid.fields().velocity.size(), (128, 72));
    assert_eq!(fluid.fields().dye.size(), (256, 144));
}

#[test]
fn test_config_change_reallocates() {
    let Some(mut fluid) = fluid((640, 640), quiet_config()) else { return };
    fluid.edit_config(|c| c.sim_resolution = 32);
    assert_eq!(fluid.config().sim_resolution, 64);

    fluid.begin_frame().expect("begin frame");
    assert_eq!(fluid.config().sim_resolution, 32);
    assert_eq!(fluid.fields().velocity.size(), (32, 32));
}

#[test]
fn test_capture_is_repeatable() {
    let config = FluidConfig::default()
        .with_sim_resolution(64)
        .with_dye_resolution(128)
        .with_capture_resolution(128);
    let Some(mut fluid) = fluid((320, 240), config) else { return };

    fluid.input_mut().queue_random_splats(4);
    fluid.apply_inputs().expect("inputs");
    fluid.step(1.0 / 60.0).expect("step");

    let first = fluid.capture().expect("capture");
    let second = fluid.capture().expect("capture");
    assert_eq!((first.width, first.height), (128, 96));
    assert_eq!(first.rgba.len(), 128 * 96 * 4);
    assert_eq!(first, second);
}

#[test]
fn test_paused_update_skips_step() {
    let config = quiet_config().with_paused(true).with_capture_resolution(64);
    let Some(mut fluid) = fluid((256, 256), config) else { return };

    fluid
        .splat(&SplatRequest::new(Vec2::new(0.5, 0.5), Vec2::new(500.0, 0.0), Vec3::ONE))
        .expect("splat");
    let before = fluid.read_field(FieldKind::Dye).expect("readback");

    let target = splash::Field::new(
        fluid.gpu(),
        "screen",
        256,
        256,
        fluid.gpu().caps.rgba,
        splash::FilterMode::Nearest,
    )
    .expect("target");
    fluid.update(1.0 / 60.0, &RenderTarget::Offscreen(&target)).expect("update");

    let after = fluid.read_field(FieldKind::Dye).expect("readback");
    assert_eq!(before, after);
}
