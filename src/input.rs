//! Pointer tracking and the deferred splat queue.
//!
//! Event sources (the winit app, a test, a scripted driver) report pointer
//! activity in backing-store pixels. The injector turns that into texture
//! coordinates and per-frame deltas; [`Fluid`](crate::Fluid) drains it
//! once per frame into splat passes.
//!
//! ```ignore
//! let input = fluid.input_mut();
//! input.pointer_down(0, 640.0, 360.0);
//! input.pointer_move(0, 660.0, 350.0);
//! input.pointer_up(0);
//! ```

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FluidConfig;

/// Pointer identity. Touches use their platform id, the mouse uses
/// [`HOVER_POINTER`].
pub type PointerId = i64;

/// The ambient pointer that follows the cursor without a press.
pub const HOVER_POINTER: PointerId = -1;

/// One tracked pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub id: PointerId,
    /// Texture coordinates, `(0, 0)` top-left.
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    /// Aspect-corrected movement since the last event.
    pub delta: Vec2,
    pub down: bool,
    /// Moved since the last drain.
    pub moved: bool,
    pub color: Vec3,
}

impl Pointer {
    fn new(id: PointerId) -> Self {
        Self {
            id,
            texcoord: Vec2::ZERO,
            prev_texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color: generate_color(),
        }
    }
}

/// A pending injection of velocity and dye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatRequest {
    /// Centre in texture coordinates.
    pub position: Vec2,
    /// Velocity added at the centre.
    pub velocity: Vec2,
    /// Dye added at the centre.
    pub color: Vec3,
    /// Radius override in the units of [`FluidConfig::splat_radius`].
    pub radius: Option<f32>,
}

impl SplatRequest {
    pub fn new(position: Vec2, velocity: Vec2, color: Vec3) -> Self {
        Self {
            position,
            velocity,
            color,
            radius: None,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }
}

/// The dye colour for new pointers and startup splats.
///
/// Always the same dim cyan; colour cycling reassigns this same value.
pub fn generate_color() -> Vec3 {
    Vec3::new(197.0, 252.0, 252.0) / 255.0 * 0.15
}

/// Tracks pointers and queued splats for one fluid.
#[derive(Debug)]
pub struct InputInjector {
    pointers: Vec<Pointer>,
    queue: Vec<SplatRequest>,
    viewport: (u32, u32),
    color_timer: f32,
    rng: StdRng,
}

impl InputInjector {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_rng(width, height, StdRng::from_entropy())
    }

    /// Deterministic random splats, for tests and captures.
    pub fn with_seed(width: u32, height: u32, seed: u64) -> Self {
        Self::with_rng(width, height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: u32, height: u32, rng: StdRng) -> Self {
        Self {
            pointers: vec![Pointer::new(HOVER_POINTER)],
            queue: Vec::new(),
            viewport: (width.max(1), height.max(1)),
            color_timer: 0.0,
            rng,
        }
    }

    /// Viewport size in backing-store pixels.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.viewport.0 as f32 / self.viewport.1 as f32
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn pointer(&self, id: PointerId) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.id == id)
    }

    /// Splats waiting for the next drain.
    pub fn pending(&self) -> &[SplatRequest] {
        &self.queue
    }

    fn pointer_entry(&mut self, id: PointerId) -> &mut Pointer {
        match self.pointers.iter().position(|p| p.id == id) {
            Some(index) => &mut self.pointers[index],
            None => {
                self.pointers.push(Pointer::new(id));
                let last = self.pointers.len() - 1;
                &mut self.pointers[last]
            }
        }
    }

    fn texcoord(&self, x: f32, y: f32) -> Vec2 {
        Vec2::new(x / self.viewport.0 as f32, y / self.viewport.1 as f32)
    }

    /// Press at `(x, y)` pixels. Creates the pointer on first contact.
    pub fn pointer_down(&mut self, id: PointerId, x: f32, y: f32) {
        let texcoord = self.texcoord(x, y);
        let pointer = self.pointer_entry(id);
        pointer.down = true;
        pointer.moved = false;
        pointer.texcoord = texcoord;
        pointer.prev_texcoord = texcoord;
        pointer.delta = Vec2::ZERO;
        pointer.color = generate_color();
    }

    /// Move to `(x, y)` pixels. Ignored for pointers that are not down.
    pub fn pointer_move(&mut self, id: PointerId, x: f32, y: f32) {
        let texcoord = self.texcoord(x, y);
        let aspect = self.aspect_ratio();
        let Some(pointer) = self.pointers.iter_mut().find(|p| p.id == id && p.down) else {
            return;
        };
        pointer.prev_texcoord = pointer.texcoord;
        pointer.texcoord = texcoord;
        pointer.delta = correct_delta(texcoord - pointer.prev_texcoord, aspect);
        pointer.moved = pointer.delta.x.abs() > 0.0 || pointer.delta.y.abs() > 0.0;
    }

    pub fn pointer_up(&mut self, id: PointerId) {
        if let Some(pointer) = self.pointers.iter_mut().find(|p| p.id == id) {
            pointer.down = false;
        }
    }

    /// Cursor movement over the surface. Drives the ambient pointer,
    /// which is put down on first hover.
    pub fn hover(&mut self, x: f32, y: f32) {
        let down = self.pointer(HOVER_POINTER).is_some_and(|p| p.down);
        if down {
            self.pointer_move(HOVER_POINTER, x, y);
        } else {
            self.pointer_down(HOVER_POINTER, x, y);
        }
    }

    pub fn queue_splat(&mut self, request: SplatRequest) {
        self.queue.push(request);
    }

    /// Queue `count` splats at random positions with random velocity.
    pub fn queue_random_splats(&mut self, count: usize) {
        for _ in 0..count {
            let color = generate_color() * 10.0;
            let position = Vec2::new(self.rng.gen(), self.rng.gen());
            let velocity = Vec2::new(
                1000.0 * (self.rng.gen::<f32>() - 0.5),
                1000.0 * (self.rng.gen::<f32>() - 0.5),
            );
            self.queue.push(SplatRequest {
                position,
                velocity,
                color,
                radius: None,
            });
        }
        log::debug!("Queued {} random splats", count);
    }

    /// Advance the colour-cycling timer; reassign pointer colours each
    /// time it wraps.
    pub fn update_colors(&mut self, dt: f32, config: &FluidConfig) {
        if !config.colorful {
            return;
        }
        self.color_timer += dt * config.color_update_speed;
        if self.color_timer >= 1.0 {
            self.color_timer = wrap(self.color_timer, 0.0, 1.0);
            for pointer in &mut self.pointers {
                pointer.color = generate_color();
            }
        }
    }

    /// Take every queued splat, then one splat per moved pointer.
    /// Clears the queue and the `moved` flags.
    pub fn drain(&mut self, config: &FluidConfig) -> Vec<SplatRequest> {
        let mut requests = std::mem::take(&mut self.queue);
        for pointer in &mut self.pointers {
            if !pointer.moved {
                continue;
            }
            pointer.moved = false;
            requests.push(SplatRequest {
                position: pointer.texcoord,
                velocity: pointer.delta * config.splat_force,
                color: pointer.color,
                radius: None,
            });
        }
        requests
    }
}

/// Scale a texcoord delta so equal pixel distances give equal deltas on
/// both axes.
pub fn correct_delta(delta: Vec2, aspect: f32) -> Vec2 {
    let mut delta = delta;
    if aspect < 1.0 {
        delta.x *= aspect;
    }
    if aspect > 1.0 {
        delta.y /= aspect;
    }
    delta
}

fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return min;
    }
    (value - min).rem_euclid(range) + min
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector() -> InputInjector {
        InputInjector::with_seed(200, 100, 1)
    }

    #[test]
    fn test_hover_pointer_exists() {
        let input = injector();
        assert_eq!(input.pointers().len(), 1);
        assert_eq!(input.pointers()[0].id, HOVER_POINTER);
        assert!(!input.pointers()[0].down);
    }

    #[test]
    fn test_down_move_up() {
        let mut input = injector();
        input.pointer_down(3, 100.0, 50.0);
        let p = *input.pointer(3).unwrap();
        assert!(p.down && !p.moved);
        assert_eq!(p.texcoord, Vec2::new(0.5, 0.5));

        input.pointer_move(3, 120.0, 60.0);
        let p = *input.pointer(3).unwrap();
        assert!(p.moved);
        assert_eq!(p.prev_texcoord, Vec2::new(0.5, 0.5));
        // aspect 2: x untouched, y halved
        assert!((p.delta.x - 0.1).abs() < 1e-6);
        assert!((p.delta.y - 0.05).abs() < 1e-6);

        input.pointer_up(3);
        assert!(!input.pointer(3).unwrap().down);
        assert_eq!(input.pointers().len(), 2);
    }

    #[test]
    fn test_move_without_down_is_ignored() {
        let mut input = injector();
        input.pointer_move(7, 10.0, 10.0);
        assert!(input.pointer(7).is_none());
    }

    #[test]
    fn test_zero_delta_is_not_moved() {
        let mut input = injector();
        input.pointer_down(1, 10.0, 10.0);
        input.pointer_move(1, 10.0, 10.0);
        assert!(!input.pointer(1).unwrap().moved);
    }

    #[test]
    fn test_pointers_are_reused() {
        let mut input = injector();
        input.pointer_down(1, 10.0, 10.0);
        input.pointer_up(1);
        input.pointer_down(1, 20.0, 20.0);
        assert_eq!(input.pointers().len(), 2);
    }

    #[test]
    fn test_hover_puts_ambient_pointer_down() {
        let mut input = injector();
        input.hover(20.0, 20.0);
        assert!(input.pointer(HOVER_POINTER).unwrap().down);
        input.hover(40.0, 20.0);
        assert!(input.pointer(HOVER_POINTER).unwrap().moved);
    }

    #[test]
    fn test_correct_delta_portrait() {
        let d = correct_delta(Vec2::new(0.2, 0.2), 0.5);
        assert_eq!(d, Vec2::new(0.1, 0.2));
        assert_eq!(correct_delta(Vec2::ONE, 1.0), Vec2::ONE);
    }

    #[test]
    fn test_drain_order_and_reset() {
        let config = FluidConfig::default();
        let mut input = injector();
        input.queue_splat(SplatRequest {
            position: Vec2::splat(0.25),
            velocity: Vec2::ZERO,
            color: Vec3::X,
            radius: Some(1.0),
        });
        input.pointer_down(0, 100.0, 50.0);
        input.pointer_move(0, 110.0, 50.0);

        let requests = input.drain(&config);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].position, Vec2::splat(0.25));
        assert!((requests[1].velocity.x - 0.05 * config.splat_force).abs() < 1e-3);

        assert!(input.drain(&config).is_empty());
        assert!(!input.pointer(0).unwrap().moved);
    }

    #[test]
    fn test_random_splats() {
        let mut input = injector();
        input.queue_random_splats(12);
        assert_eq!(input.pending().len(), 12);
        for splat in input.pending() {
            assert!((0.0..1.0).contains(&splat.position.x));
            assert!(splat.velocity.x.abs() <= 500.0 && splat.velocity.y.abs() <= 500.0);
            assert!((splat.color - generate_color() * 10.0).length() < 1e-6);
        }
    }

    #[test]
    fn test_generate_color_is_dim_cyan() {
        let c = generate_color();
        assert!((c.x - 197.0 / 255.0 * 0.15).abs() < 1e-6);
        assert_eq!(c.y, c.z);
        assert!(c.x < c.y);
    }

    #[test]
    fn test_color_timer_wraps() {
        let config = FluidConfig::default();
        let mut input = injector();
        input.update_colors(0.05, &config);
        assert!((input.color_timer - 0.5).abs() < 1e-6);
        input.update_colors(0.07, &config);
        assert!(input.color_timer < 1.0);
        assert!((input.color_timer - 0.2).abs() < 1e-4);

        let still = FluidConfig::default().with_colorful(false);
        input.update_colors(1.0, &still);
        assert!((input.color_timer - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap(1.25, 0.0, 1.0), 0.25);
        assert_eq!(wrap(3.0, 0.0, 1.0), 0.0);
    }
}
