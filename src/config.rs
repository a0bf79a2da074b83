//! Simulation parameters.
//!
//! [`FluidConfig`] is a plain value. The [`Fluid`](crate::Fluid) holds two
//! of them: the snapshot every pass of the current frame reads, and a
//! pending slot that external code writes to. The pending slot is copied
//! over the snapshot at the start of the next frame, so no pass ever sees
//! a half-applied change.
//!
//! ```ignore
//! let config = FluidConfig::default()
//!     .with_sim_resolution(256)
//!     .with_curl(30.0)
//!     .with_bloom(false);
//! ```

use glam::Vec3;

/// Resolution tiers below this are not tried when allocation fails.
pub const MIN_TIER: u32 = 16;

/// Tunable parameters for the solver and the post-process chain.
///
/// Field names follow the effect's historical constants in lower case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluidConfig {
    /// Long-edge resolution of velocity, pressure, divergence and curl.
    pub sim_resolution: u32,
    /// Long-edge resolution of the dye field.
    pub dye_resolution: u32,
    /// Long-edge resolution of [`Fluid::capture`](crate::Fluid::capture).
    pub capture_resolution: u32,
    /// Dye decay rate per second.
    pub density_dissipation: f32,
    /// Velocity decay rate per second.
    pub velocity_dissipation: f32,
    /// Fraction of last frame's pressure kept as the solver's initial guess.
    pub pressure: f32,
    /// Jacobi iterations per step. 0 disables the pressure solve.
    pub pressure_iterations: u32,
    /// Vorticity confinement strength.
    pub curl: f32,
    /// Splat radius, in hundredths of the field height.
    pub splat_radius: f32,
    /// Multiplier from pointer delta to injected velocity.
    pub splat_force: f32,
    /// Fake lighting from dye gradients in the display pass.
    pub shading: bool,
    /// Periodically reassign pointer colours.
    pub colorful: bool,
    /// Colour reassignments per second when `colorful` is on.
    pub color_update_speed: f32,
    /// Skip the solver step (input and rendering still run).
    pub paused: bool,
    /// Opaque background, linear RGB in 0..1.
    pub back_color: Vec3,
    /// Composite over transparency instead of `back_color`.
    pub transparent: bool,
    pub bloom: bool,
    /// Number of half-resolution bloom mips.
    pub bloom_iterations: u32,
    pub bloom_resolution: u32,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,
    pub bloom_soft_knee: f32,
    pub sunrays: bool,
    pub sunrays_resolution: u32,
    pub sunrays_weight: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            capture_resolution: 512,
            density_dissipation: 4.0,
            velocity_dissipation: 2.87,
            pressure: 0.43,
            pressure_iterations: 20,
            curl: 0.0,
            splat_radius: 0.28,
            splat_force: 5000.0,
            shading: true,
            colorful: true,
            color_update_speed: 10.0,
            paused: false,
            back_color: Vec3::new(0.961, 0.957, 0.976),
            transparent: false,
            bloom: true,
            bloom_iterations: 8,
            bloom_resolution: 256,
            bloom_intensity: 0.1,
            bloom_threshold: 0.6,
            bloom_soft_knee: 0.7,
            sunrays: true,
            sunrays_resolution: 196,
            sunrays_weight: 0.7,
        }
    }
}

impl FluidConfig {
    pub fn with_sim_resolution(mut self, resolution: u32) -> Self {
        self.sim_resolution = resolution.max(1);
        self
    }

    pub fn with_dye_resolution(mut self, resolution: u32) -> Self {
        self.dye_resolution = resolution.max(1);
        self
    }

    pub fn with_capture_resolution(mut self, resolution: u32) -> Self {
        self.capture_resolution = resolution.max(1);
        self
    }

    /// Set dye and velocity decay rates (per second, `>= 0`).
    pub fn with_dissipation(mut self, density: f32, velocity: f32) -> Self {
        self.density_dissipation = density.max(0.0);
        self.velocity_dissipation = velocity.max(0.0);
        self
    }

    /// Set the pressure decay factor and Jacobi iteration count.
    pub fn with_pressure(mut self, pressure: f32, iterations: u32) -> Self {
        self.pressure = pressure.clamp(0.0, 1.0);
        self.pressure_iterations = iterations;
        self
    }

    pub fn with_curl(mut self, curl: f32) -> Self {
        self.curl = curl;
        self
    }

    pub fn with_splat(mut self, radius: f32, force: f32) -> Self {
        self.splat_radius = radius.max(0.0);
        self.splat_force = force;
        self
    }

    pub fn with_shading(mut self, shading: bool) -> Self {
        self.shading = shading;
        self
    }

    pub fn with_colorful(mut self, colorful: bool) -> Self {
        self.colorful = colorful;
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn with_back_color(mut self, color: Vec3) -> Self {
        self.back_color = color;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_bloom(mut self, bloom: bool) -> Self {
        self.bloom = bloom;
        self
    }

    /// Tune the bloom chain. `soft_knee` is kept above zero so the knee
    /// curve never divides by zero.
    pub fn with_bloom_params(mut self, intensity: f32, threshold: f32, soft_knee: f32) -> Self {
        self.bloom_intensity = intensity.max(0.0);
        self.bloom_threshold = threshold.max(0.0);
        self.bloom_soft_knee = soft_knee.max(1e-4);
        self
    }

    pub fn with_sunrays(mut self, sunrays: bool) -> Self {
        self.sunrays = sunrays;
        self
    }

    pub fn with_sunrays_weight(mut self, weight: f32) -> Self {
        self.sunrays_weight = weight.max(0.0);
        self
    }

    /// The soft-knee curve uploaded to the bloom prefilter.
    ///
    /// Returns `(threshold - knee, 2 * knee, 0.25 / knee)`.
    pub fn bloom_curve(&self) -> Vec3 {
        let knee = self.bloom_threshold * self.bloom_soft_knee + 0.0001;
        Vec3::new(self.bloom_threshold - knee, knee * 2.0, 0.25 / knee)
    }

    /// The splat falloff parameter for a viewport of the given aspect.
    ///
    /// Wide viewports get a proportionally wider splat so it stays round
    /// after the aspect correction in the splat shader.
    pub fn splat_falloff(&self, aspect: f32) -> f32 {
        splat_falloff(self.splat_radius, aspect)
    }

    /// True when changing from `other` to `self` needs new render targets.
    pub fn needs_realloc(&self, other: &FluidConfig) -> bool {
        self.sim_resolution != other.sim_resolution
            || self.dye_resolution != other.dye_resolution
            || self.bloom_resolution != other.bloom_resolution
            || self.bloom_iterations != other.bloom_iterations
            || self.sunrays_resolution != other.sunrays_resolution
    }
}

/// Frame-boundary configuration slot.
///
/// Writers go to `pending`; [`ConfigSlot::begin_frame`] copies it over the
/// active snapshot and reports the previous one so the caller can tell
/// what changed.
#[derive(Debug, Clone)]
pub struct ConfigSlot {
    active: FluidConfig,
    pending: Option<FluidConfig>,
}

impl ConfigSlot {
    pub fn new(config: FluidConfig) -> Self {
        Self {
            active: config,
            pending: None,
        }
    }

    /// Configuration for the current frame.
    #[inline]
    pub fn active(&self) -> &FluidConfig {
        &self.active
    }

    /// Replace the pending configuration.
    pub fn set(&mut self, config: FluidConfig) {
        self.pending = Some(config);
    }

    /// Edit the pending configuration, starting from the latest value.
    pub fn edit(&mut self, f: impl FnOnce(&mut FluidConfig)) {
        let mut next = self.pending.unwrap_or(self.active);
        f(&mut next);
        self.pending = Some(next);
    }

    /// Apply the pending configuration. Returns the replaced snapshot if
    /// anything was pending.
    pub fn begin_frame(&mut self) -> Option<FluidConfig> {
        let next = self.pending.take()?;
        Some(std::mem::replace(&mut self.active, next))
    }

    /// Undo a [`begin_frame`](Self::begin_frame): `previous` becomes active
    /// again and the configuration it replaced goes back to pending, unless
    /// something newer was queued meanwhile.
    pub fn rollback(&mut self, previous: FluidConfig) {
        let failed = std::mem::replace(&mut self.active, previous);
        self.pending.get_or_insert(failed);
    }
}

/// Falloff parameter for a splat of `radius` (hundredths of the field
/// height) on a viewport of the given aspect.
pub fn splat_falloff(radius: f32, aspect: f32) -> f32 {
    let radius = radius / 100.0;
    if aspect > 1.0 {
        radius * aspect
    } else {
        radius
    }
}

/// Field size for a resolution tier on a `width` x `height` viewport.
///
/// The longer viewport edge gets `tier` texels, the shorter one is scaled
/// by the aspect ratio and rounded. Neither edge drops below 1.
pub fn resolution(tier: u32, width: u32, height: u32) -> (u32, u32) {
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    let (long, short) = if width >= height { (width, height) } else { (height, width) };
    let major = tier.max(1);
    let minor = ((tier as f32 * short / long).round() as u32).max(1);
    if width >= height {
        (major, minor)
    } else {
        (minor, major)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_landscape() {
        assert_eq!(resolution(128, 1920, 1080), (128, 72));
    }

    #[test]
    fn test_resolution_portrait() {
        assert_eq!(resolution(128, 1080, 1920), (72, 128));
    }

    #[test]
    fn test_resolution_square_and_degenerate() {
        assert_eq!(resolution(256, 500, 500), (256, 256));
        assert_eq!(resolution(64, 10_000, 1), (64, 1));
        assert_eq!(resolution(64, 0, 0), (64, 64));
    }

    #[test]
    fn test_defaults_match_effect() {
        let config = FluidConfig::default();
        assert_eq!(config.sim_resolution, 128);
        assert_eq!(config.pressure_iterations, 20);
        assert_eq!(config.splat_force, 5000.0);
        assert!(config.bloom && config.sunrays && config.shading);
    }

    #[test]
    fn test_builder_clamps() {
        let config = FluidConfig::default()
            .with_dissipation(-1.0, 2.0)
            .with_pressure(3.0, 5)
            .with_bloom_params(0.2, 0.5, 0.0);
        assert_eq!(config.density_dissipation, 0.0);
        assert_eq!(config.pressure, 1.0);
        assert_eq!(config.pressure_iterations, 5);
        assert!(config.bloom_soft_knee > 0.0);
    }

    #[test]
    fn test_bloom_curve() {
        let config = FluidConfig::default().with_bloom_params(0.1, 0.6, 0.7);
        let curve = config.bloom_curve();
        let knee = 0.6 * 0.7 + 0.0001;
        assert!((curve.x - (0.6 - knee)).abs() < 1e-6);
        assert!((curve.y - 2.0 * knee).abs() < 1e-6);
        assert!((curve.z - 0.25 / knee).abs() < 1e-4);
    }

    #[test]
    fn test_splat_falloff_aspect() {
        let config = FluidConfig::default().with_splat(0.5, 1.0);
        assert!((config.splat_falloff(0.5) - 0.005).abs() < 1e-7);
        assert!((config.splat_falloff(2.0) - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_slot_applies_at_frame_boundary() {
        let mut slot = ConfigSlot::new(FluidConfig::default());
        slot.edit(|c| c.curl = 30.0);
        slot.edit(|c| c.paused = true);
        assert_eq!(slot.active().curl, 0.0);

        let previous = slot.begin_frame().expect("pending config");
        assert_eq!(previous.curl, 0.0);
        assert_eq!(slot.active().curl, 30.0);
        assert!(slot.active().paused);
        assert!(slot.begin_frame().is_none());
    }

    #[test]
    fn test_slot_rollback_keeps_change_pending() {
        let mut slot = ConfigSlot::new(FluidConfig::default());
        slot.edit(|c| c.sim_resolution = 32);
        let previous = slot.begin_frame().expect("pending config");
        assert_eq!(slot.active().sim_resolution, 32);

        slot.rollback(previous);
        assert_eq!(slot.active().sim_resolution, 128);

        let previous = slot.begin_frame().expect("change retried");
        assert_eq!(previous.sim_resolution, 128);
        assert_eq!(slot.active().sim_resolution, 32);

        slot.set(FluidConfig::default().with_sim_resolution(64));
        slot.rollback(previous);
        assert_eq!(slot.active().sim_resolution, 128);
        slot.begin_frame();
        assert_eq!(slot.active().sim_resolution, 64);
    }

    #[test]
    fn test_needs_realloc() {
        let base = FluidConfig::default();
        assert!(!base.with_curl(10.0).needs_realloc(&base));
        assert!(base.with_sim_resolution(64).needs_realloc(&base));
    }
}
