//! Frame timing for the fluid driver.
//!
//! The solver is only stable for small steps, so the clock clamps every
//! delta to [`MAX_DELTA`]. A frame hitch (window drag, tab switch) then
//! slows the fluid down for one frame instead of blowing it up.
//!
//! ```ignore
//! let mut clock = FrameClock::new();
//! // once per redraw:
//! let dt = clock.tick();
//! fluid.update(dt, &target)?;
//! ```

use std::time::{Duration, Instant};

/// Largest timestep handed to the solver, in seconds.
pub const MAX_DELTA: f32 = 1.0 / 60.0;

/// Clamp a raw frame delta to the solver's stable range.
#[inline]
pub fn clamp_delta(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, MAX_DELTA)
    } else {
        0.0
    }
}

/// Per-frame clock with delta clamping and an FPS estimate.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
    /// Fixed delta for deterministic runs (captures, tests).
    fixed_delta: Option<f32>,
    time_scale: f32,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: Duration::from_millis(500),
            fixed_delta: None,
            time_scale: 1.0,
        }
    }

    /// Advance one frame and return the clamped timestep in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let raw = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.delta_secs = clamp_delta(self.fixed_delta.unwrap_or(raw) * self.time_scale);
        self.frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        self.delta_secs
    }

    /// Last clamped timestep.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    /// Seconds since the clock was created.
    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Use a fixed delta instead of wall-clock time. `None` restores real
    /// timing. The fixed value is still clamped.
    pub fn set_fixed_delta(&mut self, delta: Option<f32>) {
        self.fixed_delta = delta;
    }

    /// Slow motion below 1.0, fast forward above (still clamped).
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clamp_delta() {
        assert_eq!(clamp_delta(0.5), MAX_DELTA);
        assert_eq!(clamp_delta(0.001), 0.001);
        assert_eq!(clamp_delta(-1.0), 0.0);
        assert_eq!(clamp_delta(f32::NAN), 0.0);
    }

    #[test]
    fn test_tick_is_clamped() {
        let mut clock = FrameClock::new();
        thread::sleep(Duration::from_millis(40));
        let dt = clock.tick();
        assert_eq!(dt, MAX_DELTA);
        assert_eq!(clock.frame(), 1);
    }

    #[test]
    fn test_fixed_delta() {
        let mut clock = FrameClock::new();
        clock.set_fixed_delta(Some(0.005));
        thread::sleep(Duration::from_millis(20));
        assert!((clock.tick() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_time_scale() {
        let mut clock = FrameClock::new();
        clock.set_fixed_delta(Some(0.004));
        clock.set_time_scale(2.0);
        assert!((clock.tick() - 0.008).abs() < 1e-6);

        clock.set_time_scale(-1.0);
        assert_eq!(clock.tick(), 0.0);
    }
}
