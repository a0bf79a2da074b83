//! The full set of render targets and how their sizes follow the viewport.

use crate::config::{resolution, FluidConfig, MIN_TIER};
use crate::error::AllocationError;
use crate::field::{DoubleField, Field, FilterMode};
use crate::gpu::GpuContext;

/// Long-edge resolution for each group of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiers {
    pub sim: u32,
    pub dye: u32,
    pub bloom: u32,
    pub sunrays: u32,
}

impl Tiers {
    pub fn from_config(config: &FluidConfig) -> Self {
        Self {
            sim: config.sim_resolution,
            dye: config.dye_resolution,
            bloom: config.bloom_resolution,
            sunrays: config.sunrays_resolution,
        }
    }

    /// Every tier halved, floored at [`MIN_TIER`]. `None` once all tiers
    /// are already at the floor.
    pub fn halved(self) -> Option<Self> {
        let halve = |tier: u32| (tier / 2).max(MIN_TIER).min(tier);
        let next = Self {
            sim: halve(self.sim),
            dye: halve(self.dye),
            bloom: halve(self.bloom),
            sunrays: halve(self.sunrays),
        };
        (next != self).then_some(next)
    }
}

/// Concrete sizes for a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSizes {
    pub sim: (u32, u32),
    pub dye: (u32, u32),
    pub bloom: (u32, u32),
    pub sunrays: (u32, u32),
}

impl FieldSizes {
    pub fn new(tiers: &Tiers, viewport: (u32, u32)) -> Self {
        let (w, h) = viewport;
        Self {
            sim: resolution(tiers.sim, w, h),
            dye: resolution(tiers.dye, w, h),
            bloom: resolution(tiers.bloom, w, h),
            sunrays: resolution(tiers.sunrays, w, h),
        }
    }
}

/// Sizes of the bloom mip chain under `base`: each level halves both
/// edges, and the chain stops before an edge would drop below 2.
pub fn bloom_mip_sizes(base: (u32, u32), iterations: u32) -> Vec<(u32, u32)> {
    (0..iterations.min(31))
        .map(|i| (base.0 >> (i + 1), base.1 >> (i + 1)))
        .take_while(|&(w, h)| w >= 2 && h >= 2)
        .collect()
}

#[derive(Debug)]
pub struct BloomTargets {
    /// Prefilter output and final composite input.
    pub target: Field,
    pub mips: Vec<Field>,
}

#[derive(Debug)]
pub struct SunraysTargets {
    pub rays: Field,
    /// Intermediate of the separable blur.
    pub temp: Field,
}

/// Every field the solver and post-process chain touch.
#[derive(Debug)]
pub struct FieldSet {
    pub velocity: DoubleField,
    pub dye: DoubleField,
    pub pressure: DoubleField,
    pub divergence: Field,
    pub curl: Field,
    pub bloom: BloomTargets,
    pub sunrays: SunraysTargets,
}

impl FieldSet {
    pub fn allocate(gpu: &GpuContext, sizes: &FieldSizes, bloom_iterations: u32) -> Result<Self, AllocationError> {
        let caps = gpu.caps;
        let (sim_w, sim_h) = sizes.sim;
        let (dye_w, dye_h) = sizes.dye;
        let (bloom_w, bloom_h) = sizes.bloom;
        let (rays_w, rays_h) = sizes.sunrays;

        let velocity = DoubleField::allocate(gpu, "velocity", sim_w, sim_h, caps.rg, FilterMode::Linear)?;
        let dye = DoubleField::allocate(gpu, "dye", dye_w, dye_h, caps.rgba, FilterMode::Linear)?;
        let pressure = DoubleField::allocate(gpu, "pressure", sim_w, sim_h, caps.r, FilterMode::Nearest)?;
        let divergence = Field::new(gpu, "divergence", sim_w, sim_h, caps.r, FilterMode::Nearest)?;
        let curl = Field::new(gpu, "curl", sim_w, sim_h, caps.r, FilterMode::Nearest)?;

        let target = Field::new(gpu, "bloom", bloom_w, bloom_h, caps.rgba, FilterMode::Linear)?;
        let mips = bloom_mip_sizes(sizes.bloom, bloom_iterations)
            .into_iter()
            .map(|(w, h)| Field::new(gpu, "bloom mip", w, h, caps.rgba, FilterMode::Linear))
            .collect::<Result<Vec<_>, _>>()?;

        let rays = Field::new(gpu, "sunrays", rays_w, rays_h, caps.r, FilterMode::Linear)?;
        let temp = Field::new(gpu, "sunrays temp", rays_w, rays_h, caps.r, FilterMode::Linear)?;

        log::info!(
            "Allocated fields: sim {}x{}, dye {}x{}, bloom {}x{} ({} mips), sunrays {}x{}",
            sim_w,
            sim_h,
            dye_w,
            dye_h,
            bloom_w,
            bloom_h,
            mips.len(),
            rays_w,
            rays_h
        );

        Ok(Self {
            velocity,
            dye,
            pressure,
            divergence,
            curl,
            bloom: BloomTargets { target, mips },
            sunrays: SunraysTargets { rays, temp },
        })
    }

    /// Allocate for `tiers`, halving them after each failure until the
    /// floor is reached. Returns the set and the tiers that worked.
    pub fn allocate_with_fallback(
        gpu: &GpuContext,
        tiers: Tiers,
        viewport: (u32, u32),
        bloom_iterations: u32,
    ) -> Result<(Self, Tiers), AllocationError> {
        let mut tiers = tiers;
        loop {
            let sizes = FieldSizes::new(&tiers, viewport);
            match Self::allocate(gpu, &sizes, bloom_iterations) {
                Ok(fields) => return Ok((fields, tiers)),
                Err(err) => match tiers.halved() {
                    Some(next) => {
                        log::warn!("Field allocation failed ({}), retrying with {:?}", err, next);
                        tiers = next;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_follow_viewport() {
        let tiers = Tiers::from_config(&FluidConfig::default());
        let sizes = FieldSizes::new(&tiers, (1920, 1080));
        assert_eq!(sizes.sim, (128, 72));
        assert_eq!(sizes.dye, (1024, 576));
        assert_eq!(sizes.bloom, (256, 144));
    }

    #[test]
    fn test_bloom_mips_stop_at_two() {
        let mips = bloom_mip_sizes((256, 144), 8);
        assert_eq!(mips.first(), Some(&(128, 72)));
        assert!(mips.iter().all(|&(w, h)| w >= 2 && h >= 2));
        // 144 >> 7 = 1, so the 7th level is dropped.
        assert_eq!(mips.len(), 6);
        assert_eq!(bloom_mip_sizes((4, 4), 8), vec![(2, 2)]);
        assert!(bloom_mip_sizes((3, 3), 8).is_empty());
    }

    #[test]
    fn test_tiers_halve_to_floor() {
        let mut tiers = Tiers {
            sim: 64,
            dye: 40,
            bloom: 16,
            sunrays: 10,
        };
        tiers = tiers.halved().unwrap();
        assert_eq!(
            tiers,
            Tiers {
                sim: 32,
                dye: 20,
                bloom: 16,
                sunrays: 10
            }
        );
        tiers = tiers.halved().unwrap();
        assert_eq!(tiers.sim, 16);
        assert_eq!(tiers.dye, 16);
        assert!(tiers.halved().is_none());
    }
}
