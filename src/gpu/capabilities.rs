//! Render-target format negotiation.
//!
//! Fields want half-float storage with hardware bilinear filtering. Hosts
//! that cannot render to a format get the next wider one; hosts that
//! cannot do half floats at all get 8-bit RGBA, and the solver switches to
//! in-shader filtering.

use wgpu::{TextureFormat, TextureFormatFeatureFlags, TextureUsages};

/// What a host can do with one texture format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatSupport {
    /// Usable as a render attachment and as a sampled texture.
    pub renderable: bool,
    /// Sampleable with a linear filter.
    pub filterable: bool,
    /// Usable as a blend target.
    pub blendable: bool,
}

/// Source of per-format support information.
pub trait FormatQuery {
    fn format_support(&self, format: TextureFormat) -> FormatSupport;
}

impl FormatQuery for wgpu::Device {
    fn format_support(&self, format: TextureFormat) -> FormatSupport {
        let features = format.guaranteed_format_features(self.features());
        FormatSupport {
            renderable: features
                .allowed_usages
                .contains(TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING),
            filterable: features.flags.contains(TextureFormatFeatureFlags::FILTERABLE),
            blendable: features.flags.contains(TextureFormatFeatureFlags::BLENDABLE),
        }
    }
}

/// Formats chosen for the three field shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Dye, bloom and capture targets.
    pub rgba: TextureFormat,
    /// Velocity.
    pub rg: TextureFormat,
    /// Pressure, divergence, curl and sunrays.
    pub r: TextureFormat,
    /// Hardware bilinear filtering is available for every chosen format.
    pub linear_filtering: bool,
}

/// Last resort when no half-float format is renderable.
pub const FALLBACK_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

impl Capabilities {
    pub fn negotiate(host: &impl FormatQuery) -> Self {
        let rgba = supported_format(host, TextureFormat::Rgba16Float);
        let rg = supported_format(host, TextureFormat::Rg16Float);
        let r = supported_format(host, TextureFormat::R16Float);

        let (rgba, rg, r) = match (rgba, rg, r) {
            (Some(rgba), Some(rg), Some(r)) => (rgba, rg, r),
            _ => {
                log::warn!(
                    "Half-float render targets unavailable, falling back to {:?} without linear filtering",
                    FALLBACK_FORMAT
                );
                return Self {
                    rgba: FALLBACK_FORMAT,
                    rg: FALLBACK_FORMAT,
                    r: FALLBACK_FORMAT,
                    linear_filtering: false,
                };
            }
        };

        let linear_filtering = [rgba, rg, r].iter().all(|f| host.format_support(*f).filterable);
        if !linear_filtering {
            log::warn!("Half-float formats are not filterable, using manual bilinear filtering");
        }

        let caps = Self {
            rgba,
            rg,
            r,
            linear_filtering,
        };
        log::debug!("Negotiated field formats: {:?}", caps);
        caps
    }
}

/// First renderable format in the widening chain that starts at `requested`.
///
/// R16Float falls back to Rg16Float, then Rgba16Float. `None` means no
/// half-float format in the chain can be rendered to.
pub fn supported_format(host: &impl FormatQuery, requested: TextureFormat) -> Option<TextureFormat> {
    let mut format = requested;
    loop {
        if host.format_support(format).renderable {
            return Some(format);
        }
        format = match format {
            TextureFormat::R16Float => TextureFormat::Rg16Float,
            TextureFormat::Rg16Float => TextureFormat::Rgba16Float,
            _ => return None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeHost(HashMap<TextureFormat, FormatSupport>);

    impl FakeHost {
        fn new(formats: &[(TextureFormat, bool)]) -> Self {
            Self(
                formats
                    .iter()
                    .map(|&(format, filterable)| {
                        let support = FormatSupport {
                            renderable: true,
                            filterable,
                            blendable: true,
                        };
                        (format, support)
                    })
                    .collect(),
            )
        }
    }

    impl FormatQuery for FakeHost {
        fn format_support(&self, format: TextureFormat) -> FormatSupport {
            self.0.get(&format).copied().unwrap_or_default()
        }
    }

    #[test]
    fn test_full_half_float_support() {
        let host = FakeHost::new(&[
            (TextureFormat::R16Float, true),
            (TextureFormat::Rg16Float, true),
            (TextureFormat::Rgba16Float, true),
        ]);
        let caps = Capabilities::negotiate(&host);
        assert_eq!(caps.r, TextureFormat::R16Float);
        assert_eq!(caps.rg, TextureFormat::Rg16Float);
        assert_eq!(caps.rgba, TextureFormat::Rgba16Float);
        assert!(caps.linear_filtering);
    }

    #[test]
    fn test_single_channel_widens() {
        let host = FakeHost::new(&[(TextureFormat::Rg16Float, true), (TextureFormat::Rgba16Float, true)]);
        let caps = Capabilities::negotiate(&host);
        assert_eq!(caps.r, TextureFormat::Rg16Float);
        assert_eq!(caps.rg, TextureFormat::Rg16Float);

        let host = FakeHost::new(&[(TextureFormat::Rgba16Float, true)]);
        let caps = Capabilities::negotiate(&host);
        assert_eq!(caps.r, TextureFormat::Rgba16Float);
        assert_eq!(caps.rg, TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_unfilterable_half_float() {
        let host = FakeHost::new(&[(TextureFormat::Rgba16Float, false)]);
        let caps = Capabilities::negotiate(&host);
        assert_eq!(caps.rgba, TextureFormat::Rgba16Float);
        assert!(!caps.linear_filtering);
    }

    #[test]
    fn test_no_half_float_falls_back() {
        let host = FakeHost::new(&[(TextureFormat::Rgba8Unorm, true)]);
        let caps = Capabilities::negotiate(&host);
        assert_eq!(caps.rgba, FALLBACK_FORMAT);
        assert_eq!(caps.r, FALLBACK_FORMAT);
        assert!(!caps.linear_filtering);
    }

    #[test]
    fn test_supported_format_chain() {
        let host = FakeHost::new(&[(TextureFormat::Rgba16Float, true)]);
        assert_eq!(
            supported_format(&host, TextureFormat::R16Float),
            Some(TextureFormat::Rgba16Float)
        );
        assert_eq!(supported_format(&host, TextureFormat::Rgba32Float), None);
    }
}
