//! Resolution adaptation for the fixed-architecture flow network.
//!
//! The network only accepts spatial dimensions that are multiples of
//! [`DIVISOR`]; the adapter computes the smallest such resolution that covers
//! the input, plus the per-axis scale factors the network description uses to
//! resample internally. Pure arithmetic — no pixels are touched here.

/// Spatial dimensions must be multiples of this.
pub const DIVISOR: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionParams {
    pub target_width: u32,
    pub target_height: u32,
    pub adapted_width: u32,
    pub adapted_height: u32,
    pub scale_width: f64,
    pub scale_height: f64,
}

impl ResolutionParams {
    /// Compute the padded inference resolution and rescale factors for an
    /// input of `width` × `height` (both must be > 0).
    pub fn adapt(width: u32, height: u32) -> Self {
        debug_assert!(width > 0 && height > 0);
        let adapted_width = width.div_ceil(DIVISOR) * DIVISOR;
        let adapted_height = height.div_ceil(DIVISOR) * DIVISOR;

        Self {
            target_width: width,
            target_height: height,
            adapted_width,
            adapted_height,
            scale_width: width as f64 / adapted_width as f64,
            scale_height: height as f64 / adapted_height as f64,
        }
    }

    /// True when `width` × `height` differs from the resolution this was
    /// computed for.
    pub fn differs_from(&self, width: u32, height: u32) -> bool {
        self.target_width != width || self.target_height != height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapt_rounds_up_to_divisor() {
        let params = ResolutionParams::adapt(300, 200);
        assert_eq!(params.adapted_width, 320);
        assert_eq!(params.adapted_height, 256);
    }

    #[test]
    fn test_adapt_exact_multiple_is_unchanged() {
        let params = ResolutionParams::adapt(320, 128);
        assert_eq!(params.adapted_width, 320);
        assert_eq!(params.adapted_height, 128);
        assert_eq!(params.scale_width, 1.0);
        assert_eq!(params.scale_height, 1.0);
    }

    #[test]
    fn test_adapted_is_minimal_covering_multiple() {
        for dim in [1u32, 63, 64, 65, 127, 639, 1920, 1921] {
            let params = ResolutionParams::adapt(dim, dim);
            assert_eq!(params.adapted_width % DIVISOR, 0);
            assert!(params.adapted_width >= dim);
            assert!(params.adapted_width - dim < DIVISOR);
        }
    }

    #[test]
    fn test_scale_is_at_most_one() {
        let params = ResolutionParams::adapt(1280, 720);
        assert!(params.scale_width <= 1.0);
        assert!(params.scale_height <= 1.0);
        assert!((params.scale_height - 720.0 / 768.0).abs() < 1e-12);
    }

    #[test]
    fn test_differs_from() {
        let params = ResolutionParams::adapt(640, 480);
        assert!(!params.differs_from(640, 480));
        assert!(params.differs_from(640, 481));
        assert!(params.differs_from(320, 480));
    }
}
