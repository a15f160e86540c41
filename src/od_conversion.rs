//! Intensity to optical density conversion.
//!
//! `OD = -log10(max(I, 1) / 255)`, precomputed for all 256 intensities.

use once_cell::sync::Lazy;

/// Intensity of an unattenuated (white) channel.
pub const MAX_INTENSITY: i32 = 255;

static OD_LOOKUP_TABLE: Lazy<[f64; 256]> = Lazy::new(|| {
    let mut table = [0.0; 256];
    for (intensity, od) in table.iter_mut().enumerate() {
        let transmittance = (intensity.max(1) as f64) / MAX_INTENSITY as f64;
        // -log10(1) is -0.0; keep the white entry a clean zero.
        *od = (-transmittance.log10()).max(0.0);
    }
    table
});

/// Optical density of a single channel intensity.
///
/// Intensities outside `[0, 255]` are clamped first, so the result is always
/// finite and non-negative. The mapping is non-increasing in `intensity`.
#[inline]
pub fn intensity_to_od(intensity: i32) -> f64 {
    OD_LOOKUP_TABLE[intensity.clamp(0, MAX_INTENSITY) as usize]
}

/// Optical densities of an R, G, B triple.
#[inline]
pub fn rgb_to_od(rgb: [u16; 3]) -> [f64; 3] {
    rgb.map(|channel| intensity_to_od(i32::from(channel)))
}

/// The full 256-entry lookup table.
pub fn od_lookup_table() -> &'static [f64; 256] {
    &OD_LOOKUP_TABLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn white_is_zero_and_black_saturates() {
        assert_eq!(intensity_to_od(255), 0.0);
        assert_abs_diff_eq!(intensity_to_od(0), 255f64.log10(), epsilon = 1e-12);
        // 0 and 1 both map through max(I, 1)
        assert_eq!(intensity_to_od(0), intensity_to_od(1));
    }

    #[test]
    fn matches_closed_form() {
        for intensity in 1..=255 {
            let expected = -(intensity as f64 / 255.0).log10();
            assert_abs_diff_eq!(intensity_to_od(intensity), expected.max(0.0), epsilon = 1e-12);
        }
    }

    #[test]
    fn out_of_range_intensities_are_clamped() {
        assert_eq!(intensity_to_od(-40), intensity_to_od(0));
        assert_eq!(intensity_to_od(4095), intensity_to_od(255));
        assert_eq!(rgb_to_od([300, 255, 1000]), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn lookup_is_monotone_and_repeatable() {
        let table = od_lookup_table();
        for pair in table.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        for intensity in 0..=255 {
            assert_eq!(
                intensity_to_od(intensity).to_bits(),
                intensity_to_od(intensity).to_bits()
            );
        }
    }
}
