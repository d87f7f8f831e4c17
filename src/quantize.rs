//! Luminance and color quantization.
//!
//! Both mappings are fixed-step integer divisions clamped to the top bucket, so every value in
//! `0..=255` lands on a valid glyph index or bucket key.

use anyhow::Result;

use crate::errors::CodedError;

/// Glyphs from least to most visually dense.
pub const DEFAULT_GLYPH_RAMP: &str = ".\",:;!~+-xmo*#W&8@";

/// Maximum number of color levels; bucket indices must fit in a `u8`.
pub const MAX_COLOR_LEVELS: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRamp {
    glyphs: Vec<char>,
}

impl GlyphRamp {
    pub fn new(glyphs: &str) -> Result<Self> {
        let glyphs = glyphs.chars().collect::<Vec<_>>();
        if glyphs.len() < 2 {
            return Err(CodedError::configuration(format!(
                "glyph ramp needs at least 2 glyphs, got {}",
                glyphs.len()
            ))
            .into());
        }
        for (index, glyph) in glyphs.iter().enumerate() {
            if glyphs[..index].contains(glyph) {
                return Err(CodedError::configuration(format!(
                    "glyph ramp repeats '{}'",
                    glyph.escape_default()
                ))
                .into());
            }
        }
        Ok(Self { glyphs })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyphs(&self) -> &[char] {
        &self.glyphs
    }

    pub fn glyph(&self, index: usize) -> char {
        self.glyphs[index]
    }

    /// `floor(255 / (N - 1))`, never below 1.
    pub fn luminance_step(&self) -> u8 {
        (255 / (self.glyphs.len() - 1)).max(1) as u8
    }
}

impl Default for GlyphRamp {
    fn default() -> Self {
        Self {
            glyphs: DEFAULT_GLYPH_RAMP.chars().collect(),
        }
    }
}

/// Per-channel quantization geometry for `L` levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorLevels {
    levels: Vec<u8>,
    step: u8,
}

impl ColorLevels {
    pub fn new(count: u32) -> Result<Self> {
        if count < 2 {
            return Err(CodedError::configuration(format!(
                "color_levels must be >= 2, got {count}"
            ))
            .into());
        }
        if count > MAX_COLOR_LEVELS {
            return Err(CodedError::configuration(format!(
                "color_levels must be <= {MAX_COLOR_LEVELS}, got {count}"
            ))
            .into());
        }

        // Evenly spaced samples over 0..=255, truncated toward zero; the last sample is 255.
        let spacing = 255.0 / f64::from(count - 1);
        let levels = (0..count)
            .map(|index| {
                if index == count - 1 {
                    255
                } else {
                    (f64::from(index) * spacing) as u8
                }
            })
            .collect::<Vec<_>>();
        let step = (spacing as u8).max(1);

        Ok(Self { levels, step })
    }

    pub fn count(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn step(&self) -> u8 {
        self.step
    }

    /// Bucket index for one channel value, clamped to `L - 1`.
    pub fn bucket_index(&self, value: u8) -> u8 {
        let top = (self.levels.len() - 1) as u8;
        (value / self.step).min(top)
    }

    /// Color drawn for bucket `index`: always a value that quantizes back into that bucket.
    ///
    /// Prefers the highest level sample inside the bucket so black and white stay exact; buckets
    /// no sample lands in fall back to their midpoint.
    pub fn representative(&self, index: u8) -> u8 {
        if let Some(&level) = self
            .levels
            .iter()
            .rev()
            .find(|&&level| self.bucket_index(level) == index)
        {
            return level;
        }
        let midpoint = u32::from(index) * u32::from(self.step) + u32::from(self.step / 2);
        midpoint.min(255) as u8
    }
}

/// Lookup key for a quantized color: one bucket index per RGB channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(pub [u8; 3]);

impl BucketKey {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }
}

/// Precomputed coefficients for mapping luminance to glyph indices and colors to bucket keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantizer {
    luminance_step: u8,
    top_glyph: u8,
    levels: ColorLevels,
}

impl Quantizer {
    pub fn new(ramp: &GlyphRamp, levels: ColorLevels) -> Self {
        Self {
            luminance_step: ramp.luminance_step(),
            top_glyph: (ramp.len() - 1).min(usize::from(u8::MAX)) as u8,
            levels,
        }
    }

    pub fn luminance_step(&self) -> u8 {
        self.luminance_step
    }

    pub fn color_levels(&self) -> &ColorLevels {
        &self.levels
    }

    pub fn glyph_index(&self, luminance: u8) -> usize {
        usize::from((luminance / self.luminance_step).min(self.top_glyph))
    }

    pub fn color_bucket(&self, r: u8, g: u8, b: u8) -> BucketKey {
        BucketKey([
            self.levels.bucket_index(r),
            self.levels.bucket_index(g),
            self.levels.bucket_index(b),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketKey, ColorLevels, GlyphRamp, Quantizer, DEFAULT_GLYPH_RAMP};
    use crate::errors::{error_kind, CodedErrorKind};

    fn quantizer(ramp: &str, levels: u32) -> Quantizer {
        let ramp = GlyphRamp::new(ramp).expect("ramp should be valid");
        Quantizer::new(&ramp, ColorLevels::new(levels).expect("levels should be valid"))
    }

    #[test]
    fn default_ramp_matches_fixed_string() {
        let ramp = GlyphRamp::default();
        assert_eq!(ramp.len(), DEFAULT_GLYPH_RAMP.chars().count());
        assert_eq!(ramp.glyph(0), '.');
        assert_eq!(ramp.glyph(ramp.len() - 1), '@');
        assert_eq!(ramp.luminance_step(), 15);
    }

    #[test]
    fn glyph_index_is_bounded_and_monotonic() {
        let quantizer = quantizer(DEFAULT_GLYPH_RAMP, 8);
        let top = DEFAULT_GLYPH_RAMP.chars().count() - 1;
        let mut previous = 0;
        for luminance in 0..=255_u8 {
            let index = quantizer.glyph_index(luminance);
            assert!(index <= top, "index {index} out of range for {luminance}");
            assert!(index >= previous, "index decreased at luminance {luminance}");
            previous = index;
        }
        assert_eq!(quantizer.glyph_index(255), top);
    }

    #[test]
    fn glyph_index_clamps_when_step_does_not_divide_range() {
        // 101 glyphs: step = 255 / 100 = 2, and 255 / 2 = 127 overshoots the top index.
        let ramp = (0..101_u32)
            .filter_map(|offset| char::from_u32(0x100 + offset))
            .collect::<String>();
        let quantizer = quantizer(&ramp, 2);
        assert_eq!(quantizer.luminance_step(), 2);
        assert_eq!(quantizer.glyph_index(199), 99);
        assert_eq!(quantizer.glyph_index(200), 100);
        assert_eq!(quantizer.glyph_index(255), 100);
    }

    #[test]
    fn two_glyph_ramp_maps_black_to_zero_and_white_to_one() {
        let quantizer = quantizer(".#", 2);
        assert_eq!(quantizer.luminance_step(), 255);
        assert_eq!(quantizer.glyph_index(0), 0);
        assert_eq!(quantizer.glyph_index(254), 0);
        assert_eq!(quantizer.glyph_index(255), 1);
    }

    #[test]
    fn two_levels_bucket_low_values_to_zero_and_white_to_one() {
        let quantizer = quantizer(".#", 2);
        let levels = quantizer.color_levels();
        assert_eq!(levels.levels(), &[0, 255]);
        assert_eq!(levels.step(), 255);
        assert_eq!(quantizer.color_bucket(10, 200, 5), BucketKey::new(0, 0, 0));
        assert_eq!(quantizer.color_bucket(255, 255, 255), BucketKey::new(1, 1, 1));
    }

    #[test]
    fn default_levels_match_truncated_linspace() {
        let levels = ColorLevels::new(8).expect("levels");
        assert_eq!(levels.levels(), &[0, 36, 72, 109, 145, 182, 218, 255]);
        assert_eq!(levels.step(), 36);
        for (index, level) in levels.levels().iter().enumerate() {
            assert_eq!(usize::from(levels.bucket_index(*level)), index);
        }
    }

    #[test]
    fn bucket_components_stay_within_levels() {
        for count in [2_u32, 3, 5, 8, 16, 100, 256] {
            let quantizer = quantizer(DEFAULT_GLYPH_RAMP, count);
            for value in 0..=255_u8 {
                let BucketKey([r, g, b]) = quantizer.color_bucket(value, 255 - value, value / 2);
                for component in [r, g, b] {
                    assert!(u32::from(component) < count, "{component} >= {count}");
                }
            }
        }
    }

    #[test]
    fn representatives_quantize_back_into_their_bucket() {
        for count in [2_u32, 3, 5, 7, 8, 11, 30, 100, 256] {
            let levels = ColorLevels::new(count).expect("levels");
            for index in 0..count {
                let index = index as u8;
                let color = levels.representative(index);
                assert_eq!(
                    levels.bucket_index(color),
                    index,
                    "L={count} bucket {index} drawn as {color}"
                );
            }
            assert_eq!(levels.representative(0), 0);
            assert_eq!(levels.representative((count - 1) as u8), 255);
        }
    }

    #[test]
    fn representative_prefers_level_inside_bucket() {
        let levels = ColorLevels::new(30).expect("levels");
        assert_eq!(levels.step(), 8);
        assert_eq!(levels.bucket_index(200), 25);
        assert_eq!(levels.representative(25), 202);
    }

    #[test]
    fn channels_are_quantized_independently() {
        let quantizer = quantizer(DEFAULT_GLYPH_RAMP, 8);
        let BucketKey([r, g, b]) = quantizer.color_bucket(0, 128, 255);
        assert_eq!((r, g, b), (0, 3, 7));
    }

    #[test]
    fn degenerate_configuration_is_rejected() {
        for count in [0_u32, 1, 257] {
            let error = ColorLevels::new(count).expect_err("should reject");
            assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
        }
        let error = GlyphRamp::new("#").expect_err("single glyph ramp should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
        let error = GlyphRamp::new("..#").expect_err("repeated glyph should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
    }
}
