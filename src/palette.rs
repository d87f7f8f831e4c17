//! Pre-rendered glyph lookup.
//!
//! Rendering a glyph is far more expensive than copying one, so every (glyph, color bucket)
//! combination is rasterized once up front and frames only ever read from the table.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::glyph::{GlyphBitmap, GlyphRasterizer};
use crate::quantize::{BucketKey, ColorLevels, GlyphRamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaletteKey {
    pub glyph: char,
    pub bucket: BucketKey,
}

impl PaletteKey {
    pub fn new(glyph: char, bucket: BucketKey) -> Self {
        Self { glyph, bucket }
    }
}

/// Immutable map from (glyph, color bucket) to a rendered bitmap.
#[derive(Debug, Clone)]
pub struct Palette {
    entries: HashMap<PaletteKey, GlyphBitmap>,
}

impl Palette {
    /// Rasterizes every ramp glyph in every bucket's representative color: `N * L^3` calls.
    /// Each bitmap's color quantizes back into the bucket it is stored under.
    pub fn build<R>(
        ramp: &GlyphRamp,
        levels: &ColorLevels,
        point_size: u32,
        rasterizer: &mut R,
    ) -> Result<Self>
    where
        R: GlyphRasterizer + ?Sized,
    {
        let started = Instant::now();
        let buckets = (0..levels.count())
            .map(|index| {
                let index = index as u8;
                (index, levels.representative(index))
            })
            .collect::<Vec<_>>();
        let expected = expected_entries(ramp, levels);
        let mut entries = HashMap::with_capacity(expected);

        for &(r_index, r) in &buckets {
            for &(g_index, g) in &buckets {
                for &(b_index, b) in &buckets {
                    let bucket = BucketKey::new(r_index, g_index, b_index);
                    for &glyph in ramp.glyphs() {
                        let bitmap = rasterizer
                            .rasterize(glyph, point_size, true, [r, g, b])
                            .with_context(|| {
                                format!(
                                    "failed to rasterize '{}' in color ({r}, {g}, {b})",
                                    glyph.escape_default()
                                )
                            })?;
                        entries.insert(PaletteKey::new(glyph, bucket), bitmap);
                    }
                }
            }
        }

        if entries.len() != expected {
            bail!(
                "palette has {} entries, expected {} ({} glyphs x {} levels^3)",
                entries.len(),
                expected,
                ramp.len(),
                levels.count()
            );
        }

        log::info!(
            "built palette: {} glyphs x {} colors = {} bitmaps in {:.2?}",
            ramp.len(),
            buckets.len().pow(3),
            entries.len(),
            started.elapsed()
        );

        Ok(Self { entries })
    }

    pub fn get(&self, key: &PaletteKey) -> Option<&GlyphBitmap> {
        self.entries.get(key)
    }

    pub fn lookup(&self, glyph: char, bucket: BucketKey) -> Option<&GlyphBitmap> {
        self.entries.get(&PaletteKey::new(glyph, bucket))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Number of rasterizer calls (and entries) a palette build costs.
pub fn expected_entries(ramp: &GlyphRamp, levels: &ColorLevels) -> usize {
    ramp.len() * levels.count().pow(3)
}
