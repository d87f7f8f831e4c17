use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use fontdue::{Font, FontSettings};

use crate::errors::CodedError;

/// Common monospace bold faces, tried in order when no font is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Bold.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Bold.ttf",
    "/usr/share/fonts/truetype/freefont/FreeMonoBold.ttf",
    "/Library/Fonts/Courier New Bold.ttf",
    "/System/Library/Fonts/Supplemental/Courier New Bold.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "C:\\Windows\\Fonts\\courbd.ttf",
    "C:\\Windows\\Fonts\\consolab.ttf",
];

/// Coverage at or above this value becomes an opaque glyph pixel.
const COVERAGE_THRESHOLD: u8 = 128;

/// A pre-rendered glyph: opaque pixels in the glyph color, fully transparent elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[u8; 4]>,
}

impl GlyphBitmap {
    pub fn from_mask(mask: &GlyphMask, color: [u8; 3]) -> Self {
        let pixels = mask
            .coverage
            .iter()
            .map(|&on| {
                if on {
                    [color[0], color[1], color[2], 255]
                } else {
                    [0, 0, 0, 0]
                }
            })
            .collect();
        Self {
            width: mask.width,
            height: mask.height,
            pixels,
        }
    }

    pub fn opaque_pixel_count(&self) -> usize {
        self.pixels.iter().filter(|pixel| pixel[3] != 0).count()
    }
}

/// Rasterizes one glyph in one color. Called once per palette entry while the palette is built,
/// never while compositing frames.
pub trait GlyphRasterizer {
    fn rasterize(
        &mut self,
        glyph: char,
        point_size: u32,
        bold: bool,
        color: [u8; 3],
    ) -> Result<GlyphBitmap>;
}

/// Binary coverage for a glyph cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphMask {
    pub width: usize,
    pub height: usize,
    pub coverage: Vec<bool>,
}

impl GlyphMask {
    /// Widens every stroke by one pixel to the right.
    pub fn emboldened(&self) -> Self {
        let width = self.width + 1;
        let mut coverage = vec![false; width * self.height];
        for row in 0..self.height {
            for col in 0..self.width {
                if self.coverage[row * self.width + col] {
                    coverage[row * width + col] = true;
                    coverage[row * width + col + 1] = true;
                }
            }
        }
        Self {
            width,
            height: self.height,
            coverage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MaskKey {
    glyph: char,
    point_size: u32,
    bold: bool,
}

/// fontdue-backed rasterizer. Each bitmap spans one text cell (advance width by line height)
/// with the glyph sitting on the baseline, so cells line up when blitted on a grid.
pub struct FontRasterizer {
    font: Font,
    mask_cache: HashMap<MaskKey, GlyphMask>,
}

impl FontRasterizer {
    pub fn from_path(font_path: &Path) -> Result<Self> {
        let font_bytes = fs::read(font_path).map_err(|error| {
            anyhow!(CodedError::configuration(format!(
                "failed to read font file {}: {error}",
                font_path.display()
            )))
        })?;
        Self::from_bytes(font_bytes, &font_path.display().to_string())
    }

    pub fn from_bytes(font_bytes: Vec<u8>, font_name: &str) -> Result<Self> {
        let font = Font::from_bytes(font_bytes, FontSettings::default()).map_err(|error| {
            anyhow!(CodedError::configuration(format!(
                "failed to parse font {font_name}: {error}"
            )))
        })?;
        log::debug!("loaded font {font_name} ({} glyphs)", font.glyph_count());
        Ok(Self {
            font,
            mask_cache: HashMap::new(),
        })
    }

    fn mask(&mut self, glyph: char, point_size: u32, bold: bool) -> &GlyphMask {
        let key = MaskKey {
            glyph,
            point_size,
            bold,
        };
        let font = &self.font;
        self.mask_cache.entry(key).or_insert_with(|| {
            let mask = rasterize_cell(font, glyph, point_size as f32);
            if bold {
                mask.emboldened()
            } else {
                mask
            }
        })
    }
}

impl GlyphRasterizer for FontRasterizer {
    fn rasterize(
        &mut self,
        glyph: char,
        point_size: u32,
        bold: bool,
        color: [u8; 3],
    ) -> Result<GlyphBitmap> {
        if self.font.lookup_glyph_index(glyph) == 0 && !glyph.is_whitespace() {
            log::warn!(
                "font has no glyph for U+{:04X} ({}); rendering the missing-glyph box",
                glyph as u32,
                glyph.escape_default()
            );
        }
        let mask = self.mask(glyph, point_size, bold);
        Ok(GlyphBitmap::from_mask(mask, color))
    }
}

fn rasterize_cell(font: &Font, glyph: char, px: f32) -> GlyphMask {
    let (metrics, bitmap) = font.rasterize(glyph, px);
    let (ascent, descent) = font
        .horizontal_line_metrics(px)
        .map(|line| (line.ascent, line.descent))
        .unwrap_or((px, 0.0));

    let cell_width = metrics
        .advance_width
        .ceil()
        .max(metrics.width as f32)
        .max(1.0) as usize;
    let cell_height = (ascent - descent).ceil().max(1.0) as usize;
    let baseline = ascent.round() as i32;

    let mut coverage = vec![false; cell_width * cell_height];
    let origin_x = metrics.xmin;
    let origin_y = baseline - (metrics.height as i32 + metrics.ymin);

    for row in 0..metrics.height {
        let py = origin_y + row as i32;
        if py < 0 || py >= cell_height as i32 {
            continue;
        }
        for col in 0..metrics.width {
            let px = origin_x + col as i32;
            if px < 0 || px >= cell_width as i32 {
                continue;
            }
            if bitmap[row * metrics.width + col] >= COVERAGE_THRESHOLD {
                coverage[py as usize * cell_width + px as usize] = true;
            }
        }
    }

    GlyphMask {
        width: cell_width,
        height: cell_height,
        coverage,
    }
}

/// Resolves the font to rasterize with: the configured path if any, otherwise the first
/// installed system monospace face.
pub fn resolve_font_path(font_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = font_path {
        if !path.exists() {
            return Err(CodedError::configuration(format!(
                "font file '{}' does not exist",
                path.display()
            ))
            .into());
        }
        return Ok(path.to_path_buf());
    }

    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            CodedError::configuration(format!(
                "no monospace system font found; pass --font or set font_path (looked in: {})",
                SYSTEM_FONT_CANDIDATES.join(", ")
            ))
            .into()
        })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{resolve_font_path, FontRasterizer, GlyphBitmap, GlyphMask, GlyphRasterizer};
    use crate::errors::{error_kind, CodedErrorKind};

    fn mask(width: usize, height: usize, on: &[(usize, usize)]) -> GlyphMask {
        let mut coverage = vec![false; width * height];
        for (x, y) in on {
            coverage[y * width + x] = true;
        }
        GlyphMask {
            width,
            height,
            coverage,
        }
    }

    #[test]
    fn bitmap_colors_only_covered_pixels() {
        let bitmap = GlyphBitmap::from_mask(&mask(2, 2, &[(1, 0)]), [10, 20, 30]);
        assert_eq!(bitmap.pixels[0], [0, 0, 0, 0]);
        assert_eq!(bitmap.pixels[1], [10, 20, 30, 255]);
        assert_eq!(bitmap.opaque_pixel_count(), 1);
    }

    #[test]
    fn emboldening_widens_strokes_by_one_pixel() {
        let bold = mask(3, 2, &[(0, 0), (2, 1)]).emboldened();
        assert_eq!(bold.width, 4);
        assert_eq!(bold.height, 2);
        let on = bold.coverage.iter().filter(|value| **value).count();
        assert_eq!(on, 4);
        assert!(bold.coverage[1]);
        assert!(bold.coverage[4 + 3]);
    }

    #[test]
    fn missing_font_path_is_configuration_error() {
        let error = resolve_font_path(Some(Path::new("/definitely/not/here.ttf")))
            .expect_err("missing font should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
    }

    #[test]
    fn garbage_font_bytes_are_configuration_error() {
        let error = FontRasterizer::from_bytes(vec![0, 1, 2, 3], "garbage")
            .err()
            .expect("garbage bytes should not parse");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
    }

    #[test]
    fn system_font_renders_binary_cells_of_equal_size() {
        let Ok(path) = resolve_font_path(None) else {
            return;
        };
        let mut rasterizer = FontRasterizer::from_path(&path).expect("system font should load");

        let dense = rasterizer.rasterize('@', 12, true, [200, 100, 50]).unwrap();
        let sparse = rasterizer.rasterize('.', 12, true, [200, 100, 50]).unwrap();
        assert_eq!((dense.width, dense.height), (sparse.width, sparse.height));
        assert!(dense.opaque_pixel_count() > sparse.opaque_pixel_count());
        assert!(dense
            .pixels
            .iter()
            .all(|pixel| *pixel == [0, 0, 0, 0] || *pixel == [200, 100, 50, 255]));

        // Same mask, different color: only the color channel changes.
        let recolored = rasterizer.rasterize('@', 12, true, [1, 2, 3]).unwrap();
        assert_eq!(recolored.opaque_pixel_count(), dense.opaque_pixel_count());
    }
}
