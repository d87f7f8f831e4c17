//! Per-frame conversion hot path.

use anyhow::{anyhow, Result};

use crate::palette::Palette;
use crate::quantize::{GlyphRamp, Quantizer};
use crate::source::SourceFrame;
use crate::surface::Surface;

/// Samples a frame on a `char_step` grid and blits one pre-rendered glyph per sampled cell.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    ramp: GlyphRamp,
    quantizer: Quantizer,
    char_step: u32,
    background: [u8; 3],
}

impl FrameCompositor {
    pub fn new(ramp: GlyphRamp, quantizer: Quantizer, char_step: u32, background: [u8; 3]) -> Self {
        Self {
            ramp,
            quantizer,
            char_step: char_step.max(1),
            background,
        }
    }

    pub fn char_step(&self) -> u32 {
        self.char_step
    }

    /// Sampled cells per axis for a `width` x `height` frame.
    pub fn grid_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.char_step), height.div_ceil(self.char_step))
    }

    /// Clears `surface` to the background and draws the converted frame. Reads only from the
    /// palette: no rasterization, no allocation.
    pub fn composite(
        &self,
        frame: &SourceFrame,
        palette: &Palette,
        surface: &mut Surface,
    ) -> Result<()> {
        if (frame.width(), frame.height()) != (surface.width(), surface.height()) {
            return Err(anyhow!(
                "frame is {}x{} but the surface is {}x{}",
                frame.width(),
                frame.height(),
                surface.width(),
                surface.height()
            ));
        }

        surface.clear(self.background);

        let step = self.char_step as usize;
        for y in (0..frame.height()).step_by(step) {
            for x in (0..frame.width()).step_by(step) {
                let glyph_index = self.quantizer.glyph_index(frame.luma_at(x, y));
                if glyph_index == 0 {
                    // Darkest bucket stays empty so the background shows through.
                    continue;
                }
                let [r, g, b] = frame.color_at(x, y);
                let bucket = self.quantizer.color_bucket(r, g, b);
                let glyph = self.ramp.glyph(glyph_index);
                let bitmap = palette.lookup(glyph, bucket).ok_or_else(|| {
                    anyhow!(
                        "palette has no entry for '{}' in bucket {:?}",
                        glyph.escape_default(),
                        bucket
                    )
                })?;
                surface.blit(bitmap, x, y);
            }
        }

        Ok(())
    }
}
