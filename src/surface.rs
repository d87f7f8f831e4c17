use crate::glyph::GlyphBitmap;

/// RGBA drawing target sized to the source frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0, 0, 0, 255]; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.pixels.as_slice())
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn clear(&mut self, background: [u8; 3]) {
        self.pixels
            .fill([background[0], background[1], background[2], 255]);
    }

    /// Draws `glyph` with its top-left corner at `(x, y)`, clipped to the surface.
    pub fn blit(&mut self, glyph: &GlyphBitmap, x: u32, y: u32) {
        let frame_width = self.width as usize;
        let x = x as usize;
        let y = y as usize;
        let visible_rows = glyph.height.min((self.height as usize).saturating_sub(y));
        let visible_cols = glyph.width.min(frame_width.saturating_sub(x));

        for row in 0..visible_rows {
            let src = &glyph.pixels[row * glyph.width..row * glyph.width + visible_cols];
            let dst_start = (y + row) * frame_width + x;
            let dst = &mut self.pixels[dst_start..dst_start + visible_cols];
            for (dst_pixel, src_pixel) in dst.iter_mut().zip(src) {
                blend_pixel(dst_pixel, *src_pixel);
            }
        }
    }
}

pub fn blend_pixel(dst: &mut [u8; 4], src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }
    if alpha == 255 {
        *dst = src;
        return;
    }

    let inv_alpha = 255_u16.saturating_sub(alpha);
    for channel in 0..3 {
        let dst_c = u16::from(dst[channel]);
        let src_c = u16::from(src[channel]);
        dst[channel] = ((src_c * alpha + dst_c * inv_alpha + 127) / 255) as u8;
    }
    dst[3] = 255;
}
