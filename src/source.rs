use std::path::Path;

use anyhow::{anyhow, Result};
use image::{ImageReader, RgbImage};

use crate::decoding::VideoSource;
use crate::errors::CodedError;

const STILL_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// One decoded frame: RGB colors plus a same-sized luminance plane, both row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFrame {
    width: u32,
    height: u32,
    rgb: Vec<[u8; 3]>,
    luma: Vec<u8>,
}

impl SourceFrame {
    pub fn from_rgb(width: u32, height: u32, rgb: Vec<[u8; 3]>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if rgb.len() != expected {
            return Err(anyhow!(
                "frame has {} pixels, expected {}x{} = {}",
                rgb.len(),
                width,
                height,
                expected
            ));
        }
        let luma = rgb.iter().map(|&[r, g, b]| luminance(r, g, b)).collect();
        Ok(Self {
            width,
            height,
            rgb,
            luma,
        })
    }

    /// Builds a frame from packed `rgb24` bytes.
    pub fn from_rgb_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 3 != 0 {
            return Err(anyhow!("rgb24 buffer length {} is not a multiple of 3", bytes.len()));
        }
        let rgb = bytes
            .chunks_exact(3)
            .map(|pixel| [pixel[0], pixel[1], pixel[2]])
            .collect();
        Self::from_rgb(width, height, rgb)
    }

    pub fn from_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let rgb = image.pixels().map(|pixel| pixel.0).collect::<Vec<_>>();
        let luma = rgb.iter().map(|&[r, g, b]| luminance(r, g, b)).collect();
        Self {
            width,
            height,
            rgb,
            luma,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb(&self) -> &[[u8; 3]] {
        &self.rgb
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn color_at(&self, x: u32, y: u32) -> [u8; 3] {
        self.rgb[(y * self.width + x) as usize]
    }

    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        self.luma[(y * self.width + x) as usize]
    }
}

/// BT.601 luma in 14-bit fixed point, rounded.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 4899 * u32::from(r) + 9617 * u32::from(g) + 1868 * u32::from(b);
    ((weighted + 8192) >> 14) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Decoded once; the converted result is reused for every display tick.
    Still,
    /// Successive frames until end of stream.
    Stream,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Still => "image",
            Self::Stream => "video",
        }
    }
}

/// Supplies frames to the pipeline.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    fn dimensions(&self) -> (u32, u32);

    /// Next frame, `Ok(None)` at end of stream. Errors are decode failures of an already open
    /// source.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;

    /// Releases OS resources held by the source. Safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        (**self).next_frame()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// A still image decoded at open time. Yields its frame once.
#[derive(Debug)]
pub struct ImageSource {
    frame: Option<SourceFrame>,
    dimensions: (u32, u32),
}

impl ImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CodedError::source_unavailable(format!(
                "image '{}' does not exist or is not a file",
                path.display()
            ))
            .into());
        }
        let image = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|error| {
                CodedError::source_unavailable(format!(
                    "failed to open image '{}': {error}",
                    path.display()
                ))
            })?
            .decode()
            .map_err(|error| {
                CodedError::source_unavailable(format!(
                    "failed to decode image '{}': {error}",
                    path.display()
                ))
            })?
            .to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(CodedError::source_unavailable(format!(
                "image '{}' has no pixels",
                path.display()
            ))
            .into());
        }

        log::info!(
            "opened image {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_frame(SourceFrame::from_image(&image)))
    }

    pub fn from_frame(frame: SourceFrame) -> Self {
        let dimensions = (frame.width(), frame.height());
        Self {
            frame: Some(frame),
            dimensions,
        }
    }
}

impl FrameSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Still
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        Ok(self.frame.take())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Image,
    Video,
    /// Chosen from the file extension.
    Auto,
}

pub fn is_still_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_ascii_lowercase();
            STILL_IMAGE_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}

pub fn open_source(path: &Path, mode: SourceMode) -> Result<Box<dyn FrameSource>> {
    let still = match mode {
        SourceMode::Image => true,
        SourceMode::Video => false,
        SourceMode::Auto => is_still_image_path(path),
    };
    if still {
        Ok(Box::new(ImageSource::open(path)?))
    } else {
        Ok(Box::new(VideoSource::open(path)?))
    }
}
