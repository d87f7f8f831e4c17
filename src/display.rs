use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

use crate::surface::Surface;

/// Where composited surfaces go.
pub trait Display {
    /// Drains pending input. `true` once the user asked to stop.
    fn poll_quit(&mut self) -> Result<bool>;

    fn present(&mut self, surface: &Surface) -> Result<()>;

    fn set_title(&mut self, _title: &str) {}

    /// Whether `present` already blocks on the refresh rate.
    fn paces_itself(&self) -> bool {
        false
    }
}

/// Offscreen display: keeps the latest frame and requests quit after a fixed number of presents.
#[derive(Debug, Clone, Default)]
pub struct HeadlessDisplay {
    quit_after: Option<u64>,
    presents: u64,
    last_frame: Option<Surface>,
    title: Option<String>,
}

impl HeadlessDisplay {
    /// `quit_after: None` never requests quit; a stream source then runs to its end.
    pub fn new(quit_after: Option<u64>) -> Self {
        Self {
            quit_after,
            ..Self::default()
        }
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn last_frame(&self) -> Option<&Surface> {
        self.last_frame.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Writes the most recent frame as an image; format follows the extension.
    pub fn save_last_frame(&self, path: &Path) -> Result<()> {
        let surface = self
            .last_frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame was presented"))?;
        let image = RgbaImage::from_raw(
            surface.width(),
            surface.height(),
            surface.as_bytes().to_vec(),
        )
        .ok_or_else(|| anyhow!("surface buffer does not match its dimensions"))?;
        image
            .save(path)
            .with_context(|| format!("failed to write frame to {}", path.display()))?;
        log::info!("wrote last frame to {}", path.display());
        Ok(())
    }
}

impl Display for HeadlessDisplay {
    fn poll_quit(&mut self) -> Result<bool> {
        Ok(self
            .quit_after
            .is_some_and(|quit_after| self.presents >= quit_after))
    }

    fn present(&mut self, surface: &Surface) -> Result<()> {
        self.presents += 1;
        match &mut self.last_frame {
            Some(last) => last.clone_from(surface),
            None => self.last_frame = Some(surface.clone()),
        }
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_owned());
    }
}
