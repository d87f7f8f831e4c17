//! The conversion state machine shared by still images and video streams.
//!
//! `Uninitialized -> Ready -> Rendering -> (Stopped | Failed)`. Opening acquires the source before
//! any palette work, so a bad path never pays for rasterization. Running drives one of two loops
//! depending on the source kind and always closes the source before returning.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::compositor::FrameCompositor;
use crate::config::ConverterConfig;
use crate::display::Display;
use crate::errors::{error_kind, CodedError, CodedErrorKind};
use crate::glyph::GlyphRasterizer;
use crate::pacing::{FpsMeter, FramePacer};
use crate::palette::{expected_entries, Palette};
use crate::quantize::{ColorLevels, GlyphRamp, Quantizer};
use crate::source::{FrameSource, SourceKind};
use crate::surface::Surface;

/// Palettes above this many bitmaps take noticeably long to build and hold a lot of memory.
const LARGE_PALETTE_ENTRIES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    Rendering,
    Stopped,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Rendering => "rendering",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    QuitRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_composited: u64,
    pub frames_presented: u64,
    pub end: StopReason,
}

/// Everything acquired by `open` and released by `run`.
struct Session<S> {
    source: S,
    palette: Palette,
    compositor: FrameCompositor,
    surface: Surface,
}

pub struct PipelineDriver<S: FrameSource> {
    config: ConverterConfig,
    ramp: GlyphRamp,
    levels: ColorLevels,
    state: PipelineState,
    paced: bool,
    session: Option<Session<S>>,
}

impl<S: FrameSource> PipelineDriver<S> {
    pub fn new(config: &ConverterConfig) -> Result<Self> {
        config.validate()?;
        let levels = ColorLevels::new(config.color_levels)?;
        Ok(Self {
            config: config.clone(),
            ramp: GlyphRamp::default(),
            levels,
            state: PipelineState::Uninitialized,
            paced: true,
            session: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Disables sleeping between frames. Stream frames are then composited as fast as they
    /// decode.
    pub fn set_paced(&mut self, paced: bool) {
        self.paced = paced;
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.session
            .as_ref()
            .map(|session| session.source.dimensions())
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.session.as_ref().map(|session| session.source.kind())
    }

    pub fn palette_len(&self) -> Option<usize> {
        self.session.as_ref().map(|session| session.palette.len())
    }

    /// Acquires the source, then builds the palette and output surface.
    ///
    /// `make_rasterizer` is only invoked once the source has opened.
    pub fn open<O, F, R>(&mut self, open_source: O, make_rasterizer: F) -> Result<()>
    where
        O: FnOnce() -> Result<S>,
        F: FnOnce(&ConverterConfig) -> Result<R>,
        R: GlyphRasterizer,
    {
        if self.state != PipelineState::Uninitialized {
            return Err(anyhow!("pipeline cannot open from state {}", self.state));
        }

        let mut source = match open_source() {
            Ok(source) => source,
            Err(error) => {
                self.transition(PipelineState::Failed);
                return Err(classify(error, CodedErrorKind::SourceUnavailable));
            }
        };

        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            close_quietly(&mut source);
            self.transition(PipelineState::Failed);
            return Err(CodedError::source_unavailable(format!(
                "source reports empty dimensions {width}x{height}"
            ))
            .into());
        }

        match self.build_palette(make_rasterizer) {
            Ok(palette) => {
                self.session = Some(self.start_session(source, palette));
                self.transition(PipelineState::Ready);
                Ok(())
            }
            Err(error) => {
                close_quietly(&mut source);
                self.transition(PipelineState::Failed);
                Err(error)
            }
        }
    }

    fn build_palette<F, R>(&self, make_rasterizer: F) -> Result<Palette>
    where
        F: FnOnce(&ConverterConfig) -> Result<R>,
        R: GlyphRasterizer,
    {
        let entries = expected_entries(&self.ramp, &self.levels);
        if entries > LARGE_PALETTE_ENTRIES {
            log::warn!(
                "color_levels {} needs {} palette bitmaps; startup will be slow",
                self.levels.count(),
                entries
            );
        }
        let mut rasterizer = make_rasterizer(&self.config)?;
        Palette::build(
            &self.ramp,
            &self.levels,
            self.config.font_size,
            &mut rasterizer,
        )
    }

    fn start_session(&self, source: S, palette: Palette) -> Session<S> {
        let (width, height) = source.dimensions();
        let quantizer = Quantizer::new(&self.ramp, self.levels.clone());
        let compositor = FrameCompositor::new(
            self.ramp.clone(),
            quantizer,
            self.config.char_step(),
            self.config.background,
        );
        let (columns, rows) = compositor.grid_size(width, height);
        log::info!(
            "{} source {}x{}: {}x{} glyph grid, step {}px",
            source.kind().as_str(),
            width,
            height,
            columns,
            rows,
            compositor.char_step()
        );

        Session {
            source,
            palette,
            compositor,
            surface: Surface::new(width, height),
        }
    }

    /// Drives the render loop until end of stream, a quit request, or a failure.
    pub fn run(&mut self, display: &mut dyn Display) -> Result<RunSummary> {
        if self.state != PipelineState::Ready {
            return Err(anyhow!("pipeline cannot run from state {}", self.state));
        }
        let mut session = self
            .session
            .take()
            .ok_or_else(|| anyhow!("pipeline session missing in state {}", self.state))?;
        self.transition(PipelineState::Rendering);

        let outcome = match session.source.kind() {
            SourceKind::Still => self.render_still(&mut session, display),
            SourceKind::Stream => self.render_stream(&mut session, display),
        };

        let closed = session.source.close();
        drop(session);

        match outcome {
            Ok(summary) => {
                if let Err(error) = closed {
                    log::warn!("failed to release source cleanly: {error:#}");
                }
                log::info!(
                    "stopped ({:?}): {} frame(s) composited, {} presented",
                    summary.end,
                    summary.frames_composited,
                    summary.frames_presented
                );
                self.transition(PipelineState::Stopped);
                Ok(summary)
            }
            Err(error) => {
                if let Err(close_error) = closed {
                    log::warn!("failed to release source after error: {close_error:#}");
                }
                log::error!("render loop failed: {error:#}");
                self.transition(PipelineState::Failed);
                Err(error)
            }
        }
    }

    /// Converts once, then re-presents the same surface every display tick.
    fn render_still(
        &self,
        session: &mut Session<S>,
        display: &mut dyn Display,
    ) -> Result<RunSummary> {
        let frame = session
            .source
            .next_frame()
            .map_err(|error| classify(error, CodedErrorKind::DecodeFailure))?
            .ok_or_else(|| CodedError::decode_failure("image source produced no frame"))?;
        session
            .compositor
            .composite(&frame, &session.palette, &mut session.surface)?;

        // Without vsync the loop would spin; fall back to the configured rate.
        let mut pacer = if self.paced && !display.paces_itself() {
            FramePacer::new(self.config.target_fps)
        } else {
            FramePacer::unpaced()
        };
        let mut meter = FpsMeter::new();
        let mut presented = 0;
        loop {
            display.present(&session.surface)?;
            presented += 1;
            if let Some(fps) = meter.tick() {
                display.set_title(&format!("glyphcast - {fps:.1} fps"));
            }
            if display.poll_quit()? {
                break;
            }
            pacer.wait();
        }

        Ok(RunSummary {
            frames_composited: 1,
            frames_presented: presented,
            end: StopReason::QuitRequested,
        })
    }

    /// Decode, composite, present, poll, pace; once per frame in strict sequence.
    fn render_stream(
        &self,
        session: &mut Session<S>,
        display: &mut dyn Display,
    ) -> Result<RunSummary> {
        let mut pacer = if self.paced {
            FramePacer::new(self.config.target_fps)
        } else {
            FramePacer::unpaced()
        };
        let mut composited = 0;
        let mut presented = 0;

        let end = loop {
            let frame = match session.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("end of stream after {composited} frame(s)");
                    break StopReason::EndOfStream;
                }
                Err(error) => return Err(classify(error, CodedErrorKind::DecodeFailure)),
            };
            session
                .compositor
                .composite(&frame, &session.palette, &mut session.surface)?;
            composited += 1;

            display.present(&session.surface)?;
            presented += 1;

            if display.poll_quit()? {
                break StopReason::QuitRequested;
            }
            pacer.wait();
        };

        Ok(RunSummary {
            frames_composited: composited,
            frames_presented: presented,
            end,
        })
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("pipeline {} -> {}", self.state, next);
        self.state = next;
    }
}

impl<S: FrameSource> Drop for PipelineDriver<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            close_quietly(&mut session.source);
        }
    }
}

/// Tags unclassified errors with `fallback`; already classified errors pass through.
fn classify(error: anyhow::Error, fallback: CodedErrorKind) -> anyhow::Error {
    if error_kind(&error).is_some() {
        return error;
    }
    CodedError::new(fallback, format!("{error:#}")).into()
}

fn close_quietly<S: FrameSource>(source: &mut S) {
    if let Err(error) = source.close() {
        log::warn!("failed to release source: {error:#}");
    }
}
