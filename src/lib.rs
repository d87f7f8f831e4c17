pub mod compositor;
pub mod config;
pub mod decoding;
pub mod display;
pub mod errors;
pub mod glyph;
pub mod pacing;
pub mod palette;
pub mod pipeline;
pub mod quantize;
pub mod source;
pub mod surface;
#[cfg(feature = "window")]
pub mod window;
