use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::CodedError;
use crate::quantize::MAX_COLOR_LEVELS;

pub const DEFAULT_FONT_SIZE: u32 = 12;
pub const DEFAULT_COLOR_LEVELS: u32 = 8;
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Grid stride relative to the glyph point size; keeps monospace cells from overlapping.
const CHAR_STEP_RATIO: f64 = 0.6;

/// Construction-time parameters. Nothing here changes once a pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterConfig {
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_color_levels")]
    pub color_levels: u32,
    /// Frame interval for video sources.
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default)]
    pub background: [u8; 3],
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            color_levels: DEFAULT_COLOR_LEVELS,
            target_fps: DEFAULT_TARGET_FPS,
            background: [0, 0, 0],
            font_path: None,
        }
    }
}

fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}

fn default_color_levels() -> u32 {
    DEFAULT_COLOR_LEVELS
}

fn default_target_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

impl ConverterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.font_size == 0 {
            return Err(CodedError::configuration("font_size must be > 0").into());
        }
        if self.char_step() == 0 {
            return Err(CodedError::configuration(format!(
                "font_size {} is too small: the sampling stride floor(font_size * {CHAR_STEP_RATIO}) is 0",
                self.font_size
            ))
            .into());
        }
        if self.color_levels < 2 {
            return Err(CodedError::configuration(format!(
                "color_levels must be >= 2, got {}",
                self.color_levels
            ))
            .into());
        }
        if self.color_levels > MAX_COLOR_LEVELS {
            return Err(CodedError::configuration(format!(
                "color_levels must be <= {MAX_COLOR_LEVELS}, got {}",
                self.color_levels
            ))
            .into());
        }
        if self.target_fps == 0 {
            return Err(CodedError::configuration("target_fps must be > 0").into());
        }
        Ok(())
    }

    /// Pixel stride of the sampling grid.
    pub fn char_step(&self) -> u32 {
        (f64::from(self.font_size) * CHAR_STEP_RATIO) as u32
    }
}

pub fn load_config(path: &Path) -> Result<ConverterConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ConverterConfig = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(CodedError::configuration(format!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )))
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{load_config, ConverterConfig};
    use crate::errors::{error_kind, CodedErrorKind};

    #[test]
    fn defaults_match_documented_values() {
        let config = ConverterConfig::default();
        assert_eq!(config.font_size, 12);
        assert_eq!(config.color_levels, 8);
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.char_step(), 7);
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn degenerate_values_are_configuration_errors() {
        let cases = [
            ConverterConfig {
                font_size: 0,
                ..ConverterConfig::default()
            },
            ConverterConfig {
                font_size: 1,
                ..ConverterConfig::default()
            },
            ConverterConfig {
                color_levels: 1,
                ..ConverterConfig::default()
            },
            ConverterConfig {
                color_levels: 300,
                ..ConverterConfig::default()
            },
            ConverterConfig {
                target_fps: 0,
                ..ConverterConfig::default()
            },
        ];
        for config in cases {
            let error = config.validate().expect_err("should be rejected");
            assert_eq!(
                error_kind(&error),
                Some(CodedErrorKind::Configuration),
                "{config:?}"
            );
        }
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glyphcast.yaml");
        fs::write(&path, "font_size: 20\nbackground: [10, 20, 30]\n").unwrap();
        let config = load_config(&path).expect("config should load");
        assert_eq!(config.font_size, 20);
        assert_eq!(config.char_step(), 12);
        assert_eq!(config.color_levels, 8);
        assert_eq!(config.background, [10, 20, 30]);
    }

    #[test]
    fn unknown_yaml_fields_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glyphcast.yaml");
        fs::write(&path, "font_size: 12\nglyph_ramp: \" .#\"\n").unwrap();
        let error = load_config(&path).expect_err("unknown field should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
        assert!(format!("{error:#}").contains("glyph_ramp"));
    }

    #[test]
    fn invalid_values_in_yaml_fail_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glyphcast.yaml");
        fs::write(&path, "color_levels: 1\n").unwrap();
        let error = load_config(&path).expect_err("color_levels 1 should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::Configuration));
    }
}
