//! Explicit configuration for streaming estimation and overview building.
//!
//! Nothing here is process-wide: every value is carried by a struct that the
//! caller passes to the component constructors.
//!
//! # Example
//!
//! ```rust
//! use ovrs::config::{OverviewOptions, StreamingConfig};
//! use ovrs::{ResamplingMethod, TileCompression};
//!
//! let streaming = StreamingConfig::default().with_default_ram_mb(256);
//! let options = OverviewOptions::default()
//!     .tile_size(128, 128)
//!     .compression(TileCompression::Deflate)
//!     .resampling(ResamplingMethod::Nearest)
//!     .copy_all(true);
//!
//! assert_eq!(streaming.default_ram_mb, 256);
//! assert_eq!(options.tile_width, 128);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::TileCompression;
use crate::error::{OvrError, Result};
use crate::resample::ResamplingMethod;

/// RAM used when a caller asks for "0 MB"
pub const DEFAULT_RAM_MB: u64 = 128;

/// JPEG quality used when none (or an out-of-range one) is given
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Default output tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Settings for the memory estimator and streaming managers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Budget substituted for a requested budget of 0 MB
    pub default_ram_mb: u64,
    /// Width of the sample sub-region evaluated by the estimator
    pub sample_width: u64,
    /// Height of the sample sub-region evaluated by the estimator
    pub sample_height: u64,
    /// Multiplier applied to every buffer during the accounting walk
    pub default_bias: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_ram_mb: DEFAULT_RAM_MB,
            sample_width: 100,
            sample_height: 100,
            default_bias: 1.0,
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub fn with_default_ram_mb(mut self, mb: u64) -> Self {
        self.default_ram_mb = mb;
        self
    }

    #[must_use]
    pub fn with_sample_size(mut self, width: u64, height: u64) -> Self {
        self.sample_width = width;
        self.sample_height = height;
        self
    }

    #[must_use]
    pub fn with_default_bias(mut self, bias: f64) -> Self {
        self.default_bias = bias;
        self
    }

    /// Load from a JSON file. Missing keys take their default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OvrError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Options controlling how a pyramid file is produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverviewOptions {
    /// Output tile width, constant across all levels
    pub tile_width: u32,
    /// Output tile height, constant across all levels
    pub tile_height: u32,
    pub compression: TileCompression,
    /// 1..=100, only used by JPEG compression
    pub jpeg_quality: u8,
    pub resampling: ResamplingMethod,
    /// Also write a verbatim full-resolution copy as directory 0
    pub copy_all: bool,
    /// RAM budget in MB for decoded source tiles (0 = streaming default)
    pub ram_mb: u64,
    /// Always write BigTIFF. Otherwise it is chosen from the source size.
    pub big_tiff: bool,
}

impl Default for OverviewOptions {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            compression: TileCompression::None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            resampling: ResamplingMethod::Box,
            copy_all: false,
            ram_mb: 0,
            big_tiff: false,
        }
    }
}

impl OverviewOptions {
    #[must_use]
    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: TileCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the JPEG quality. Values outside 1..=100 fall back to 75.
    #[must_use]
    pub fn jpeg_quality(mut self, quality: i32) -> Self {
        self.jpeg_quality = match u8::try_from(quality) {
            Ok(q) if (1..=100).contains(&q) => q,
            _ => {
                warn!(
                    quality,
                    default = DEFAULT_JPEG_QUALITY,
                    "JPEG quality out of range 1..=100, using default"
                );
                DEFAULT_JPEG_QUALITY
            }
        };
        self
    }

    #[must_use]
    pub fn resampling(mut self, resampling: ResamplingMethod) -> Self {
        self.resampling = resampling;
        self
    }

    #[must_use]
    pub fn copy_all(mut self, copy_all: bool) -> Self {
        self.copy_all = copy_all;
        self
    }

    #[must_use]
    pub fn ram_mb(mut self, mb: u64) -> Self {
        self.ram_mb = mb;
        self
    }

    #[must_use]
    pub fn big_tiff(mut self, big_tiff: bool) -> Self {
        self.big_tiff = big_tiff;
        self
    }

    /// Check tile geometry before any file is touched.
    ///
    /// # Errors
    /// Tiles must be non-empty with even edges (each quadrant is half a tile)
    /// and a multiple of 16 as the TIFF tiling rules require.
    pub fn validate(&self) -> Result<()> {
        for (name, edge) in [("width", self.tile_width), ("height", self.tile_height)] {
            if edge == 0 || edge % 16 != 0 {
                return Err(OvrError::Configuration(format!(
                    "tile {name} {edge} must be a non-zero multiple of 16"
                )));
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(OvrError::Configuration(format!(
                "JPEG quality {} outside 1..=100",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    /// Load from a JSON file. Missing keys take their default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes invalid tile geometry.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OvrError::io(format!("reading {}", path.display()), e))?;
        let options: Self = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_defaults() {
        let cfg = StreamingConfig::default();
        assert_eq!(cfg.default_ram_mb, 128);
        assert_eq!((cfg.sample_width, cfg.sample_height), (100, 100));
        assert!((cfg.default_bias - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overview_defaults_validate() {
        let opts = OverviewOptions::default();
        assert_eq!(opts.tile_width, 256);
        assert_eq!(opts.jpeg_quality, 75);
        assert_eq!(opts.resampling, ResamplingMethod::Box);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_jpeg_quality_out_of_range_defaults() {
        assert_eq!(OverviewOptions::default().jpeg_quality(0).jpeg_quality, 75);
        assert_eq!(OverviewOptions::default().jpeg_quality(101).jpeg_quality, 75);
        assert_eq!(OverviewOptions::default().jpeg_quality(-3).jpeg_quality, 75);
        assert_eq!(OverviewOptions::default().jpeg_quality(90).jpeg_quality, 90);
        assert_eq!(OverviewOptions::default().jpeg_quality(1).jpeg_quality, 1);
    }

    #[test]
    fn test_odd_tile_rejected() {
        let opts = OverviewOptions::default().tile_size(250, 256);
        assert!(matches!(opts.validate(), Err(OvrError::Configuration(_))));
        let opts = OverviewOptions::default().tile_size(0, 256);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: StreamingConfig = serde_json::from_str(r#"{"default_ram_mb": 64}"#).unwrap();
        assert_eq!(cfg.default_ram_mb, 64);
        assert_eq!(cfg.sample_width, 100);

        let opts: OverviewOptions =
            serde_json::from_str(r#"{"compression": "Lzw", "copy_all": true}"#).unwrap();
        assert_eq!(opts.compression, TileCompression::Lzw);
        assert!(opts.copy_all);
        assert_eq!(opts.tile_height, 256);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ovr.json");
        std::fs::write(&path, r#"{"tile_width": 64, "tile_height": 64}"#).unwrap();
        let opts = OverviewOptions::from_json_file(&path).unwrap();
        assert_eq!((opts.tile_width, opts.tile_height), (64, 64));

        assert!(StreamingConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
