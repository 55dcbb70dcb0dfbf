#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`region`]: Integer pixel rectangles
//! - [`splitter`]: Exact partitions of a region ([`SplitPlan`])
//! - [`pipeline`]: Memory-accounting model of a processing graph
//! - [`memory`]: Sample-based estimate of the pieces a request needs
//! - [`streaming`]: Piecewise execution under a RAM budget
//! - [`raster`]: Pixel types and the [`TileSource`] trait
//! - [`resample`]: Null-aware 2:1 box / nearest downsampling
//! - [`tiff_writer`] / [`tiff_reader`]: Tiled multi-directory TIFF I/O
//! - [`pyramid`]: Reduced-resolution level builder
//! - [`sidecar`]: `.omd` metadata sidecar

// ============================================================================
// Public modules
// ============================================================================

pub mod casting;
pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod progress;
pub mod pyramid;
pub mod raster;
pub mod region;
pub mod resample;
pub mod sample;
pub mod sidecar;
pub mod splitter;
pub mod streaming;
pub mod tiff_reader;
pub mod tiff_writer;
pub(crate) mod tile_cache;

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use error::{OvrError, Result};
pub use config::{
    OverviewOptions,
    StreamingConfig,
    DEFAULT_JPEG_QUALITY,
    DEFAULT_RAM_MB,
    DEFAULT_TILE_SIZE,
};

// ============================================================================
// Regions & Splitting
// ============================================================================

pub use region::Region;
pub use splitter::{
    RegionSplitter,
    SplitPlan,
    SquareTileSplitter,
    StripSplitter,
};

// ============================================================================
// Memory Estimation & Streaming
// ============================================================================
// Primary API: StreamingCoordinator::new(mode, config).prepare(&pipeline, region)

pub use memory::{
    MemoryEstimator,
    actual_available_ram,
    divisions_for,
};
pub use pipeline::{
    PipelineMemoryPrint,
    PipelineNode,
};
pub use streaming::{
    StreamingCoordinator,
    StreamingMode,
};

// ============================================================================
// Rasters & Resampling
// ============================================================================

pub use raster::{
    BandStats,
    BlockStatus,
    MemoryRaster,
    PixelType,
    RasterInfo,
    RasterLevel,
    SampleFormat,
    TileSource,
};
pub use resample::{
    Quadrant,
    ResamplingMethod,
    resample_tile,
};
pub use sample::Sample;

// ============================================================================
// Tiled TIFF I/O
// ============================================================================

pub use codec::TileCompression;
pub use tiff_reader::TiffRasterReader;
pub use tiff_writer::{
    LevelWriter,
    TiffVariant,
    TiledTiffWriter,
};

// ============================================================================
// Pyramid Building
// ============================================================================
// Primary API: PyramidBuilder::new(source, options)?.build(path)

pub use progress::{
    AbortSignal,
    ProgressEvent,
    ProgressListener,
    StdoutProgress,
};
pub use pyramid::{
    BuildReport,
    BuildState,
    LevelSummary,
    PyramidBuilder,
    number_of_levels,
};
pub use sidecar::PyramidMetadata;
