//! Reduced-resolution pyramid construction.
//!
//! [`PyramidBuilder`] writes one tiled TIFF whose directories hold successively
//! halved levels of a source raster. Level 1 is resampled from the source
//! itself; every later level `n` is resampled from level `n - 1` of the file
//! being written, read back through a fresh read-only handle once that level
//! is finished. Each output tile is built from the 2x2 group of input tiles
//! it covers.
//!
//! # Example
//!
//! ```rust,no_run
//! use ovrs::{MemoryRaster, OverviewOptions, PyramidBuilder, ResamplingMethod};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let source = MemoryRaster::from_fn(2048, 2048, 1, |_, x, y| ((x ^ y) & 0xff) as u8)?;
//!     let options = OverviewOptions::default().resampling(ResamplingMethod::Nearest);
//!
//!     let mut builder = PyramidBuilder::new(source, options)?;
//!     let report = builder.build("overviews.tif")?;
//!     println!("{} levels written", report.levels.len());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::casting::u64_to_usize;
use crate::config::{OverviewOptions, StreamingConfig};
use crate::error::{OvrError, Result};
use crate::memory::actual_available_ram;
use crate::progress::{AbortSignal, ProgressEvent, ProgressListener, StdoutProgress};
use crate::raster::{BandStats, BlockStatus, RasterLevel, TileSource};
use crate::resample::{Quadrant, ResamplingMethod, resample_tile};
use crate::sample::fill_value;
use crate::sidecar::{self, PyramidMetadata};
use crate::tiff_reader::TiffRasterReader;
use crate::tiff_writer::{LevelWriter, TiffVariant, TiledTiffWriter};

/// Number of reduced levels worth building for a `width` x `height` raster:
/// the largest `n` with `min(width, height) / 2^n > 2`.
#[must_use]
pub fn number_of_levels(width: u64, height: u64) -> u32 {
    let smallest = width.min(height);
    let mut levels = 0;
    while levels < 63 && (smallest >> (levels + 1)) > 2 {
        levels += 1;
    }
    levels
}

/// Where a build currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildState {
    Init,
    CopyLevel0,
    BuildLevel(u32),
    Done,
    Aborted,
    Failed,
}

/// One directory of the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub level: u32,
    pub directory: usize,
    pub width: u64,
    pub height: u64,
}

/// Outcome of a successful [`PyramidBuilder::build`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub levels: Vec<LevelSummary>,
    pub directories_written: usize,
    /// `None` when no pyramid was needed
    pub sidecar: Option<PathBuf>,
}

/// How a level loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelOutcome {
    Complete,
    Aborted,
}

/// Builds a multi-resolution pyramid from a [`TileSource`].
pub struct PyramidBuilder<S: TileSource> {
    source: S,
    options: OverviewOptions,
    streaming: StreamingConfig,
    abort: AbortSignal,
    listener: Box<dyn ProgressListener>,
    state: BuildState,
    last_error: Option<String>,
    directories_written: usize,
}

impl<S: TileSource> PyramidBuilder<S> {
    /// Validate `options` against `source` and prepare a builder.
    ///
    /// # Errors
    /// Returns a configuration error for an empty source or invalid options.
    pub fn new(source: S, options: OverviewOptions) -> Result<Self> {
        options.validate()?;
        let info = *source.info();
        if info.width == 0 || info.height == 0 || info.bands == 0 {
            return Err(OvrError::Configuration(format!(
                "source raster is empty ({}x{}, {} bands)",
                info.width, info.height, info.bands
            )));
        }
        options.compression.check_pixel_type(info.pixel_type)?;
        Ok(Self {
            source,
            options,
            streaming: StreamingConfig::default(),
            abort: AbortSignal::new(),
            listener: Box::new(StdoutProgress::default()),
            state: BuildState::Init,
            last_error: None,
            directories_written: 0,
        })
    }

    #[must_use]
    pub fn with_streaming_config(mut self, config: StreamingConfig) -> Self {
        self.streaming = config;
        self
    }

    /// Register a progress listener in place of the stdout default
    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Share an existing cancellation flag
    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Handle for cancelling this builder from elsewhere
    #[must_use]
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    #[must_use]
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Message of the most recent failed build
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Directories on disk after the last build, complete or not
    #[must_use]
    pub fn levels_written(&self) -> usize {
        self.directories_written
    }

    #[must_use]
    pub fn number_of_levels(&self) -> u32 {
        let info = self.source.info();
        number_of_levels(info.width, info.height)
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    fn base_level(&self) -> RasterLevel {
        let info = self.source.info();
        RasterLevel {
            index: 0,
            width: info.width,
            height: info.height,
            tile_width: self.options.tile_width,
            tile_height: self.options.tile_height,
            pixel_type: info.pixel_type,
            bands: info.bands,
        }
    }

    fn band_stats(&self) -> Vec<BandStats> {
        (0..self.source.info().bands)
            .map(|band| self.source.band_stats(band))
            .collect()
    }

    fn cache_bytes(&self) -> usize {
        usize::try_from(actual_available_ram(self.options.ram_mb, &self.streaming)).unwrap_or(usize::MAX)
    }

    /// Build the pyramid into `path` (created or truncated), then write the
    /// `.omd` sidecar next to it.
    ///
    /// # Errors
    /// I/O and configuration failures end the build with the levels written
    /// so far left on disk. Cancellation returns [`OvrError::Aborted`] after
    /// finishing the level in progress.
    pub fn build<P: AsRef<Path>>(&mut self, path: P) -> Result<BuildReport> {
        let path = path.as_ref();
        self.state = BuildState::Init;
        self.last_error = None;
        self.directories_written = 0;

        let result = self.build_inner(path);
        match &result {
            Ok(report) => {
                self.state = BuildState::Done;
                info!(
                    path = %path.display(),
                    directories = report.directories_written,
                    "Finished pyramid"
                );
            }
            Err(OvrError::Aborted) => {
                self.state = BuildState::Aborted;
                self.last_error = Some(OvrError::Aborted.to_string());
                info!(
                    path = %path.display(),
                    directories = self.directories_written,
                    "Pyramid build aborted by caller"
                );
            }
            Err(e) => {
                self.state = BuildState::Failed;
                self.last_error = Some(e.to_string());
                error!(path = %path.display(), error = %e, "Pyramid build failed");
            }
        }
        result
    }

    fn build_inner(&mut self, path: &Path) -> Result<BuildReport> {
        let variant = if self.options.big_tiff {
            TiffVariant::Big
        } else {
            TiffVariant::for_raster_bytes(self.source.info().raster_bytes())
        };
        let mut writer = TiledTiffWriter::create(
            path,
            variant,
            self.options.compression,
            self.options.jpeg_quality,
        )?;
        let mut levels = Vec::new();
        let base = self.base_level();

        if self.options.copy_all {
            self.state = BuildState::CopyLevel0;
            let outcome = self.build_level0(&mut writer);
            self.directories_written = writer.directories_written();
            if outcome? == LevelOutcome::Aborted {
                return Err(OvrError::Aborted);
            }
            levels.push(LevelSummary {
                level: 0,
                directory: 0,
                width: base.width,
                height: base.height,
            });
        }

        if self.abort.is_aborted() {
            return Err(OvrError::Aborted);
        }

        let count = self.number_of_levels();
        if count == 0 {
            info!(
                width = base.width,
                height = base.height,
                "Raster too small, no reduced levels needed"
            );
            return Ok(BuildReport {
                levels,
                directories_written: self.directories_written,
                sidecar: None,
            });
        }

        for index in 1..=count {
            self.state = BuildState::BuildLevel(index);
            let outcome = if index == 1 {
                self.build_level1(&mut writer)
            } else {
                self.build_level_n(&mut writer, index)
            };
            self.directories_written = writer.directories_written();
            if outcome? == LevelOutcome::Aborted {
                return Err(OvrError::Aborted);
            }
            let level = base.reduced(index);
            levels.push(LevelSummary {
                level: index,
                directory: self.directories_written - 1,
                width: level.width,
                height: level.height,
            });
        }
        drop(writer);

        let stats = self.band_stats();
        let sidecar_path = sidecar::sidecar_path(path);
        sidecar::write_or_merge(
            &sidecar_path,
            &PyramidMetadata {
                pixel_type: base.pixel_type,
                number_of_bands: base.bands,
                bands: stats,
            },
        )?;

        self.listener
            .on_progress(&ProgressEvent::new("Finished...", None, 100.0));
        Ok(BuildReport {
            levels,
            directories_written: self.directories_written,
            sidecar: Some(sidecar_path),
        })
    }

    /// Verbatim tiled copy of the source as a full-resolution directory.
    fn build_level0(&mut self, writer: &mut TiledTiffWriter) -> Result<LevelOutcome> {
        let level = self.base_level();
        let stats = self.band_stats();
        let mut out = writer.begin_level(level, &stats)?;

        let tile_bytes = level.tile_bytes()?;
        let mut buf = vec![0u8; tile_bytes];
        let rows = u64::try_from(level.bands).unwrap_or(u64::MAX) * level.tiles_down();
        let mut rows_done = 0;
        let (tw, th) = (level.tile_width, level.tile_height);

        let mut outcome = LevelOutcome::Complete;
        'bands: for band in 0..level.bands {
            for ty in 0..level.tiles_down() {
                for tx in 0..level.tiles_across() {
                    let status = self.source.read_block(
                        band,
                        pixel_origin(tx, tw),
                        pixel_origin(ty, th),
                        tw,
                        th,
                        &mut buf,
                    )?;
                    if status == BlockStatus::Empty {
                        buf.fill(0);
                    }
                    out.write_tile(band, tx, ty, &buf)?;
                }
                rows_done += 1;
                if report_row(&self.abort, self.listener.as_mut(), 0, rows_done, rows) {
                    outcome = LevelOutcome::Aborted;
                    break 'bands;
                }
            }
        }

        out.finish()?;
        Ok(outcome)
    }

    /// First reduced level, resampled from the source raster.
    fn build_level1(&mut self, writer: &mut TiledTiffWriter) -> Result<LevelOutcome> {
        let base = self.base_level();
        let stats = self.band_stats();
        let out = writer.begin_level(base.reduced(1), &stats)?;
        let method = self.options.resampling;
        reduce_level(
            &mut self.source,
            base,
            out,
            &stats,
            method,
            &mut |rows_done: u64, rows: u64| {
                report_row(&self.abort, self.listener.as_mut(), 1, rows_done, rows)
            },
        )
    }

    /// Level `n > 1`, resampled from level `n - 1` of the output file.
    fn build_level_n(&mut self, writer: &mut TiledTiffWriter, index: u32) -> Result<LevelOutcome> {
        let base = self.base_level();
        let stats = self.band_stats();
        let previous_directory = writer.directories_written().checked_sub(1).ok_or_else(|| {
            OvrError::Configuration(format!("level {index} has no previous level to read"))
        })?;

        // The previous level is finished: open a fresh read-only view of it
        let mut previous = TiffRasterReader::open(writer.path(), previous_directory, self.cache_bytes())?
            .with_band_stats(stats.clone());
        debug!(
            level = index,
            directory = previous_directory,
            "Reading previous level"
        );

        let out = writer.begin_level(base.reduced(index), &stats)?;
        let method = self.options.resampling;
        reduce_level(
            &mut previous,
            base.reduced(index - 1),
            out,
            &stats,
            method,
            &mut |rows_done: u64, rows: u64| {
                report_row(&self.abort, self.listener.as_mut(), index, rows_done, rows)
            },
        )
    }
}

/// Report one finished output tile row of `level`; true when the caller asked
/// to stop
fn report_row(
    abort: &AbortSignal,
    listener: &mut dyn ProgressListener,
    level: u32,
    rows_done: u64,
    rows: u64,
) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let percent = rows_done as f64 / rows.max(1) as f64 * 100.0;
    let stage = if level == 0 {
        "copying r0...".to_string()
    } else {
        format!("creating r{level}...")
    };
    listener.on_progress(&ProgressEvent::new(stage, Some(level), percent));
    abort.is_aborted()
}

#[inline]
fn pixel_origin(tile: u64, edge: u32) -> i64 {
    i64::try_from(tile * u64::from(edge)).unwrap_or(i64::MAX)
}

/// Build every tile of `out` from the 2x2 groups of `input` tiles.
/// `on_row(done, total)` runs after each output tile row and returns true to
/// stop; the level is finished either way.
fn reduce_level(
    input: &mut dyn TileSource,
    input_level: RasterLevel,
    mut out: LevelWriter<'_>,
    stats: &[BandStats],
    method: ResamplingMethod,
    on_row: &mut dyn FnMut(u64, u64) -> bool,
) -> Result<LevelOutcome> {
    let level = *out.level();
    let (tw, th) = (level.tile_width, level.tile_height);
    let tile_bytes = level.tile_bytes()?;
    let mut src = vec![0u8; tile_bytes];
    let mut dst = vec![0u8; tile_bytes];
    let (tw_px, th_px) = (u64_to_usize(u64::from(tw))?, u64_to_usize(u64::from(th))?);

    let rows = u64::try_from(level.bands).unwrap_or(u64::MAX) * level.tiles_down();
    let mut rows_done = 0;
    let mut outcome = LevelOutcome::Complete;

    'bands: for band in 0..level.bands {
        let null = stats.get(band).map_or(0.0, |s| s.null);
        for ty in 0..level.tiles_down() {
            for tx in 0..level.tiles_across() {
                fill_value(level.pixel_type, &mut dst, null);
                for quadrant in Quadrant::ALL {
                    let (cx, cy) = quadrant.tile_offset();
                    let sx = (tx * 2 + cx) * u64::from(tw);
                    let sy = (ty * 2 + cy) * u64::from(th);
                    if sx >= input_level.width || sy >= input_level.height {
                        continue;
                    }
                    let status = input.read_block(
                        band,
                        pixel_origin(tx * 2 + cx, tw),
                        pixel_origin(ty * 2 + cy, th),
                        tw,
                        th,
                        &mut src,
                    )?;
                    if status == BlockStatus::Full {
                        resample_tile(level.pixel_type, &src, &mut dst, tw_px, th_px, quadrant, method, null)?;
                    }
                }
                out.write_tile(band, tx, ty, &dst)?;
            }
            rows_done += 1;
            if on_row(rows_done, rows) {
                outcome = LevelOutcome::Aborted;
                break 'bands;
            }
        }
    }

    out.finish()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TileCompression;
    use crate::raster::{MemoryRaster, PixelType};
    use crate::sample::Sample;

    fn quiet<S: TileSource>(builder: PyramidBuilder<S>) -> PyramidBuilder<S> {
        builder.with_listener(Box::new(|_: &ProgressEvent| {}))
    }

    #[test]
    fn test_number_of_levels() {
        assert_eq!(number_of_levels(256, 256), 6);
        assert_eq!(number_of_levels(4, 4), 0);
        assert_eq!(number_of_levels(5, 4000), 0);
        assert_eq!(number_of_levels(6, 6), 1);
        assert_eq!(number_of_levels(1024, 2048), 8);
    }

    #[test]
    fn test_box_levels_average() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("box.tif");
        // 2x2 blocks hold 10, 20, 30, 40 -> mean 25
        let source = MemoryRaster::from_fn(64, 64, 1, |_, x, y| {
            (10 * (1 + (x % 2) + 2 * (y % 2))) as u16
        })
        .unwrap();
        let options = OverviewOptions::default().tile_size(16, 16);
        let mut builder = quiet(PyramidBuilder::new(source, options).unwrap());
        let report = builder.build(&path).unwrap();

        assert_eq!(report.levels.len(), 4);
        assert_eq!(report.directories_written, 4);
        let mut level1 = TiffRasterReader::open(&path, 0, 0).unwrap();
        assert_eq!(level1.info().width, 32);
        let mut buf = vec![0u8; 16 * 16 * 2];
        level1.read_block(0, 16, 16, 16, 16, &mut buf).unwrap();
        assert!(buf.chunks_exact(2).all(|c| u16::read_ne(c) == 25));
        assert_eq!(builder.state(), BuildState::Done);
        assert!(report.sidecar.unwrap().exists());
    }

    #[test]
    fn test_null_edges_do_not_bleed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("edge.tif");
        // 40x40 with 16px tiles: the last source tile column is mostly outside
        let source = MemoryRaster::from_fn(40, 40, 1, |_, _, _| 200u8)
            .unwrap()
            .with_band_stats(0, BandStats { min: 1.0, max: 255.0, null: 0.0 });
        let options = OverviewOptions::default().tile_size(16, 16);
        let mut builder = quiet(PyramidBuilder::new(source, options).unwrap());
        builder.build(&path).unwrap();

        let mut level1 = TiffRasterReader::open(&path, 0, 0).unwrap();
        let mut buf = vec![0u8; 20 * 20];
        level1.read_block(0, 0, 0, 20, 20, &mut buf).unwrap();
        assert!(buf.iter().all(|&v| v == 200));
    }

    #[test]
    fn test_copy_all_writes_level0() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("r0.tif");
        let source = MemoryRaster::from_fn(48, 48, 2, |b, x, y| (x + y + b as u64) as f32).unwrap();
        let options = OverviewOptions::default()
            .tile_size(16, 16)
            .copy_all(true)
            .compression(TileCompression::Deflate);
        let mut builder = quiet(PyramidBuilder::new(source, options).unwrap());
        let report = builder.build(&path).unwrap();

        assert_eq!(report.levels[0].level, 0);
        assert_eq!(report.levels[1].directory, 1);
        assert_eq!(TiffRasterReader::directory_count(&path).unwrap(), report.directories_written);

        let mut r0 = TiffRasterReader::open(&path, 0, 0).unwrap();
        let mut buf = vec![0u8; 16 * 16 * 4];
        r0.read_block(1, 32, 16, 16, 16, &mut buf).unwrap();
        assert_eq!(f32::read_ne(&buf[0..4]), 49.0);
    }

    #[test]
    fn test_small_raster_needs_no_pyramid() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = MemoryRaster::new(4, 4, 1, PixelType::U8).unwrap();
        let mut builder =
            quiet(PyramidBuilder::new(source, OverviewOptions::default().tile_size(16, 16)).unwrap());
        assert_eq!(builder.number_of_levels(), 0);
        let report = builder.build(dir.path().join("tiny.tif")).unwrap();
        assert!(report.levels.is_empty());
        assert_eq!(report.sidecar, None);
    }

    #[test]
    fn test_abort_during_level_finishes_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abort.tif");
        let source = MemoryRaster::from_fn(128, 128, 1, |_, x, _| x as u8).unwrap();
        let abort = AbortSignal::new();
        let trigger = abort.clone();
        let listener = move |e: &ProgressEvent| {
            if e.level == Some(1) && e.percent >= 50.0 {
                trigger.abort();
            }
        };
        let mut builder = PyramidBuilder::new(source, OverviewOptions::default().tile_size(16, 16))
            .unwrap()
            .with_abort_signal(abort)
            .with_listener(Box::new(listener));

        let err = builder.build(&path).unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(builder.state(), BuildState::Aborted);
        assert_eq!(builder.levels_written(), 1);
        assert_eq!(TiffRasterReader::directory_count(&path).unwrap(), 1);
        assert!(builder.last_error().is_some());
    }

    #[test]
    fn test_jpeg_on_float_source_rejected() {
        let source = MemoryRaster::new(64, 64, 1, PixelType::F32).unwrap();
        let options = OverviewOptions::default().compression(TileCompression::Jpeg);
        assert!(PyramidBuilder::new(source, options).is_err());
    }

    #[test]
    fn test_unwritable_output_sets_last_error() {
        let source = MemoryRaster::new(64, 64, 1, PixelType::U8).unwrap();
        let mut builder =
            quiet(PyramidBuilder::new(source, OverviewOptions::default().tile_size(16, 16)).unwrap());
        let err = builder.build("/nonexistent/dir/out.tif").unwrap_err();
        assert!(err.is_fatal_io());
        assert_eq!(builder.state(), BuildState::Failed);
        assert!(builder.last_error().unwrap().contains("creating"));
        assert_eq!(builder.levels_written(), 0);
    }
}
