//! Raster data model and the tile-addressed source abstraction.
//!
//! A [`TileSource`] is anything that can fill a fixed-size block of one band
//! at an arbitrary pixel origin: a file on disk ([`crate::TiffRasterReader`]),
//! or pixels already in memory ([`MemoryRaster`]).

use serde::{Deserialize, Serialize};

use crate::casting::u64_to_usize;
use crate::error::{OvrError, Result};
use crate::region::Region;
use crate::sample::{self, Sample};

/// TIFF `SampleFormat` classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    Unsigned,
    Signed,
    Float,
}

impl SampleFormat {
    /// Tag value as stored in the container
    #[must_use]
    pub fn tag_value(self) -> u16 {
        match self {
            Self::Unsigned => 1,
            Self::Signed => 2,
            Self::Float => 3,
        }
    }

    /// # Errors
    /// Returns a configuration error for void/complex formats.
    pub fn from_tag_value(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self::Unsigned),
            2 => Ok(Self::Signed),
            3 => Ok(Self::Float),
            other => Err(OvrError::Configuration(format!(
                "unsupported sample format {other}"
            ))),
        }
    }
}

/// Supported sample types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    #[must_use]
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::U8 => 8,
            Self::U16 | Self::I16 => 16,
            Self::U32 | Self::I32 | Self::F32 => 32,
            Self::F64 => 64,
        }
    }

    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        usize::from(self.bits_per_sample() / 8)
    }

    #[must_use]
    pub fn sample_format(self) -> SampleFormat {
        match self {
            Self::U8 | Self::U16 | Self::U32 => SampleFormat::Unsigned,
            Self::I16 | Self::I32 => SampleFormat::Signed,
            Self::F32 | Self::F64 => SampleFormat::Float,
        }
    }

    /// Resolve a `(bits, format)` pair read from a container.
    ///
    /// # Errors
    /// Returns a configuration error for unknown pixel types.
    pub fn from_parts(bits: u16, format: SampleFormat) -> Result<Self> {
        match (bits, format) {
            (8, SampleFormat::Unsigned) => Ok(Self::U8),
            (16, SampleFormat::Unsigned) => Ok(Self::U16),
            (16, SampleFormat::Signed) => Ok(Self::I16),
            (32, SampleFormat::Unsigned) => Ok(Self::U32),
            (32, SampleFormat::Signed) => Ok(Self::I32),
            (32, SampleFormat::Float) => Ok(Self::F32),
            (64, SampleFormat::Float) => Ok(Self::F64),
            (bits, format) => Err(OvrError::Configuration(format!(
                "unknown pixel type: {bits}-bit {format:?}"
            ))),
        }
    }

    /// Smallest and largest representable values
    #[must_use]
    pub fn value_range(self) -> (f64, f64) {
        match self {
            Self::U8 => (0.0, f64::from(u8::MAX)),
            Self::U16 => (0.0, f64::from(u16::MAX)),
            Self::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            Self::U32 => (0.0, f64::from(u32::MAX)),
            Self::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            Self::F32 => (f64::from(f32::MIN), f64::from(f32::MAX)),
            Self::F64 => (f64::MIN, f64::MAX),
        }
    }
}

/// Per-band statistics propagated into the pyramid tags and sidecar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub null: f64,
}

impl BandStats {
    /// Full type range with a null of zero
    #[must_use]
    pub fn for_pixel_type(pixel_type: PixelType) -> Self {
        let (min, max) = pixel_type.value_range();
        Self { min, max, null: 0.0 }
    }
}

/// Static description of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub width: u64,
    pub height: u64,
    pub bands: usize,
    pub pixel_type: PixelType,
    /// Native block width of the storage, if tiled
    pub block_width: u32,
    /// Native block height of the storage, if tiled
    pub block_height: u32,
}

impl RasterInfo {
    #[must_use]
    pub fn bounds(&self) -> Region {
        Region::with_size(self.width, self.height)
    }

    /// Uncompressed size of every band, saturating at `u64::MAX`
    #[must_use]
    pub fn raster_bytes(&self) -> u64 {
        self.width
            .saturating_mul(self.height)
            .saturating_mul(self.bands as u64)
            .saturating_mul(self.pixel_type.bytes_per_sample() as u64)
    }
}

/// Geometry of one pyramid level. Tile size, pixel type and band count are
/// shared by every level of one pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterLevel {
    /// 0 is full resolution
    pub index: u32,
    pub width: u64,
    pub height: u64,
    pub tile_width: u32,
    pub tile_height: u32,
    pub pixel_type: PixelType,
    pub bands: usize,
}

impl RasterLevel {
    /// Dimensions of level `index` derived from full-resolution ones
    #[must_use]
    pub fn reduced(&self, index: u32) -> Self {
        Self {
            index,
            width: self.width >> index,
            height: self.height >> index,
            ..*self
        }
    }

    #[must_use]
    pub fn tiles_across(&self) -> u64 {
        self.width.div_ceil(u64::from(self.tile_width))
    }

    #[must_use]
    pub fn tiles_down(&self) -> u64 {
        self.height.div_ceil(u64::from(self.tile_height))
    }

    /// Tiles of one band
    #[must_use]
    pub fn tiles_per_band(&self) -> u64 {
        self.tiles_across() * self.tiles_down()
    }

    /// Byte size of one tile buffer
    ///
    /// # Errors
    /// Returns a configuration error if the tile cannot be addressed.
    pub fn tile_bytes(&self) -> Result<usize> {
        crate::casting::tile_bytes(
            self.tile_width,
            self.tile_height,
            self.pixel_type.bytes_per_sample(),
        )
    }
}

/// Outcome of a block read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// The buffer holds source pixels (null outside the raster)
    Full,
    /// Nothing was read: the block is outside the raster or virtual
    Empty,
}

/// Random block-addressed read access to one raster.
pub trait TileSource {
    fn info(&self) -> &RasterInfo;

    /// Fill `buf` with the `width` x `height` block of `band` whose upper-left
    /// pixel is `(x, y)`. Pixels outside the raster are set to the band null.
    ///
    /// # Errors
    /// Returns an error if the buffer size is wrong or the storage fails.
    fn read_block(
        &mut self,
        band: usize,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        buf: &mut [u8],
    ) -> Result<BlockStatus>;

    fn band_stats(&self, band: usize) -> BandStats {
        let _ = band;
        BandStats::for_pixel_type(self.info().pixel_type)
    }
}

/// Check a block request before filling `buf`
pub(crate) fn check_block_request(
    info: &RasterInfo,
    band: usize,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<()> {
    if band >= info.bands {
        return Err(OvrError::Configuration(format!(
            "band {band} out of range (raster has {})",
            info.bands
        )));
    }
    let expected = crate::casting::tile_bytes(width, height, info.pixel_type.bytes_per_sample())?;
    if buf.len() != expected {
        return Err(OvrError::Configuration(format!(
            "block buffer holds {} bytes, {expected} required",
            buf.len()
        )));
    }
    Ok(())
}

/// A multi-band raster held in memory, one native-order plane per band.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    info: RasterInfo,
    planes: Vec<Vec<u8>>,
    stats: Vec<BandStats>,
}

impl MemoryRaster {
    /// Zero-filled raster
    ///
    /// # Errors
    /// Returns a configuration error if the raster has no bands or cannot be
    /// addressed in memory.
    pub fn new(width: u64, height: u64, bands: usize, pixel_type: PixelType) -> Result<Self> {
        if bands == 0 {
            return Err(OvrError::Configuration("raster must have at least one band".into()));
        }
        let plane_bytes = u64_to_usize(
            width
                .saturating_mul(height)
                .saturating_mul(pixel_type.bytes_per_sample() as u64),
        )?;
        Ok(Self {
            info: RasterInfo {
                width,
                height,
                bands,
                pixel_type,
                block_width: 0,
                block_height: 0,
            },
            planes: vec![vec![0u8; plane_bytes]; bands],
            stats: vec![BandStats::for_pixel_type(pixel_type); bands],
        })
    }

    /// Build a raster from a per-pixel function `f(band, x, y)`.
    ///
    /// # Errors
    /// Same as [`MemoryRaster::new`].
    pub fn from_fn<T: Sample>(
        width: u64,
        height: u64,
        bands: usize,
        f: impl Fn(usize, u64, u64) -> T,
    ) -> Result<Self> {
        let mut raster = Self::new(width, height, bands, T::PIXEL_TYPE)?;
        for band in 0..bands {
            let plane = &mut raster.planes[band];
            for y in 0..height {
                for x in 0..width {
                    let idx = (y * width + x) as usize * T::SIZE;
                    f(band, x, y).write_ne(&mut plane[idx..idx + T::SIZE]);
                }
            }
        }
        Ok(raster)
    }

    /// Replace the statistics of one band
    #[must_use]
    pub fn with_band_stats(mut self, band: usize, stats: BandStats) -> Self {
        if let Some(slot) = self.stats.get_mut(band) {
            *slot = stats;
        }
        self
    }

    /// Declare a native block size (used as a tiling hint by streaming)
    #[must_use]
    pub fn with_block_size(mut self, width: u32, height: u32) -> Self {
        self.info.block_width = width;
        self.info.block_height = height;
        self
    }

    /// Typed pixel access; `None` outside the raster or for a type mismatch
    #[must_use]
    pub fn pixel<T: Sample>(&self, band: usize, x: u64, y: u64) -> Option<T> {
        if T::PIXEL_TYPE != self.info.pixel_type || x >= self.info.width || y >= self.info.height {
            return None;
        }
        let plane = self.planes.get(band)?;
        let idx = (y * self.info.width + x) as usize * T::SIZE;
        Some(T::read_ne(&plane[idx..idx + T::SIZE]))
    }

    /// Typed pixel write; ignored outside the raster or for a type mismatch
    pub fn set_pixel<T: Sample>(&mut self, band: usize, x: u64, y: u64, value: T) {
        if T::PIXEL_TYPE != self.info.pixel_type || x >= self.info.width || y >= self.info.height {
            return;
        }
        let width = self.info.width;
        if let Some(plane) = self.planes.get_mut(band) {
            let idx = (y * width + x) as usize * T::SIZE;
            value.write_ne(&mut plane[idx..idx + T::SIZE]);
        }
    }
}

impl TileSource for MemoryRaster {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_block(
        &mut self,
        band: usize,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        buf: &mut [u8],
    ) -> Result<BlockStatus> {
        check_block_request(&self.info, band, width, height, buf)?;

        let request = Region::new(x, y, u64::from(width), u64::from(height));
        let Some(valid) = request.crop(&self.info.bounds()) else {
            return Ok(BlockStatus::Empty);
        };

        let bps = self.info.pixel_type.bytes_per_sample();
        if valid != request {
            sample::fill_value(self.info.pixel_type, buf, self.stats[band].null);
        }

        let plane = &self.planes[band];
        let row_bytes = valid.width as usize * bps;
        for row in 0..valid.height {
            let src_y = (valid.y as u64) + row;
            let src_start = (src_y * self.info.width + valid.x as u64) as usize * bps;
            let dst_y = (valid.y - y) as usize + row as usize;
            let dst_start = (dst_y * width as usize + (valid.x - x) as usize) * bps;
            buf[dst_start..dst_start + row_bytes]
                .copy_from_slice(&plane[src_start..src_start + row_bytes]);
        }
        Ok(BlockStatus::Full)
    }

    fn band_stats(&self, band: usize) -> BandStats {
        self.stats
            .get(band)
            .copied()
            .unwrap_or_else(|| BandStats::for_pixel_type(self.info.pixel_type))
    }
}
