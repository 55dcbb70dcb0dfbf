//! Tiled multi-directory TIFF output.
//!
//! Each pyramid level becomes one image directory, written through the
//! low-level `DirectoryEncoder` API of the `tiff` crate: tiles are compressed
//! here, appended with `write_data`, and the offset/byte-count arrays plus the
//! level tags are written when the level is finished.
//!
//! The encoder writes straight to an unbuffered [`File`]. Once a level is
//! finished its bytes are in the file, so a second read-only handle opened
//! afterwards sees the complete level.
//!
//! Outputs that may outgrow the 4 GiB offsets of a classic TIFF are written
//! as BigTIFF instead (see [`TiffVariant::for_raster_bytes`]).

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tiff::TiffResult;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindBig, TiffKindStandard, TiffValue};
use tiff::tags::Tag;
use tracing::debug;

use crate::casting::{
    band_count_to_u16, f64_to_clamped_u16, f64_to_clamped_u32, offset_to_u32, u64_to_usize,
};
use crate::codec::{TileCompression, compress_tile};
use crate::error::{OvrError, Result};
use crate::raster::{BandStats, RasterLevel, SampleFormat};

// Tag IDs written by number
pub(crate) const TAG_MIN_SAMPLE_VALUE: u16 = 280;
pub(crate) const TAG_MAX_SAMPLE_VALUE: u16 = 281;
pub(crate) const TAG_SMIN_SAMPLE_VALUE: u16 = 340;
pub(crate) const TAG_SMAX_SAMPLE_VALUE: u16 = 341;

const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const PLANAR_SEPARATE: u16 = 2;
const SUBFILE_REDUCED_IMAGE: u32 = 1;

const FOUR_GIB: u64 = 4 << 30;

/// Container flavour of the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TiffVariant {
    /// 32-bit offsets, readable everywhere
    #[default]
    Classic,
    /// 64-bit offsets and byte counts
    Big,
}

impl TiffVariant {
    /// Pick the flavour for a source of `raster_bytes` uncompressed bytes.
    /// A pyramid with its full-resolution copy approaches twice the source
    /// size, so BigTIFF is used once that exceeds 4 GiB.
    #[must_use]
    pub fn for_raster_bytes(raster_bytes: u64) -> Self {
        if raster_bytes.saturating_mul(2) > FOUR_GIB {
            Self::Big
        } else {
            Self::Classic
        }
    }
}

enum OutputEncoder {
    Classic(TiffEncoder<File, TiffKindStandard>),
    Big(TiffEncoder<File, TiffKindBig>),
}

enum LevelDirectory<'a> {
    Classic(DirectoryEncoder<'a, File, TiffKindStandard>),
    Big(DirectoryEncoder<'a, File, TiffKindBig>),
}

impl LevelDirectory<'_> {
    fn write_tag<T: TiffValue>(&mut self, tag: Tag, value: T) -> TiffResult<()> {
        match self {
            Self::Classic(dir) => dir.write_tag(tag, value),
            Self::Big(dir) => dir.write_tag(tag, value),
        }
    }

    fn write_data(&mut self, data: &[u8]) -> TiffResult<u64> {
        match self {
            Self::Classic(dir) => dir.write_data(data),
            Self::Big(dir) => dir.write_data(data),
        }
    }

    fn finish(self) -> TiffResult<()> {
        match self {
            Self::Classic(dir) => dir.finish(),
            Self::Big(dir) => dir.finish(),
        }
    }
}

/// Appends pyramid levels to one output file, one directory per level.
pub struct TiledTiffWriter {
    encoder: OutputEncoder,
    variant: TiffVariant,
    path: PathBuf,
    compression: TileCompression,
    jpeg_quality: u8,
    directories: usize,
}

impl TiledTiffWriter {
    /// Create (or truncate) the output file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(
        path: P,
        variant: TiffVariant,
        compression: TileCompression,
        jpeg_quality: u8,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| OvrError::io(format!("creating {}", path.display()), e))?;
        let encoder = match variant {
            TiffVariant::Classic => OutputEncoder::Classic(TiffEncoder::new(file)?),
            TiffVariant::Big => OutputEncoder::Big(TiffEncoder::new_big(file)?),
        };
        debug!(path = %path.display(), ?variant, %compression, "Opened pyramid output");
        Ok(Self {
            encoder,
            variant,
            path,
            compression,
            jpeg_quality,
            directories: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn variant(&self) -> TiffVariant {
        self.variant
    }

    /// Number of finished directories
    #[must_use]
    pub fn directories_written(&self) -> usize {
        self.directories
    }

    /// Start a new directory for `level`. Statistics are written as min/max
    /// sample tags, one entry per band.
    ///
    /// # Errors
    /// Returns an error if the codec cannot carry the pixel type or the
    /// directory cannot be started.
    pub fn begin_level(&mut self, level: RasterLevel, stats: &[BandStats]) -> Result<LevelWriter<'_>> {
        self.compression.check_pixel_type(level.pixel_type)?;
        if level.width == 0 || level.height == 0 {
            return Err(OvrError::Configuration(format!(
                "level {} has zero dimensions",
                level.index
            )));
        }
        let tile_count = u64_to_usize(level.tiles_per_band() * level.bands as u64)?;
        let tile_bytes = level.tile_bytes()?;
        let dir = match &mut self.encoder {
            OutputEncoder::Classic(encoder) => LevelDirectory::Classic(encoder.image_directory()?),
            OutputEncoder::Big(encoder) => LevelDirectory::Big(encoder.image_directory()?),
        };
        Ok(LevelWriter {
            dir,
            directories: &mut self.directories,
            level,
            stats: stats.to_vec(),
            compression: self.compression,
            jpeg_quality: self.jpeg_quality,
            tile_bytes,
            offsets: vec![0; tile_count],
            byte_counts: vec![0; tile_count],
            tiles_written: 0,
        })
    }
}

/// An open directory receiving the tiles of one level.
pub struct LevelWriter<'a> {
    dir: LevelDirectory<'a>,
    directories: &'a mut usize,
    level: RasterLevel,
    stats: Vec<BandStats>,
    compression: TileCompression,
    jpeg_quality: u8,
    tile_bytes: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    tiles_written: usize,
}

impl LevelWriter<'_> {
    #[must_use]
    pub fn level(&self) -> &RasterLevel {
        &self.level
    }

    /// Compress and append one full tile of `band`.
    ///
    /// # Errors
    /// A buffer that is not exactly one tile is a [`OvrError::ShortTile`]
    /// write; encoder and I/O failures propagate.
    pub fn write_tile(&mut self, band: usize, tile_x: u64, tile_y: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.tile_bytes {
            return Err(OvrError::ShortTile {
                operation: "write",
                expected: self.tile_bytes,
                actual: data.len(),
            });
        }
        let index = u64_to_usize(
            band as u64 * self.level.tiles_per_band() + tile_y * self.level.tiles_across() + tile_x,
        )?;
        if index >= self.offsets.len() {
            return Err(OvrError::Configuration(format!(
                "tile ({tile_x}, {tile_y}) of band {band} outside level {}",
                self.level.index
            )));
        }

        let packed = compress_tile(
            self.compression,
            data,
            self.level.tile_width,
            self.level.tile_height,
            self.jpeg_quality,
        )?;
        let offset = self.dir.write_data(packed.as_slice())?;
        if matches!(self.dir, LevelDirectory::Classic(_)) {
            offset_to_u32(offset.saturating_add(packed.len() as u64))?;
        }
        self.offsets[index] = offset;
        self.byte_counts[index] = packed.len() as u64;
        self.tiles_written += 1;
        Ok(())
    }

    /// Write the level tags and close the directory. Tiles never written
    /// (after a cancellation) are recorded as empty.
    ///
    /// # Errors
    /// Returns an error if a tag or the directory cannot be written.
    pub fn finish(mut self) -> Result<()> {
        let level = self.level;
        let bands = level.bands;
        let spp = band_count_to_u16(bands)?;
        let format = level.pixel_type.sample_format();

        self.dir.write_tag(Tag::ImageWidth, offset_to_u32(level.width)?)?;
        self.dir.write_tag(Tag::ImageLength, offset_to_u32(level.height)?)?;
        self.dir
            .write_tag(Tag::BitsPerSample, vec![level.pixel_type.bits_per_sample(); bands].as_slice())?;
        self.dir.write_tag(Tag::Compression, self.compression.tiff_code())?;

        let photometric = if bands == 3 {
            PHOTOMETRIC_RGB
        } else {
            PHOTOMETRIC_MIN_IS_BLACK
        };
        self.dir.write_tag(Tag::PhotometricInterpretation, photometric)?;
        self.dir.write_tag(Tag::SamplesPerPixel, spp)?;
        self.dir
            .write_tag(Tag::SampleFormat, vec![format.tag_value(); bands].as_slice())?;
        self.dir.write_tag(Tag::PlanarConfiguration, PLANAR_SEPARATE)?;
        if bands > 1 && bands != 3 {
            self.dir
                .write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
        }
        if level.index > 0 {
            self.dir.write_tag(Tag::NewSubfileType, SUBFILE_REDUCED_IMAGE)?;
        }

        self.dir.write_tag(Tag::TileWidth, level.tile_width)?;
        self.dir.write_tag(Tag::TileLength, level.tile_height)?;
        if matches!(self.dir, LevelDirectory::Big(_)) {
            self.dir.write_tag(Tag::TileOffsets, self.offsets.as_slice())?;
            self.dir.write_tag(Tag::TileByteCounts, self.byte_counts.as_slice())?;
        } else {
            let offsets = self
                .offsets
                .iter()
                .map(|&o| offset_to_u32(o))
                .collect::<Result<Vec<u32>>>()?;
            let counts = self
                .byte_counts
                .iter()
                .map(|&c| offset_to_u32(c))
                .collect::<Result<Vec<u32>>>()?;
            self.dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
            self.dir.write_tag(Tag::TileByteCounts, counts.as_slice())?;
        }

        if self.stats.len() == bands {
            self.write_stat_tags(format, level.pixel_type.bits_per_sample())?;
        }

        self.dir.finish()?;
        *self.directories += 1;
        debug!(
            level = level.index,
            width = level.width,
            height = level.height,
            tiles = self.tiles_written,
            "Finished pyramid level"
        );
        Ok(())
    }

    fn write_stat_tags(&mut self, format: SampleFormat, bits: u16) -> Result<()> {
        match format {
            // 32-bit statistics go out as LONG
            SampleFormat::Unsigned if bits > 16 => {
                let mins: Vec<u32> = self.stats.iter().map(|s| f64_to_clamped_u32(s.min)).collect();
                let maxs: Vec<u32> = self.stats.iter().map(|s| f64_to_clamped_u32(s.max)).collect();
                self.dir
                    .write_tag(Tag::Unknown(TAG_MIN_SAMPLE_VALUE), mins.as_slice())?;
                self.dir
                    .write_tag(Tag::Unknown(TAG_MAX_SAMPLE_VALUE), maxs.as_slice())?;
            }
            SampleFormat::Unsigned => {
                let mins: Vec<u16> = self.stats.iter().map(|s| f64_to_clamped_u16(s.min)).collect();
                let maxs: Vec<u16> = self.stats.iter().map(|s| f64_to_clamped_u16(s.max)).collect();
                self.dir
                    .write_tag(Tag::Unknown(TAG_MIN_SAMPLE_VALUE), mins.as_slice())?;
                self.dir
                    .write_tag(Tag::Unknown(TAG_MAX_SAMPLE_VALUE), maxs.as_slice())?;
            }
            SampleFormat::Signed | SampleFormat::Float => {
                let mins: Vec<f64> = self.stats.iter().map(|s| s.min).collect();
                let maxs: Vec<f64> = self.stats.iter().map(|s| s.max).collect();
                self.dir
                    .write_tag(Tag::Unknown(TAG_SMIN_SAMPLE_VALUE), mins.as_slice())?;
                self.dir
                    .write_tag(Tag::Unknown(TAG_SMAX_SAMPLE_VALUE), maxs.as_slice())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelType;
    use tiff::decoder::Decoder;

    fn level(index: u32, size: u64, pixel_type: PixelType, bands: usize) -> RasterLevel {
        RasterLevel {
            index,
            width: size,
            height: size,
            tile_width: 16,
            tile_height: 16,
            pixel_type,
            bands,
        }
    }

    #[test]
    fn test_two_levels_two_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pyr.tif");
        let mut writer = TiledTiffWriter::create(&path, TiffVariant::Classic, TileCompression::Lzw, 75).unwrap();

        for (index, size) in [(0u32, 32u64), (1, 16)] {
            let lvl = level(index, size, PixelType::U8, 1);
            let stats = [BandStats { min: 0.0, max: 200.0, null: 0.0 }];
            let mut lw = writer.begin_level(lvl, &stats).unwrap();
            for ty in 0..lvl.tiles_down() {
                for tx in 0..lvl.tiles_across() {
                    lw.write_tile(0, tx, ty, &[index as u8; 256]).unwrap();
                }
            }
            lw.finish().unwrap();
        }
        assert_eq!(writer.directories_written(), 2);
        drop(writer);

        let file = File::open(&path).unwrap();
        let mut decoder = Decoder::new(file).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (32, 32));
        assert!(decoder.more_images());
        decoder.next_image().unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (16, 16));
        assert_eq!(decoder.get_tag_u32(Tag::NewSubfileType).unwrap(), 1);
    }

    #[test]
    fn test_short_tile_write_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer =
            TiledTiffWriter::create(dir.path().join("short.tif"), TiffVariant::Classic, TileCompression::None, 75).unwrap();
        let mut lw = writer.begin_level(level(0, 16, PixelType::U16, 1), &[]).unwrap();
        let err = lw.write_tile(0, 0, 0, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, OvrError::ShortTile { expected: 512, actual: 100, .. }));
    }

    #[test]
    fn test_jpeg_requires_u8() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer =
            TiledTiffWriter::create(dir.path().join("j.tif"), TiffVariant::Classic, TileCompression::Jpeg, 75).unwrap();
        assert!(writer.begin_level(level(0, 16, PixelType::F32, 1), &[]).is_err());
    }

    #[test]
    fn test_variant_follows_raster_size() {
        assert_eq!(TiffVariant::for_raster_bytes(0), TiffVariant::Classic);
        assert_eq!(TiffVariant::for_raster_bytes(2 << 30), TiffVariant::Classic);
        assert_eq!(TiffVariant::for_raster_bytes((2 << 30) + 1), TiffVariant::Big);
        assert_eq!(TiffVariant::for_raster_bytes(u64::MAX), TiffVariant::Big);
    }

    #[test]
    fn test_u32_stats_written_as_long() {
        use crate::raster::TileSource;
        use crate::tiff_reader::TiffRasterReader;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("u32.tif");
        let mut writer =
            TiledTiffWriter::create(&path, TiffVariant::Classic, TileCompression::None, 75).unwrap();
        let stats = [BandStats { min: 70_000.0, max: 4.0e9, null: 0.0 }];
        let mut lw = writer.begin_level(level(0, 16, PixelType::U32, 1), &stats).unwrap();
        lw.write_tile(0, 0, 0, &[0u8; 16 * 16 * 4]).unwrap();
        lw.finish().unwrap();
        drop(writer);

        let reader = TiffRasterReader::open(&path, 0, 0).unwrap();
        assert_eq!(reader.band_stats(0).min, 70_000.0);
        assert_eq!(reader.band_stats(0).max, 4.0e9);
    }

    #[test]
    fn test_big_tiff_offsets_are_long8() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.tif");
        let mut writer =
            TiledTiffWriter::create(&path, TiffVariant::Big, TileCompression::Deflate, 75).unwrap();
        assert_eq!(writer.variant(), TiffVariant::Big);
        let lvl = level(0, 32, PixelType::U8, 1);
        let mut lw = writer.begin_level(lvl, &[]).unwrap();
        for ty in 0..lvl.tiles_down() {
            for tx in 0..lvl.tiles_across() {
                lw.write_tile(0, tx, ty, &[9u8; 256]).unwrap();
            }
        }
        lw.finish().unwrap();
        drop(writer);

        let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (32, 32));
        let offsets = decoder.get_tag_u64_vec(Tag::TileOffsets).unwrap();
        assert_eq!(offsets.len(), 4);
        assert!(offsets.iter().all(|&o| o >= 16));
    }

    #[test]
    fn test_create_in_missing_directory_is_io() {
        let err = TiledTiffWriter::create("/nonexistent/dir/out.tif", TiffVariant::Classic, TileCompression::None, 75)
            .err()
            .unwrap();
        assert!(err.is_fatal_io());
    }
}
