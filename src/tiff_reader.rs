//! Read-only, block-addressed view of one directory of a TIFF file.
//!
//! Tags are parsed with the `tiff` crate's decoder. Chunk (tile or strip)
//! bytes are read through a separate file handle so that a short read is
//! detected and reported per tile, then decompressed by [`crate::codec`] and
//! converted to native byte order. Decoded chunks are kept in a byte-bounded
//! LRU owned by the reader.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::casting::{tile_bytes, u64_to_usize};
use crate::codec::{TileCompression, decompress_tile};
use crate::error::{OvrError, Result};
use crate::raster::{
    BandStats, BlockStatus, PixelType, RasterInfo, SampleFormat, TileSource, check_block_request,
};
use crate::region::Region;
use crate::sample::{fill_value, swap_byte_order};
use crate::tile_cache::{TileCache, TileKey};
use crate::tiff_writer::{
    TAG_MAX_SAMPLE_VALUE, TAG_MIN_SAMPLE_VALUE, TAG_SMAX_SAMPLE_VALUE, TAG_SMIN_SAMPLE_VALUE,
};

const TAG_GDAL_NODATA: u16 = 42113;

/// Storage layout of one directory
#[derive(Debug, Clone)]
struct ChunkLayout {
    /// Chunk size; strips span the full image width
    block_width: u32,
    block_height: u32,
    chunks_across: u64,
    chunks_down: u64,
    /// One chunk per band (planar configuration 2)
    planar_separate: bool,
    samples_per_pixel: usize,
    compression: TileCompression,
    tiled: bool,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    /// File byte order differs from the host
    swap: bool,
}

/// Block reader over one image directory of a tiled or stripped TIFF.
pub struct TiffRasterReader {
    path: PathBuf,
    file: File,
    directory: usize,
    info: RasterInfo,
    layout: ChunkLayout,
    stats: Vec<BandStats>,
    cache: TileCache,
}

impl TiffRasterReader {
    /// Open directory `directory` of `path` on a fresh read-only handle.
    /// `cache_bytes` bounds the decoded-chunk cache (0 disables it).
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be opened, or a configuration
    /// error for layouts this reader does not handle.
    pub fn open<P: AsRef<Path>>(path: P, directory: usize, cache_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .map_err(|e| OvrError::io(format!("opening {}", path.display()), e))?;

        let swap = file_byte_order_differs(&mut file, &path)?;

        let tag_handle = File::open(&path)
            .map_err(|e| OvrError::io(format!("opening {}", path.display()), e))?;
        let mut decoder = Decoder::new(BufReader::new(tag_handle))?;
        if directory > 0 {
            decoder.seek_to_image(directory)?;
        }

        let (width, height) = decoder.dimensions()?;
        let samples_per_pixel =
            usize::from(decoder.find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?.unwrap_or(1));
        let bits = decoder
            .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let format = decoder
            .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let pixel_type = PixelType::from_parts(bits, SampleFormat::from_tag_value(format)?)?;

        let planar_separate =
            samples_per_pixel > 1 && decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)? == Some(2);
        let compression = TileCompression::from_tiff_code(
            decoder.find_tag_unsigned::<u16>(Tag::Compression)?.unwrap_or(1),
        );
        if let Some(predictor) = decoder.find_tag_unsigned::<u16>(Tag::Predictor)?
            && predictor != 1
        {
            return Err(OvrError::Configuration(format!(
                "predictor {predictor} is not supported"
            )));
        }
        if compression == TileCompression::Jpeg && samples_per_pixel > 1 && !planar_separate {
            return Err(OvrError::Configuration(
                "interleaved JPEG chunks are not supported".into(),
            ));
        }

        let tiled = decoder.find_tag(Tag::TileWidth)?.is_some();
        let (block_width, block_height, offsets, byte_counts) = if tiled {
            (
                decoder.get_tag_u32(Tag::TileWidth)?,
                decoder.get_tag_u32(Tag::TileLength)?,
                decoder.get_tag_u64_vec(Tag::TileOffsets)?,
                decoder.get_tag_u64_vec(Tag::TileByteCounts)?,
            )
        } else {
            let rows = decoder
                .find_tag_unsigned::<u32>(Tag::RowsPerStrip)?
                .unwrap_or(height)
                .clamp(1, height.max(1));
            (
                width,
                rows,
                decoder.get_tag_u64_vec(Tag::StripOffsets)?,
                decoder.get_tag_u64_vec(Tag::StripByteCounts)?,
            )
        };
        if block_width == 0 || block_height == 0 {
            return Err(OvrError::Configuration("zero chunk dimensions".into()));
        }

        let chunks_across = u64::from(width).div_ceil(u64::from(block_width));
        let chunks_down = u64::from(height).div_ceil(u64::from(block_height));
        let planes = if planar_separate { samples_per_pixel as u64 } else { 1 };
        let required = u64_to_usize(chunks_across * chunks_down * planes)?;
        if offsets.len() < required || byte_counts.len() < required {
            return Err(OvrError::Configuration(format!(
                "directory {directory} lists {} chunks, {required} required",
                offsets.len().min(byte_counts.len())
            )));
        }

        let stats = read_band_stats(&mut decoder, pixel_type, samples_per_pixel);

        let info = RasterInfo {
            width: u64::from(width),
            height: u64::from(height),
            bands: samples_per_pixel,
            pixel_type,
            block_width,
            block_height,
        };
        debug!(
            path = %path.display(),
            directory,
            width,
            height,
            bands = samples_per_pixel,
            ?pixel_type,
            %compression,
            tiled,
            "Opened raster directory"
        );

        Ok(Self {
            path,
            file,
            directory,
            info,
            layout: ChunkLayout {
                block_width,
                block_height,
                chunks_across,
                chunks_down,
                planar_separate,
                samples_per_pixel,
                compression,
                tiled,
                offsets,
                byte_counts,
                swap,
            },
            stats,
            cache: TileCache::new(cache_bytes),
        })
    }

    /// Number of image directories in a TIFF file
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or parsed.
    pub fn directory_count<P: AsRef<Path>>(path: P) -> Result<usize> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| OvrError::io(format!("opening {}", path.display()), e))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let mut count = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            count += 1;
        }
        Ok(count)
    }

    /// Override per-band statistics (null value used for out-of-bounds fill)
    #[must_use]
    pub fn with_band_stats(mut self, stats: Vec<BandStats>) -> Self {
        if stats.len() == self.info.bands {
            self.stats = stats;
        }
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn directory(&self) -> usize {
        self.directory
    }

    #[must_use]
    pub fn compression(&self) -> TileCompression {
        self.layout.compression
    }

    #[must_use]
    pub fn is_tiled(&self) -> bool {
        self.layout.tiled
    }

    /// Rows actually stored in chunk row `chunk_y` (the last strip may be short)
    fn chunk_rows(&self, chunk_y: u64) -> u64 {
        let bh = u64::from(self.layout.block_height);
        if self.layout.tiled {
            bh
        } else {
            bh.min(self.info.height - chunk_y * bh)
        }
    }

    /// Decoded, native-order chunk, or `None` for a sparse chunk
    fn read_chunk(&mut self, index: usize, chunk_y: u64) -> Result<Option<Arc<Vec<u8>>>> {
        let key = TileKey {
            directory: self.directory,
            chunk: index,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit));
        }

        let offset = self.layout.offsets[index];
        let count = self.layout.byte_counts[index];
        if offset == 0 || count == 0 {
            return Ok(None);
        }

        let samples = if self.layout.planar_separate {
            1
        } else {
            self.layout.samples_per_pixel
        };
        let bps = self.info.pixel_type.bytes_per_sample();
        let rows = u32::try_from(self.chunk_rows(chunk_y)).unwrap_or(self.layout.block_height);
        let expected = tile_bytes(self.layout.block_width, rows, bps * samples)?;

        let count = u64_to_usize(count)?;
        let mut raw = Vec::with_capacity(count);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| OvrError::io(format!("seeking {}", self.path.display()), e))?;
        (&mut self.file)
            .take(count as u64)
            .read_to_end(&mut raw)
            .map_err(|e| OvrError::io(format!("reading {}", self.path.display()), e))?;
        if raw.len() < count {
            return Err(OvrError::ShortTile {
                operation: "read",
                expected: count,
                actual: raw.len(),
            });
        }

        let mut data = decompress_tile(self.layout.compression, &raw, expected)?;
        if self.layout.swap {
            swap_byte_order(&mut data, bps);
        }
        let data = Arc::new(data);
        self.cache.insert(key, Arc::clone(&data));
        Ok(Some(data))
    }
}

impl TileSource for TiffRasterReader {
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
        let null = self.stats[band].null;
        let pixel_type = self.info.pixel_type;
        if valid != request {
            fill_value(pixel_type, buf, null);
        }

        let bps = pixel_type.bytes_per_sample();
        let bw = u64::from(self.layout.block_width);
        let bh = u64::from(self.layout.block_height);
        let (vx0, vy0) = (valid.x as u64, valid.y as u64);
        let (vx1, vy1) = (valid.x_end() as u64, valid.y_end() as u64);
        let stride = if self.layout.planar_separate {
            1
        } else {
            self.layout.samples_per_pixel
        };
        let plane = if self.layout.planar_separate { band as u64 } else { 0 };
        let band_offset = if self.layout.planar_separate { 0 } else { band };

        for cy in vy0 / bh..=(vy1 - 1) / bh {
            for cx in vx0 / bw..=(vx1 - 1) / bw {
                let index = u64_to_usize(
                    plane * self.layout.chunks_across * self.layout.chunks_down
                        + cy * self.layout.chunks_across
                        + cx,
                )?;

                // Intersection of this chunk with the valid area, in image pixels
                let ix0 = vx0.max(cx * bw);
                let ix1 = vx1.min((cx + 1) * bw);
                let iy0 = vy0.max(cy * bh);
                let iy1 = vy1.min((cy + 1) * bh);

                let chunk = self.read_chunk(index, cy)?;
                for py in iy0..iy1 {
                    let dst_row = (py as i64 - y) as usize * width as usize;
                    let dst_start = (dst_row + (ix0 as i64 - x) as usize) * bps;
                    let run = (ix1 - ix0) as usize;
                    let dst = &mut buf[dst_start..dst_start + run * bps];

                    let Some(chunk) = chunk.as_ref() else {
                        fill_value(pixel_type, dst, null);
                        continue;
                    };
                    let src_row = (py - cy * bh) as usize * bw as usize;
                    let src_px = src_row + (ix0 - cx * bw) as usize;
                    if stride == 1 {
                        let start = src_px * bps;
                        dst.copy_from_slice(&chunk[start..start + run * bps]);
                    } else {
                        for i in 0..run {
                            let start = ((src_px + i) * stride + band_offset) * bps;
                            dst[i * bps..(i + 1) * bps].copy_from_slice(&chunk[start..start + bps]);
                        }
                    }
                }
            }
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

impl Drop for TiffRasterReader {
    fn drop(&mut self) {
        debug!(
            path = %self.path.display(),
            directory = self.directory,
            cached_tiles = self.cache.len(),
            cached_bytes = self.cache.current_bytes(),
            "Closing raster directory"
        );
    }
}

/// Read the header byte-order mark and compare it with the host's
fn file_byte_order_differs(file: &mut File, path: &Path) -> Result<bool> {
    let mut mark = [0u8; 2];
    file.read_exact(&mut mark)
        .map_err(|e| OvrError::io(format!("reading header of {}", path.display()), e))?;
    let little = match &mark {
        b"II" => true,
        b"MM" => false,
        _ => {
            return Err(OvrError::Tiff(format!(
                "{} is not a TIFF file",
                path.display()
            )));
        }
    };
    Ok(little != cfg!(target_endian = "little"))
}

/// Min/max from the sample value tags, null from `GDAL_NODATA`
fn read_band_stats<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    pixel_type: PixelType,
    bands: usize,
) -> Vec<BandStats> {
    let mut stats = vec![BandStats::for_pixel_type(pixel_type); bands];

    let (min_tag, max_tag) = match pixel_type.sample_format() {
        SampleFormat::Unsigned => (TAG_MIN_SAMPLE_VALUE, TAG_MAX_SAMPLE_VALUE),
        SampleFormat::Signed | SampleFormat::Float => (TAG_SMIN_SAMPLE_VALUE, TAG_SMAX_SAMPLE_VALUE),
    };
    let mut read_values = |tag: u16| -> Option<Vec<f64>> {
        let value = decoder.find_tag(Tag::from_u16_exhaustive(tag)).ok()??;
        match pixel_type.sample_format() {
            SampleFormat::Unsigned => value
                .into_u64_vec()
                .ok()
                .map(|v| v.into_iter().map(|n| n as f64).collect()),
            _ => value.into_f64_vec().ok(),
        }
    };
    let mins = read_values(min_tag);
    let maxs = read_values(max_tag);
    for (band, s) in stats.iter_mut().enumerate() {
        if let Some(v) = mins.as_ref().and_then(|m| m.get(band).or(m.first())) {
            s.min = *v;
        }
        if let Some(v) = maxs.as_ref().and_then(|m| m.get(band).or(m.first())) {
            s.max = *v;
        }
    }

    if let Ok(Some(value)) = decoder.find_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA)) {
        match value.into_string().map(|s| s.trim().trim_end_matches('\0').parse::<f64>()) {
            Ok(Ok(null)) => stats.iter_mut().for_each(|s| s.null = null),
            _ => warn!("unparseable GDAL_NODATA tag ignored"),
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterLevel;
    use crate::sample::Sample;
    use crate::tiff_writer::{TiffVariant, TiledTiffWriter};

    fn write_test_file(path: &Path, compression: TileCompression, bands: usize) {
        write_variant_file(path, TiffVariant::Classic, compression, bands);
    }

    fn write_variant_file(path: &Path, variant: TiffVariant, compression: TileCompression, bands: usize) {
        let mut writer = TiledTiffWriter::create(path, variant, compression, 75).unwrap();
        let level = RasterLevel {
            index: 0,
            width: 40,
            height: 24,
            tile_width: 16,
            tile_height: 16,
            pixel_type: PixelType::U16,
            bands,
        };
        let stats = vec![BandStats { min: 3.0, max: 900.0, null: 0.0 }; bands];
        let mut lw = writer.begin_level(level, &stats).unwrap();
        for band in 0..bands {
            for ty in 0..level.tiles_down() {
                for tx in 0..level.tiles_across() {
                    let mut tile = vec![0u8; 16 * 16 * 2];
                    for row in 0..16u64 {
                        for col in 0..16u64 {
                            let gx = tx * 16 + col;
                            let gy = ty * 16 + row;
                            let v = (gx + 100 * gy + 1000 * band as u64) as u16;
                            let idx = (row * 16 + col) as usize * 2;
                            v.write_ne(&mut tile[idx..idx + 2]);
                        }
                    }
                    lw.write_tile(band, tx, ty, &tile).unwrap();
                }
            }
        }
        lw.finish().unwrap();
    }

    #[test]
    fn test_read_block_across_tiles() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("r.tif");
        write_test_file(&path, TileCompression::Deflate, 2);

        let mut reader = TiffRasterReader::open(&path, 0, 1 << 20).unwrap();
        assert_eq!(reader.info().width, 40);
        assert_eq!(reader.info().bands, 2);
        assert_eq!(reader.info().pixel_type, PixelType::U16);
        assert!(reader.is_tiled());

        let mut buf = vec![0u8; 8 * 8 * 2];
        let status = reader.read_block(1, 12, 12, 8, 8, &mut buf).unwrap();
        assert_eq!(status, BlockStatus::Full);
        // block (0,0) = image (12,12), block (7,7) = image (19,19)
        assert_eq!(u16::read_ne(&buf[0..2]), 12 + 1200 + 1000);
        assert_eq!(u16::read_ne(&buf[126..128]), 19 + 1900 + 1000);
    }

    #[test]
    fn test_read_block_outside_fills_null() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("o.tif");
        write_test_file(&path, TileCompression::None, 1);

        let mut reader = TiffRasterReader::open(&path, 0, 0)
            .unwrap()
            .with_band_stats(vec![BandStats { min: 0.0, max: 1.0, null: 77.0 }]);
        let mut buf = vec![0u8; 16 * 16 * 2];
        reader.read_block(0, 32, 16, 16, 16, &mut buf).unwrap();
        // (0,0) is image (32,16): inside; (8,0) is image (40,16): outside
        assert_eq!(u16::read_ne(&buf[0..2]), 32 + 1600);
        assert_eq!(u16::read_ne(&buf[16..18]), 77);

        assert_eq!(reader.read_block(0, 48, 0, 16, 16, &mut buf).unwrap(), BlockStatus::Empty);
    }

    #[test]
    fn test_stats_tags_read_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.tif");
        write_test_file(&path, TileCompression::PackBits, 1);
        let reader = TiffRasterReader::open(&path, 0, 0).unwrap();
        let stats = reader.band_stats(0);
        assert_eq!(stats.min, 3.0);
        assert_eq!(stats.max, 900.0);
    }

    #[test]
    fn test_big_tiff_reads_like_classic() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.tif");
        write_variant_file(&path, TiffVariant::Big, TileCompression::Lzw, 2);

        let header = std::fs::read(&path).unwrap();
        assert_eq!(u16::from_ne_bytes([header[2], header[3]]), 43);

        let mut reader = TiffRasterReader::open(&path, 0, 1 << 20).unwrap();
        assert_eq!((reader.info().width, reader.info().height), (40, 24));
        assert_eq!(reader.band_stats(1).max, 900.0);
        let mut buf = vec![0u8; 8 * 8 * 2];
        reader.read_block(1, 12, 12, 8, 8, &mut buf).unwrap();
        assert_eq!(u16::read_ne(&buf[0..2]), 12 + 1200 + 1000);
        assert_eq!(TiffRasterReader::directory_count(&path).unwrap(), 1);
    }

    #[test]
    fn test_directory_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("c.tif");
        write_test_file(&path, TileCompression::Lzw, 1);
        assert_eq!(TiffRasterReader::directory_count(&path).unwrap(), 1);
    }

    #[test]
    fn test_not_a_tiff() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.tif");
        std::fs::write(&path, b"hello world").unwrap();
        assert!(TiffRasterReader::open(&path, 0, 0).is_err());
        assert!(TiffRasterReader::open(dir.path().join("missing.tif"), 0, 0)
            .err()
            .unwrap()
            .is_fatal_io());
    }
}
