//! Tile compression codecs.
//!
//! Tiles are compressed one at a time and handed to the container as opaque
//! bytes. Lossless encoding goes through the `tiff` crate's own compressors;
//! decoding works on the raw chunk bytes the reader fetched, since the crate
//! keeps its chunk decoders private.

use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use tiff::encoder::compression::{CompressionAlgorithm, Deflate, DeflateLevel, Lzw, Packbits};
use tracing::warn;
use weezl::BitOrder;

use crate::error::{OvrError, Result};
use crate::raster::PixelType;

/// Compression applied to every tile of a pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TileCompression {
    /// No compression - fastest but largest files
    #[default]
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
    /// Run-length encoding
    PackBits,
    /// Lossy JPEG, 8-bit samples only
    Jpeg,
}

impl TileCompression {
    /// Value written to the `Compression` tag
    #[must_use]
    pub fn tiff_code(self) -> u16 {
        match self {
            Self::None => 1,
            Self::Lzw => 5,
            Self::Jpeg => 7,
            Self::Deflate => 8,
            Self::PackBits => 32773,
        }
    }

    /// Map a `Compression` tag value. Unsupported codes fall back to `None`.
    #[must_use]
    pub fn from_tiff_code(code: u16) -> Self {
        match code {
            1 => Self::None,
            5 => Self::Lzw,
            7 => Self::Jpeg,
            8 | 32946 => Self::Deflate,
            32773 => Self::PackBits,
            other => {
                warn!(code = other, "unsupported compression code, treating as uncompressed");
                Self::None
            }
        }
    }

    /// Check that this codec can carry `pixel_type` samples
    ///
    /// # Errors
    /// JPEG is limited to 8-bit unsigned samples.
    pub fn check_pixel_type(self, pixel_type: PixelType) -> Result<()> {
        if self == Self::Jpeg && pixel_type != PixelType::U8 {
            return Err(OvrError::Configuration(format!(
                "JPEG compression requires 8-bit unsigned samples, got {pixel_type:?}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TileCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Lzw => "lzw",
            Self::Deflate => "deflate",
            Self::PackBits => "packbits",
            Self::Jpeg => "jpeg",
        };
        f.write_str(name)
    }
}

/// Compress one tile. `width`/`height` and `jpeg_quality` are only used by JPEG,
/// which expects a single 8-bit band.
///
/// # Errors
/// Returns an error if the encoder fails.
pub fn compress_tile(
    compression: TileCompression,
    data: &[u8],
    width: u32,
    height: u32,
    jpeg_quality: u8,
) -> Result<Vec<u8>> {
    match compression {
        TileCompression::None => Ok(data.to_vec()),
        TileCompression::Lzw => encode_with(Lzw, data, "LZW-compressing tile"),
        TileCompression::Deflate => {
            encode_with(Deflate::with_level(DeflateLevel::Fast), data, "deflating tile")
        }
        TileCompression::PackBits => encode_with(Packbits, data, "packing tile"),
        TileCompression::Jpeg => {
            let mut out = Vec::new();
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, jpeg_quality);
            encoder
                .encode(data, width, height, image::ExtendedColorType::L8)
                .map_err(|e| OvrError::Tiff(format!("JPEG encode failed: {e}")))?;
            Ok(out)
        }
    }
}

/// Decompress one tile into exactly `expected` bytes.
///
/// # Errors
/// Returns [`OvrError::ShortTile`] when the decoded tile is smaller than
/// `expected`, or a decoder error.
pub fn decompress_tile(
    compression: TileCompression,
    data: &[u8],
    expected: usize,
) -> Result<Vec<u8>> {
    let mut out = match compression {
        TileCompression::None => data.to_vec(),
        TileCompression::Lzw => weezl::decode::Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .decode(data)
            .map_err(|e| OvrError::Tiff(format!("LZW decode failed: {e}")))?,
        TileCompression::Deflate => {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| OvrError::io("inflating tile", e))?;
            out
        }
        TileCompression::PackBits => packbits_decode(data, expected),
        TileCompression::Jpeg => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
                .map_err(|e| OvrError::Tiff(format!("JPEG decode failed: {e}")))?
                .to_luma8()
                .into_raw()
        }
    };

    if out.len() < expected {
        return Err(OvrError::ShortTile {
            operation: "read",
            expected,
            actual: out.len(),
        });
    }
    out.truncate(expected);
    Ok(out)
}

fn encode_with<C: CompressionAlgorithm>(mut codec: C, data: &[u8], context: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    codec
        .write_to(&mut out, data)
        .map_err(|e| OvrError::io(context, e))?;
    Ok(out)
}

/// PackBits run-length decoding (TIFF 6.0, section 9). A truncated stream
/// yields fewer than `expected` bytes.
fn packbits_decode(data: &[u8], expected: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected);
    let mut i = 0;
    while i < data.len() && out.len() < expected {
        #[allow(clippy::cast_possible_wrap)]
        let n = data[i] as i8;
        i += 1;
        if n >= 0 {
            let count = n as usize + 1;
            let end = (i + count).min(data.len());
            out.extend_from_slice(&data[i..end]);
            i = end;
        } else if n != -128 {
            let count = (1 - i16::from(n)) as usize;
            if let Some(&byte) = data.get(i) {
                out.extend(std::iter::repeat_n(byte, count));
            }
            i += 1;
        }
    }
    out
}
