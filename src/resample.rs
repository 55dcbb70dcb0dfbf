//! 2:1 downsampling of one source tile into a quadrant of a destination tile.
//!
//! Four source tiles in a 2x2 group feed one destination tile at the next
//! coarser level. Each source tile shrinks to half its size and lands in the
//! [`Quadrant`] matching its position in the group.

use serde::{Deserialize, Serialize};

use crate::error::{OvrError, Result};
use crate::raster::PixelType;
use crate::sample::{Sample, with_sample_type};

/// Downsampling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResamplingMethod {
    /// Null-aware mean of each 2x2 block
    #[default]
    Box,
    /// Upper-left pixel of each 2x2 block
    Nearest,
}

impl std::fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Box => write!(f, "box"),
            Self::Nearest => write!(f, "nearest"),
        }
    }
}

/// Position of a source tile inside its 2x2 group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::UpperLeft,
        Quadrant::UpperRight,
        Quadrant::LowerLeft,
        Quadrant::LowerRight,
    ];

    /// Column and row offsets (0 or 1) of this quadrant in tiles
    #[must_use]
    pub fn tile_offset(self) -> (u64, u64) {
        match self {
            Self::UpperLeft => (0, 0),
            Self::UpperRight => (1, 0),
            Self::LowerLeft => (0, 1),
            Self::LowerRight => (1, 1),
        }
    }

    /// Upper-left pixel of this quadrant inside a `width` x `height` tile
    #[must_use]
    pub fn pixel_origin(self, width: usize, height: usize) -> (usize, usize) {
        let (cx, cy) = self.tile_offset();
        (cx as usize * width / 2, cy as usize * height / 2)
    }
}

/// Downsample `src` into `quadrant` of `dst`. Both buffers are one
/// `width` x `height` tile of `T` in native byte order.
pub fn resample_quadrant<T: Sample>(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    quadrant: Quadrant,
    method: ResamplingMethod,
    null: T,
) {
    let (ox, oy) = quadrant.pixel_origin(width, height);
    let at = |x: usize, y: usize| {
        let idx = (y * width + x) * T::SIZE;
        T::read_ne(&src[idx..idx + T::SIZE])
    };

    for dy in 0..height / 2 {
        let sy = dy * 2;
        for dx in 0..width / 2 {
            let sx = dx * 2;
            let value = match method {
                ResamplingMethod::Nearest => at(sx, sy),
                ResamplingMethod::Box => {
                    let mut sum = 0.0f64;
                    let mut mean = 0.0f64;
                    let mut weight = 0u32;
                    let mut uniform: Option<T> = None;
                    let mut mixed = false;
                    for (px, py) in [(sx, sy), (sx + 1, sy), (sx, sy + 1), (sx + 1, sy + 1)] {
                        let v = at(px, py);
                        if !v.is_null(null) {
                            match uniform {
                                None => uniform = Some(v),
                                Some(first) => mixed |= first != v,
                            }
                            let v = v.to_f64();
                            weight += 1;
                            sum += v;
                            mean += (v - mean) / f64::from(weight);
                        }
                    }
                    if weight == 0 {
                        null
                    } else if let Some(v) = uniform
                        && !mixed
                    {
                        // Equal samples average to themselves without rounding
                        v
                    } else if sum.is_finite() || mean.is_nan() {
                        T::from_f64(sum / f64::from(weight))
                    } else {
                        // f64 samples near the type maximum overflow the sum
                        T::from_f64(mean)
                    }
                }
            };
            let idx = ((oy + dy) * width + ox + dx) * T::SIZE;
            value.write_ne(&mut dst[idx..idx + T::SIZE]);
        }
    }
}

/// Type-dispatched [`resample_quadrant`] for a runtime pixel type.
///
/// # Errors
/// Returns a configuration error if either buffer is not exactly one tile.
#[allow(clippy::too_many_arguments)]
pub fn resample_tile(
    pixel_type: PixelType,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    quadrant: Quadrant,
    method: ResamplingMethod,
    null: f64,
) -> Result<()> {
    let expected = width * height * pixel_type.bytes_per_sample();
    if src.len() != expected || dst.len() != expected {
        return Err(OvrError::Configuration(format!(
            "resample buffers must hold {expected} bytes (src {}, dst {})",
            src.len(),
            dst.len()
        )));
    }
    with_sample_type!(pixel_type, T => resample_quadrant::<T>(
        src,
        dst,
        width,
        height,
        quadrant,
        method,
        T::from_f64(null),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{fill, value_at};

    fn tile<T: Sample>(values: &[T]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * T::SIZE];
        for (i, v) in values.iter().enumerate() {
            v.write_ne(&mut buf[i * T::SIZE..]);
        }
        buf
    }

    #[test]
    fn test_box_equal_values_exact() {
        let src = tile(&[200u8; 4]);
        let mut dst = vec![0u8; 4];
        resample_quadrant::<u8>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0);
        assert_eq!(dst[0], 200);
    }

    #[test]
    fn test_box_single_non_null() {
        let src = tile(&[0i16, 0, -37, 0]);
        let mut dst = vec![0u8; 8];
        resample_quadrant::<i16>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0);
        assert_eq!(i16::read_ne(&dst[0..2]), -37);
    }

    #[test]
    fn test_box_all_null_yields_null() {
        let src = tile(&[-9999.0f32; 4]);
        let mut dst = tile(&[1.0f32; 4]);
        resample_quadrant::<f32>(
            &src,
            &mut dst,
            2,
            2,
            Quadrant::UpperLeft,
            ResamplingMethod::Box,
            -9999.0,
        );
        assert_eq!(f32::read_ne(&dst[0..4]), -9999.0);
    }

    #[test]
    fn test_box_nan_null_is_excluded() {
        let src = tile(&[f64::NAN, 2.0, 4.0, f64::NAN]);
        let mut dst = vec![0u8; 32];
        resample_quadrant::<f64>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, f64::NAN);
        assert_eq!(f64::read_ne(&dst[0..8]), 3.0);
    }

    #[test]
    fn test_box_huge_f64_does_not_overflow() {
        let v = f64::MAX / 2.0;
        let src = tile(&[v; 4]);
        let mut dst = vec![0u8; 32];
        resample_quadrant::<f64>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0.0);
        assert_eq!(f64::read_ne(&dst[0..8]), v);

        // Mixed values whose sum overflows still average finitely
        let src = tile(&[f64::MAX, f64::MAX, v, v]);
        resample_quadrant::<f64>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0.0);
        let out = f64::read_ne(&dst[0..8]);
        assert!(out.is_finite());
        assert!((out / (f64::MAX * 0.75) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_box_uniform_f64_avoids_sum_rounding() {
        // 3v is inexact for this v, so a plain sum over four copies can round
        let v = 1.0 + f64::EPSILON;
        let src = tile(&[v; 4]);
        let mut dst = vec![0u8; 32];
        resample_quadrant::<f64>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0.0);
        assert_eq!(f64::read_ne(&dst[0..8]), v);
    }

    #[test]
    fn test_box_truncates_toward_zero() {
        // (1 + 2 + 2 + 2) / 4 = 1.75
        let src = tile(&[1u16, 2, 2, 2]);
        let mut dst = vec![0u8; 8];
        resample_quadrant::<u16>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Box, 0);
        assert_eq!(u16::read_ne(&dst[0..2]), 1);
    }

    #[test]
    fn test_nearest_takes_upper_left_including_null() {
        let src = tile(&[0u8, 9, 9, 9]);
        let mut dst = vec![5u8; 4];
        resample_quadrant::<u8>(&src, &mut dst, 2, 2, Quadrant::UpperLeft, ResamplingMethod::Nearest, 0);
        assert_eq!(dst[0], 0);
    }

    #[test]
    fn test_quadrant_placement() {
        // 4x4 source tile, value = x + 10*y
        let values: Vec<u8> = (0..16).map(|i| (i % 4 + 10 * (i / 4)) as u8).collect();
        let src = tile(&values);
        let mut dst = vec![0u8; 16];
        resample_quadrant::<u8>(&src, &mut dst, 4, 4, Quadrant::LowerRight, ResamplingMethod::Nearest, 255);
        // dst (2,2) <- src (0,0); dst (3,3) <- src (2,2)
        assert_eq!(dst[2 * 4 + 2], 0);
        assert_eq!(dst[3 * 4 + 3], 22);
        // other quadrants untouched
        assert_eq!(dst[0], 0);
        assert_eq!(dst[3], 0);

        let mut dst = vec![0u8; 16];
        resample_quadrant::<u8>(&src, &mut dst, 4, 4, Quadrant::UpperRight, ResamplingMethod::Nearest, 255);
        assert_eq!(dst[3], 2);
    }

    #[test]
    fn test_dispatch_checks_sizes() {
        let src = vec![0u8; 16];
        let mut dst = vec![0u8; 8];
        assert!(
            resample_tile(PixelType::U8, &src, &mut dst, 4, 4, Quadrant::UpperLeft, ResamplingMethod::Box, 0.0)
                .is_err()
        );
    }

    #[test]
    fn test_dispatch_u32() {
        let mut src = vec![0u8; 4 * 4];
        fill::<u32>(&mut src, 4_000_000_000);
        let mut dst = vec![0u8; 16];
        resample_tile(PixelType::U32, &src, &mut dst, 2, 2, Quadrant::LowerLeft, ResamplingMethod::Box, 0.0)
            .unwrap();
        assert_eq!(value_at(PixelType::U32, &dst, 2), 4_000_000_000.0);
    }
}
