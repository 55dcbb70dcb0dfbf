//! Checked numeric conversions used at the container boundary.
//!
//! # Assumptions
//!
//! ## Tile counts and offsets
//! Classic TIFF stores tile offsets and byte counts as 32-bit values. Anything
//! larger is a configuration problem for the output file, not a panic.
//!
//! ## Buffer sizes (`u64` → `usize`)
//! Tile buffers are allocated in memory, so their byte size must fit `usize`.
//! On 32-bit targets a huge tile fails with an error instead of truncating.
//!
//! ## Sample statistics (`f64` → tag integers)
//! Unsigned min/max tags are SHORT values. Statistics outside the SHORT range
//! are clamped rather than wrapped.

use std::convert::TryFrom;

use crate::error::{OvrError, Result};

/// Convert a `u64` byte count to `usize`, failing on 32-bit overflow.
///
/// # Errors
/// Returns a configuration error if the value exceeds `usize::MAX`.
#[inline]
pub fn u64_to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        OvrError::Configuration(format!(
            "size {value} exceeds maximum addressable size on this platform"
        ))
    })
}

/// Convert a file offset to the 32-bit form classic TIFF stores.
///
/// # Errors
/// Returns a configuration error if the output grew past 4 GiB.
#[inline]
pub fn offset_to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        OvrError::Configuration(format!(
            "offset {value} does not fit a classic TIFF (4 GiB limit)"
        ))
    })
}

/// Convert a band count to the SHORT `SamplesPerPixel` stores.
///
/// # Errors
/// Returns a configuration error above 65535 bands.
#[inline]
pub fn band_count_to_u16(value: usize) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| OvrError::Configuration(format!("{value} bands exceed u16 maximum (65535)")))
}

/// Clamp a statistic into the SHORT range used by `Min/MaxSampleValue`.
#[inline]
#[must_use]
pub fn f64_to_clamped_u16(value: f64) -> u16 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= f64::from(u16::MAX) {
        return u16::MAX;
    }
    // Safety: range checked above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value as u16
    }
}

/// Clamp a statistic into the LONG range used for 32-bit samples.
#[inline]
#[must_use]
pub fn f64_to_clamped_u32(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= f64::from(u32::MAX) {
        return u32::MAX;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value as u32
    }
}

/// Byte size of one tile buffer.
///
/// # Errors
/// Returns a configuration error if the buffer cannot be addressed.
pub fn tile_bytes(tile_width: u32, tile_height: u32, bytes_per_sample: usize) -> Result<usize> {
    let pixels = u64::from(tile_width) * u64::from(tile_height);
    let bytes = pixels
        .checked_mul(bytes_per_sample as u64)
        .ok_or_else(|| OvrError::Configuration("tile byte size overflows u64".to_string()))?;
    u64_to_usize(bytes)
}
