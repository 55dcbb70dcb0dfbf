//! Numeric sample types.
//!
//! Tile buffers are plain byte slices in native byte order. [`Sample`] reads
//! and writes one value at a time so buffers never need to be aligned for the
//! sample type. Narrowing from the `f64` accumulator uses `as` semantics:
//! truncation toward zero for integers, saturating at the type bounds.

use std::fmt::Debug;

use crate::raster::PixelType;

pub trait Sample: Copy + PartialEq + Debug + Send + Sync + 'static {
    const PIXEL_TYPE: PixelType;
    const SIZE: usize;

    fn read_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, out: &mut [u8]);
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;

    /// True when `self` marks "no data" for the given null value
    #[inline]
    fn is_null(self, null: Self) -> bool {
        self == null
    }
}

macro_rules! impl_int_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const PIXEL_TYPE: PixelType = PixelType::$variant;
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_ne_bytes(raw)
            }

            #[inline]
            fn write_ne(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[inline]
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    };
}

macro_rules! impl_float_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const PIXEL_TYPE: PixelType = PixelType::$variant;
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_ne_bytes(raw)
            }

            #[inline]
            fn write_ne(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[inline]
            #[allow(clippy::cast_possible_truncation)]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn is_null(self, null: Self) -> bool {
                self == null || (self.is_nan() && null.is_nan())
            }
        }
    };
}

impl_int_sample!(u8, U8);
impl_int_sample!(u16, U16);
impl_int_sample!(i16, I16);
impl_int_sample!(u32, U32);
impl_int_sample!(i32, I32);
impl_float_sample!(f32, F32);
impl_float_sample!(f64, F64);

/// Run `$body` with `$t` bound to the Rust type of a [`PixelType`].
macro_rules! with_sample_type {
    ($pixel_type:expr, $t:ident => $body:expr) => {
        match $pixel_type {
            $crate::raster::PixelType::U8 => {
                type $t = u8;
                $body
            }
            $crate::raster::PixelType::U16 => {
                type $t = u16;
                $body
            }
            $crate::raster::PixelType::I16 => {
                type $t = i16;
                $body
            }
            $crate::raster::PixelType::U32 => {
                type $t = u32;
                $body
            }
            $crate::raster::PixelType::I32 => {
                type $t = i32;
                $body
            }
            $crate::raster::PixelType::F32 => {
                type $t = f32;
                $body
            }
            $crate::raster::PixelType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}
pub(crate) use with_sample_type;

/// Fill a typed buffer with one value
pub fn fill<T: Sample>(buf: &mut [u8], value: T) {
    for chunk in buf.chunks_exact_mut(T::SIZE) {
        value.write_ne(chunk);
    }
}

/// Fill a buffer of `pixel_type` samples with `value` (narrowed to the type)
pub fn fill_value(pixel_type: PixelType, buf: &mut [u8], value: f64) {
    with_sample_type!(pixel_type, T => fill::<T>(buf, T::from_f64(value)));
}

/// Reverse the byte order of every `sample_size`-byte value in place
pub fn swap_byte_order(buf: &mut [u8], sample_size: usize) {
    if sample_size <= 1 {
        return;
    }
    for chunk in buf.chunks_exact_mut(sample_size) {
        chunk.reverse();
    }
}

/// Read sample `index` of a typed buffer as `f64`
#[must_use]
pub fn value_at(pixel_type: PixelType, buf: &[u8], index: usize) -> f64 {
    let size = pixel_type.bytes_per_sample();
    let bytes = &buf[index * size..(index + 1) * size];
    with_sample_type!(pixel_type, T => T::read_ne(bytes).to_f64())
}
