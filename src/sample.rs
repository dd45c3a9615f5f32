//! Floating-point sample types.
//!
//! The layered engine is written once over [`Sample`] and instantiated for
//! `f32` and `f64` fields.

use std::fmt::Debug;

use num_traits::Float;

/// A field sample: a float that converts to and from quantized byte codes.
pub trait Sample: Float + Debug + Send + Sync + 'static {
    /// Size of the little-endian encoding in bytes.
    const WIDTH: usize;

    /// Widen to `f64`.
    fn widen(self) -> f64;

    /// Narrow from `f64`.
    fn narrow(value: f64) -> Self;

    /// Reconstruct a quantized code as a float.
    #[inline]
    fn from_code(code: u8) -> Self {
        Self::narrow(f64::from(code))
    }

    /// Truncate a non-negative float to a code, saturating at `0..=255`.
    #[inline]
    fn to_code(self) -> u8 {
        let v = self.widen();
        if v >= 255.0 {
            255
        } else if v > 0.0 {
            v as u8
        } else {
            0
        }
    }

    /// Append the little-endian encoding.
    fn write_le(self, out: &mut Vec<u8>);

    /// Read from exactly [`Self::WIDTH`] little-endian bytes.
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

impl Sample for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn widen(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn narrow(value: f64) -> Self {
        value as f32
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl Sample for f64 {
    const WIDTH: usize = 8;

    #[inline]
    fn widen(self) -> f64 {
        self
    }

    #[inline]
    fn narrow(value: f64) -> Self {
        value
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        Some(f64::from_le_bytes(bytes.try_into().ok()?))
    }
}
