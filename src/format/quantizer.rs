// Error-bounded quantization of tile samples.
//
// code = round((value - offset) / scale), offset = min(values),
// scale = 2 * tolerance. Reconstruction `offset + code * scale` is then
// within scale / 2 = tolerance of the input. Tolerance 0 means lossless:
// scale is 1 and every input must already be integral.

use crate::error::{LercError, Result};
use crate::raster::DataType;

/// Lower bound on the quantization step for tiny positive tolerances.
pub const MIN_SCALE: f64 = f64::EPSILON;

/// Output of [`quantize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Quantized {
    pub codes: Vec<u64>,
    pub scale: f64,
    pub offset: f64,
    /// Largest code, computed in floating point so callers can detect code
    /// ranges too wide for bit-packing before trusting `codes`.
    pub max_code: f64,
}

/// Quantization step for a tolerance.
#[inline]
pub fn scale_for(tolerance: f64) -> f64 {
    if tolerance > 0.0 {
        (2.0 * tolerance).max(MIN_SCALE)
    } else {
        1.0
    }
}

/// Tolerance actually applied to samples of `data_type`.
///
/// Integer samples only get whole-number tolerances, so reconstructed values
/// stay integral and rounding into the original type cannot add error.
#[inline]
pub fn effective_tolerance(tolerance: f64, data_type: DataType) -> f64 {
    if data_type.is_integer() {
        tolerance.floor()
    } else {
        tolerance
    }
}

/// Quantization tolerance for `f32` samples no larger than `max_abs` in
/// magnitude, so reconstructions rounded to `f32` still meet `tolerance`.
///
/// Rounding adds up to half the `f32` spacing at `max_abs`. Since the
/// samples are themselves `f32`, rounding can at most double the error, so
/// the result never drops below `tolerance / 2`.
pub fn f32_tolerance(tolerance: f64, max_abs: f64) -> f64 {
    let spacing = (max_abs * f64::from(f32::EPSILON)).max(f64::from(f32::from_bits(1)));
    (tolerance - 0.5 * spacing).max(0.5 * tolerance)
}

/// Quantize `values` with maximum reconstruction error `tolerance`.
///
/// Fails with `LossyRequired` when `tolerance` is 0 and a value has a
/// fractional part.
pub fn quantize(values: &[f64], tolerance: f64) -> Result<Quantized> {
    let lossless = tolerance <= 0.0;
    if lossless {
        if let Some(&value) = values.iter().find(|v| v.fract() != 0.0) {
            return Err(LercError::LossyRequired { value });
        }
    }

    let scale = scale_for(tolerance);
    let (offset, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if values.is_empty() {
        return Ok(Quantized {
            codes: Vec::new(),
            scale,
            offset: 0.0,
            max_code: 0.0,
        });
    }

    let max_code = ((max - offset) / scale).round();
    let codes = values
        .iter()
        .map(|&v| ((v - offset) / scale).round() as u64)
        .collect();

    Ok(Quantized {
        codes,
        scale,
        offset,
        max_code,
    })
}

/// Reconstruct a single value.
#[inline]
pub fn dequantize_one(code: u64, scale: f64, offset: f64) -> f64 {
    offset + code as f64 * scale
}

pub fn dequantize(codes: &[u64], scale: f64, offset: f64) -> Vec<f64> {
    codes
        .iter()
        .map(|&c| dequantize_one(c, scale, offset))
        .collect()
}

/// Bits needed to store every code up to `max_code` (at least 1).
#[inline]
pub fn bit_width(max_code: u64) -> u32 {
    (64 - max_code.leading_zeros()).max(1)
}
