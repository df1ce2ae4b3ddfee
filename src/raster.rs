// Raster value types: numeric representation, typed sample buffers,
// the caller-owned raster and its per-pixel validity mask.
//
// Samples are laid out band-major: all of band 0 in row-major order, then
// band 1, and so on. The mask is shared by every band.

use crate::error::{LercError, Result};

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Numeric representation of raster samples.
///
/// Discriminants are the wire codes stored in the blob header and used by
/// the flat `getInfo`/`decode` interface of host bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    U8 = 1,
    I16 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    F32 = 6,
    F64 = 7,
}

impl DataType {
    /// Every type, ordered by storage size (smallest first).
    pub const ALL: [DataType; 8] = [
        DataType::I8,
        DataType::U8,
        DataType::I16,
        DataType::U16,
        DataType::I32,
        DataType::U32,
        DataType::F32,
        DataType::F64,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::F32 | DataType::F64)
    }

    /// Size of one sample in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Inclusive range of finite values the type can hold.
    pub fn range(self) -> (f64, f64) {
        match self {
            DataType::I8 => (i8::MIN as f64, i8::MAX as f64),
            DataType::U8 => (0.0, u8::MAX as f64),
            DataType::I16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::U16 => (0.0, u16::MAX as f64),
            DataType::I32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::U32 => (0.0, u32::MAX as f64),
            DataType::F32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// True if `value` survives a round trip through this type unchanged.
    pub fn represents(self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            DataType::F64 => true,
            DataType::F32 => (value as f32) as f64 == value,
            _ => {
                let (lo, hi) = self.range();
                value.fract() == 0.0 && value >= lo && value <= hi
            }
        }
    }

    /// Smallest type that stores `value` exactly (`F64` for anything else).
    pub fn smallest_exact(value: f64) -> DataType {
        Self::ALL
            .into_iter()
            .find(|dt| dt.represents(value))
            .unwrap_or(DataType::F64)
    }
}

// ---------------------------------------------------------------------------
// Overflow policy
// ---------------------------------------------------------------------------

/// What to do when a decoded value falls outside the requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Saturate to the nearest representable value.
    Clamp,
    /// Fail the whole decode with `TypeRange`.
    #[default]
    Fail,
}

/// Convert `value` into the numeric domain of `data_type`, rounding to the
/// nearest integer for integer targets. The result is guaranteed to lie in
/// `data_type.range()`.
pub fn cast_value(value: f64, data_type: DataType, policy: OverflowPolicy) -> Result<f64> {
    let (lo, hi) = data_type.range();
    let v = if data_type.is_integer() {
        value.round()
    } else {
        value
    };
    if v >= lo && v <= hi {
        return Ok(v);
    }
    match policy {
        OverflowPolicy::Clamp if !v.is_nan() => Ok(v.clamp(lo, hi)),
        _ => Err(LercError::TypeRange {
            value,
            data_type,
        }),
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Owned, flat, typed sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            Samples::I8($v) => $body,
            Samples::U8($v) => $body,
            Samples::I16($v) => $body,
            Samples::U16($v) => $body,
            Samples::I32($v) => $body,
            Samples::U32($v) => $body,
            Samples::F32($v) => $body,
            Samples::F64($v) => $body,
        }
    };
}

macro_rules! impl_from_vec {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$t>> for Samples {
                fn from(v: Vec<$t>) -> Self {
                    Samples::$variant(v)
                }
            }
        )*
    };
}

impl_from_vec!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    f32 => F32,
    f64 => F64,
);

impl Samples {
    pub fn data_type(&self) -> DataType {
        match self {
            Samples::I8(_) => DataType::I8,
            Samples::U8(_) => DataType::U8,
            Samples::I16(_) => DataType::I16,
            Samples::U16(_) => DataType::U16,
            Samples::I32(_) => DataType::I32,
            Samples::U32(_) => DataType::U32,
            Samples::F32(_) => DataType::F32,
            Samples::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` widened to `f64`.
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        for_each_variant!(self, v => v[index] as f64)
    }

    pub fn to_f64(&self) -> Vec<f64> {
        for_each_variant!(self, v => v.iter().map(|&x| x as f64).collect())
    }

    /// Build a buffer of `data_type` from wide values, applying `policy` to
    /// anything the type cannot hold.
    pub fn from_f64(data_type: DataType, values: &[f64], policy: OverflowPolicy) -> Result<Self> {
        macro_rules! collect {
            ($variant:ident, $t:ty) => {
                Samples::$variant(
                    values
                        .iter()
                        .map(|&v| cast_value(v, data_type, policy).map(|c| c as $t))
                        .collect::<Result<Vec<$t>>>()?,
                )
            };
        }
        Ok(match data_type {
            DataType::I8 => collect!(I8, i8),
            DataType::U8 => collect!(U8, u8),
            DataType::I16 => collect!(I16, i16),
            DataType::U16 => collect!(U16, u16),
            DataType::I32 => collect!(I32, i32),
            DataType::U32 => collect!(U32, u32),
            DataType::F32 => collect!(F32, f32),
            DataType::F64 => Samples::F64(values.to_vec()),
        })
    }
}

// ---------------------------------------------------------------------------
// Raster
// ---------------------------------------------------------------------------

/// A `width × height × band_count` grid of samples of a single type.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    band_count: u32,
    samples: Samples,
}

impl Raster {
    pub fn new(
        width: u32,
        height: u32,
        band_count: u32,
        samples: impl Into<Samples>,
    ) -> Result<Self> {
        let samples = samples.into();
        if width == 0 || height == 0 || band_count == 0 {
            return Err(LercError::InvalidRaster(format!(
                "dimensions must be non-zero, got {width}x{height}x{band_count}"
            )));
        }
        let expected = sample_count(width, height, band_count).ok_or_else(|| {
            LercError::InvalidRaster(format!(
                "{width}x{height}x{band_count} overflows the address space"
            ))
        })?;
        if samples.len() != expected {
            return Err(LercError::InvalidRaster(format!(
                "expected {expected} samples, got {}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            band_count,
            samples,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn band_count(&self) -> u32 {
        self.band_count
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.samples.data_type()
    }

    /// Pixels per band.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn into_samples(self) -> Samples {
        self.samples
    }

    /// Sample at (`band`, `row`, `col`) widened to `f64`.
    pub fn get(&self, band: u32, row: u32, col: u32) -> f64 {
        let idx = band as usize * self.pixel_count()
            + row as usize * self.width as usize
            + col as usize;
        self.samples.get(idx)
    }
}

/// `width * height * bands` with overflow detection.
pub(crate) fn sample_count(width: u32, height: u32, bands: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(bands as usize)
}

// ---------------------------------------------------------------------------
// ValidityMask
// ---------------------------------------------------------------------------

/// One validity bit per pixel, row-major, most significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl ValidityMask {
    fn filled(width: u32, height: u32, valid: bool) -> Self {
        let len = width as usize * height as usize;
        let mut mask = Self {
            width,
            height,
            bits: vec![0u8; len.div_ceil(8)],
        };
        if valid {
            for i in 0..len {
                mask.set(i, true);
            }
        }
        mask
    }

    pub fn all_valid(width: u32, height: u32) -> Self {
        Self::filled(width, height, true)
    }

    pub fn all_invalid(width: u32, height: u32) -> Self {
        Self::filled(width, height, false)
    }

    pub fn from_bools(width: u32, height: u32, valid: &[bool]) -> Result<Self> {
        check_mask_len(width, height, valid.len())?;
        let mut mask = Self::all_invalid(width, height);
        for (i, &v) in valid.iter().enumerate() {
            mask.set(i, v);
        }
        Ok(mask)
    }

    /// One byte per pixel, `0` meaning invalid.
    pub fn from_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        check_mask_len(width, height, bytes.len())?;
        let mut mask = Self::all_invalid(width, height);
        for (i, &b) in bytes.iter().enumerate() {
            mask.set(i, b != 0);
        }
        Ok(mask)
    }

    /// One byte per pixel: `1` valid, `0` invalid.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.iter().map(u8::from).collect()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.bits[index >> 3] & (0x80 >> (index & 7)) != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize, valid: bool) {
        let bit = 0x80 >> (index & 7);
        if valid {
            self.bits[index >> 3] |= bit;
        } else {
            self.bits[index >> 3] &= !bit;
        }
    }

    pub fn count_valid(&self) -> usize {
        let full = self.len() / 8;
        let mut count: usize = self.bits[..full]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum();
        count += (full * 8..self.len()).filter(|&i| self.is_valid(i)).count();
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len()).map(|i| self.is_valid(i))
    }
}

fn check_mask_len(width: u32, height: u32, len: usize) -> Result<()> {
    let expected = width as usize * height as usize;
    if len != expected {
        return Err(LercError::InvalidRaster(format!(
            "mask for {width}x{height} needs {expected} entries, got {len}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
