// Bit- and byte-level stream codec over an in-memory buffer.
//
// Bits are packed most-significant first. Byte-level writes (fixed-width
// little-endian integers, floats, LEB128 varints, raw slices) always start
// on a byte boundary; a pending partial byte is zero-padded first.
//
// Varints are LEB128: 7 bits per byte, least-significant group first, high
// bit set on every byte except the last.

use crate::error::{LercError, Result};
use crate::raster::DataType;

/// Maximum encoded length of a 64-bit varint (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// Encoded length of `num` as a varint.
#[inline]
pub fn varint_len(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    bits.max(1).div_ceil(7) as usize
}

#[inline]
fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Growable bit writer with a byte cursor.
///
/// The cursor normally sits at the end of the buffer. `rewind` moves it
/// back so fixed-size fields can be re-emitted once their final values are
/// known; writes before the end overwrite in place.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    pos: usize,
    acc: u32,
    acc_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Byte position of the cursor. Pending bits are not counted.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total bytes written so far (including any rewound region).
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.acc_bits == 0
    }

    #[inline]
    fn put_byte(&mut self, byte: u8) {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
        } else {
            self.buf.push(byte);
        }
        self.pos += 1;
    }

    /// Write the low `n_bits` of `value`, most significant bit first.
    pub fn write_bits(&mut self, value: u64, n_bits: u32) {
        debug_assert!(n_bits <= 64);
        debug_assert!(n_bits == 64 || value >> n_bits == 0);
        let mut remaining = n_bits;
        while remaining > 0 {
            let take = (8 - self.acc_bits).min(remaining);
            let chunk = (value >> (remaining - take)) & low_mask(take);
            self.acc = (self.acc << take) | chunk as u32;
            self.acc_bits += take;
            remaining -= take;
            if self.acc_bits == 8 {
                self.put_byte(self.acc as u8);
                self.acc = 0;
                self.acc_bits = 0;
            }
        }
    }

    /// Zero-pad to the next byte boundary.
    pub fn align(&mut self) {
        if self.acc_bits > 0 {
            let pad = 8 - self.acc_bits;
            self.write_bits(0, pad);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.align();
        self.put_byte(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.align();
        for &b in bytes {
            self.put_byte(b);
        }
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write `num` as a LEB128 varint. Returns the encoded length.
    pub fn write_varint(&mut self, mut num: u64) -> usize {
        self.align();
        let mut n = 0;
        loop {
            let mut byte = (num & 0x7F) as u8;
            num >>= 7;
            if num != 0 {
                byte |= 0x80;
            }
            self.put_byte(byte);
            n += 1;
            if num == 0 {
                return n;
            }
        }
    }

    /// Write `value` in the little-endian layout of `data_type`.
    ///
    /// The caller guarantees `data_type.represents(value)`.
    pub fn write_typed(&mut self, value: f64, data_type: DataType) {
        debug_assert!(data_type.represents(value));
        match data_type {
            DataType::I8 => self.write_bytes(&(value as i8).to_le_bytes()),
            DataType::U8 => self.write_u8(value as u8),
            DataType::I16 => self.write_bytes(&(value as i16).to_le_bytes()),
            DataType::U16 => self.write_u16(value as u16),
            DataType::I32 => self.write_bytes(&(value as i32).to_le_bytes()),
            DataType::U32 => self.write_u32(value as u32),
            DataType::F32 => self.write_bytes(&(value as f32).to_le_bytes()),
            DataType::F64 => self.write_f64(value),
        }
    }

    /// Move the cursor back to byte `position` (must be aligned and within
    /// the written region). Used to re-emit header fields after a pass.
    pub fn rewind(&mut self, position: usize) {
        debug_assert_eq!(self.acc_bits, 0, "rewind with pending bits");
        debug_assert!(position <= self.buf.len());
        self.pos = position.min(self.buf.len());
    }

    /// Move the cursor back to the end of the written region.
    pub fn seek_end(&mut self) {
        self.align();
        self.pos = self.buf.len();
    }

    /// Mutable access to already written bytes (for in-place patching).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Flush pending bits and return the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bit reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    cur: u32,
    cur_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cur: 0,
            cur_bits: 0,
        }
    }

    /// Reader over `data` starting at byte `pos`. Positions reported by the
    /// reader (and its errors) stay absolute within `data`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
            cur: 0,
            cur_bits: 0,
        }
    }

    /// Byte position of the next unread byte.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unread whole bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<()> {
        let left = self.remaining();
        if n > left {
            return Err(LercError::truncated(self.pos, n - left));
        }
        Ok(())
    }

    /// Read `n_bits` (at most 64), most significant bit first.
    pub fn read_bits(&mut self, n_bits: u32) -> Result<u64> {
        debug_assert!(n_bits <= 64);
        let buffered = self.cur_bits as usize;
        let wanted = n_bits as usize;
        if wanted > buffered {
            self.ensure((wanted - buffered).div_ceil(8))?;
        }
        let mut out = 0u64;
        let mut remaining = n_bits;
        while remaining > 0 {
            if self.cur_bits == 0 {
                self.cur = u32::from(self.data[self.pos]);
                self.pos += 1;
                self.cur_bits = 8;
            }
            let take = self.cur_bits.min(remaining);
            let chunk = u64::from(self.cur >> (self.cur_bits - take)) & low_mask(take);
            out = (out << take) | chunk;
            self.cur_bits -= take;
            remaining -= take;
        }
        Ok(out)
    }

    /// Discard the rest of a partially consumed byte.
    #[inline]
    pub fn align(&mut self) {
        self.cur_bits = 0;
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.align();
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read a LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        self.align();
        let start = self.pos;
        let mut val = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = match self.data.get(self.pos) {
                Some(&b) => b,
                None => return Err(LercError::truncated(self.pos, 1)),
            };
            self.pos += 1;
            let group = u64::from(byte & 0x7F);
            let shift = 7 * i as u32;
            if shift == 63 && group > 1 {
                return Err(LercError::CorruptStream(format!(
                    "varint at offset {start} overflows 64 bits"
                )));
            }
            val |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(val);
            }
        }
        Err(LercError::CorruptStream(format!(
            "varint at offset {start} is longer than {MAX_VARINT_LEN} bytes"
        )))
    }

    /// Read a varint that must fit in `usize`.
    pub fn read_varint_usize(&mut self) -> Result<usize> {
        let start = self.pos;
        let v = self.read_varint()?;
        usize::try_from(v).map_err(|_| {
            LercError::CorruptStream(format!("varint at offset {start} exceeds usize"))
        })
    }

    /// Read a value stored in the little-endian layout of `data_type`.
    pub fn read_typed(&mut self, data_type: DataType) -> Result<f64> {
        Ok(match data_type {
            DataType::I8 => i8::from_le_bytes(self.read_array()?) as f64,
            DataType::U8 => self.read_u8()? as f64,
            DataType::I16 => i16::from_le_bytes(self.read_array()?) as f64,
            DataType::U16 => self.read_u16()? as f64,
            DataType::I32 => i32::from_le_bytes(self.read_array()?) as f64,
            DataType::U32 => self.read_u32()? as f64,
            DataType::F32 => f32::from_le_bytes(self.read_array()?) as f64,
            DataType::F64 => self.read_f64()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
