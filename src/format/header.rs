// Fixed 64-byte blob header.
//
// Layout (little-endian):
//
//   0  tag "LRC" + version      32  maxZError   f64
//   4  checksum         u32     40  globalMin   f64
//   8  blobSize         u32     48  globalMax   f64
//  12  flags            u8      56  noDataValue f64
//  13  dataType         u8
//  14  tileSize         u16
//  16  width            u32
//  20  height           u32
//  24  bandCount        u32
//  28  validPixelCount  u32
//
// The checksum is Adler-32 over bytes [8, blobSize).

use bitflags::bitflags;

use crate::error::{LercError, Result};
use crate::raster::DataType;

use super::bitstream::{BitReader, BitWriter};

// ---------------------------------------------------------------------------
// Magic, version, limits
// ---------------------------------------------------------------------------

pub const LERC_MAGIC: [u8; 3] = *b"LRC";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 64;
/// First byte covered by the checksum.
pub const CHECKSUM_START: usize = 8;
pub const MAX_TILE_SIZE: u16 = 256;

bitflags! {
    /// Header flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        /// A run-length mask section follows the header.
        const MASK_PRESENT = 1 << 0;
        /// The checksum field is populated.
        const CHECKSUM = 1 << 1;
    }
}

// ---------------------------------------------------------------------------
// BlobHeader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BlobHeader {
    pub version: u8,
    pub checksum: u32,
    pub blob_size: u32,
    pub flags: HeaderFlags,
    pub data_type: DataType,
    pub tile_size: u16,
    pub width: u32,
    pub height: u32,
    pub band_count: u32,
    pub valid_pixel_count: u32,
    /// Tolerance the tiles were quantized with. At most the requested one:
    /// floored for integer types, narrowed for f32.
    pub max_z_error: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub no_data_value: f64,
}

impl BlobHeader {
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn mask_present(&self) -> bool {
        self.flags.contains(HeaderFlags::MASK_PRESENT)
    }

    /// Emit all 64 header bytes at the writer's cursor.
    pub fn encode(&self, w: &mut BitWriter) {
        w.write_bytes(&LERC_MAGIC);
        w.write_u8(self.version);
        w.write_u32(self.checksum);
        w.write_u32(self.blob_size);
        w.write_u8(self.flags.bits());
        w.write_u8(self.data_type.code());
        w.write_u16(self.tile_size);
        w.write_u32(self.width);
        w.write_u32(self.height);
        w.write_u32(self.band_count);
        w.write_u32(self.valid_pixel_count);
        w.write_f64(self.max_z_error);
        w.write_f64(self.min_value);
        w.write_f64(self.max_value);
        w.write_f64(self.no_data_value);
    }

    /// Parse and validate the header at the start of `blob`.
    ///
    /// Only the first `HEADER_LEN` bytes are required; nothing past the
    /// header is inspected.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(blob);

        let tag = r.read_bytes(4)?;
        if tag[..3] != LERC_MAGIC {
            return Err(malformed(format!(
                "invalid magic: expected {:02X} {:02X} {:02X}, got {:02X} {:02X} {:02X}",
                LERC_MAGIC[0], LERC_MAGIC[1], LERC_MAGIC[2], tag[0], tag[1], tag[2]
            )));
        }
        let version = tag[3];
        if version != FORMAT_VERSION {
            return Err(malformed(format!("unsupported format version {version}")));
        }
        if blob.len() < HEADER_LEN {
            return Err(LercError::truncated(r.position(), HEADER_LEN - blob.len()));
        }

        let checksum = r.read_u32()?;
        let blob_size = r.read_u32()?;
        let flag_bits = r.read_u8()?;
        let flags = HeaderFlags::from_bits(flag_bits)
            .ok_or_else(|| malformed(format!("unknown flag bits {flag_bits:#04X}")))?;
        let dt_code = r.read_u8()?;
        let data_type = DataType::from_code(dt_code)
            .ok_or_else(|| malformed(format!("unknown data type code {dt_code}")))?;

        let header = Self {
            version,
            checksum,
            blob_size,
            flags,
            data_type,
            tile_size: r.read_u16()?,
            width: r.read_u32()?,
            height: r.read_u32()?,
            band_count: r.read_u32()?,
            valid_pixel_count: r.read_u32()?,
            max_z_error: r.read_f64()?,
            min_value: r.read_f64()?,
            max_value: r.read_f64()?,
            no_data_value: r.read_f64()?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.band_count == 0 {
            return Err(malformed(format!(
                "zero dimension {}x{}x{}",
                self.width, self.height, self.band_count
            )));
        }
        if crate::raster::sample_count(self.width, self.height, self.band_count).is_none() {
            return Err(malformed("dimensions overflow the address space".into()));
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(malformed(format!("tile size {} out of range", self.tile_size)));
        }
        if (self.blob_size as usize) < HEADER_LEN {
            return Err(malformed(format!("blob size {} below header size", self.blob_size)));
        }
        let pixels = self.pixel_count();
        let valid = self.valid_pixel_count as usize;
        if valid > pixels {
            return Err(malformed(format!("{valid} valid pixels in a {pixels}-pixel grid")));
        }
        if !self.mask_present() && valid != pixels {
            return Err(malformed(format!(
                "no mask but only {valid} of {pixels} pixels valid"
            )));
        }
        if !(self.max_z_error.is_finite() && self.max_z_error >= 0.0) {
            return Err(malformed(format!("bad max error {}", self.max_z_error)));
        }
        for (name, v) in [
            ("min", self.min_value),
            ("max", self.max_value),
            ("noData", self.no_data_value),
        ] {
            if !v.is_finite() {
                return Err(malformed(format!("non-finite {name} value {v}")));
            }
        }
        if valid > 0 && self.min_value > self.max_value {
            return Err(malformed(format!(
                "min {} above max {}",
                self.min_value, self.max_value
            )));
        }
        Ok(())
    }
}

fn malformed(msg: String) -> LercError {
    LercError::MalformedHeader(msg)
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Checksum field value for `blob`: Adler-32 over `[CHECKSUM_START, blob_size)`.
///
/// Bytes past `blob_size` are not covered, so concatenated blobs hash the
/// same as standalone ones.
pub fn blob_checksum(blob: &[u8], blob_size: u32) -> Result<u32> {
    let end = blob_size as usize;
    if end < HEADER_LEN {
        return Err(malformed(format!("blob size {end} below header size")));
    }
    let covered = blob
        .get(CHECKSUM_START..end)
        .ok_or_else(|| LercError::truncated(blob.len(), end - blob.len()))?;
    Ok(adler32(covered))
}

fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const BASE: u32 = 65521;
        // Largest block before `b` can overflow a u32 between reductions.
        const BLOCK: usize = 5552;
        let (mut a, mut b) = (1u32, 0u32);
        for block in data.chunks(BLOCK) {
            for &byte in block {
                a += u32::from(byte);
                b += a;
            }
            a %= BASE;
            b %= BASE;
        }
        (b << 16) | a
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
