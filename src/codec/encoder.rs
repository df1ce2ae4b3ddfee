// Raster-to-blob encoder.
//
// Two passes over one output buffer: a placeholder header is written
// first, then the mask section and one length-prefixed section per band.
// Once every tile has been visited the global statistics are known, the
// cursor is rewound and the final header is re-emitted in place. The
// checksum is patched into the buffer last, before it is handed out.

use crate::error::{LercError, Result};
use crate::format::bitstream::BitWriter;
use crate::format::header::{
    self, BlobHeader, FORMAT_VERSION, HeaderFlags, MAX_TILE_SIZE,
};
use crate::format::mask;
use crate::format::quantizer::{effective_tolerance, f32_tolerance};
use crate::format::tile::{BandStats, TileEncoder};
use crate::raster::{DataType, Raster, ValidityMask};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const DEFAULT_TILE_SIZE: u16 = 8;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`encode`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// Maximum absolute reconstruction error per valid sample. `0` requests
    /// lossless coding. Integer rasters use `floor(tolerance)`.
    pub tolerance: f64,
    /// Tile edge length in pixels (1..=256).
    pub tile_size: u16,
    /// Value reported for invalid pixels on decode. Must be representable in
    /// the raster's data type.
    pub no_data_value: f64,
    /// Emit an Adler-32 checksum over the blob body.
    pub checksum: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            tile_size: DEFAULT_TILE_SIZE,
            no_data_value: 0.0,
            checksum: true,
        }
    }
}

impl EncodeOptions {
    /// Default options with the given tolerance.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Default::default()
        }
    }

    fn validate(&self, raster: &Raster) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(LercError::InvalidOptions(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(LercError::InvalidOptions(format!(
                "tile size must be 1..={MAX_TILE_SIZE}, got {}",
                self.tile_size
            )));
        }
        if !raster.data_type().represents(self.no_data_value) {
            return Err(LercError::InvalidOptions(format!(
                "noData value {} is not representable as {:?}",
                self.no_data_value,
                raster.data_type()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `raster` into a self-describing blob.
///
/// `mask` marks which pixels carry data (shared by all bands); `None` means
/// every pixel is valid. Invalid pixels are not coded and decode as the
/// noData value.
pub fn encode(
    raster: &Raster,
    mask: Option<&ValidityMask>,
    opts: &EncodeOptions,
) -> Result<Vec<u8>> {
    opts.validate(raster)?;

    let pixels = raster.pixel_count();
    if u32::try_from(pixels).is_err() {
        return Err(LercError::InvalidRaster(format!(
            "{pixels} pixels per band exceeds the format limit"
        )));
    }
    if let Some(m) = mask
        && (m.width() != raster.width() || m.height() != raster.height())
    {
        return Err(LercError::InvalidRaster(format!(
            "mask is {}x{}, raster is {}x{}",
            m.width(),
            m.height(),
            raster.width(),
            raster.height()
        )));
    }

    let data_type = raster.data_type();
    let bound = effective_tolerance(opts.tolerance, data_type);
    let valid_count = mask.map_or(pixels, ValidityMask::count_valid);
    // An all-valid mask carries no information.
    let mask = mask.filter(|_| valid_count < pixels);
    // f32 output rounds every reconstruction once more; quantize finer so
    // the rounded value still lands within `bound`.
    let tolerance = if data_type == DataType::F32 && bound > 0.0 {
        f32_tolerance(bound, max_abs_valid(raster, mask))
    } else {
        bound
    };

    let mut flags = HeaderFlags::empty();
    if mask.is_some() {
        flags |= HeaderFlags::MASK_PRESENT;
    }
    if opts.checksum {
        flags |= HeaderFlags::CHECKSUM;
    }
    let mut header = BlobHeader {
        version: FORMAT_VERSION,
        checksum: 0,
        blob_size: 0,
        flags,
        data_type,
        tile_size: opts.tile_size,
        width: raster.width(),
        height: raster.height(),
        band_count: raster.band_count(),
        valid_pixel_count: valid_count as u32,
        max_z_error: tolerance,
        min_value: 0.0,
        max_value: 0.0,
        no_data_value: opts.no_data_value,
    };

    let mut w =
        BitWriter::with_capacity(header::HEADER_LEN + pixels * raster.band_count() as usize);
    header.encode(&mut w);

    if let Some(m) = mask {
        let rle = mask::encode(m);
        w.write_varint(rle.len() as u64);
        w.write_bytes(&rle);
    }

    let mut stats = BandStats::default();
    for (section, band_stats) in encode_bands(raster, mask, opts.tile_size, tolerance, bound)? {
        w.write_varint(section.len() as u64);
        w.write_bytes(&section);
        stats.merge(&band_stats);
    }

    header.blob_size = u32::try_from(w.len()).map_err(|_| {
        LercError::InvalidRaster(format!("encoded blob of {} bytes exceeds 4 GiB", w.len()))
    })?;
    if valid_count > 0 {
        header.min_value = stats.min;
        header.max_value = stats.max;
    }

    w.rewind(0);
    header.encode(&mut w);
    w.seek_end();
    if opts.checksum {
        let bytes = w.bytes_mut();
        let sum = header::blob_checksum(bytes, header.blob_size)?;
        bytes[4..8].copy_from_slice(&sum.to_le_bytes());
    }
    let blob = w.finish();

    log::debug!(
        "encoded {}x{}x{} {:?} raster: {} bytes, {} valid pixels (mask: {}), tiles {:?}",
        raster.width(),
        raster.height(),
        raster.band_count(),
        data_type,
        blob.len(),
        valid_count,
        mask.is_some(),
        stats.tiles
    );
    Ok(blob)
}

/// Largest finite magnitude among the valid samples of every band.
fn max_abs_valid(raster: &Raster, mask: Option<&ValidityMask>) -> f64 {
    let pixels = raster.pixel_count();
    let samples = raster.samples();
    (0..samples.len())
        .filter(|&i| mask.is_none_or(|m| m.is_valid(i % pixels)))
        .map(|i| samples.get(i).abs())
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Encode each band into its own buffer, in band order.
///
/// Tiles quantize with `tolerance`; `bound` is the error every decoded
/// sample must respect.
fn encode_bands(
    raster: &Raster,
    mask: Option<&ValidityMask>,
    tile_size: u16,
    tolerance: f64,
    bound: f64,
) -> Result<Vec<(Vec<u8>, BandStats)>> {
    let encode_one = |band: u32| -> Result<(Vec<u8>, BandStats)> {
        let mut w = BitWriter::with_capacity(raster.pixel_count());
        let stats = TileEncoder::new(raster, band, mask, u32::from(tile_size), tolerance)
            .with_bound(bound)
            .encode_band(&mut w)?;
        Ok((w.finish(), stats))
    };

    #[cfg(feature = "parallel")]
    {
        (0..raster.band_count())
            .into_par_iter()
            .map(encode_one)
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..raster.band_count()).map(encode_one).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::header::HEADER_LEN;

    #[test]
    fn constant_uint8_blob_is_header_plus_marker() {
        let raster = Raster::new(4, 4, 1, vec![0u8; 16]).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::default()).unwrap();
        // header + band length varint + constant marker + i8 value
        assert_eq!(blob.len(), HEADER_LEN + 1 + 2);
        let h = BlobHeader::decode(&blob).unwrap();
        assert_eq!(h.blob_size as usize, blob.len());
        assert_eq!(h.valid_pixel_count, 16);
        assert!(!h.mask_present());
    }

    #[test]
    fn header_is_patched_after_traversal() {
        let values: Vec<i16> = (0..100).map(|i| i * 3 - 50).collect();
        let raster = Raster::new(10, 10, 1, values).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::default()).unwrap();
        let h = BlobHeader::decode(&blob).unwrap();
        assert_eq!(h.min_value, -50.0);
        assert_eq!(h.max_value, 247.0);
        assert_eq!(h.checksum, header::blob_checksum(&blob, h.blob_size).unwrap());
    }

    #[test]
    fn all_valid_mask_is_dropped() {
        let raster = Raster::new(3, 3, 1, vec![1u8; 9]).unwrap();
        let mask = ValidityMask::all_valid(3, 3);
        let with = encode(&raster, Some(&mask), &EncodeOptions::default()).unwrap();
        let without = encode(&raster, None, &EncodeOptions::default()).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn integer_tolerance_is_floored() {
        let raster = Raster::new(2, 2, 1, vec![1u16, 5, 9, 13]).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::with_tolerance(1.9)).unwrap();
        assert_eq!(BlobHeader::decode(&blob).unwrap().max_z_error, 1.0);
    }

    #[test]
    fn f32_tolerance_is_narrowed_for_output_rounding() {
        let values: Vec<f32> = (0..64).map(|i| 1000.0 + i as f32 * 0.37).collect();
        let raster = Raster::new(8, 8, 1, values).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::with_tolerance(1e-4)).unwrap();
        // f32 spacing near 1000 exceeds the tolerance, so the floor applies.
        assert_eq!(BlobHeader::decode(&blob).unwrap().max_z_error, 1e-4 / 2.0);

        let values: Vec<f32> = (0..64).map(|i| i as f32 * 0.37).collect();
        let raster = Raster::new(8, 8, 1, values).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::with_tolerance(0.01)).unwrap();
        let stored = BlobHeader::decode(&blob).unwrap().max_z_error;
        assert!(stored < 0.01 && stored > 0.0099, "{stored}");

        let values: Vec<f64> = (0..64).map(|i| 1000.0 + f64::from(i) * 0.37).collect();
        let raster = Raster::new(8, 8, 1, values).unwrap();
        let blob = encode(&raster, None, &EncodeOptions::with_tolerance(1e-4)).unwrap();
        assert_eq!(BlobHeader::decode(&blob).unwrap().max_z_error, 1e-4);
    }

    #[test]
    fn rejects_bad_options() {
        let raster = Raster::new(2, 2, 1, vec![0u8; 4]).unwrap();
        for opts in [
            EncodeOptions::with_tolerance(-1.0),
            EncodeOptions::with_tolerance(f64::NAN),
            EncodeOptions {
                tile_size: 0,
                ..Default::default()
            },
            EncodeOptions {
                tile_size: 300,
                ..Default::default()
            },
            EncodeOptions {
                no_data_value: -9999.0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                encode(&raster, None, &opts),
                Err(LercError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn rejects_mismatched_mask() {
        let raster = Raster::new(2, 2, 1, vec![0u8; 4]).unwrap();
        let mask = ValidityMask::all_invalid(3, 2);
        assert!(matches!(
            encode(&raster, Some(&mask), &EncodeOptions::default()),
            Err(LercError::InvalidRaster(_))
        ));
    }

    #[test]
    fn rejects_non_finite_valid_samples_only() {
        let raster = Raster::new(2, 1, 1, vec![f32::NAN, 1.0]).unwrap();
        assert!(matches!(
            encode(&raster, None, &EncodeOptions::default()),
            Err(LercError::InvalidRaster(_))
        ));
        let mask = ValidityMask::from_bools(2, 1, &[false, true]).unwrap();
        assert!(encode(&raster, Some(&mask), &EncodeOptions::default()).is_ok());
    }

    #[test]
    fn lossless_float_request_needs_integral_samples() {
        let raster = Raster::new(2, 1, 1, vec![0.5f64, 1.0]).unwrap();
        assert!(matches!(
            encode(&raster, None, &EncodeOptions::default()),
            Err(LercError::LossyRequired { value }) if value == 0.5
        ));
    }
}
