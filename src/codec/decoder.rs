// Blob-to-raster decoder.
//
// Decoding follows a fixed state progression:
//
//   Start -> HeaderParsed -> MaskParsed -> BandDecoding(0..n) -> Complete
//
// Any error moves the decoder to `Failed` and nothing decoded so far is
// handed back.

use crate::error::{LercError, Result};
use crate::format::bitstream::BitReader;
use crate::format::header::{self, BlobHeader, HEADER_LEN, HeaderFlags};
use crate::format::mask;
use crate::format::tile::{TileCounts, TileDecoder, TileGrid};
use crate::raster::{self, DataType, OverflowPolicy, Raster, Samples, ValidityMask};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Configuration for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Behaviour when a decoded value does not fit the requested type.
    pub on_overflow: OverflowPolicy,
    /// Verify the blob checksum when one is present.
    pub verify_checksum: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            on_overflow: OverflowPolicy::Fail,
            verify_checksum: true,
        }
    }
}

/// Blob metadata, available without decoding any tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LercInfo {
    pub width: u32,
    pub height: u32,
    pub band_count: u32,
    pub data_type: DataType,
    pub valid_pixel_count: u32,
    pub min_value: f64,
    pub max_value: f64,
    pub no_data_value: f64,
    pub max_z_error: f64,
    pub tile_size: u16,
    pub blob_size: u32,
    pub mask_present: bool,
}

impl From<&BlobHeader> for LercInfo {
    fn from(h: &BlobHeader) -> Self {
        Self {
            width: h.width,
            height: h.height,
            band_count: h.band_count,
            data_type: h.data_type,
            valid_pixel_count: h.valid_pixel_count,
            min_value: h.min_value,
            max_value: h.max_value,
            no_data_value: h.no_data_value,
            max_z_error: h.max_z_error,
            tile_size: h.tile_size,
            blob_size: h.blob_size,
            mask_present: h.mask_present(),
        }
    }
}

/// A fully decoded blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub info: LercInfo,
    pub raster: Raster,
    /// Validity of each pixel (all valid when the blob carries no mask).
    pub mask: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Start,
    HeaderParsed,
    MaskParsed,
    BandDecoding(u32),
    Complete,
    Failed,
}

// ---------------------------------------------------------------------------
// BlobDecoder
// ---------------------------------------------------------------------------

/// Step-by-step decoder over one blob.
///
/// # Example
/// ```no_run
/// use lercrs::codec::decoder::{BlobDecoder, DecodeOptions, DecodeState};
/// use lercrs::DataType;
/// # let blob: Vec<u8> = Vec::new();
/// let mut dec = BlobDecoder::new(&blob, DecodeOptions::default());
/// let result = dec.decode(DataType::F32);
/// assert_eq!(dec.state() == DecodeState::Complete, result.is_ok());
/// ```
pub struct BlobDecoder<'a> {
    blob: &'a [u8],
    opts: DecodeOptions,
    state: DecodeState,
    header: Option<BlobHeader>,
    mask: Option<ValidityMask>,
    cursor: usize,
    tiles: TileCounts,
}

impl<'a> BlobDecoder<'a> {
    pub fn new(blob: &'a [u8], opts: DecodeOptions) -> Self {
        Self {
            blob,
            opts,
            state: DecodeState::Start,
            header: None,
            mask: None,
            cursor: 0,
            tiles: TileCounts::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Header, once parsed.
    pub fn header(&self) -> Option<&BlobHeader> {
        self.header.as_ref()
    }

    /// Tile mix seen so far.
    pub fn tile_counts(&self) -> TileCounts {
        self.tiles
    }

    fn transition(&mut self, next: DecodeState) {
        log::trace!("decoder: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Decode the whole blob and convert samples to `data_type`.
    pub fn decode(&mut self, data_type: DataType) -> Result<Decoded> {
        self.ensure_fresh()?;
        let result = self.run().and_then(|(header, mask, values)| {
            let samples = Samples::from_f64(data_type, &values, self.opts.on_overflow)?;
            let raster = Raster::new(header.width, header.height, header.band_count, samples)?;
            let mask = mask.unwrap_or_else(|| ValidityMask::all_valid(header.width, header.height));
            Ok(Decoded {
                info: LercInfo::from(&header),
                raster,
                mask,
            })
        });
        self.settle(result)
    }

    /// Decode the whole blob to `f64` samples (band-major).
    pub fn decode_values(&mut self) -> Result<(BlobHeader, Option<ValidityMask>, Vec<f64>)> {
        self.ensure_fresh()?;
        let result = self.run();
        self.settle(result)
    }

    fn ensure_fresh(&self) -> Result<()> {
        if self.state != DecodeState::Start {
            return Err(LercError::InvalidOptions(format!(
                "decoder already used (state {:?})",
                self.state
            )));
        }
        Ok(())
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                if self.state != DecodeState::Complete {
                    self.transition(DecodeState::Complete);
                }
            }
            Err(e) => {
                log::debug!("decode failed in state {:?}: {e}", self.state);
                self.transition(DecodeState::Failed);
            }
        }
        result
    }

    fn run(&mut self) -> Result<(BlobHeader, Option<ValidityMask>, Vec<f64>)> {
        let header = self.parse_header()?;
        self.parse_mask(&header)?;
        let values = self.decode_bands(&header)?;
        log::debug!(
            "decoded {}x{}x{} {:?} blob of {} bytes, tiles {:?}",
            header.width,
            header.height,
            header.band_count,
            header.data_type,
            header.blob_size,
            self.tiles
        );
        Ok((header, self.mask.take(), values))
    }

    fn parse_header(&mut self) -> Result<BlobHeader> {
        let header = BlobHeader::decode(self.blob)?;
        let size = header.blob_size as usize;
        if self.blob.len() < size {
            return Err(LercError::truncated(self.blob.len(), size - self.blob.len()));
        }
        // Bytes past blobSize belong to whatever follows the blob.
        self.blob = &self.blob[..size];

        if self.opts.verify_checksum {
            if header.flags.contains(HeaderFlags::CHECKSUM) {
                let actual = header::blob_checksum(self.blob, header.blob_size)?;
                if actual != header.checksum {
                    return Err(LercError::ChecksumMismatch {
                        expected: header.checksum,
                        actual,
                    });
                }
            } else {
                log::warn!("blob carries no checksum; integrity not verified");
            }
        }

        // Every tile costs at least its marker byte; reject grids the body
        // cannot possibly hold before sizing any buffer from them.
        let tiles = grid_for(&header).tile_count() as u64 * u64::from(header.band_count);
        let body = (size - HEADER_LEN) as u64;
        if tiles > body {
            return Err(LercError::CorruptStream(format!(
                "{tiles} tiles cannot fit in a {body}-byte body"
            )));
        }

        self.cursor = HEADER_LEN;
        self.header = Some(header.clone());
        self.transition(DecodeState::HeaderParsed);
        Ok(header)
    }

    fn parse_mask(&mut self, header: &BlobHeader) -> Result<()> {
        if header.mask_present() {
            let mut r = BitReader::at(self.blob, self.cursor);
            let len = r.read_varint_usize()?;
            let bytes = r.read_bytes(len)?;
            let mask = mask::decode(bytes, header.width, header.height)?;
            let valid = mask.count_valid();
            if valid != header.valid_pixel_count as usize {
                return Err(LercError::CorruptMask(format!(
                    "mask has {valid} valid pixels, header declares {}",
                    header.valid_pixel_count
                )));
            }
            self.cursor = r.position();
            self.mask = Some(mask);
        }
        self.transition(DecodeState::MaskParsed);
        Ok(())
    }

    /// Find the `[start, end)` byte range of every band section.
    fn locate_bands(&mut self, header: &BlobHeader) -> Result<Vec<(usize, usize)>> {
        let min_len = grid_for(header).tile_count();
        let mut r = BitReader::at(self.blob, self.cursor);
        let mut sections = Vec::with_capacity(header.band_count as usize);
        for band in 0..header.band_count {
            let len = r.read_varint_usize()?;
            if len < min_len {
                return Err(LercError::CorruptStream(format!(
                    "band {band} section of {len} bytes is shorter than its {min_len} tiles"
                )));
            }
            let start = r.position();
            r.read_bytes(len)?;
            sections.push((start, r.position()));
        }
        if r.remaining() > 0 {
            return Err(LercError::CorruptStream(format!(
                "{} bytes after the last band",
                r.remaining()
            )));
        }
        self.cursor = r.position();
        Ok(sections)
    }

    fn decode_bands(&mut self, header: &BlobHeader) -> Result<Vec<f64>> {
        let sections = self.locate_bands(header)?;
        let pixels = header.pixel_count();
        let decoder = TileDecoder::new(
            grid_for(header),
            self.mask.as_ref(),
            header.max_z_error,
            (header.min_value, header.max_value),
            header.no_data_value,
        );
        let blob = self.blob;
        let mut values = vec![0.0f64; pixels * header.band_count as usize];

        #[cfg(feature = "parallel")]
        {
            self.state = DecodeState::BandDecoding(0);
            let counts = values
                .par_chunks_mut(pixels)
                .zip(sections.par_iter())
                .map(|(out, &(start, end))| decoder.decode_band(&blob[..end], start, out))
                .collect::<Result<Vec<_>>>()?;
            for c in &counts {
                self.tiles.merge(c);
            }
        }
        #[cfg(not(feature = "parallel"))]
        {
            for (band, (out, &(start, end))) in
                values.chunks_mut(pixels).zip(&sections).enumerate()
            {
                log::trace!("decoder: band {band} at bytes {start}..{end}");
                self.state = DecodeState::BandDecoding(band as u32);
                let counts = decoder.decode_band(&blob[..end], start, out)?;
                self.tiles.merge(&counts);
            }
        }
        Ok(values)
    }
}

fn grid_for(header: &BlobHeader) -> TileGrid {
    TileGrid::new(header.width, header.height, u32::from(header.tile_size))
}

// ---------------------------------------------------------------------------
// Convenience entry points
// ---------------------------------------------------------------------------

/// Read blob metadata from the header alone.
pub fn get_info(blob: &[u8]) -> Result<LercInfo> {
    BlobHeader::decode(blob).map(|h| LercInfo::from(&h))
}

/// Decode `blob` into a raster of `data_type` plus its validity mask.
pub fn decode(blob: &[u8], data_type: DataType, opts: &DecodeOptions) -> Result<Decoded> {
    BlobDecoder::new(blob, opts.clone()).decode(data_type)
}

/// Decode into a flat buffer, checking caller-declared dimensions.
///
/// This is the shape host bindings call with: the caller already knows the
/// dimensions (usually from [`get_info`]) and optionally wants the mask as
/// one byte per pixel (`1` valid, `0` invalid) in `mask_out`.
pub fn decode_into(
    blob: &[u8],
    mask_out: Option<&mut [u8]>,
    width: u32,
    height: u32,
    band_count: u32,
    data_type: DataType,
    opts: &DecodeOptions,
) -> Result<Samples> {
    let info = get_info(blob)?;
    let declared = raster::sample_count(info.width, info.height, info.band_count).unwrap_or(0);
    let requested = raster::sample_count(width, height, band_count).ok_or_else(|| {
        LercError::InvalidOptions(format!("{width}x{height}x{band_count} overflows"))
    })?;
    if requested > declared {
        return Err(LercError::truncated(
            blob.len(),
            (requested - declared) * info.data_type.size(),
        ));
    }
    if (width, height, band_count) != (info.width, info.height, info.band_count) {
        return Err(LercError::DimensionMismatch {
            expected: format!("{}x{}x{}", info.width, info.height, info.band_count),
            actual: format!("{width}x{height}x{band_count}"),
        });
    }
    if let Some(out) = &mask_out {
        let pixels = width as usize * height as usize;
        if out.len() != pixels {
            return Err(LercError::InvalidOptions(format!(
                "mask buffer holds {} bytes, need {pixels}",
                out.len()
            )));
        }
    }

    let decoded = decode(blob, data_type, opts)?;
    if let Some(out) = mask_out {
        for (dst, valid) in out.iter_mut().zip(decoded.mask.iter()) {
            *dst = u8::from(valid);
        }
    }
    Ok(decoded.raster.into_samples())
}

/// Decode every sample to `f64`, the form terrain renderers consume.
pub fn decode_f64(blob: &[u8]) -> Result<(LercInfo, Vec<f64>)> {
    let mut dec = BlobDecoder::new(blob, DecodeOptions::default());
    let (header, _, values) = dec.decode_values()?;
    Ok((LercInfo::from(&header), values))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
