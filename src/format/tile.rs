// Tile encoding and decoding for one band.
//
// A band is cut into `tile_size × tile_size` tiles in row-major tile
// order; tiles on the right and bottom edges are clipped to the raster.
// Only valid pixels are coded. Every tile starts on a byte boundary with a
// marker byte:
//
//   bits 0-1  kind: 0 empty, 1 constant, 2 packed, 3 raw
//   bits 2-4  storage type of the value(s) that follow (DataType code)
//   bits 5-7  reserved, zero
//
// empty     marker only (type bits zero)
// constant  marker, value
// packed    marker, offset, bit width (u8), ceil(n * width / 8) bytes of
//           MSB-first codes, n = valid pixels in the tile
// raw       marker, n values in the raster's own type (code range too wide
//           to pack into 32 bits, or float reconstructions that would
//           leave the error bound once rounded to the raster's type)

use crate::error::{LercError, Result};
use crate::raster::{DataType, Raster, Samples, ValidityMask};

use super::bitstream::{BitReader, BitWriter};
use super::quantizer::{self, Quantized, bit_width, dequantize_one};

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

pub const TILE_EMPTY: u8 = 0;
pub const TILE_CONSTANT: u8 = 1;
pub const TILE_PACKED: u8 = 2;
pub const TILE_RAW: u8 = 3;

const KIND_MASK: u8 = 0b0000_0011;
const TYPE_SHIFT: u8 = 2;
const TYPE_MASK: u8 = 0b0001_1100;
const RESERVED_MASK: u8 = 0b1110_0000;

/// Widest code the packed form stores.
pub const MAX_PACKED_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Empty,
    Constant,
    Packed,
    Raw,
}

#[inline]
fn marker(kind: u8, data_type: DataType) -> u8 {
    kind | (data_type.code() << TYPE_SHIFT)
}

/// Split a marker byte into kind and storage type.
pub fn parse_marker(byte: u8, offset: usize) -> Result<(TileKind, DataType)> {
    let unsupported = || LercError::UnsupportedTileMarker {
        marker: byte,
        offset,
    };
    if byte & RESERVED_MASK != 0 {
        return Err(unsupported());
    }
    let data_type =
        DataType::from_code((byte & TYPE_MASK) >> TYPE_SHIFT).ok_or_else(unsupported)?;
    let kind = match byte & KIND_MASK {
        TILE_EMPTY if byte == TILE_EMPTY => TileKind::Empty,
        TILE_EMPTY => return Err(unsupported()),
        TILE_CONSTANT => TileKind::Constant,
        TILE_PACKED => TileKind::Packed,
        _ => TileKind::Raw,
    };
    Ok((kind, data_type))
}

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// Clipped tile rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub row: u32,
    pub col: u32,
    pub rows: u32,
    pub cols: u32,
}

impl TileRect {
    #[inline]
    pub fn area(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Row-major pixel indices (within the band) covered by this tile.
    pub fn pixel_indices(self, width: u32) -> impl Iterator<Item = usize> {
        let w = width as usize;
        (self.row..self.row + self.rows).flat_map(move |r| {
            let start = r as usize * w + self.col as usize;
            start..start + self.cols as usize
        })
    }
}

/// Partition of a `width × height` band into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        debug_assert!(tile_size > 0);
        Self {
            width,
            height,
            tile_size,
        }
    }

    #[inline]
    pub fn tiles_across(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    #[inline]
    pub fn tiles_down(&self) -> u32 {
        self.height.div_ceil(self.tile_size)
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.tiles_across() as usize * self.tiles_down() as usize
    }

    /// Tiles in row-major tile order.
    pub fn tiles(self) -> impl Iterator<Item = TileRect> {
        let ts = self.tile_size;
        (0..self.tiles_down()).flat_map(move |ty| {
            (0..self.tiles_across()).map(move |tx| {
                let row = ty * ts;
                let col = tx * ts;
                TileRect {
                    row,
                    col,
                    rows: ts.min(self.height - row),
                    cols: ts.min(self.width - col),
                }
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileCounts {
    pub empty: usize,
    pub constant: usize,
    pub packed: usize,
    pub raw: usize,
}

impl TileCounts {
    fn record(&mut self, kind: TileKind) {
        match kind {
            TileKind::Empty => self.empty += 1,
            TileKind::Constant => self.constant += 1,
            TileKind::Packed => self.packed += 1,
            TileKind::Raw => self.raw += 1,
        }
    }

    pub fn merge(&mut self, other: &TileCounts) {
        self.empty += other.empty;
        self.constant += other.constant;
        self.packed += other.packed;
        self.raw += other.raw;
    }

    pub fn total(&self) -> usize {
        self.empty + self.constant + self.packed + self.raw
    }
}

/// Value range and tile mix of one encoded band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
    /// Minimum over valid pixels (`+inf` if none).
    pub min: f64,
    /// Maximum over valid pixels (`-inf` if none).
    pub max: f64,
    pub tiles: TileCounts,
}

impl Default for BandStats {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            tiles: TileCounts::default(),
        }
    }
}

impl BandStats {
    pub fn merge(&mut self, other: &BandStats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.tiles.merge(&other.tiles);
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode one tile's valid samples.
///
/// `tolerance` sets the quantization step. `bound` is the error each
/// decoded sample may carry once narrowed to `data_type`; float tiles that
/// would exceed it are stored raw. `data_type` is the raster's type.
pub fn encode_tile(
    values: &[f64],
    tolerance: f64,
    bound: f64,
    data_type: DataType,
    w: &mut BitWriter,
) -> Result<TileKind> {
    if values.is_empty() {
        w.write_u8(TILE_EMPTY);
        return Ok(TileKind::Empty);
    }

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if min == max {
        write_constant(min, w);
        return Ok(TileKind::Constant);
    }

    let q = quantizer::quantize(values, tolerance)?;
    if q.max_code > u32::MAX as f64
        || (!data_type.is_integer() && !within_bound(&q, values, bound, data_type))
    {
        w.write_u8(marker(TILE_RAW, data_type));
        for &v in values {
            w.write_typed(v, data_type);
        }
        return Ok(TileKind::Raw);
    }
    if q.max_code == 0.0 {
        write_constant(q.offset, w);
        return Ok(TileKind::Constant);
    }

    let bits = bit_width(q.max_code as u64);
    let offset_type = DataType::smallest_exact(q.offset);
    w.write_u8(marker(TILE_PACKED, offset_type));
    w.write_typed(q.offset, offset_type);
    w.write_u8(bits as u8);
    for &code in &q.codes {
        w.write_bits(code, bits);
    }
    w.align();
    Ok(TileKind::Packed)
}

/// Whether every reconstruction stays within `bound` of its sample, both
/// as computed and after rounding to `data_type`.
fn within_bound(q: &Quantized, values: &[f64], bound: f64, data_type: DataType) -> bool {
    q.codes.iter().zip(values).all(|(&code, &v)| {
        let r = dequantize_one(code, q.scale, q.offset);
        let narrowed = match data_type {
            DataType::F32 => f64::from(r as f32),
            _ => r,
        };
        (r - v).abs() <= bound && (narrowed - v).abs() <= bound
    })
}

fn write_constant(value: f64, w: &mut BitWriter) {
    let dt = DataType::smallest_exact(value);
    w.write_u8(marker(TILE_CONSTANT, dt));
    w.write_typed(value, dt);
}

/// Encodes every tile of one band.
pub struct TileEncoder<'a> {
    samples: &'a Samples,
    base: usize,
    grid: TileGrid,
    mask: Option<&'a ValidityMask>,
    tolerance: f64,
    bound: f64,
}

impl<'a> TileEncoder<'a> {
    pub fn new(
        raster: &'a Raster,
        band: u32,
        mask: Option<&'a ValidityMask>,
        tile_size: u32,
        tolerance: f64,
    ) -> Self {
        Self {
            samples: raster.samples(),
            base: band as usize * raster.pixel_count(),
            grid: TileGrid::new(raster.width(), raster.height(), tile_size),
            mask,
            tolerance,
            bound: tolerance,
        }
    }

    /// Error bound checked on decoded samples, when it differs from the
    /// quantization tolerance.
    pub fn with_bound(mut self, bound: f64) -> Self {
        self.bound = bound;
        self
    }

    #[inline]
    fn is_valid(&self, idx: usize) -> bool {
        self.mask.is_none_or(|m| m.is_valid(idx))
    }

    /// Append every tile of the band to `w`, byte-aligned.
    pub fn encode_band(&self, w: &mut BitWriter) -> Result<BandStats> {
        let data_type = self.samples.data_type();
        let mut stats = BandStats::default();
        let mut values = Vec::with_capacity((self.grid.tile_size * self.grid.tile_size) as usize);

        for rect in self.grid.tiles() {
            values.clear();
            for idx in rect.pixel_indices(self.grid.width) {
                if !self.is_valid(idx) {
                    continue;
                }
                let v = self.samples.get(self.base + idx);
                if !v.is_finite() {
                    return Err(LercError::InvalidRaster(format!(
                        "non-finite valid sample {v} at pixel {idx}"
                    )));
                }
                stats.min = stats.min.min(v);
                stats.max = stats.max.max(v);
                values.push(v);
            }
            let kind = encode_tile(&values, self.tolerance, self.bound, data_type, w)?;
            stats.tiles.record(kind);
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one tile holding `valid_count` coded samples into `out`.
///
/// Packed values are clamped into `range` (the blob's global min/max).
pub fn decode_tile(
    r: &mut BitReader<'_>,
    valid_count: usize,
    scale: f64,
    range: (f64, f64),
    out: &mut Vec<f64>,
) -> Result<TileKind> {
    out.clear();
    let offset = r.position();
    let byte = r.read_u8()?;
    let (kind, data_type) = parse_marker(byte, offset)?;

    if kind == TileKind::Empty {
        if valid_count != 0 {
            return Err(LercError::CorruptStream(format!(
                "empty tile at offset {offset} covers {valid_count} valid pixels"
            )));
        }
        return Ok(kind);
    }
    if valid_count == 0 {
        return Err(LercError::CorruptStream(format!(
            "tile at offset {offset} has data but no valid pixels"
        )));
    }

    match kind {
        TileKind::Empty => {}
        TileKind::Constant => {
            let value = finite(r.read_typed(data_type)?, offset)?;
            out.resize(valid_count, value);
        }
        TileKind::Packed => {
            let base = finite(r.read_typed(data_type)?, offset)?;
            let bits = u32::from(r.read_u8()?);
            if bits == 0 || bits > MAX_PACKED_BITS {
                return Err(LercError::CorruptStream(format!(
                    "bit width {bits} in tile at offset {offset}"
                )));
            }
            let n_bytes = (valid_count as u64 * u64::from(bits)).div_ceil(8);
            let n_bytes = usize::try_from(n_bytes).map_err(|_| {
                LercError::CorruptStream(format!("tile at offset {offset} too large"))
            })?;
            let packed = r.read_bytes(n_bytes)?;
            let mut codes = BitReader::new(packed);
            out.reserve(valid_count);
            for _ in 0..valid_count {
                let code = codes.read_bits(bits)?;
                out.push(dequantize_one(code, scale, base).max(range.0).min(range.1));
            }
        }
        TileKind::Raw => {
            out.reserve(valid_count);
            for _ in 0..valid_count {
                out.push(finite(r.read_typed(data_type)?, offset)?);
            }
        }
    }
    Ok(kind)
}

fn finite(v: f64, offset: usize) -> Result<f64> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(LercError::CorruptStream(format!(
            "non-finite value in tile at offset {offset}"
        )))
    }
}

/// Decodes every tile of one band.
pub struct TileDecoder<'a> {
    grid: TileGrid,
    mask: Option<&'a ValidityMask>,
    scale: f64,
    range: (f64, f64),
    no_data: f64,
}

impl<'a> TileDecoder<'a> {
    pub fn new(
        grid: TileGrid,
        mask: Option<&'a ValidityMask>,
        tolerance: f64,
        range: (f64, f64),
        no_data: f64,
    ) -> Self {
        Self {
            grid,
            mask,
            scale: quantizer::scale_for(tolerance),
            range,
            no_data,
        }
    }

    #[inline]
    fn is_valid(&self, idx: usize) -> bool {
        self.mask.is_none_or(|m| m.is_valid(idx))
    }

    /// Decode the band section `data[start..]` into `out` (one band, row
    /// major). Invalid pixels receive the noData value. The section must be
    /// consumed exactly.
    pub fn decode_band(&self, data: &[u8], start: usize, out: &mut [f64]) -> Result<TileCounts> {
        debug_assert_eq!(out.len(), self.grid.width as usize * self.grid.height as usize);
        out.fill(self.no_data);

        let mut r = BitReader::at(data, start);
        let mut counts = TileCounts::default();
        let mut values = Vec::with_capacity((self.grid.tile_size * self.grid.tile_size) as usize);

        for rect in self.grid.tiles() {
            let valid_count = rect
                .pixel_indices(self.grid.width)
                .filter(|&i| self.is_valid(i))
                .count();
            let kind = decode_tile(&mut r, valid_count, self.scale, self.range, &mut values)?;
            counts.record(kind);

            let mut next = values.iter();
            for idx in rect.pixel_indices(self.grid.width) {
                if self.is_valid(idx) {
                    if let Some(&v) = next.next() {
                        out[idx] = v;
                    }
                }
            }
        }

        if r.remaining() > 0 {
            return Err(LercError::CorruptStream(format!(
                "{} trailing bytes after band tiles at offset {}",
                r.remaining(),
                r.position()
            )));
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
