// Wire-level building blocks of the LERC blob.
//
// - `bitstream`: bit/byte cursor, LEB128 varints, typed little-endian values
// - `header`   : fixed 64-byte blob header and checksum
// - `mask`     : run-length validity mask codec
// - `quantizer`: error-bounded quantization
// - `tile`     : per-band tile partitioning, encoding and decoding

pub mod bitstream;
pub mod header;
pub mod mask;
pub mod quantizer;
pub mod tile;

pub use bitstream::{BitReader, BitWriter};
pub use header::{BlobHeader, FORMAT_VERSION, HEADER_LEN, HeaderFlags, LERC_MAGIC};
pub use quantizer::{Quantized, dequantize, quantize};
pub use tile::{BandStats, TileCounts, TileDecoder, TileEncoder, TileGrid, TileKind};

/// Drive the low-level section parsers over arbitrary bytes. The first byte
/// picks a grid of up to 16x16 pixels; the rest is fed to the mask and tile
/// decoders as-is.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_parse_sections(data: &[u8]) {
    let _ = BlobHeader::decode(data);
    if let Some((&dims, rest)) = data.split_first() {
        let (width, height) = (u32::from(dims & 0x0F) + 1, u32::from(dims >> 4) + 1);
        let _ = mask::decode(rest, width, height);

        let grid = TileGrid::new(width, height, 4);
        let decoder = TileDecoder::new(grid, None, 0.5, (-1e6, 1e6), 0.0);
        let mut out = vec![0.0; (width * height) as usize];
        let _ = decoder.decode_band(rest, 0, &mut out);
    }
}
