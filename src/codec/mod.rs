// Blob-level encode/decode built on the `format` primitives:
//
// - `encoder`: raster + mask to blob, two-pass header patching
// - `decoder`: blob to raster, header-only info, state-tracked decoding

pub mod decoder;
pub mod encoder;

pub use decoder::{
    BlobDecoder, DecodeOptions, DecodeState, Decoded, LercInfo, decode, decode_f64, decode_into,
    get_info,
};
pub use encoder::{DEFAULT_TILE_SIZE, EncodeOptions, encode};
