//! lercrs: a limited-error raster codec compatible with the LERC model.
//!
//! Rasters of any primitive numeric type are cut into tiles, quantized to a
//! caller-chosen maximum absolute error and bit-packed into a compact,
//! self-describing blob. An optional validity mask marks pixels without
//! data; those are not coded and decode as the blob's noData value.
//!
//! The crate provides:
//! - Blob encoding and decoding (`codec`)
//! - Wire-level building blocks: bit stream, quantizer, mask, tiles, header (`format`)
//! - Typed raster containers (`raster`)
//!
//! # Quick Start
//!
//! ```no_run
//! use lercrs::{DataType, DecodeOptions, EncodeOptions, Raster};
//!
//! let heights: Vec<f32> = (0..64 * 64).map(|i| (i % 64) as f32 * 0.25).collect();
//! let raster = Raster::new(64, 64, 1, heights).unwrap();
//!
//! let blob = lercrs::encode(&raster, None, &EncodeOptions::with_tolerance(0.01)).unwrap();
//! let info = lercrs::get_info(&blob).unwrap();
//! assert_eq!((info.width, info.height), (64, 64));
//!
//! let decoded = lercrs::decode(&blob, DataType::F32, &DecodeOptions::default()).unwrap();
//! assert_eq!(decoded.raster.pixel_count(), 64 * 64);
//! ```

pub mod codec;
pub mod error;
pub mod format;
pub mod raster;

pub use codec::{
    BlobDecoder, DecodeOptions, DecodeState, Decoded, EncodeOptions, LercInfo, decode, decode_f64,
    decode_into, encode, get_info,
};
pub use error::{LercError, Result};
pub use raster::{DataType, OverflowPolicy, Raster, Samples, ValidityMask};
