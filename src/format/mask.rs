// Run-length codec for the validity mask.
//
// Pixels are visited in row-major order and grouped into alternating runs,
// valid first. Each run length is a varint; a mask that starts with an
// invalid pixel therefore begins with a zero-length valid run.

use crate::error::{LercError, Result};
use crate::raster::ValidityMask;

use super::bitstream::{BitReader, BitWriter};

/// Append the run-length encoding of `mask` to `w`.
pub fn encode_into(mask: &ValidityMask, w: &mut BitWriter) {
    let mut current = true;
    let mut run = 0u64;
    for valid in mask.iter() {
        if valid == current {
            run += 1;
        } else {
            w.write_varint(run);
            current = valid;
            run = 1;
        }
    }
    w.write_varint(run);
}

pub fn encode(mask: &ValidityMask) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_into(mask, &mut w);
    w.finish()
}

/// Decode a `width × height` mask. The runs must cover the grid exactly and
/// consume every byte of `bytes`.
pub fn decode(bytes: &[u8], width: u32, height: u32) -> Result<ValidityMask> {
    let total = width as u64 * height as u64;
    let mut mask = ValidityMask::all_invalid(width, height);
    let mut r = BitReader::new(bytes);
    let mut pos = 0u64;
    let mut valid = true;

    while r.remaining() > 0 {
        let run = r
            .read_varint()
            .map_err(|e| LercError::CorruptMask(format!("unreadable run length: {e}")))?;
        let end = pos
            .checked_add(run)
            .filter(|&end| end <= total)
            .ok_or_else(|| {
                LercError::CorruptMask(format!(
                    "runs exceed {total} pixels (run of {run} at pixel {pos})"
                ))
            })?;
        if valid {
            for i in pos..end {
                mask.set(i as usize, true);
            }
        }
        pos = end;
        valid = !valid;
    }

    if pos != total {
        return Err(LercError::CorruptMask(format!(
            "runs cover {pos} of {total} pixels"
        )));
    }
    Ok(mask)
}
