// Integration tests for the blob codec.
//
// Tests the full pipeline: Raster + mask -> encode -> blob -> decode, across
// every data type, lossless and lossy tolerances, multi-band rasters,
// partial masks, tile sizes, corruption and truncation.

use lercrs::{
    BlobDecoder, DataType, DecodeOptions, DecodeState, EncodeOptions, LercError, OverflowPolicy,
    Raster, Samples, ValidityMask,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_values(rng: &mut StdRng, data_type: DataType, n: usize) -> Samples {
    let values: Vec<f64> = (0..n)
        .map(|_| match data_type {
            DataType::F32 | DataType::F64 => rng.random_range(-5000.0..5000.0f64).round(),
            dt => {
                let (lo, hi) = dt.range();
                rng.random_range(lo..=hi).round()
            }
        })
        .collect();
    Samples::from_f64(data_type, &values, OverflowPolicy::Fail).unwrap()
}

fn random_mask(rng: &mut StdRng, width: u32, height: u32, p_valid: f64) -> ValidityMask {
    let bools: Vec<bool> = (0..width * height).map(|_| rng.random_bool(p_valid)).collect();
    ValidityMask::from_bools(width, height, &bools).unwrap()
}

/// Synthetic elevation model: smooth hills plus a little noise.
fn terrain(width: u32, height: u32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..height)
        .flat_map(|r| (0..width).map(move |c| (r, c)))
        .map(|(r, c)| {
            let (x, y) = (c as f32 / 17.0, r as f32 / 23.0);
            1200.0 + 300.0 * x.sin() * y.cos() + 40.0 * (x * 3.1 + y).sin()
        })
        .map(|v| v + rng.random_range(-0.05..0.05f32))
        .collect()
}

fn assert_roundtrip(raster: &Raster, mask: Option<&ValidityMask>, opts: &EncodeOptions) {
    let blob = lercrs::encode(raster, mask, opts).unwrap();
    let decoded = lercrs::decode(&blob, raster.data_type(), &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.raster.data_type(), raster.data_type());
    assert_eq!(decoded.raster.band_count(), raster.band_count());

    let tol = if raster.data_type().is_integer() {
        opts.tolerance.floor()
    } else {
        opts.tolerance
    };
    let pixels = raster.pixel_count();
    let got = decoded.raster.samples();
    for i in 0..raster.samples().len() {
        let valid = mask.is_none_or(|m| m.is_valid(i % pixels));
        assert_eq!(decoded.mask.is_valid(i % pixels), valid);
        if valid {
            let (a, b) = (raster.samples().get(i), got.get(i));
            assert!(
                (a - b).abs() <= tol,
                "{:?} sample {i}: {a} vs {b} (tol {tol})",
                raster.data_type()
            );
        } else {
            assert_eq!(got.get(i), opts.no_data_value);
        }
    }
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn lossless_roundtrip_every_type() {
    let mut rng = StdRng::seed_from_u64(7);
    for dt in DataType::ALL {
        let raster = Raster::new(37, 21, 1, random_values(&mut rng, dt, 37 * 21)).unwrap();
        let blob = lercrs::encode(&raster, None, &EncodeOptions::default()).unwrap();
        let decoded = lercrs::decode(&blob, dt, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.raster, raster, "{dt:?}");
        assert_eq!(decoded.info.valid_pixel_count, 37 * 21);
    }
}

#[test]
fn lossless_roundtrip_with_mask_and_bands() {
    let mut rng = StdRng::seed_from_u64(11);
    for dt in DataType::ALL {
        let mask = random_mask(&mut rng, 19, 33, 0.7);
        let raster = Raster::new(19, 33, 3, random_values(&mut rng, dt, 19 * 33 * 3)).unwrap();
        assert_roundtrip(&raster, Some(&mask), &EncodeOptions::default());
    }
}

#[test]
fn lossy_roundtrip_respects_tolerance() {
    let values = terrain(150, 97, 3);
    let raster = Raster::new(150, 97, 1, values).unwrap();
    for tol in [0.001, 0.01, 0.5, 2.0, 25.0] {
        assert_roundtrip(&raster, None, &EncodeOptions::with_tolerance(tol));
    }
}

#[test]
fn lossy_f32_bound_holds_after_rounding_to_f32() {
    // Sub-ulp tolerance near 1000, where f32 spacing is 6.1e-5.
    let values: Vec<f32> = (0..64 * 64)
        .map(|i| (1000.0 + f64::from(i) * 0.00037) as f32)
        .collect();
    let raster = Raster::new(64, 64, 1, values.clone()).unwrap();
    let tol = 1e-4;
    let blob = lercrs::encode(&raster, None, &EncodeOptions::with_tolerance(tol)).unwrap();
    let decoded = lercrs::decode(&blob, DataType::F32, &DecodeOptions::default()).unwrap();
    let worst = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (f64::from(v) - decoded.raster.samples().get(i)).abs())
        .fold(0.0, f64::max);
    assert!(worst <= tol, "worst error {worst} above {tol}");
    assert!(blob.len() * 2 < values.len() * 4, "blob {} bytes", blob.len());

    assert_roundtrip(&raster, None, &EncodeOptions::with_tolerance(tol));
}

#[test]
fn lossy_integer_roundtrip() {
    let mut rng = StdRng::seed_from_u64(5);
    for dt in [DataType::I16, DataType::U16, DataType::I32, DataType::U32] {
        let raster = Raster::new(40, 40, 2, random_values(&mut rng, dt, 3200)).unwrap();
        for tol in [0.9, 1.0, 3.5, 100.0] {
            assert_roundtrip(&raster, None, &EncodeOptions::with_tolerance(tol));
        }
    }
}

#[test]
fn every_tile_size_roundtrips() {
    let mut rng = StdRng::seed_from_u64(13);
    let raster = Raster::new(23, 17, 1, random_values(&mut rng, DataType::I16, 23 * 17)).unwrap();
    let mask = random_mask(&mut rng, 23, 17, 0.5);
    for tile_size in [1u16, 2, 3, 7, 8, 16, 23, 64, 256] {
        let opts = EncodeOptions {
            tile_size,
            ..Default::default()
        };
        assert_roundtrip(&raster, Some(&mask), &opts);
    }
}

#[test]
fn wide_float_range_roundtrips_losslessly() {
    let values = vec![0.0, 1e15, -3.0, 42.0, 7.0, -1e12, 0.0, 1.0, 2.0];
    let raster = Raster::new(3, 3, 1, values).unwrap();
    assert_roundtrip(&raster, None, &EncodeOptions::default());
}

#[test]
fn non_integral_float_needs_tolerance() {
    let raster = Raster::new(2, 2, 1, vec![0.5f32, 1.0, 1.25, 2.0]).unwrap();
    assert!(matches!(
        lercrs::encode(&raster, None, &EncodeOptions::default()),
        Err(LercError::LossyRequired { .. })
    ));
    assert_roundtrip(&raster, None, &EncodeOptions::with_tolerance(0.125));
}

// ---------------------------------------------------------------------------
// Masks and noData
// ---------------------------------------------------------------------------

#[test]
fn all_invalid_raster() {
    let raster = Raster::new(9, 9, 2, vec![3u8; 162]).unwrap();
    let mask = ValidityMask::all_invalid(9, 9);
    let opts = EncodeOptions {
        no_data_value: 255.0,
        ..Default::default()
    };
    let blob = lercrs::encode(&raster, Some(&mask), &opts).unwrap();
    let info = lercrs::get_info(&blob).unwrap();
    assert_eq!(info.valid_pixel_count, 0);
    assert!(info.mask_present);

    let decoded = lercrs::decode(&blob, DataType::U8, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.raster.samples(), &Samples::U8(vec![255; 162]));
    assert_eq!(decoded.mask.count_valid(), 0);
}

#[test]
fn mask_survives_as_bytes() {
    let mut rng = StdRng::seed_from_u64(21);
    let mask = random_mask(&mut rng, 31, 8, 0.4);
    let raster = Raster::new(31, 8, 1, vec![1.0f64; 248]).unwrap();
    let blob = lercrs::encode(&raster, Some(&mask), &EncodeOptions::default()).unwrap();

    let mut out = vec![0u8; 248];
    lercrs::decode_into(
        &blob,
        Some(&mut out),
        31,
        8,
        1,
        DataType::F64,
        &DecodeOptions::default(),
    )
    .unwrap();
    assert_eq!(out, mask.to_bytes());
}

// ---------------------------------------------------------------------------
// Blob properties
// ---------------------------------------------------------------------------

#[test]
fn info_matches_decoded_header() {
    let raster = Raster::new(64, 48, 1, terrain(64, 48, 1)).unwrap();
    let opts = EncodeOptions {
        tolerance: 0.1,
        tile_size: 16,
        no_data_value: -32768.0,
        checksum: true,
    };
    let blob = lercrs::encode(&raster, None, &opts).unwrap();
    let info = lercrs::get_info(&blob).unwrap();
    let decoded = lercrs::decode(&blob, DataType::F32, &DecodeOptions::default()).unwrap();
    assert_eq!(info, decoded.info);
    assert_eq!(info.tile_size, 16);
    // f32 output keeps half an f32 spacing of the tolerance in reserve.
    assert!(info.max_z_error < 0.1 && info.max_z_error > 0.0999, "{}", info.max_z_error);
    assert_eq!(info.blob_size as usize, blob.len());

    let (lo, hi) = raster
        .samples()
        .to_f64()
        .iter()
        .fold((f64::MAX, f64::MIN), |(a, b), &v| (a.min(v), b.max(v)));
    assert_eq!((info.min_value, info.max_value), (lo, hi));
}

#[test]
fn smooth_terrain_compresses() {
    let raster = Raster::new(256, 256, 1, terrain(256, 256, 9)).unwrap();
    let raw = 256 * 256 * 4;
    let blob = lercrs::encode(&raster, None, &EncodeOptions::with_tolerance(0.5)).unwrap();
    assert!(blob.len() * 2 < raw, "blob {} vs raw {raw}", blob.len());
}

#[test]
fn constant_raster_is_tiny() {
    let raster = Raster::new(512, 512, 1, vec![1234.0f32; 512 * 512]).unwrap();
    let blob = lercrs::encode(&raster, None, &EncodeOptions::default()).unwrap();
    let tiles = (512 / 8) * (512 / 8);
    // header + two-byte band length varint + one marker and one i16 per tile
    assert_eq!(blob.len(), 64 + 2 + tiles * 3);
}

#[test]
fn encoding_is_deterministic() {
    let raster = Raster::new(80, 60, 1, terrain(80, 60, 4)).unwrap();
    let opts = EncodeOptions::with_tolerance(0.01);
    let a = lercrs::encode(&raster, None, &opts).unwrap();
    let b = lercrs::encode(&raster, None, &opts).unwrap();
    assert_eq!(a, b);
}

#[test]
fn reencoding_decoded_raster_is_stable() {
    let raster = Raster::new(50, 50, 1, terrain(50, 50, 2)).unwrap();
    let opts = EncodeOptions::with_tolerance(0.25);
    let first = lercrs::encode(&raster, None, &opts).unwrap();
    let (_, values) = lercrs::decode_f64(&first).unwrap();
    let again = Raster::new(50, 50, 1, values.clone()).unwrap();
    let second = lercrs::encode(&again, None, &opts).unwrap();
    let (_, values2) = lercrs::decode_f64(&second).unwrap();
    for (a, b) in values.iter().zip(&values2) {
        assert!((a - b).abs() <= 0.25);
    }
}

// ---------------------------------------------------------------------------
// Corruption and truncation
// ---------------------------------------------------------------------------

fn small_blob() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(99);
    let mask = random_mask(&mut rng, 12, 12, 0.8);
    let raster = Raster::new(12, 12, 2, random_values(&mut rng, DataType::I16, 288)).unwrap();
    lercrs::encode(&raster, Some(&mask), &EncodeOptions::default()).unwrap()
}

#[test]
fn every_prefix_is_rejected() {
    let blob = small_blob();
    for len in 0..blob.len() {
        let result = lercrs::decode(&blob[..len], DataType::I16, &DecodeOptions::default());
        assert!(result.is_err(), "prefix of {len} bytes decoded");
    }
}

#[test]
fn truncation_reports_truncated_stream() {
    let blob = small_blob();
    assert!(matches!(
        lercrs::decode(&blob[..blob.len() - 1], DataType::I16, &DecodeOptions::default()),
        Err(LercError::TruncatedStream { .. })
    ));
    assert!(matches!(
        lercrs::get_info(&blob[..30]),
        Err(LercError::TruncatedStream { .. })
    ));
}

#[test]
fn body_bit_flips_fail_checksum() {
    let blob = small_blob();
    for pos in 64..blob.len() {
        for bit in [0u8, 3, 7] {
            let mut bad = blob.clone();
            bad[pos] ^= 1 << bit;
            assert!(
                matches!(
                    lercrs::decode(&bad, DataType::I16, &DecodeOptions::default()),
                    Err(LercError::ChecksumMismatch { .. })
                ),
                "flip at byte {pos} bit {bit}"
            );
        }
    }
}

#[test]
fn header_bit_flips_never_panic() {
    let blob = small_blob();
    for pos in 0..64 {
        for bit in 0..8u8 {
            let mut bad = blob.clone();
            bad[pos] ^= 1 << bit;
            let _ = lercrs::decode(&bad, DataType::I16, &DecodeOptions::default());
        }
    }
}

#[test]
fn unverified_corruption_is_still_structural() {
    let blob = small_blob();
    let opts = DecodeOptions {
        verify_checksum: false,
        ..Default::default()
    };
    // A reserved bit in the first tile marker of band 0.
    let info = lercrs::get_info(&blob).unwrap();
    assert!(info.mask_present);
    let mut bad = blob.clone();
    let mask_len = bad[64] as usize;
    // mask length varint, mask runs, band length varint (2 bytes for > 127)
    let band_len_at = 65 + mask_len;
    let first_tile = band_len_at + if bad[band_len_at] & 0x80 != 0 { 2 } else { 1 };
    bad[first_tile] |= 0x80;
    assert!(matches!(
        lercrs::decode(&bad, DataType::I16, &opts),
        Err(LercError::UnsupportedTileMarker { marker, .. }) if marker & 0x80 != 0
    ));
}

#[test]
fn blob_without_checksum_decodes() {
    let raster = Raster::new(4, 4, 1, (0..16).map(|i| i as u8).collect::<Vec<_>>()).unwrap();
    let opts = EncodeOptions {
        checksum: false,
        ..Default::default()
    };
    let blob = lercrs::encode(&raster, None, &opts).unwrap();
    assert_eq!(&blob[4..8], &[0, 0, 0, 0]);
    let decoded = lercrs::decode(&blob, DataType::U8, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.raster, raster);
}

// ---------------------------------------------------------------------------
// Type conversion on decode
// ---------------------------------------------------------------------------

#[test]
fn decode_to_wider_type() {
    let raster = Raster::new(3, 1, 1, vec![-5i8, 0, 100]).unwrap();
    let blob = lercrs::encode(&raster, None, &EncodeOptions::default()).unwrap();
    let decoded = lercrs::decode(&blob, DataType::F64, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.raster.samples(), &Samples::F64(vec![-5.0, 0.0, 100.0]));
    assert_eq!(decoded.info.data_type, DataType::I8);
}

#[test]
fn decode_to_narrower_type_honours_policy() {
    let raster = Raster::new(3, 1, 1, vec![-5i16, 0, 300]).unwrap();
    let blob = lercrs::encode(&raster, None, &EncodeOptions::default()).unwrap();
    assert!(matches!(
        lercrs::decode(&blob, DataType::U8, &DecodeOptions::default()),
        Err(LercError::TypeRange { data_type: DataType::U8, .. })
    ));
    let clamp = DecodeOptions {
        on_overflow: OverflowPolicy::Clamp,
        ..Default::default()
    };
    let decoded = lercrs::decode(&blob, DataType::U8, &clamp).unwrap();
    assert_eq!(decoded.raster.samples(), &Samples::U8(vec![0, 0, 255]));
}

// ---------------------------------------------------------------------------
// Decoder state
// ---------------------------------------------------------------------------

#[test]
fn blob_decoder_tracks_state() {
    let blob = small_blob();
    let mut ok = BlobDecoder::new(&blob, DecodeOptions::default());
    assert_eq!(ok.state(), DecodeState::Start);
    ok.decode(DataType::I16).unwrap();
    assert_eq!(ok.state(), DecodeState::Complete);

    let mut bad = blob.clone();
    bad[0] = b'X';
    let mut failed = BlobDecoder::new(&bad, DecodeOptions::default());
    assert!(matches!(
        failed.decode(DataType::I16),
        Err(LercError::MalformedHeader(_))
    ));
    assert_eq!(failed.state(), DecodeState::Failed);
    assert!(failed.header().is_none());
}
