#![no_main]
use libfuzzer_sys::fuzz_target;
use lercrs::{DataType, DecodeOptions, EncodeOptions, Raster, ValidityMask};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // Header bytes: width, tile size, tolerance step, mask stride.
    let width = u32::from(data[0] % 32) + 1;
    let tile_size = u16::from(data[1] % 16) + 1;
    let tolerance = f64::from(data[2] % 8) * 0.25;
    let stride = usize::from(data[3] % 5);
    let payload = &data[4..];

    let height = (payload.len() as u32 / width).max(1);
    let pixels = (width * height) as usize;
    let values: Vec<f32> = (0..pixels)
        .map(|i| f32::from(payload.get(i).copied().unwrap_or(0)) - 100.0)
        .collect();
    let raster = Raster::new(width, height, 1, values.clone()).unwrap();
    let bools: Vec<bool> = (0..pixels).map(|i| stride == 0 || i % (stride + 1) != 0).collect();
    let mask = ValidityMask::from_bools(width, height, &bools).unwrap();

    let opts = EncodeOptions {
        tolerance,
        tile_size,
        no_data_value: -9999.0,
        checksum: true,
    };
    let blob = lercrs::encode(&raster, Some(&mask), &opts).unwrap();
    let decoded = lercrs::decode(&blob, DataType::F32, &DecodeOptions::default()).unwrap();

    let out = decoded.raster.samples().to_f64();
    for (i, (&want, &got)) in values.iter().zip(&out).enumerate() {
        if bools[i] {
            assert!((f64::from(want) - got).abs() <= tolerance);
        } else {
            assert_eq!(got, -9999.0);
        }
    }
});
