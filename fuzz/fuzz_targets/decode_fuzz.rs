#![no_main]
use libfuzzer_sys::fuzz_target;
use lercrs::{DataType, DecodeOptions};

fuzz_target!(|data: &[u8]| {
    // The decoder must never panic, only return errors.
    let _ = lercrs::get_info(data);
    let _ = lercrs::decode(data, DataType::F64, &DecodeOptions::default());

    // Skip the checksum so corrupted bodies reach the tile decoder.
    let unchecked = DecodeOptions {
        verify_checksum: false,
        ..Default::default()
    };
    let _ = lercrs::decode(data, DataType::I16, &unchecked);

    lercrs::format::fuzz_parse_sections(data);
});
