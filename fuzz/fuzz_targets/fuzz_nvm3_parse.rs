#![no_main]
use libfuzzer_sys::fuzz_target;
use nvmedit_rs::{nvm_to_json, parse_nvm};

// Arbitrary bytes spread over a full-size image so the page walk is reached
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut image = vec![0xff; 0xc000];
    for (i, byte) in data.iter().enumerate().take(image.len()) {
        image[i] = *byte;
    }

    let _ = parse_nvm(&image);
    let _ = nvm_to_json(&image);
});
