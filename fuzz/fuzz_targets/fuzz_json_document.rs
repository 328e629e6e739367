#![no_main]
use libfuzzer_sys::fuzz_target;
use nvmedit_rs::NvmDocument;

// Documents that parse must either encode or fail cleanly
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(document) = NvmDocument::from_json_str(text) {
        let version = document.protocol_version().to_string();
        let _ = document.to_bytes(&version);
    }
});
