#![no_main]
use libfuzzer_sys::fuzz_target;
use nvmedit_rs::nvm500_to_json;

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    let _ = nvm500_to_json(data);
});
