#![no_main]

use mongo_producer::DialOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(url) = std::str::from_utf8(data) {
        // TLS material stays empty so only the URL grammar is exercised
        if let Ok(options) = DialOptions::parse(url, "", "", "", "") {
            let _ = options.server_addresses();
            let _ = options.effective_auth_source();
        }
    }
});
