#![no_main]

use libfuzzer_sys::fuzz_target;
use mongo_producer::protocol::decode::{decode_header, decode_message};

fuzz_target!(|data: &[u8]| {
    // A decoded message consumes exactly the length its header declares
    if let Ok((_, consumed)) = decode_message(data) {
        let header = decode_header(data).expect("header of a decoded message");
        assert_eq!(consumed, header.length as usize);
        assert!(consumed <= data.len());
    }
});
