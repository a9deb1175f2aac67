#![no_main]

use bytes::{Buf, BytesMut};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mongo_producer::protocol::{decode_message, OpMsg};

/// What identifies a decoded message; BSON bodies may hold NaN, which never
/// compares equal
type Key = (i32, i32, u32, usize);

fn key(msg: &OpMsg) -> Key {
    (msg.request_id, msg.response_to, msg.flags, msg.sequences.len())
}

#[derive(Debug, Arbitrary)]
struct Reads {
    stream: Vec<u8>,
    read_sizes: Vec<u8>,
}

/// Decode everything available in one pass
fn decode_all(mut data: &[u8]) -> Vec<Key> {
    let mut out = Vec::new();
    while let Ok((msg, consumed)) = decode_message(data) {
        out.push(key(&msg));
        data = &data[consumed..];
    }
    out
}

// Replies split across arbitrary socket reads must decode to the same
// messages as the whole stream decoded at once.
fuzz_target!(|input: Reads| {
    let expected = decode_all(&input.stream);

    let mut decoded = Vec::new();
    let mut buf = BytesMut::new();
    let mut rest = input.stream.as_slice();
    let mut sizes = input.read_sizes.iter().map(|s| usize::from(*s).max(1)).cycle();

    while !rest.is_empty() {
        let n = sizes.next().unwrap_or(rest.len()).min(rest.len());
        buf.extend_from_slice(&rest[..n]);
        rest = &rest[n..];

        loop {
            match decode_message(&buf) {
                Ok((msg, consumed)) => {
                    decoded.push(key(&msg));
                    buf.advance(consumed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(_) => {
                    assert_eq!(decoded, expected);
                    return;
                }
            }
        }
    }

    assert_eq!(decoded, expected);
});
