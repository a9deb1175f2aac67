//! Protocol message encoding

use super::constants::{section, HEADER_LENGTH, OP_MSG};
use super::message::OpMsg;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode an OP_MSG into bytes
pub fn encode_message(msg: &OpMsg) -> io::Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(HEADER_LENGTH + 64);

    // Reserve space for length (will be filled at end)
    let len_pos = buf.len();
    buf.put_i32_le(0);
    buf.put_i32_le(msg.request_id);
    buf.put_i32_le(msg.response_to);
    buf.put_i32_le(OP_MSG);

    buf.put_u32_le(msg.flags);

    buf.put_u8(section::BODY);
    put_document(&mut buf, &msg.body)?;

    for sequence in &msg.sequences {
        buf.put_u8(section::DOCUMENT_SEQUENCE);
        let size_pos = buf.len();
        buf.put_i32_le(0);

        buf.put(sequence.identifier.as_bytes());
        buf.put_u8(0);

        for doc in &sequence.documents {
            put_document(&mut buf, doc)?;
        }

        let size = buf.len() - size_pos;
        buf[size_pos..size_pos + 4].copy_from_slice(&(size as i32).to_le_bytes());
    }

    // Fill in length
    let len = buf.len() - len_pos;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as i32).to_le_bytes());

    Ok(buf)
}

fn put_document(buf: &mut BytesMut, doc: &bson::Document) -> io::Result<()> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    buf.put_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::DocumentSequence;
    use bson::doc;

    #[test]
    fn test_encode_header() {
        let msg = OpMsg {
            request_id: 7,
            response_to: 0,
            flags: 0,
            body: doc! { "ping": 1, "$db": "admin" },
            sequences: Vec::new(),
        };
        let buf = encode_message(&msg).unwrap();

        let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 7);
        assert_eq!(i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]), OP_MSG);
        // flags, then the body section kind
        assert_eq!(&buf[16..20], &[0, 0, 0, 0]);
        assert_eq!(buf[20], section::BODY);
    }

    #[test]
    fn test_encode_body_is_bson() {
        let body = doc! { "isMaster": 1, "$db": "admin" };
        let buf = encode_message(&OpMsg::command(body.clone())).unwrap();

        let decoded = bson::Document::from_reader(&buf[21..]).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_encode_document_sequence() {
        let msg = OpMsg {
            request_id: 1,
            response_to: 0,
            flags: 0,
            body: doc! { "insert": "c", "$db": "test" },
            sequences: vec![DocumentSequence {
                identifier: "documents".into(),
                documents: vec![doc! { "a": 1 }, doc! { "b": 2 }],
            }],
        };
        let buf = encode_message(&msg).unwrap();

        let body_len = i32::from_le_bytes([buf[21], buf[22], buf[23], buf[24]]) as usize;
        let seq_start = 21 + body_len;
        assert_eq!(buf[seq_start], section::DOCUMENT_SEQUENCE);

        let seq_len = i32::from_le_bytes([
            buf[seq_start + 1],
            buf[seq_start + 2],
            buf[seq_start + 3],
            buf[seq_start + 4],
        ]) as usize;
        assert_eq!(seq_start + 1 + seq_len, buf.len());
    }
}
