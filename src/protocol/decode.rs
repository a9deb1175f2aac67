//! Protocol message decoding

use super::constants::{flags, section, HEADER_LENGTH, MAX_MESSAGE_SIZE, OP_COMPRESSED, OP_MSG};
use super::message::{DocumentSequence, MessageHeader, OpMsg};
use bson::Document;
use std::io;

/// Decode a message header
pub fn decode_header(data: &[u8]) -> io::Result<MessageHeader> {
    if data.len() < HEADER_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message header",
        ));
    }

    Ok(MessageHeader {
        length: read_i32(data, 0),
        request_id: read_i32(data, 4),
        response_to: read_i32(data, 8),
        op_code: read_i32(data, 12),
    })
}

/// Decode an OP_MSG from the front of `data` without consuming it
///
/// # Returns
/// `Ok((msg, consumed))` - Message and number of bytes consumed. The caller
/// must advance its buffer.
/// `Err(e)` - `UnexpectedEof` if more bytes are needed, any other kind if the
/// message is invalid
pub fn decode_message(data: &[u8]) -> io::Result<(OpMsg, usize)> {
    let header = decode_header(data)?;

    if header.length < (HEADER_LENGTH + 5) as i32 {
        return Err(invalid(format!("message length {} too small", header.length)));
    }
    let len = header.length as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_SIZE
        )));
    }

    match header.op_code {
        OP_MSG => {}
        OP_COMPRESSED => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "compressed messages were not negotiated",
            ))
        }
        other => return Err(invalid(format!("unexpected opcode {}", other))),
    }

    if data.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }

    let msg_flags = read_u32(data, HEADER_LENGTH);
    let unknown_required = msg_flags
        & flags::REQUIRED_MASK
        & !(flags::CHECKSUM_PRESENT | flags::MORE_TO_COME);
    if unknown_required != 0 {
        return Err(invalid(format!(
            "unknown required flag bits {:#x}",
            unknown_required
        )));
    }

    // The checksum is not verified: TCP and TLS already cover integrity here
    let mut end = len;
    if msg_flags & flags::CHECKSUM_PRESENT != 0 {
        if len < HEADER_LENGTH + 4 + 4 {
            return Err(invalid("checksum flag set on a truncated message"));
        }
        end -= 4;
    }

    let mut body = None;
    let mut sequences = Vec::new();
    let mut pos = HEADER_LENGTH + 4;

    while pos < end {
        let kind = data[pos];
        pos += 1;
        match kind {
            section::BODY => {
                let (doc, size) = read_document(&data[pos..end])?;
                if body.replace(doc).is_some() {
                    return Err(invalid("more than one body section"));
                }
                pos += size;
            }
            section::DOCUMENT_SEQUENCE => {
                if end - pos < 4 {
                    return Err(invalid("truncated document sequence"));
                }
                let size = read_i32(data, pos);
                if size < 5 || pos + size as usize > end {
                    return Err(invalid(format!("bad document sequence size {}", size)));
                }
                let seq_end = pos + size as usize;
                let mut cursor = pos + 4;

                let nul = data[cursor..seq_end]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| invalid("unterminated sequence identifier"))?;
                let identifier = std::str::from_utf8(&data[cursor..cursor + nul])
                    .map_err(|e| invalid(e.to_string()))?
                    .to_string();
                cursor += nul + 1;

                let mut documents = Vec::new();
                while cursor < seq_end {
                    let (doc, size) = read_document(&data[cursor..seq_end])?;
                    documents.push(doc);
                    cursor += size;
                }

                sequences.push(DocumentSequence {
                    identifier,
                    documents,
                });
                pos = seq_end;
            }
            other => return Err(invalid(format!("unknown section kind {}", other))),
        }
    }

    let body = body.ok_or_else(|| invalid("message has no body section"))?;

    Ok((
        OpMsg {
            request_id: header.request_id,
            response_to: header.response_to,
            flags: msg_flags,
            body,
            sequences,
        },
        len,
    ))
}

fn read_document(data: &[u8]) -> io::Result<(Document, usize)> {
    if data.len() < 5 {
        return Err(invalid("truncated document"));
    }
    let size = read_i32(data, 0);
    if size < 5 || size as usize > data.len() {
        return Err(invalid(format!("bad document size {}", size)));
    }
    let size = size as usize;
    let doc = Document::from_reader(&data[..size]).map_err(|e| invalid(e.to_string()))?;
    Ok((doc, size))
}

fn read_i32(data: &[u8], pos: usize) -> i32 {
    i32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
