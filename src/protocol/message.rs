//! Protocol message types

use bson::Document;
use std::sync::atomic::{AtomicI32, Ordering};

static REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Allocate a request ID for an outgoing message
pub fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Standard message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length, header included
    pub length: i32,
    /// Sender-assigned identifier
    pub request_id: i32,
    /// Request this message answers (0 for requests)
    pub response_to: i32,
    /// Message opcode
    pub op_code: i32,
}

/// Kind-1 section: a named batch of documents
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    /// Field the documents belong to (e.g. `documents` for `insert`)
    pub identifier: String,
    /// The documents
    pub documents: Vec<Document>,
}

/// OP_MSG message, in either direction
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    /// Request identifier
    pub request_id: i32,
    /// Request this message answers (0 for requests)
    pub response_to: i32,
    /// Flag bits
    pub flags: u32,
    /// Kind-0 body section
    pub body: Document,
    /// Kind-1 sections
    pub sequences: Vec<DocumentSequence>,
}

impl OpMsg {
    /// Build a command message with a fresh request ID
    pub fn command(body: Document) -> Self {
        Self {
            request_id: next_request_id(),
            response_to: 0,
            flags: 0,
            body,
            sequences: Vec::new(),
        }
    }

    /// Whether the sender will stream further messages unprompted
    pub fn more_to_come(&self) -> bool {
        self.flags & super::constants::flags::MORE_TO_COME != 0
    }
}
