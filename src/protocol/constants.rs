//! MongoDB wire protocol constants

/// OP_MSG opcode (MongoDB 3.6+)
pub const OP_MSG: i32 = 2013;

/// OP_COMPRESSED opcode (never negotiated by this client)
pub const OP_COMPRESSED: i32 = 2012;

/// Standard message header: length, requestID, responseTo, opCode
pub const HEADER_LENGTH: usize = 16;

/// Default `maxMessageSizeBytes` advertised by servers
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// OP_MSG flag bits
pub mod flags {
    /// A CRC-32C checksum trails the message
    pub const CHECKSUM_PRESENT: u32 = 1;

    /// Another message follows without a further request
    pub const MORE_TO_COME: u32 = 1 << 1;

    /// Client is prepared for multiple replies (exhaust cursors)
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;

    /// Bits 0-15 are required: a peer must reject unknown ones
    pub const REQUIRED_MASK: u32 = 0xFFFF;
}

/// OP_MSG section kinds
pub mod section {
    /// Single BSON document holding the command
    pub const BODY: u8 = 0;

    /// Identifier plus a sequence of BSON documents
    pub const DOCUMENT_SEQUENCE: u8 = 1;
}

/// Well-known databases
pub mod commands {
    /// Administrative database
    pub const ADMIN_DB: &str = "admin";

    /// Database for externally managed credentials
    pub const EXTERNAL_DB: &str = "$external";
}
