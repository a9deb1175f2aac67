//! MongoDB wire protocol (OP_MSG)
//!
//! Only what the producer needs: framing commands as OP_MSG and decoding
//! the replies incrementally from a read buffer.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{DocumentSequence, MessageHeader, OpMsg};
