//! Connection string resolution

mod connection_string;

pub(crate) use connection_string::parse_bool;
pub use connection_string::{DialOptions, ServerAddress, DEFAULT_DIAL_TIMEOUT, DEFAULT_PORT};
