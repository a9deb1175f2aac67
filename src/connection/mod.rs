//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain TCP vs TLS)
//! * Connection lifecycle (handshake, auth, commands)
//! * State machine enforcement
//! * TLS configuration and support
//! * The shared session handed out by the producer

mod conn;
mod session;
mod state;
#[cfg(test)]
pub(crate) mod testing;
mod tls;
mod transport;

pub use conn::{Connection, ServerDescription};
pub use session::Session;
pub use state::ConnectionState;
pub use tls::{server_name, TlsConfig, TlsConfigBuilder};
pub use transport::{DialStrategy, Transport};
