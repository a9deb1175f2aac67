//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677)
//!
//! MongoDB 4.0+ runs the exchange inside `saslStart`/`saslContinue` payloads.
//! Channel binding is never offered, so every conversation opens with the
//! `n,,` GS2 header and the final message carries `c=biws`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name sent in `saslStart`
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Smallest iteration count a server may ask for
pub const MIN_ITERATIONS: u32 = 4096;

/// GS2 header without channel binding
const GS2_HEADER: &str = "n,,";

/// Raw nonce length before base64
const NONCE_LEN: usize = 24;

/// Failures while running the SCRAM exchange
#[derive(Debug, Clone, Error)]
pub enum ScramError {
    /// The server signature did not match the one derived from the password
    #[error("invalid server proof: {0}")]
    InvalidServerProof(String),
    /// The server message is missing fields or carries bad values
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Server aborted the exchange with `e=<reason>`
    #[error("server rejected SCRAM exchange: {0}")]
    ServerError(String),
    /// Payload was not UTF-8
    #[error("UTF-8 error: {0}")]
    Utf8Error(String),
    /// A base64 attribute did not decode
    #[error("Base64 error: {0}")]
    Base64Error(String),
}

/// Values carried from the client-final step to server-final verification
#[derive(Clone, Debug)]
pub struct ScramState {
    auth_message: Vec<u8>,
    server_key: Vec<u8>,
}

/// Decoded `server-first-message`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFirst {
    /// Client nonce followed by the server's extension
    pub nonce: String,
    /// Decoded salt
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count
    pub iterations: u32,
}

impl ServerFirst {
    /// Parse `r=<nonce>,s=<salt>,i=<iterations>`; attributes may come in any
    /// order and unknown ones are ignored
    pub fn parse(msg: &str) -> Result<Self, ScramError> {
        if let Some(reason) = msg.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }
        if msg.starts_with("m=") {
            return Err(ScramError::InvalidServerMessage(
                "mandatory extensions are not supported".to_string(),
            ));
        }

        let attribute = |name: &str| {
            msg.split(',')
                .find_map(|part| part.strip_prefix(name))
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ScramError::InvalidServerMessage(format!(
                        "server first message has no '{}' attribute",
                        name.trim_end_matches('=')
                    ))
                })
        };

        let nonce = attribute("r=")?.to_string();
        let salt = BASE64
            .decode(attribute("s=")?)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations: u32 = attribute("i=")?
            .parse()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;

        if iterations < MIN_ITERATIONS {
            return Err(ScramError::InvalidServerMessage(format!(
                "iteration count {} below minimum {}",
                iterations, MIN_ITERATIONS
            )));
        }

        Ok(Self {
            nonce,
            salt,
            iterations,
        })
    }
}

/// One SCRAM-SHA-256 conversation
pub struct ScramClient {
    password: String,
    nonce: String,
    first_bare: String,
}

impl fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramClient")
            .field("first_bare", &self.first_bare)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    /// Start a conversation for `username` with a fresh random nonce
    pub fn new(username: String, password: String) -> Self {
        let mut raw = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::with_nonce(&username, password, BASE64.encode(raw))
    }

    fn with_nonce(username: &str, password: String, nonce: String) -> Self {
        let first_bare = format!("n={},r={}", escape_username(username), nonce);
        Self {
            password,
            nonce,
            first_bare,
        }
    }

    /// `client-first-message`, sent as the `saslStart` payload
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.first_bare)
    }

    /// Answer the server's first message
    ///
    /// Returns the `client-final-message` and the state needed to check the
    /// server's signature afterwards.
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = ServerFirst::parse(server_first)?;
        if first.nonce.len() <= self.nonce.len() || !first.nonce.starts_with(&self.nonce) {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't extend client nonce".to_string(),
            ));
        }

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), first.nonce);
        let auth_message = [self.first_bare.as_str(), server_first, without_proof.as_str()].join(",");

        let keys = Keys::derive(&self.password, &first.salt, first.iterations)?;
        let proof = keys.client_proof(auth_message.as_bytes())?;

        Ok((
            format!("{},p={}", without_proof, BASE64.encode(proof)),
            ScramState {
                auth_message: auth_message.into_bytes(),
                server_key: keys.server,
            },
        ))
    }

    /// Check the `server-final-message` (`v=<signature>` or `e=<reason>`)
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }

        let encoded = server_final
            .split(',')
            .next()
            .and_then(|part| part.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;
        let received = BASE64.decode(encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected = hmac_sha256(&state.server_key, &state.auth_message)?;
        if constant_time_eq(&received, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// `ClientKey` and `ServerKey` derived from the salted password
struct Keys {
    client: Vec<u8>,
    server: Vec<u8>,
}

impl Keys {
    fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self, ScramError> {
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted)
            .map_err(|_| ScramError::InvalidServerMessage("key derivation failed".to_string()))?;
        Ok(Self {
            client: hmac_sha256(&salted, b"Client Key")?,
            server: hmac_sha256(&salted, b"Server Key")?,
        })
    }

    /// `ClientKey XOR HMAC(H(ClientKey), AuthMessage)`
    fn client_proof(&self, auth_message: &[u8]) -> Result<Vec<u8>, ScramError> {
        let stored = Sha256::digest(&self.client);
        let signature = hmac_sha256(&stored, auth_message)?;
        Ok(self
            .client
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect())
    }
}

/// Escape `=` and `,` in a SCRAM username
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| ScramError::InvalidServerMessage("HMAC key error".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
