//! Authentication mechanisms
//!
//! SCRAM-SHA-256 runs over `saslStart`/`saslContinue`; PLAIN is a single SASL
//! step; MONGODB-X509 is a single `authenticate` command whose identity comes
//! from the client certificate presented during the TLS handshake.

pub mod scram;

pub use scram::{ScramClient, ScramError, ScramState};

use crate::metrics::labels;
use crate::protocol::constants::commands;
use crate::{Error, Result};
use bson::{doc, spec::BinarySubtype, Binary, Document};

/// Mechanisms this client can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// SCRAM-SHA-256 (default when a username is present)
    ScramSha256,
    /// SASL PLAIN (LDAP proxy authentication)
    Plain,
    /// Client certificate authentication
    X509,
}

impl AuthMechanism {
    /// Resolve the `authMechanism` URL option; empty selects SCRAM-SHA-256
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | scram::MECHANISM => Ok(AuthMechanism::ScramSha256),
            "PLAIN" => Ok(AuthMechanism::Plain),
            "MONGODB-X509" => Ok(AuthMechanism::X509),
            other => Err(Error::Authentication(format!(
                "unsupported auth mechanism {}",
                other
            ))),
        }
    }

    /// Wire name of the mechanism
    pub fn name(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha256 => scram::MECHANISM,
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::X509 => "MONGODB-X509",
        }
    }

    /// Metric label for the mechanism
    pub fn label(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha256 => labels::MECHANISM_SCRAM,
            AuthMechanism::Plain => labels::MECHANISM_PLAIN,
            AuthMechanism::X509 => labels::MECHANISM_X509,
        }
    }
}

/// Wrap a SASL payload as generic BSON binary
pub fn sasl_payload(bytes: impl Into<Vec<u8>>) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.into(),
    }
}

/// `saslStart` command for `mechanism` with the first client payload
pub fn sasl_start(mechanism: AuthMechanism, payload: impl Into<Vec<u8>>, db: &str) -> Document {
    doc! {
        "saslStart": 1,
        "mechanism": mechanism.name(),
        "payload": sasl_payload(payload),
        "autoAuthorize": 1,
        "options": { "skipEmptyExchange": true },
        "$db": db,
    }
}

/// `saslContinue` command for an ongoing conversation
pub fn sasl_continue(conversation_id: i32, payload: impl Into<Vec<u8>>, db: &str) -> Document {
    doc! {
        "saslContinue": 1,
        "conversationId": conversation_id,
        "payload": sasl_payload(payload),
        "$db": db,
    }
}

/// PLAIN message: `authzid NUL authcid NUL passwd` with an empty authzid
pub fn plain_payload(username: &str, password: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(username.len() + password.len() + 2);
    payload.push(0);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(password.as_bytes());
    payload
}

/// `authenticate` command for MONGODB-X509
///
/// The user is optional on 3.4+ servers, which derive it from the certificate
/// subject.
pub fn x509_command(username: &str) -> Document {
    let mut command = doc! {
        "authenticate": 1,
        "mechanism": AuthMechanism::X509.name(),
    };
    if !username.is_empty() {
        command.insert("user", username);
    }
    command.insert("$db", commands::EXTERNAL_DB);
    command
}

/// Reply fields of one SASL step
#[derive(Debug, Clone, PartialEq)]
pub struct SaslReply {
    /// Server-assigned conversation
    pub conversation_id: i32,
    /// Server payload
    pub payload: Vec<u8>,
    /// Whether the server considers the exchange complete
    pub done: bool,
}

impl SaslReply {
    /// Extract the SASL fields from a command reply
    pub fn parse(reply: &Document) -> Result<Self> {
        let conversation_id = reply
            .get_i32("conversationId")
            .map_err(|e| Error::Protocol(format!("SASL reply: {}", e)))?;
        let payload = reply
            .get_binary_generic("payload")
            .map_err(|e| Error::Protocol(format!("SASL reply: {}", e)))?
            .clone();
        let done = reply.get_bool("done").unwrap_or(false);
        Ok(SaslReply {
            conversation_id,
            payload,
            done,
        })
    }

    /// Payload as UTF-8 text
    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| Error::from(ScramError::Utf8Error(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_mechanism_from_name() {
        assert_eq!(AuthMechanism::from_name("").unwrap(), AuthMechanism::ScramSha256);
        assert_eq!(
            AuthMechanism::from_name("SCRAM-SHA-256").unwrap(),
            AuthMechanism::ScramSha256
        );
        assert_eq!(AuthMechanism::from_name("PLAIN").unwrap(), AuthMechanism::Plain);
        assert_eq!(AuthMechanism::from_name("MONGODB-X509").unwrap(), AuthMechanism::X509);

        let err = AuthMechanism::from_name("GSSAPI").unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn test_plain_payload() {
        assert_eq!(plain_payload("bob", "pw"), b"\0bob\0pw".to_vec());
    }

    #[test]
    fn test_x509_command() {
        let command = x509_command("");
        assert!(!command.contains_key("user"));
        assert_eq!(command.get_str("$db").unwrap(), "$external");

        let command = x509_command("CN=client");
        assert_eq!(command.get_str("user").unwrap(), "CN=client");
    }

    #[test]
    fn test_sasl_start_shape() {
        let command = sasl_start(AuthMechanism::ScramSha256, b"n,,n=u,r=x".to_vec(), "admin");
        assert_eq!(command.get_str("mechanism").unwrap(), "SCRAM-SHA-256");
        assert_eq!(
            command.get_binary_generic("payload").unwrap(),
            &b"n,,n=u,r=x".to_vec()
        );
        assert_eq!(command.get_str("$db").unwrap(), "admin");
    }

    #[test]
    fn test_sasl_reply_parse() {
        let reply = doc! {
            "conversationId": 1,
            "payload": sasl_payload(b"r=abc".to_vec()),
            "done": false,
            "ok": 1.0,
        };
        let parsed = SaslReply::parse(&reply).unwrap();
        assert_eq!(parsed.conversation_id, 1);
        assert_eq!(parsed.payload_str().unwrap(), "r=abc");
        assert!(!parsed.done);

        assert!(SaslReply::parse(&doc! { "ok": 1.0 }).is_err());
    }
}
