//! Core connection type

use super::state::ConnectionState;
use super::transport::Transport;
use crate::auth::{self, AuthMechanism, SaslReply, ScramClient};
use crate::client::{DialOptions, ServerAddress};
use crate::protocol::constants::commands;
use crate::protocol::{decode_message, encode_message, OpMsg};
use crate::{Error, Result};
use bson::{doc, Bson, Document};
use bytes::{Buf, BytesMut};
use std::io;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Client name reported in the handshake metadata
const DRIVER_NAME: &str = "mongo-producer";

/// Oldest wire version that speaks OP_MSG (MongoDB 3.6)
const MIN_WIRE_VERSION: i32 = 6;

/// What the server reported about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerDescription {
    /// Replica-set name, if the server is a member of one
    pub set_name: Option<String>,
    /// Whether the server accepts writes
    pub writable: bool,
    /// Highest wire protocol version supported
    pub max_wire_version: i32,
}

impl ServerDescription {
    fn from_reply(reply: &Document) -> Self {
        let writable = reply
            .get_bool("isWritablePrimary")
            .or_else(|_| reply.get_bool("ismaster"))
            .unwrap_or(false);
        Self {
            set_name: reply.get_str("setName").ok().map(str::to_string),
            writable,
            max_wire_version: get_int(reply, "maxWireVersion").unwrap_or(0) as i32,
        }
    }
}

/// MongoDB connection speaking OP_MSG over a single transport
pub struct Connection {
    transport: Transport,
    state: ConnectionState,
    read_buf: BytesMut,
    address: ServerAddress,
    socket_timeout: Option<Duration>,
    description: Option<ServerDescription>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("tls", &self.transport.is_tls())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport, address: ServerAddress) -> Self {
        Self {
            transport,
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            address,
            socket_timeout: None,
            description: None,
        }
    }

    /// Handshake and authenticate over a freshly opened transport
    pub async fn establish(
        transport: Transport,
        address: ServerAddress,
        options: &DialOptions,
    ) -> Result<Self> {
        let mut conn = Connection::new(transport, address);
        let span = tracing::info_span!(
            "establish",
            address = %conn.address,
            user = %options.username,
        );
        async {
            conn.handshake(options).await?;
            if options.requires_auth() {
                conn.authenticate(options).await?;
            }
            conn.state.transition(ConnectionState::Ready)?;
            tracing::debug!("connection ready");
            Ok(conn)
        }
        .instrument(span)
        .await
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address this connection was opened to
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Server description from the handshake
    pub fn description(&self) -> Option<&ServerDescription> {
        self.description.as_ref()
    }

    /// Limit for each individual socket read (`None` waits indefinitely)
    pub fn set_socket_timeout(&mut self, timeout: Option<Duration>) {
        self.socket_timeout = timeout;
    }

    /// Send `isMaster` and check the server against the dial options
    async fn handshake(&mut self, options: &DialOptions) -> Result<()> {
        self.state.transition(ConnectionState::Handshaking)?;

        let hello = doc! {
            "isMaster": 1,
            "helloOk": true,
            "client": {
                "driver": { "name": DRIVER_NAME, "version": env!("CARGO_PKG_VERSION") },
                "os": { "type": std::env::consts::OS, "architecture": std::env::consts::ARCH },
            },
            "$db": commands::ADMIN_DB,
        };
        let reply = self.run_command(hello).await?;
        let description = ServerDescription::from_reply(&reply);
        tracing::debug!(
            set_name = ?description.set_name,
            writable = description.writable,
            max_wire_version = description.max_wire_version,
            "handshake complete"
        );

        if description.max_wire_version < MIN_WIRE_VERSION {
            return Err(Error::Protocol(format!(
                "server wire version {} does not support OP_MSG",
                description.max_wire_version
            )));
        }

        if !options.replica_set.is_empty() && !options.direct {
            let actual = description.set_name.as_deref().unwrap_or("");
            if actual != options.replica_set {
                return Err(Error::Protocol(format!(
                    "server {} is in replica set {:?}, expected {:?}",
                    self.address, actual, options.replica_set
                )));
            }
        }

        self.description = Some(description);
        Ok(())
    }

    /// Run the configured authentication mechanism
    async fn authenticate(&mut self, options: &DialOptions) -> Result<()> {
        let mechanism = AuthMechanism::from_name(&options.auth_mechanism)?;
        let label = mechanism.label();
        let source = options.effective_auth_source().to_string();

        self.state.transition(ConnectionState::Authenticating)?;
        crate::metrics::counters::auth_attempted(label);
        let auth_start = Instant::now();

        let result = match mechanism {
            AuthMechanism::ScramSha256 => self.authenticate_scram(options, &source).await,
            AuthMechanism::Plain => self.authenticate_plain(options, &source).await,
            AuthMechanism::X509 => self.authenticate_x509(options).await,
        };

        match result {
            Ok(()) => {
                tracing::debug!(mechanism = label, source = %source, "authentication successful");
                crate::metrics::counters::auth_successful(label);
                crate::metrics::histograms::auth_duration(
                    label,
                    auth_start.elapsed().as_millis() as u64,
                );
                Ok(())
            }
            Err(Error::Server { code, message }) => {
                crate::metrics::counters::auth_failed(label, "server_error");
                Err(Error::Authentication(format!("{} (code {})", message, code)))
            }
            Err(e) => {
                crate::metrics::counters::auth_failed(label, "client_error");
                Err(e)
            }
        }
    }

    /// SCRAM-SHA-256 over saslStart/saslContinue
    async fn authenticate_scram(&mut self, options: &DialOptions, source: &str) -> Result<()> {
        let scram = ScramClient::new(options.username.clone(), options.password.clone());
        tracing::debug!("initiating SCRAM-SHA-256 authentication");

        let start = auth::sasl_start(
            AuthMechanism::ScramSha256,
            scram.client_first().into_bytes(),
            source,
        );
        let server_first = SaslReply::parse(&self.run_command(start).await?)?;
        tracing::debug!("received SCRAM server first message");

        let (client_final, scram_state) = scram.client_final(server_first.payload_str()?)?;
        let next = auth::sasl_continue(
            server_first.conversation_id,
            client_final.into_bytes(),
            source,
        );
        let server_final = SaslReply::parse(&self.run_command(next).await?)?;
        scram.verify_server_final(server_final.payload_str()?, &scram_state)?;

        if !server_final.done {
            // Servers without skipEmptyExchange expect one more empty round
            let last = auth::sasl_continue(server_final.conversation_id, Vec::new(), source);
            if !SaslReply::parse(&self.run_command(last).await?)?.done {
                return Err(Error::Authentication(
                    "SASL conversation did not complete".into(),
                ));
            }
        }

        Ok(())
    }

    /// SASL PLAIN, a single step
    async fn authenticate_plain(&mut self, options: &DialOptions, source: &str) -> Result<()> {
        let payload = auth::plain_payload(&options.username, &options.password);
        let start = auth::sasl_start(AuthMechanism::Plain, payload, source);
        let reply = SaslReply::parse(&self.run_command(start).await?)?;
        if !reply.done {
            return Err(Error::Authentication(
                "PLAIN conversation did not complete".into(),
            ));
        }
        Ok(())
    }

    /// MONGODB-X509, identity taken from the client certificate
    async fn authenticate_x509(&mut self, options: &DialOptions) -> Result<()> {
        if !self.transport.is_tls() {
            return Err(Error::Authentication(
                "MONGODB-X509 requires a TLS connection".into(),
            ));
        }
        self.run_command(auth::x509_command(&options.username))
            .await
            .map(|_| ())
    }

    /// Liveness probe against the admin database
    pub async fn ping(&mut self) -> Result<()> {
        self.run_command(doc! { "ping": 1, "$db": commands::ADMIN_DB })
            .await
            .map(|_| ())
    }

    /// Send a command and wait for its reply
    ///
    /// Replies with `ok: 0` become [`Error::Server`]. Any transport or framing
    /// failure closes the connection, since the stream position is lost.
    pub async fn run_command(&mut self, body: Document) -> Result<Document> {
        if self.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }

        let request = OpMsg::command(body);
        let reply = match self.round_trip(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                self.state = ConnectionState::Closed;
                return Err(e);
            }
        };

        if reply.response_to != request.request_id {
            self.state = ConnectionState::Closed;
            return Err(Error::Protocol(format!(
                "reply to request {} while waiting for {}",
                reply.response_to, request.request_id
            )));
        }

        check_ok(reply.body)
    }

    async fn round_trip(&mut self, request: &OpMsg) -> Result<OpMsg> {
        self.send_message(request).await?;
        let reply = self.receive_message().await?;
        if reply.more_to_come() {
            return Err(Error::Protocol(
                "unexpected moreToCome reply to a command".into(),
            ));
        }
        Ok(reply)
    }

    /// Send an OP_MSG
    async fn send_message(&mut self, msg: &OpMsg) -> Result<()> {
        let buf = encode_message(msg)?;
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Receive an OP_MSG
    async fn receive_message(&mut self) -> Result<OpMsg> {
        loop {
            match decode_message(&self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            // Need more data
            let read = self.transport.read_buf(&mut self.read_buf);
            let n = match self.socket_timeout {
                Some(limit) => tokio::time::timeout(limit, read)
                    .await
                    .map_err(|_| Error::Timeout {
                        operation: "socket read",
                        after: limit,
                    })??,
                None => read.await?,
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    ///
    /// Idempotent; a failed shutdown is logged rather than returned.
    pub async fn close(&mut self) {
        // A failed command marks the state closed without releasing the
        // socket, so shutdown is attempted regardless
        let _ = self.state.transition(ConnectionState::Closed);
        self.read_buf.clear();
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(address = %self.address, error = %e, "transport shutdown failed");
        }
    }
}

/// Read an integer field stored as any BSON numeric type
pub(crate) fn get_int(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

/// Turn an `ok: 0` reply into [`Error::Server`]
fn check_ok(reply: Document) -> Result<Document> {
    let ok = match reply.get("ok") {
        Some(Bson::Boolean(b)) => *b,
        Some(_) => get_int(&reply, "ok") == Some(1),
        None => false,
    };
    if ok {
        return Ok(reply);
    }

    Err(Error::Server {
        code: get_int(&reply, "code").unwrap_or(0) as i32,
        message: reply
            .get_str("errmsg")
            .unwrap_or("command failed")
            .to_string(),
    })
}
