//! Transport abstraction (plain TCP vs TCP upgraded to TLS)

use super::tls::{server_name, TlsConfig};
use crate::client::ServerAddress;
use crate::metrics::labels;
use crate::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Transport layer abstraction
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(address: &ServerAddress) -> Result<Self> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Plain(stream))
    }

    /// Connect via TCP and immediately perform a TLS handshake
    pub async fn connect_tcp_tls(address: &ServerAddress, tls_config: &TlsConfig) -> Result<Self> {
        let tcp_stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        tcp_stream.set_nodelay(true)?;

        let server_name = server_name(&address.host)?;

        let tls_connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
        let tls_stream = tls_connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake with {} failed: {}", address, e)))?;

        tracing::debug!(%address, "TLS connection established");
        Ok(Transport::Tls(tls_stream))
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write all bytes to the stream
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the stream
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}

/// How a transport to a single server is opened.
///
/// Selected by the `ssl` connection URL option.
#[derive(Debug, Clone, Default)]
pub enum DialStrategy {
    /// Plain TCP
    #[default]
    Plain,
    /// TCP immediately upgraded to TLS with this configuration
    Tls(TlsConfig),
}

impl DialStrategy {
    /// Whether this strategy performs a TLS handshake
    pub fn is_tls(&self) -> bool {
        matches!(self, DialStrategy::Tls(_))
    }

    /// TLS configuration, if any
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        match self {
            DialStrategy::Plain => None,
            DialStrategy::Tls(config) => Some(config),
        }
    }

    /// Metric label for this strategy
    pub fn label(&self) -> &'static str {
        match self {
            DialStrategy::Plain => labels::TRANSPORT_TCP,
            DialStrategy::Tls(_) => labels::TRANSPORT_TLS,
        }
    }

    /// Open a transport to `address`
    pub async fn dial(&self, address: &ServerAddress) -> Result<Transport> {
        match self {
            DialStrategy::Plain => Transport::connect_tcp(address).await,
            DialStrategy::Tls(config) => Transport::connect_tcp_tls(address, config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let address = ServerAddress {
            host: "localhost".into(),
            port: 9,
        };
        let result = DialStrategy::Plain.dial(&address).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_plain_dial_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let address = ServerAddress {
            host: "127.0.0.1".into(),
            port,
        };
        let mut transport = DialStrategy::Plain.dial(&address).await.unwrap();
        assert!(!transport.is_tls());

        transport.write_all(b"ping").await.unwrap();
        transport.flush().await.unwrap();

        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            assert!(transport.read_buf(&mut buf).await.unwrap() > 0);
        }
        assert_eq!(&buf[..], b"ping");

        transport.shutdown().await.unwrap();
        server.await.unwrap();
    }

    #[test]
    fn test_strategy_labels() {
        assert_eq!(DialStrategy::Plain.label(), "tcp");
        assert!(!DialStrategy::default().is_tls());
        assert!(DialStrategy::default().tls_config().is_none());
    }
}
