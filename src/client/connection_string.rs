//! Connection string parsing
//!
//! Supports the format:
//! * mongodb://[user[:password]@]host1[:port1][,host2[:port2],...][/database][?options]
//!
//! Recognized options: `authSource`, `authMechanism`, `gssapiServiceName`,
//! `replicaSet`, `maxPoolSize`, `ssl`, `connect`. Any other option rejects
//! the whole string.

use crate::connection::{DialStrategy, TlsConfig};
use crate::{Error, Result};
use percent_encoding::percent_decode_str;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Default MongoDB port
pub const DEFAULT_PORT: u16 = 27017;

/// Timeout for dialing a server (TCP, TLS, handshake and authentication)
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Mechanisms whose credentials live in the `$external` database
const EXTERNAL_MECHANISMS: &[&str] = &["PLAIN", "MONGODB-X509", "GSSAPI"];

/// A single `host[:port]` seed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    /// Port
    pub port: u16,
}

impl ServerAddress {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Parse("empty host in connection URL".into()));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| Error::Parse(format!("unterminated IPv6 literal: {}", s)))?;
            match after {
                "" => (host, None),
                _ => match after.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(Error::Parse(format!("invalid host: {}", s))),
                },
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(Error::Parse(format!("empty host in address: {}", s)));
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| Error::Parse(format!("invalid port in address: {}", s)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parsed dial parameters
#[derive(Clone)]
pub struct DialOptions {
    /// Seed addresses, in URL order
    pub addresses: Vec<String>,
    /// Database from the URL path
    pub database: String,
    /// Username from the URL user-info
    pub username: String,
    /// Password from the URL user-info
    pub password: String,
    /// Database holding the user's credentials (`authSource`)
    pub auth_source: String,
    /// Authentication mechanism (`authMechanism`)
    pub auth_mechanism: String,
    /// Kerberos service name (`gssapiServiceName`). Recorded only: GSSAPI is
    /// not an available mechanism, so a session asking for it fails to
    /// authenticate.
    pub service: String,
    /// Expected replica set name (`replicaSet`)
    pub replica_set: String,
    /// Maximum pool size (`maxPoolSize`)
    pub pool_limit: Option<i64>,
    /// Talk only to the given seed (`connect=direct`)
    pub direct: bool,
    /// Dial timeout
    pub timeout: Duration,
    /// How to open the transport (`ssl=true` selects TLS)
    pub dial_strategy: DialStrategy,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            auth_source: String::new(),
            auth_mechanism: String::new(),
            service: String::new(),
            replica_set: String::new(),
            pool_limit: None,
            direct: false,
            timeout: DEFAULT_DIAL_TIMEOUT,
            dial_strategy: DialStrategy::Plain,
        }
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("addresses", &self.addresses)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth_source", &self.auth_source)
            .field("auth_mechanism", &self.auth_mechanism)
            .field("service", &self.service)
            .field("replica_set", &self.replica_set)
            .field("pool_limit", &self.pool_limit)
            .field("direct", &self.direct)
            .field("timeout", &self.timeout)
            .field("dial_strategy", &self.dial_strategy)
            .finish()
    }
}

impl DialOptions {
    /// Parse a connection URL together with optional TLS material.
    ///
    /// The TLS arguments are only consulted when the URL carries `ssl=true`;
    /// in that case the TLS configuration is built immediately, so malformed
    /// certificates, keys or CA bundles are reported here rather than at dial
    /// time.
    ///
    /// # Errors
    ///
    /// * `Error::Parse` for a malformed URL, integer, boolean or TLS material
    /// * `Error::UnsupportedOption` for an unknown option or `connect` value
    pub fn parse(
        url: &str,
        tls_cert: &str,
        tls_key: &str,
        tls_ca: &str,
        tls_verify: &str,
    ) -> Result<Self> {
        let (_scheme, rest) = url.split_once("://").ok_or_else(|| {
            Error::Parse("connection URL must have the form scheme://host[/database][?options]".into())
        })?;

        // Fragments carry no meaning for a connection string
        let rest = rest.split_once('#').map_or(rest, |(r, _)| r);

        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));

        let (authority, path) = match rest.find('/') {
            Some(pos) => rest.split_at(pos),
            None => (rest, ""),
        };

        let (user_info, hosts) = match authority.rfind('@') {
            Some(pos) => (Some(&authority[..pos]), &authority[pos + 1..]),
            None => (None, authority),
        };

        if hosts.is_empty() {
            return Err(Error::Parse("connection URL has no hosts".into()));
        }

        let mut info = DialOptions {
            addresses: hosts.split(',').map(str::to_string).collect(),
            database: decode_component(path.strip_prefix('/').unwrap_or(path), false)?,
            ..Default::default()
        };

        for address in &info.addresses {
            ServerAddress::parse(address)?;
        }

        if let Some(user_info) = user_info {
            let (user, password) = user_info.split_once(':').unwrap_or((user_info, ""));
            info.username = decode_component(user, false)?;
            info.password = decode_component(password, false)?;
        }

        let mut seen = HashSet::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key, true)?;
            let value = decode_component(value, true)?;

            // Only the first occurrence of a key counts
            if !seen.insert(key.clone()) {
                continue;
            }

            match key.as_str() {
                "authSource" => info.auth_source = value,
                "authMechanism" => info.auth_mechanism = value,
                "gssapiServiceName" => info.service = value,
                "replicaSet" => info.replica_set = value,
                "maxPoolSize" => {
                    let limit = value
                        .parse::<i64>()
                        .map_err(|_| Error::Parse(format!("bad value for maxPoolSize: {}", value)))?;
                    info.pool_limit = Some(limit);
                }
                "ssl" => {
                    // The `ssl` option is not part of the core grammar, so TLS
                    // is layered on here as a dial strategy.
                    let ssl = parse_bool(&value)
                        .ok_or_else(|| Error::Parse(format!("bad value for ssl: {}", value)))?;
                    if ssl {
                        let tls = TlsConfig::from_pem(tls_cert, tls_key, tls_ca, tls_verify)?;
                        info.dial_strategy = DialStrategy::Tls(tls);
                    }
                }
                "connect" => match value.as_str() {
                    "direct" => info.direct = true,
                    "replicaSet" => {}
                    _ => return Err(Error::UnsupportedOption { key, value }),
                },
                _ => return Err(Error::UnsupportedOption { key, value }),
            }
        }

        Ok(info)
    }

    /// Seed addresses with ports resolved
    pub fn server_addresses(&self) -> Result<Vec<ServerAddress>> {
        self.addresses
            .iter()
            .map(|a| ServerAddress::parse(a))
            .collect()
    }

    /// Database to authenticate against
    pub fn effective_auth_source(&self) -> &str {
        if !self.auth_source.is_empty() {
            &self.auth_source
        } else if EXTERNAL_MECHANISMS.contains(&self.auth_mechanism.as_str()) {
            "$external"
        } else if !self.database.is_empty() {
            &self.database
        } else {
            "admin"
        }
    }

    /// Whether the connection should authenticate
    pub fn requires_auth(&self) -> bool {
        !self.username.is_empty() || self.auth_mechanism == "MONGODB-X509"
    }
}

/// Parse a boolean literal: `1`, `t`, `true`, `0`, `f`, `false` and their capitalized forms
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Percent-decode a URL component; query components also map `+` to space
fn decode_component(s: &str, query: bool) -> Result<String> {
    let replaced;
    let s = if query && s.contains('+') {
        replaced = s.replace('+', " ");
        replaced.as_str()
    } else {
        s
    };
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|_| Error::Parse(format!("invalid UTF-8 in connection URL component: {}", s)))
}
