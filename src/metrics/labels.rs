//! Metric names and label values

/// Sessions opened
pub const CONNECTIONS_OPENED: &str = "mongo_producer_connections_opened_total";
/// Existing session returned after a successful probe
pub const CONNECTIONS_REUSED: &str = "mongo_producer_connections_reused_total";
/// Health probe failures on an existing session
pub const PROBE_FAILURES: &str = "mongo_producer_probe_failures_total";
/// Sessions closed
pub const CONNECTIONS_CLOSED: &str = "mongo_producer_connections_closed_total";
/// Authentication attempts
pub const AUTH_ATTEMPTED: &str = "mongo_producer_auth_attempted_total";
/// Successful authentications
pub const AUTH_SUCCESSFUL: &str = "mongo_producer_auth_successful_total";
/// Failed authentications
pub const AUTH_FAILED: &str = "mongo_producer_auth_failed_total";
/// Dial duration (TCP, TLS, handshake and auth)
pub const DIAL_DURATION: &str = "mongo_producer_dial_duration_ms";
/// Authentication duration
pub const AUTH_DURATION: &str = "mongo_producer_auth_duration_ms";

/// Transport label values
pub const TRANSPORT_TCP: &str = "tcp";
/// TLS transport
pub const TRANSPORT_TLS: &str = "tls";

/// SCRAM-SHA-256 mechanism label
pub const MECHANISM_SCRAM: &str = "SCRAM-SHA-256";
/// PLAIN mechanism label
pub const MECHANISM_PLAIN: &str = "PLAIN";
/// X.509 mechanism label
pub const MECHANISM_X509: &str = "MONGODB-X509";

/// Close reasons
pub const REASON_EXPLICIT: &str = "explicit";
/// Closed because the probe failed
pub const REASON_STALE: &str = "stale";
/// Closed because configuration was replaced
pub const REASON_REINITIALIZED: &str = "reinitialized";
