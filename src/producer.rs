//! Connection producer
//!
//! Owns the single shared session for one configuration. Every public
//! operation runs under one async mutex, held across network I/O, so
//! concurrent callers never race to create two sessions.

use crate::client::{DialOptions, ServerAddress};
use crate::config::{ProducerConfig, WriteConcern};
use crate::connection::{Connection, Session};
use crate::metrics::{counters, histograms, labels};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::Instrument;

/// Per-command time limit applied to new sessions
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-read time limit applied to new sessions
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// A session the producer can health-check and retire
#[async_trait]
pub trait ManagedSession: Send + Sync + 'static {
    /// Cheap round trip proving the session is usable
    async fn ping(&self) -> Result<()>;

    /// Release the session; must not fail
    async fn close(&self);
}

#[async_trait]
impl ManagedSession for Session {
    async fn ping(&self) -> Result<()> {
        Session::ping(self).await
    }

    async fn close(&self) {
        Session::close(self).await
    }
}

/// Opens sessions from resolved dial options
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Session type produced
    type Session: ManagedSession;

    /// Open a session, applying `write_concern` when present
    async fn dial(
        &self,
        options: &DialOptions,
        write_concern: Option<&WriteConcern>,
    ) -> Result<Self::Session>;
}

/// Dials MongoDB servers over the wire protocol
#[derive(Debug, Clone)]
pub struct WireDialer {
    operation_timeout: Duration,
    socket_timeout: Duration,
}

impl Default for WireDialer {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

impl WireDialer {
    /// Override the timeouts applied to sessions after they are established
    pub fn with_timeouts(operation: Duration, socket: Duration) -> Self {
        Self {
            operation_timeout: operation,
            socket_timeout: socket,
        }
    }

    /// Try each seed in order; the first to complete handshake and auth wins
    async fn dial_seeds(addresses: &[ServerAddress], options: &DialOptions) -> Result<Connection> {
        let mut last_error = None;
        for address in addresses {
            let attempt = async {
                let transport = options.dial_strategy.dial(address).await?;
                Connection::establish(transport, address.clone(), options).await
            };
            match attempt.await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!(%address, error = %e, "seed unusable");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::connectivity(
            "no reachable servers",
            last_error.unwrap_or(Error::ConnectionClosed),
        ))
    }
}

#[async_trait]
impl Dialer for WireDialer {
    type Session = Session;

    async fn dial(
        &self,
        options: &DialOptions,
        write_concern: Option<&WriteConcern>,
    ) -> Result<Session> {
        let addresses = options.server_addresses()?;
        let transport = options.dial_strategy.label();
        let started = Instant::now();

        let conn = tokio::time::timeout(options.timeout, Self::dial_seeds(&addresses, options))
            .await
            .map_err(|_| Error::Timeout {
                operation: "dial",
                after: options.timeout,
            })??;

        histograms::dial_duration(transport, started.elapsed().as_millis() as u64);
        counters::connection_opened(transport);
        tracing::info!(address = %conn.address(), transport, "session established");

        Ok(Session::new(conn)
            .with_write_concern(write_concern.cloned())
            .with_timeouts(self.operation_timeout, self.socket_timeout)
            .with_pool_limit(options.pool_limit))
    }
}

/// State of the producer's handle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No session
    Closed,
    /// Session believed usable
    Live,
    /// Session failed its probe and is being replaced
    Stale,
}

impl HandleState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: HandleState) -> bool {
        use HandleState::*;

        matches!(
            (self, next),
            (Closed, Live) | (Live, Stale) | (Live, Closed) | (Stale, Closed) | (Closed, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: HandleState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Live => write!(f, "live"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// The shared session and the state it is in
struct HandleSlot<S> {
    state: HandleState,
    session: Option<Arc<S>>,
}

impl<S> HandleSlot<S> {
    fn closed() -> Self {
        Self {
            state: HandleState::Closed,
            session: None,
        }
    }

    fn install(&mut self, session: Arc<S>) -> Result<()> {
        self.state.transition(HandleState::Live)?;
        self.session = Some(session);
        Ok(())
    }

    fn mark_stale(&mut self) -> Result<()> {
        self.state.transition(HandleState::Stale)
    }

    /// Empty the slot, returning whatever session it held
    fn take(&mut self) -> Option<Arc<S>> {
        // Every state may move to Closed
        let _ = self.state.transition(HandleState::Closed);
        self.session.take()
    }
}

struct ProducerState<S> {
    initialized: bool,
    config: Option<ProducerConfig>,
    raw_config: Map<String, Value>,
    slot: HandleSlot<S>,
}

/// Produces and maintains one shared, health-checked session
///
/// `initialize` stores the configuration; `connection` hands out the shared
/// session, creating it on first use and replacing it when its probe fails;
/// `close` retires it.
pub struct ConnectionProducer<D: Dialer = WireDialer> {
    dialer: D,
    state: Mutex<ProducerState<D::Session>>,
}

impl ConnectionProducer<WireDialer> {
    /// Create a producer that dials real servers
    pub fn new() -> Self {
        Self::with_dialer(WireDialer::default())
    }
}

impl Default for ConnectionProducer<WireDialer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Dialer> ConnectionProducer<D> {
    /// Create a producer that opens sessions through `dialer`
    pub fn with_dialer(dialer: D) -> Self {
        Self {
            dialer,
            state: Mutex::new(ProducerState {
                initialized: false,
                config: None,
                raw_config: Map::new(),
                slot: HandleSlot::closed(),
            }),
        }
    }

    /// Decode, validate and store `raw` as the active configuration
    ///
    /// Returns the applied configuration. With `verify_connection`, a session
    /// is opened and probed; failure is returned as a connectivity error but
    /// the producer stays initialized.
    pub async fn initialize(
        &self,
        raw: &Map<String, Value>,
        verify_connection: bool,
    ) -> Result<Map<String, Value>> {
        async {
            let config = ProducerConfig::from_map(raw)?;
            let mut state = self.state.lock().await;
            state.raw_config = raw.clone();
            self.apply(&mut state, config, verify_connection).await?;
            Ok(state.raw_config.clone())
        }
        .instrument(tracing::info_span!("initialize", verify_connection))
        .await
    }

    /// Store an already validated configuration, e.g. from
    /// [`ProducerConfig::builder`]
    pub async fn initialize_with_config(
        &self,
        config: ProducerConfig,
        verify_connection: bool,
    ) -> Result<()> {
        async {
            let mut state = self.state.lock().await;
            state.raw_config = Map::new();
            self.apply(&mut state, config, verify_connection).await
        }
        .instrument(tracing::info_span!("initialize", verify_connection))
        .await
    }

    async fn apply(
        &self,
        state: &mut ProducerState<D::Session>,
        config: ProducerConfig,
        verify_connection: bool,
    ) -> Result<()> {
        if let Some(old) = state.slot.take() {
            old.close().await;
            counters::connection_closed(labels::REASON_REINITIALIZED);
            tracing::info!("previous session closed for new configuration");
        }

        state.config = Some(config);
        state.initialized = true;
        tracing::debug!("producer initialized");

        if !verify_connection {
            return Ok(());
        }

        let verify = async {
            let session = self.ensure_session(state).await?;
            session.ping().await
        };
        verify
            .await
            .map_err(|e| Error::connectivity("error verifying connection", e))
    }

    /// Shared session, created or replaced as needed
    ///
    /// # Errors
    ///
    /// `Error::NotInitialized` before a successful `initialize`; URL
    /// resolution errors; connectivity errors from dialing.
    pub async fn connection(&self) -> Result<Arc<D::Session>> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::NotInitialized);
        }
        self.ensure_session(&mut state).await
    }

    /// Probe the current session, replacing it if the probe fails
    async fn ensure_session(&self, state: &mut ProducerState<D::Session>) -> Result<Arc<D::Session>> {
        if let Some(session) = state.slot.session.clone() {
            match session.ping().await {
                Ok(()) => {
                    counters::connection_reused();
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session probe failed, reconnecting");
                    counters::probe_failed();
                    state.slot.mark_stale()?;
                }
            }
        }

        if let Some(stale) = state.slot.take() {
            stale.close().await;
            counters::connection_closed(labels::REASON_STALE);
        }

        let config = state.config.as_ref().ok_or(Error::NotInitialized)?;
        let options = config.dial_options()?;
        let session = Arc::new(
            self.dialer
                .dial(&options, config.write_concern_policy())
                .instrument(tracing::info_span!("dial", seeds = options.addresses.len()))
                .await?,
        );

        state.slot.install(Arc::clone(&session))?;
        Ok(session)
    }

    /// Close and forget the shared session; never fails
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.slot.take() {
            session.close().await;
            counters::connection_closed(labels::REASON_EXPLICIT);
            tracing::info!("session closed");
        }
        Ok(())
    }

    /// Whether `initialize` has succeeded at least once
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Current state of the handle slot
    pub async fn handle_state(&self) -> HandleState {
        self.state.lock().await.slot.state
    }

    /// Secret literals mapped to the placeholders callers should log instead
    pub async fn secret_values(&self) -> HashMap<String, String> {
        self.state
            .lock()
            .await
            .config
            .as_ref()
            .map(ProducerConfig::secret_values)
            .unwrap_or_default()
    }
}
