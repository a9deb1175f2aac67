//! Shared session handle

use super::conn::{Connection, ServerDescription};
use crate::client::ServerAddress;
use crate::config::WriteConcern;
use crate::protocol::constants::commands;
use crate::{Error, Result};
use bson::{doc, Document};
use std::time::Duration;
use tokio::sync::Mutex;

/// Commands that carry the session's write concern
const WRITE_COMMANDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "findAndModify",
    "createUser",
    "updateUser",
    "dropUser",
    "dropAllUsersFromDatabase",
    "grantRolesToUser",
    "revokeRolesFromUser",
    "createRole",
    "dropRole",
];

/// An established, authenticated connection shared by every caller of the
/// producer
///
/// All methods take `&self`; commands are serialized over the single
/// underlying connection.
#[derive(Debug)]
pub struct Session {
    conn: Mutex<Connection>,
    address: ServerAddress,
    description: Option<ServerDescription>,
    write_concern: Option<WriteConcern>,
    operation_timeout: Option<Duration>,
    pool_limit: Option<i64>,
}

impl Session {
    /// Wrap an established connection
    pub fn new(conn: Connection) -> Self {
        let address = conn.address().clone();
        let description = conn.description().cloned();
        Self {
            conn: Mutex::new(conn),
            address,
            description,
            write_concern: None,
            operation_timeout: None,
            pool_limit: None,
        }
    }

    /// Apply `concern` to write commands sent through this session
    pub fn with_write_concern(mut self, concern: Option<WriteConcern>) -> Self {
        self.write_concern = concern;
        self
    }

    /// Bound each command by `operation` and each socket read by `socket`
    pub fn with_timeouts(mut self, operation: Duration, socket: Duration) -> Self {
        self.operation_timeout = Some(operation);
        self.conn.get_mut().set_socket_timeout(Some(socket));
        self
    }

    /// Record the `maxPoolSize` requested by the connection URL
    pub fn with_pool_limit(mut self, limit: Option<i64>) -> Self {
        self.pool_limit = limit;
        self
    }

    /// Server this session is connected to
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Server description captured during the handshake
    pub fn description(&self) -> Option<&ServerDescription> {
        self.description.as_ref()
    }

    /// Write concern applied to write commands
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    /// Per-command time limit
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Pool limit requested by the connection URL
    pub fn pool_limit(&self) -> Option<i64> {
        self.pool_limit
    }

    /// Run a command, attaching the write concern to write commands that do
    /// not already carry one
    pub async fn run_command(&self, mut command: Document) -> Result<Document> {
        if let Some(concern) = &self.write_concern {
            let is_write = command
                .keys()
                .next()
                .is_some_and(|name| WRITE_COMMANDS.contains(&name.as_str()));
            if is_write && !command.contains_key("writeConcern") {
                concern.apply_to(&mut command);
            }
        }

        let mut conn = self.conn.lock().await;
        let Some(limit) = self.operation_timeout else {
            return conn.run_command(command).await;
        };
        match tokio::time::timeout(limit, conn.run_command(command)).await {
            Ok(result) => result,
            Err(_) => {
                // The reply may still arrive; the stream can't be reused
                conn.close().await;
                Err(Error::Timeout {
                    operation: "command",
                    after: limit,
                })
            }
        }
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<()> {
        self.run_command(doc! { "ping": 1, "$db": commands::ADMIN_DB })
            .await
            .map(|_| ())
    }

    /// Close the underlying connection; safe to call more than once
    pub async fn close(&self) {
        self.conn.lock().await.close().await;
        tracing::debug!(address = %self.address, "session closed");
    }
}
