//! Replication session configuration.
//!
//! Supplied as an opaque structure by the caller; there is no file or
//! CLI loading in this crate.

use std::time::Duration;

use crate::protocol::collation;

/// Configuration for one replication session.
///
/// `server_id` identifies this client to the master, `master_id` the
/// master itself; `report_host`/`report_port` are what the slave
/// registration command announces to the server.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Master address as `host:port`
    pub master_addr: String,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database to select at connect time (optional)
    pub database: Option<String>,
    /// Hostname announced in the slave registration
    pub report_host: String,
    /// Port announced in the slave registration
    pub report_port: u16,
    /// This client's server id
    pub server_id: u32,
    /// The master's server id
    pub master_id: u32,
    /// GTID position to resume replication from
    pub gtid_slave_pos: String,
    /// Collation id sent in the auth response (default: utf8)
    pub collation: u8,
    /// Bound on the TCP dial; reads and writes are unbounded
    pub connect_timeout: Option<Duration>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            master_addr: "localhost:3306".to_string(),
            user: String::new(),
            password: None,
            database: None,
            report_host: "localhost".to_string(),
            report_port: 3306,
            server_id: 0,
            master_id: 0,
            gtid_slave_pos: String::new(),
            collation: collation::DEFAULT_COLLATION,
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ReplicaConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the master address (`host:port`).
    pub fn master_addr(mut self, addr: impl Into<String>) -> Self {
        self.master_addr = addr.into();
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database to select at connect time.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the host announced in the slave registration.
    pub fn report_host(mut self, host: impl Into<String>) -> Self {
        self.report_host = host.into();
        self
    }

    /// Set the port announced in the slave registration.
    pub fn report_port(mut self, port: u16) -> Self {
        self.report_port = port;
        self
    }

    /// Set this client's server id.
    pub fn server_id(mut self, id: u32) -> Self {
        self.server_id = id;
        self
    }

    /// Set the master's server id.
    pub fn master_id(mut self, id: u32) -> Self {
        self.master_id = id;
        self
    }

    /// Set the GTID position to resume from.
    pub fn gtid_slave_pos(mut self, pos: impl Into<String>) -> Self {
        self.gtid_slave_pos = pos.into();
        self
    }

    /// Set the collation id for the session.
    pub fn collation(mut self, collation: u8) -> Self {
        self.collation = collation;
        self
    }

    /// Bound the TCP dial; `None` blocks indefinitely.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The password, or empty when none was configured.
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}
