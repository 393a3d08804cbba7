//! Replication bootstrap: the fixed command script that puts a session
//! into replication mode.
//!
//! The sequence is fail-fast: connect, register as a slave, then set
//! the replication capability, the GTID resume position and strict GTID
//! mode. Any failing step aborts the remainder; the partially connected
//! session is handed back with the error so the caller decides whether
//! to retry or close. Nothing is retried or rolled back here.

use std::fmt;

use binrelay_core::{Error, Result};
use tracing::Span;

use crate::config::ReplicaConfig;
use crate::session::Session;
use crate::transport::{PacketTransport, TcpTransport};

/// Drives a session through the replication bootstrap script.
///
/// Logging is an injected capability: the caller hands in the
/// `tracing::Span` the script should run under instead of this crate
/// reaching for process-wide state.
#[derive(Debug)]
pub struct ReplicationBootstrap {
    config: ReplicaConfig,
    span: Span,
}

/// A failed bootstrap: the step error plus whatever session exists.
pub struct BootstrapError {
    /// The session as it was when the script aborted; possibly still
    /// connected, never `Ready`-and-registered.
    pub session: Session<TcpTransport>,
    /// The error of the failing step.
    pub error: Error,
}

impl ReplicationBootstrap {
    /// Create a bootstrap for the given configuration.
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            span: Span::none(),
        }
    }

    /// Run the script under the given span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Connect to the master and run the whole script.
    pub fn run(&self) -> std::result::Result<Session<TcpTransport>, Box<BootstrapError>> {
        let _guard = self.span.enter();

        let mut session = Session::new(self.config.clone());
        if let Err(error) = session.reconnect() {
            tracing::warn!(addr = %self.config.master_addr, %error, "connect failed");
            return Err(Box::new(BootstrapError { session, error }));
        }

        match self.prime(&mut session) {
            Ok(()) => Ok(session),
            Err(error) => Err(Box::new(BootstrapError { session, error })),
        }
    }

    /// Run the post-connect steps on an already-ready session.
    pub fn prime<T: PacketTransport>(&self, session: &mut Session<T>) -> Result<()> {
        let _guard = self.span.enter();

        if let Err(error) = session.register_slave() {
            tracing::warn!(%error, "slave registration failed");
            return Err(error);
        }

        for command in [
            "SET @mariadb_slave_capability = 4".to_string(),
            format!("SET @slave_connect_state='{}'", self.config.gtid_slave_pos),
            "SET @slave_gtid_strict_mode = 1".to_string(),
        ] {
            if let Err(error) = session.execute(&command) {
                tracing::warn!(command = %command, %error, "bootstrap command failed");
                return Err(error);
            }
        }

        tracing::debug!(
            gtid = %self.config.gtid_slave_pos,
            "replication bootstrap complete"
        );
        Ok(())
    }
}

impl fmt::Debug for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapError")
            .field("state", &self.session.state())
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replication bootstrap failed: {}", self.error)
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_construction() {
        let bootstrap = ReplicationBootstrap::new(
            ReplicaConfig::new()
                .master_addr("127.0.0.1:1")
                .user("repl")
                .gtid_slave_pos("0-1-1"),
        )
        .with_span(tracing::debug_span!("bootstrap"));

        // Nothing listens on port 1: the connect step must fail and hand
        // back the never-ready session.
        let err = bootstrap.run().expect_err("bootstrap should fail");
        assert!(!err.session.is_ready());
        assert!(matches!(err.error, Error::Connection(_) | Error::Io(_)));
    }
}
