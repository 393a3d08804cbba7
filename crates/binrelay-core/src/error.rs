//! Error types for replication client operations.

use std::fmt;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all replication client operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (dial, teardown, lost transport)
    Connection(ConnectionError),
    /// Wire-level protocol errors (malformed or unexpected packets)
    Protocol(ProtocolError),
    /// Errors the server reported in an error packet
    Server(ServerError),
    /// Configuration errors
    Config(String),
    /// I/O errors
    Io(std::io::Error),
}

/// A failure to establish or keep a transport.
#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the connection
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Authentication handshake failed
    Authentication,
    /// Connection lost during an exchange
    Disconnected,
}

/// A wire-level protocol violation.
///
/// These are always fatal to the current operation; the session must be
/// reconnected before further use.
#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// A structured error reported by the server in an error packet.
///
/// The transport itself is still healthy when one of these is returned;
/// the session stays usable for further commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Numeric server error code (e.g. 1045 for access denied)
    pub code: u16,
    /// Five-character SQLSTATE, empty when not transmitted
    pub state: String,
    /// Human-readable message
    pub message: String,
}

impl Error {
    /// Shorthand for a protocol error with just a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            source: None,
        })
    }

    /// A malformed-packet protocol error.
    pub fn malformed_packet() -> Self {
        Error::protocol("malformed packet")
    }

    /// Is this an error that leaves the session unusable until reconnect?
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_)
        )
    }

    /// Get the server error code, if this is a server-reported error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// Get the SQLSTATE, if this is a server-reported error carrying one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) if !e.state.is_empty() => Some(&e.state),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error: {e}"),
            Error::Protocol(e) => write!(f, "protocol error: {e}"),
            Error::Server(e) => write!(f, "server error: {e}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|s| s as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|s| s as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConnectionErrorKind::Connect => "connect",
            ConnectionErrorKind::Refused => "refused",
            ConnectionErrorKind::Authentication => "authentication",
            ConnectionErrorKind::Disconnected => "disconnected",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state.is_empty() {
            write!(f, "ERROR {}: {}", self.code, self.message)
        } else {
            write!(f, "ERROR {} ({}): {}", self.code, self.state, self.message)
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}
