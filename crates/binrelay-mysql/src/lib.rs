//! MySQL/MariaDB replication bootstrap client.
//!
//! This crate implements the client side of the MySQL/MariaDB replication
//! wire protocol: it opens a TCP session, performs the authentication
//! handshake, executes administrative commands, and registers itself as a
//! replication slave so the server will stream binary-log events to it.
//!
//! # Protocol overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! Each command starts a new sequence epoch (the counter resets to zero),
//! and every send is followed by exactly one blocking read before the next
//! operation may proceed.
//!
//! # Example
//!
//! ```rust,ignore
//! use binrelay_mysql::{ReplicaConfig, ReplicationBootstrap};
//!
//! let config = ReplicaConfig::new()
//!     .master_addr("10.88.147.1:6012")
//!     .user("repl")
//!     .password("repl")
//!     .server_id(14_716_013)
//!     .master_id(14_716_012)
//!     .gtid_slave_pos("0-14716012-2170");
//!
//! let session = ReplicationBootstrap::new(config).run()?;
//! ```

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod protocol;
pub mod result;
pub mod session;
pub mod transport;
pub mod types;

pub use bootstrap::{BootstrapError, ReplicationBootstrap};
pub use config::ReplicaConfig;
pub use protocol::handshake::ServerGreeting;
pub use result::{Ack, Reply, ResultSet};
pub use session::{Session, SessionState};
pub use transport::{PacketTransport, TcpTransport};
