//! Connection session: lifecycle, command dispatch and the reply pump.
//!
//! A session owns its transport exclusively. Every exchange is strict
//! request/response: one blocking write followed by one blocking read
//! (or a packet pump for result sets). Callers must serialize access;
//! nothing here is safe for concurrent mutation.

// Packet payloads are bounded at 16MB, well within u32/usize.
#![allow(clippy::cast_possible_truncation)]

use std::time::Duration;

use binrelay_core::error::{ConnectionError, ConnectionErrorKind};
use binrelay_core::{Error, Result};

use crate::auth::{build_auth_response, effective_capability, scramble_password};
use crate::config::ReplicaConfig;
use crate::protocol::capabilities::{CLIENT_PROTOCOL_41, CLIENT_TRANSACTIONS};
use crate::protocol::handshake::ServerGreeting;
use crate::protocol::server_status::SERVER_STATUS_AUTOCOMMIT;
use crate::protocol::{Command, PacketReader, PacketType, PacketWriter, is_eof_packet};
use crate::result::{Reply, ResultSet, parse_ack_packet, parse_eof_packet, parse_error_packet};
use crate::transport::{PacketTransport, TcpTransport};
use crate::types::ColumnDef;

/// Lifecycle states of a session.
///
/// Transitions only move forward through a connect attempt
/// (`Disconnected → Connecting → Authenticating → Ready`); any protocol
/// or transport failure drops the transport and parks the session in
/// `Error` until [`Session::reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport
    Disconnected,
    /// Transport established, greeting not yet parsed
    Connecting,
    /// Greeting parsed, authentication in flight
    Authenticating,
    /// Authenticated and accepting commands
    Ready,
    /// Unusable until reconnect
    Error,
    /// Torn down by the caller
    Closed,
}

/// One replication client session.
///
/// Generic over the packet transport so the protocol driver can be
/// exercised against a scripted transport; production sessions use
/// [`TcpTransport`].
pub struct Session<T: PacketTransport = TcpTransport> {
    transport: Option<T>,
    state: SessionState,
    config: ReplicaConfig,
    /// Effective capability, fixed at authentication time
    capability: u32,
    /// Server status flags, refreshed by acks and end-of-sequence packets
    status: u16,
    salt: Vec<u8>,
    server_version: String,
    connection_id: u32,
}

impl<T: PacketTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("addr", &self.config.master_addr)
            .field("connection_id", &self.connection_id)
            .field("capability", &format_args!("{:#x}", self.capability))
            .finish_non_exhaustive()
    }
}

impl Session<TcpTransport> {
    /// Create a disconnected session around a configuration.
    pub fn new(config: ReplicaConfig) -> Self {
        Self::disconnected(config)
    }

    /// Dial the master and drive the session to `Ready`.
    pub fn connect(config: ReplicaConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.reconnect()?;
        Ok(session)
    }

    /// Discard any live transport and redo the whole connect sequence.
    ///
    /// This is the only recovery action after a transport-level failure.
    /// Close errors on the old transport are ignored.
    pub fn reconnect(&mut self) -> Result<()> {
        if let Some(old) = self.transport.take() {
            old.shutdown();
        }
        self.state = SessionState::Connecting;

        let transport =
            TcpTransport::connect(&self.config.master_addr, self.config.connect_timeout)
                .inspect_err(|_| self.state = SessionState::Error)?;
        self.transport = Some(transport);

        self.establish()
    }

    /// Apply a read/write deadline to the underlying socket.
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.transport {
            Some(transport) => transport.set_io_timeout(timeout),
            None => Err(not_connected()),
        }
    }
}

impl<T: PacketTransport> Session<T> {
    /// Create a disconnected session for any transport type.
    pub fn disconnected(config: ReplicaConfig) -> Self {
        Self {
            transport: None,
            state: SessionState::Disconnected,
            config,
            capability: 0,
            status: 0,
            salt: Vec::new(),
            server_version: String::new(),
            connection_id: 0,
        }
    }

    /// Attach an already-established transport and drive the session to
    /// `Ready`. Any previous transport is discarded.
    pub fn attach_transport(&mut self, transport: T) -> Result<()> {
        self.transport = Some(transport);
        self.state = SessionState::Connecting;
        self.establish()
    }

    /// Drive an already-established transport to `Ready`.
    ///
    /// This is the generic entry point for transports that are not TCP
    /// sockets, such as scripted transports in tests.
    pub fn with_transport(transport: T, config: ReplicaConfig) -> Result<Self> {
        let mut session = Self::disconnected(config);
        session.attach_transport(transport)?;
        Ok(session)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the session accepts commands.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Check if the server reported autocommit enabled.
    pub fn is_autocommit(&self) -> bool {
        self.status & SERVER_STATUS_AUTOCOMMIT != 0
    }

    /// The effective capability negotiated at authentication.
    pub fn capability(&self) -> u32 {
        self.capability
    }

    /// The most recent server status flags.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The server version from the greeting.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// The connection id the server assigned.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Execute a text command and decode its reply.
    ///
    /// Server-reported errors are returned as [`Error::Server`] and
    /// leave the session `Ready`; protocol and transport failures drop
    /// the transport and require a reconnect.
    pub fn execute(&mut self, command: &str) -> Result<Reply> {
        self.ensure_ready()?;
        tracing::debug!(command, "executing text command");

        self.guard(|session| {
            session.write_command(Command::Query, command.as_bytes())?;
            session.read_reply(false)
        })
        .and_then(Self::server_error_to_result)
    }

    /// Register this client as a replication slave.
    ///
    /// Sends the fixed-layout registration command and reads the
    /// server's generic acknowledgement, so the next exchange starts
    /// from a clean stream.
    pub fn register_slave(&mut self) -> Result<()> {
        self.ensure_ready()?;
        tracing::debug!(
            server_id = self.config.server_id,
            master_id = self.config.master_id,
            "registering as replication slave"
        );

        let payload = build_register_slave_command(&self.config);
        self.guard(|session| {
            session.write_payload(&payload)?;
            session.read_reply(false)
        })
        .and_then(Self::server_error_to_result)
        .and_then(|reply| match reply {
            Reply::Ack(_) => Ok(()),
            _ => Err(Error::protocol("unexpected reply to slave registration")),
        })
    }

    /// Round-trip a ping.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.guard(|session| {
            session.write_command(Command::Ping, &[])?;
            session.read_reply(false)
        })
        .and_then(Self::server_error_to_result)
        .and_then(|reply| match reply {
            Reply::Ack(_) => Ok(()),
            _ => Err(Error::protocol("unexpected reply to ping")),
        })
    }

    /// Best-effort teardown: send COM_QUIT, then drop the transport.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.reset_sequence();
            let mut writer = PacketWriter::with_capacity(1);
            writer.write_u8(Command::Quit as u8);
            transport.write_packet(writer.as_bytes()).ok();
        }
        self.transport = None;
        self.state = SessionState::Closed;
    }

    /// Run the connect sequence on the freshly attached transport:
    /// parse the greeting, authenticate, then force autocommit on if
    /// the server did not already report it.
    ///
    /// Any failure here, including a server error packet, fails the
    /// whole attempt: the transport is dropped and the session parked
    /// in `Error`.
    fn establish(&mut self) -> Result<()> {
        if let Err(err) = self.handshake_and_auth() {
            self.fail();
            return Err(err);
        }

        self.state = SessionState::Ready;

        // The rest of the protocol assumes autocommit semantics.
        if !self.is_autocommit() {
            if let Err(err) = self.execute("SET autocommit = 1") {
                self.fail();
                return Err(err);
            }
            if !self.is_autocommit() {
                self.fail();
                return Err(Error::protocol("server refused to enable autocommit"));
            }
        }

        tracing::debug!(
            server_version = %self.server_version,
            connection_id = self.connection_id,
            capability = self.capability,
            "session ready"
        );
        Ok(())
    }

    fn handshake_and_auth(&mut self) -> Result<()> {
        let payload = self.read_packet()?;
        let greeting = ServerGreeting::parse(&payload)?;

        self.salt = greeting.salt();
        self.status = greeting.status().unwrap_or(0);
        self.server_version = greeting.server_version().to_string();
        self.connection_id = greeting.connection_id();
        self.state = SessionState::Authenticating;

        self.capability =
            effective_capability(greeting.capability(), self.config.database.is_some());

        let token = scramble_password(self.config.password_or_empty(), &self.salt);
        let auth = build_auth_response(
            self.capability,
            self.config.collation,
            &self.config.user,
            &token,
            self.config.database.as_deref(),
        );
        self.write_payload(&auth)?;

        // Exactly one reply; only an acknowledgement means success.
        let payload = self.read_packet()?;
        match PacketType::classify(&payload) {
            PacketType::Ok => {
                let ack = parse_ack_packet(&payload, self.capability)?;
                self.absorb_status(ack.status);
                Ok(())
            }
            PacketType::Error => Err(Error::Server(parse_error_packet(
                &payload,
                self.capability,
            )?)),
            _ => Err(Error::protocol("unexpected reply to authentication")),
        }
    }

    /// Read one reply and decode it into the tagged [`Reply`].
    ///
    /// `binary` selects the row encoding used for result sets.
    fn read_reply(&mut self, binary: bool) -> Result<Reply> {
        let payload = self.read_packet()?;

        match PacketType::classify(&payload) {
            PacketType::Ok => {
                let ack = parse_ack_packet(&payload, self.capability)?;
                self.absorb_status(ack.status);
                Ok(Reply::Ack(ack))
            }
            PacketType::Error => Ok(Reply::Error(parse_error_packet(
                &payload,
                self.capability,
            )?)),
            // This client never honors local-file-load requests.
            PacketType::LocalInfile => Err(Error::malformed_packet()),
            PacketType::Eof => Err(Error::malformed_packet()),
            PacketType::Data => self.read_result_set(&payload, binary),
        }
    }

    /// Pump the column and row packets of a result set.
    fn read_result_set(&mut self, first: &[u8], binary: bool) -> Result<Reply> {
        let mut reader = PacketReader::new(first);
        let column_count = reader
            .read_lenenc_int()
            .ok_or_else(Error::malformed_packet)? as usize;
        // The column count must consume the entire header packet.
        if !reader.is_empty() {
            return Err(Error::malformed_packet());
        }

        let mut fields: Vec<ColumnDef> = Vec::with_capacity(column_count);
        loop {
            let payload = self.read_packet()?;
            if is_eof_packet(&payload) {
                self.absorb_eof(&payload)?;
                break;
            }
            fields.push(ColumnDef::parse(&payload)?);
        }
        if fields.len() != column_count {
            return Err(Error::malformed_packet());
        }

        let mut row_payloads = Vec::new();
        loop {
            let payload = self.read_packet()?;
            if is_eof_packet(&payload) {
                self.absorb_eof(&payload)?;
                break;
            }
            row_payloads.push(payload);
        }

        Ok(Reply::ResultSet(ResultSet::assemble(
            fields,
            &row_payloads,
            binary,
        )?))
    }

    /// Frame a command code + argument as a new packet-sequence epoch.
    fn write_command(&mut self, command: Command, arg: &[u8]) -> Result<()> {
        let mut writer = PacketWriter::with_capacity(1 + arg.len());
        writer.write_u8(command as u8);
        writer.write_bytes(arg);

        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        transport.reset_sequence();
        transport.write_packet(writer.as_bytes())
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.transport
            .as_mut()
            .ok_or_else(not_connected)?
            .write_packet(payload)
    }

    fn read_packet(&mut self) -> Result<Vec<u8>> {
        self.transport
            .as_mut()
            .ok_or_else(not_connected)?
            .read_packet()
    }

    /// End-of-sequence packets refresh the status flags on 4.1 sessions.
    fn absorb_eof(&mut self, payload: &[u8]) -> Result<()> {
        if self.capability & CLIENT_PROTOCOL_41 != 0 {
            let eof = parse_eof_packet(payload)?;
            self.status = eof.status;
        }
        Ok(())
    }

    fn absorb_status(&mut self, status: u16) {
        if self.capability & (CLIENT_PROTOCOL_41 | CLIENT_TRANSACTIONS) != 0 {
            self.status = status;
        }
    }

    /// Run an exchange; any session-fatal failure drops the transport
    /// and parks the session in `Error`.
    fn guard<R>(&mut self, exchange: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        match exchange(self) {
            Err(err) if err.is_fatal_to_session() => {
                self.fail();
                Err(err)
            }
            other => other,
        }
    }

    fn fail(&mut self) {
        self.transport = None;
        self.state = SessionState::Error;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() { Ok(()) } else { Err(not_connected()) }
    }

    /// Surface a decoded server error as a structured error value.
    /// The transport is healthy, so the session stays `Ready`.
    fn server_error_to_result(reply: Reply) -> Result<Reply> {
        match reply {
            Reply::Error(err) => Err(Error::Server(err)),
            other => Ok(other),
        }
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }
}

/// Build the fixed-layout slave-registration command payload.
///
/// Layout: command byte, 4-byte LE server id, length-prefixed host,
/// user and password, 2-byte LE port, 4-byte replication rank (always
/// zero), 4-byte LE master id.
#[allow(clippy::cast_possible_truncation)]
pub fn build_register_slave_command(config: &ReplicaConfig) -> Vec<u8> {
    let host = config.report_host.as_bytes();
    let user = config.user.as_bytes();
    let password = config.password_or_empty().as_bytes();

    let mut writer =
        PacketWriter::with_capacity(1 + 4 + 1 + host.len() + 1 + user.len() + 1 + password.len() + 10);
    writer.write_u8(Command::RegisterSlave as u8);
    writer.write_u32_le(config.server_id);
    writer.write_u8(host.len() as u8);
    writer.write_bytes(host);
    writer.write_u8(user.len() as u8);
    writer.write_bytes(user);
    writer.write_u8(password.len() as u8);
    writer.write_bytes(password);
    writer.write_u16_le(config.report_port);
    writer.write_u32_le(0); // replication rank, unused
    writer.write_u32_le(config.master_id);
    writer.into_bytes()
}

fn not_connected() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: "session is not ready for commands".to_string(),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new(ReplicaConfig::default());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_ready());
        assert!(!session.is_autocommit());
    }

    #[test]
    fn test_register_slave_command_layout() {
        let config = ReplicaConfig::new()
            .report_host("h")
            .user("u")
            .password("p")
            .report_port(6012)
            .server_id(14_716_013)
            .master_id(14_716_012);

        let payload = build_register_slave_command(&config);

        assert_eq!(payload[0], Command::RegisterSlave as u8);
        assert_eq!(&payload[1..5], &14_716_013u32.to_le_bytes());
        assert_eq!(payload[5], 1);
        assert_eq!(payload[6], b'h');
        assert_eq!(payload[7], 1);
        assert_eq!(payload[8], b'u');
        assert_eq!(payload[9], 1);
        assert_eq!(payload[10], b'p');
        assert_eq!(&payload[11..13], &6012u16.to_le_bytes());
        assert_eq!(&payload[13..17], &[0, 0, 0, 0]);
        assert_eq!(&payload[17..21], &14_716_012u32.to_le_bytes());
        assert_eq!(payload.len(), 21);
    }

    #[test]
    fn test_register_slave_command_empty_password() {
        let config = ReplicaConfig::new()
            .report_host("host")
            .user("repl")
            .report_port(3306);
        let payload = build_register_slave_command(&config);

        // Host length at offset 5, then host bytes.
        assert_eq!(payload[5] as usize, 4);
        // Password length byte is zero with no trailing bytes before the port.
        let password_len_offset = 5 + 1 + 4 + 1 + 4;
        assert_eq!(payload[password_len_offset], 0);
    }
}
