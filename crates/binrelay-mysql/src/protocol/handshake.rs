//! Initial server greeting (handshake) parsing.
//!
//! The greeting is the first packet the server sends after the TCP
//! connection is established. Its layout is variable: every server sends
//! the protocol version, version string, connection id, 8-byte salt
//! prefix and the low half of its capability bitmask; newer servers
//! append a charset byte, status flags, the high capability half and a
//! 12-byte salt suffix. The two shapes are decoded once into a tagged
//! variant instead of re-checking packet length at every use site.

use binrelay_core::{Error, Result};

use crate::protocol::{MIN_PROTOCOL_VERSION, PacketReader, markers};
use crate::result::parse_error_packet;

/// Greeting with only the mandatory prefix present.
#[derive(Debug, Clone)]
pub struct ShortGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub salt: [u8; 8],
    pub capability: u16,
}

/// Greeting carrying the extended tail.
#[derive(Debug, Clone)]
pub struct ExtendedGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub salt_prefix: [u8; 8],
    /// Full 32-bit capability: low half OR high half shifted left 16.
    pub capability: u32,
    pub charset: u8,
    pub status: u16,
    pub salt_suffix: [u8; 12],
}

/// The server's initial greeting, decoded once.
#[derive(Debug, Clone)]
pub enum ServerGreeting {
    Short(ShortGreeting),
    Extended(ExtendedGreeting),
}

impl ServerGreeting {
    /// Parse the first packet of a session.
    ///
    /// A leading error marker means the server refused the connection
    /// outright; the error packet is surfaced as a structured server
    /// error. A protocol version below the supported minimum and any
    /// truncated layout fail the connection attempt.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let first = *payload.first().ok_or_else(Error::malformed_packet)?;

        if first == markers::ERR {
            return Err(Error::Server(parse_error_packet(payload, 0)?));
        }
        if first < MIN_PROTOCOL_VERSION {
            return Err(Error::protocol(format!(
                "unsupported protocol version {first}, must be >= {MIN_PROTOCOL_VERSION}"
            )));
        }

        let mut reader = PacketReader::new(payload);
        let protocol_version = reader.read_u8().ok_or_else(Error::malformed_packet)?;
        let server_version = reader
            .read_null_string()
            .ok_or_else(Error::malformed_packet)?;
        let connection_id = reader.read_u32_le().ok_or_else(Error::malformed_packet)?;

        let mut salt = [0u8; 8];
        salt.copy_from_slice(reader.read_bytes(8).ok_or_else(Error::malformed_packet)?);

        // Filler byte between the salt prefix and the capability field.
        if !reader.skip(1) {
            return Err(Error::malformed_packet());
        }
        let capability_low = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;

        if reader.is_empty() {
            return Ok(ServerGreeting::Short(ShortGreeting {
                protocol_version,
                server_version,
                connection_id,
                salt,
                capability: capability_low,
            }));
        }

        let charset = reader.read_u8().ok_or_else(Error::malformed_packet)?;
        let status = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
        let capability_high = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
        if !reader.skip(11) {
            return Err(Error::malformed_packet());
        }
        let mut salt_suffix = [0u8; 12];
        salt_suffix.copy_from_slice(reader.read_bytes(12).ok_or_else(Error::malformed_packet)?);

        Ok(ServerGreeting::Extended(ExtendedGreeting {
            protocol_version,
            server_version,
            connection_id,
            salt_prefix: salt,
            capability: u32::from(capability_low) | (u32::from(capability_high) << 16),
            charset,
            status,
            salt_suffix,
        }))
    }

    /// Protocol version byte.
    pub fn protocol_version(&self) -> u8 {
        match self {
            ServerGreeting::Short(g) => g.protocol_version,
            ServerGreeting::Extended(g) => g.protocol_version,
        }
    }

    /// Server version string.
    pub fn server_version(&self) -> &str {
        match self {
            ServerGreeting::Short(g) => &g.server_version,
            ServerGreeting::Extended(g) => &g.server_version,
        }
    }

    /// Connection (thread) id assigned by the server.
    pub fn connection_id(&self) -> u32 {
        match self {
            ServerGreeting::Short(g) => g.connection_id,
            ServerGreeting::Extended(g) => g.connection_id,
        }
    }

    /// Advertised capability bitmask; the short form only carries the
    /// low half, which contributes the whole value.
    pub fn capability(&self) -> u32 {
        match self {
            ServerGreeting::Short(g) => u32::from(g.capability),
            ServerGreeting::Extended(g) => g.capability,
        }
    }

    /// Server status flags, if the extended tail carried them.
    pub fn status(&self) -> Option<u16> {
        match self {
            ServerGreeting::Short(_) => None,
            ServerGreeting::Extended(g) => Some(g.status),
        }
    }

    /// The full salt: 8-byte prefix alone, or prefix followed by the
    /// 12-byte suffix (20 bytes) when the extended tail is present.
    pub fn salt(&self) -> Vec<u8> {
        match self {
            ServerGreeting::Short(g) => g.salt.to_vec(),
            ServerGreeting::Extended(g) => {
                let mut salt = Vec::with_capacity(20);
                salt.extend_from_slice(&g.salt_prefix);
                salt.extend_from_slice(&g.salt_suffix);
                salt
            }
        }
    }
}
