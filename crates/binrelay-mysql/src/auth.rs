//! Authentication: capability negotiation and the native-password
//! scramble.
//!
//! The scramble algorithm is the classic `mysql_native_password`:
//!
//! ```text
//! SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
//! ```
//!
//! The plaintext password never crosses the wire.

#![allow(clippy::cast_possible_truncation)]

use sha1::{Digest, Sha1};

use crate::protocol::PacketWriter;
use crate::protocol::capabilities::{CLIENT_CONNECT_WITH_DB, REPLICA_CLIENT_FLAGS};

/// Compute the effective capability for a session.
///
/// The client's desired flags are intersected with what the server
/// advertised; `CLIENT_CONNECT_WITH_DB` is requested only when a target
/// database was supplied. The result is always a subset of the server's
/// advertised set and is never widened for the rest of the session.
pub fn effective_capability(server_capability: u32, with_database: bool) -> u32 {
    let mut desired = REPLICA_CLIENT_FLAGS;
    if with_database {
        desired |= CLIENT_CONNECT_WITH_DB;
    }
    desired & server_capability
}

/// Compute the `mysql_native_password` authentication token.
///
/// An empty password produces an empty token. Salts longer than 20
/// bytes are truncated to the scramble length.
pub fn scramble_password(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let salt = if salt.len() > 20 { &salt[..20] } else { salt };

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1: [u8; 20] = hasher.finalize().into();

    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2: [u8; 20] = hasher.finalize().into();

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Build the authentication response payload.
///
/// Layout: 4-byte capability, 4-byte max-packet placeholder (zero),
/// 1-byte collation id, 23 reserved zero bytes, NUL-terminated user,
/// 1-byte token length + token bytes, and the NUL-terminated database
/// name when `CLIENT_CONNECT_WITH_DB` was negotiated.
pub fn build_auth_response(
    capability: u32,
    collation: u8,
    user: &str,
    token: &[u8],
    database: Option<&str>,
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(64 + user.len() + token.len());

    writer.write_u32_le(capability);
    writer.write_u32_le(0);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.write_null_string(user);
    writer.write_u8(token.len() as u8);
    writer.write_bytes(token);

    if capability & CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(database.unwrap_or(""));
    }

    writer.into_bytes()
}
