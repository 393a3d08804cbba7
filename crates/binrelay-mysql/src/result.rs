//! Server reply decoding.
//!
//! Every command is answered by one of three shapes sharing a packet
//! format: an acknowledgement, an error, or a tabular result set. The
//! marker-byte dispatch lives here once, and callers receive the tagged
//! [`Reply`] instead of re-checking sentinel bytes.

use std::sync::Arc;

use binrelay_core::{ColumnInfo, Error, Result, Row, ServerError};

use crate::protocol::capabilities::{CLIENT_PROTOCOL_41, CLIENT_TRANSACTIONS};
use crate::protocol::{PacketReader, markers};
use crate::types::{ColumnDef, decode_binary_row, decode_text_row};

/// Acknowledgement of a command that produced no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack {
    /// Rows affected by the statement
    pub affected_rows: u64,
    /// Last insert id, zero when not applicable
    pub last_insert_id: u64,
    /// Server status flags after the statement
    pub status: u16,
    /// Warning count; only transmitted on 4.1-protocol sessions
    pub warnings: u16,
}

/// End-of-sequence packet contents.
#[derive(Debug, Clone, Copy)]
pub struct Eof {
    pub warnings: u16,
    pub status: u16,
}

/// A tabular reply: field descriptors, a name lookup, and decoded rows.
#[derive(Debug, Clone)]
pub struct ResultSet {
    fields: Vec<ColumnDef>,
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
}

/// The decoded outcome of one command.
///
/// Exactly one shape applies to any reply; the variants mirror the wire
/// markers (acknowledgement, error packet, result-set header).
#[derive(Debug, Clone)]
pub enum Reply {
    Ack(Ack),
    Error(ServerError),
    ResultSet(ResultSet),
}

impl ResultSet {
    /// Assemble a result set from its descriptors and raw row payloads.
    ///
    /// Rows are decoded against the descriptor list using the text or
    /// binary row encoding as selected by `binary`.
    pub fn assemble(fields: Vec<ColumnDef>, row_payloads: &[Vec<u8>], binary: bool) -> Result<Self> {
        let columns = Arc::new(ColumnInfo::new(
            fields.iter().map(|f| f.name.clone()).collect(),
        ));

        let mut rows = Vec::with_capacity(row_payloads.len());
        for payload in row_payloads {
            let values = if binary {
                decode_binary_row(payload, &fields)?
            } else {
                decode_text_row(payload, &fields)?
            };
            rows.push(Row::new(Arc::clone(&columns), values));
        }

        Ok(Self {
            fields,
            columns,
            rows,
        })
    }

    /// The field descriptors, in column order.
    pub fn fields(&self) -> &[ColumnDef] {
        &self.fields
    }

    /// The decoded rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.index_of(name)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Parse an acknowledgement packet.
///
/// The status field (and on 4.1 sessions the warning count) is present
/// only when the negotiated capability says so. The free-form info
/// trailer after the counters is intentionally not decoded.
pub fn parse_ack_packet(payload: &[u8], capability: u32) -> Result<Ack> {
    if payload.first() != Some(&markers::OK) {
        return Err(Error::malformed_packet());
    }

    let mut reader = PacketReader::new(payload);
    reader.skip(1);

    let affected_rows = reader
        .read_lenenc_int()
        .ok_or_else(Error::malformed_packet)?;
    let last_insert_id = reader
        .read_lenenc_int()
        .ok_or_else(Error::malformed_packet)?;

    let mut ack = Ack {
        affected_rows,
        last_insert_id,
        ..Ack::default()
    };

    if capability & CLIENT_PROTOCOL_41 != 0 {
        ack.status = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
        ack.warnings = reader.read_u16_le().unwrap_or(0);
    } else if capability & CLIENT_TRANSACTIONS != 0 {
        ack.status = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
    }

    Ok(ack)
}

/// Parse an error packet into a structured server error.
///
/// On 4.1 sessions the SQLSTATE marker byte is skipped and the fixed
/// five-character state read; before capability negotiation the state is
/// recognized by its `#` marker so a refused connection still surfaces
/// code, state and message.
pub fn parse_error_packet(payload: &[u8], capability: u32) -> Result<ServerError> {
    if payload.first() != Some(&markers::ERR) {
        return Err(Error::malformed_packet());
    }

    let mut reader = PacketReader::new(payload);
    reader.skip(1);

    let code = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;

    let state = if capability & CLIENT_PROTOCOL_41 != 0 || reader.peek() == Some(b'#') {
        reader.skip(1);
        reader.read_string(5).ok_or_else(Error::malformed_packet)?
    } else {
        String::new()
    };

    Ok(ServerError {
        code,
        state,
        message: reader.read_rest_string(),
    })
}

/// Parse an end-of-sequence packet's warning count and status flags.
pub fn parse_eof_packet(payload: &[u8]) -> Result<Eof> {
    if payload.first() != Some(&markers::EOF) {
        return Err(Error::malformed_packet());
    }

    let mut reader = PacketReader::new(payload);
    reader.skip(1);
    let warnings = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
    let status = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
    Ok(Eof { warnings, status })
}
