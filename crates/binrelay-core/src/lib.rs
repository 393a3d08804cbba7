//! Core types for the binrelay replication client.
//!
//! This crate provides the foundational types shared by driver-level code:
//!
//! - the `Error` taxonomy (transport, protocol, server-reported, config)
//! - the loosely-typed `Value` scalar produced by row decoding
//! - `Row` and `ColumnInfo` for result-set rows with name-based access

pub mod error;
pub mod row;
pub mod value;

pub use error::{ConnectionError, ConnectionErrorKind, Error, ProtocolError, Result, ServerError};
pub use row::{ColumnInfo, Row};
pub use value::Value;
