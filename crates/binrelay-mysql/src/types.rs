//! MySQL type system: field descriptors and row value decoding.
//!
//! Result sets describe their columns once with field descriptors; row
//! payloads are then decoded against that descriptor list. The text
//! protocol transmits every value as a length-encoded string, the binary
//! protocol as type-specific encodings behind a NULL bitmap.

#![allow(clippy::cast_possible_truncation)]

use binrelay_core::{Error, Result, Value};

use crate::protocol::PacketReader;

/// MySQL field type codes (the `MYSQL_TYPE_*` constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from its wire byte. Unknown codes decode as
    /// `VarString` so their values fall through to the text path.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::VarString,
        }
    }
}

/// Column definition flags.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
}

/// Column metadata parsed from one field-descriptor packet.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Character set number
    pub charset: u16,
    /// Display length
    pub column_length: u32,
    /// Wire type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a protocol-4.1 field-descriptor packet.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);

        let catalog = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;
        let schema = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;
        let table = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;
        let org_table = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;
        let name = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;
        let org_name = reader
            .read_lenenc_string()
            .ok_or_else(Error::malformed_packet)?;

        // Length of the fixed-size tail, always 0x0C.
        reader.read_lenenc_int();

        let charset = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
        let column_length = reader.read_u32_le().ok_or_else(Error::malformed_packet)?;
        let column_type =
            FieldType::from_u8(reader.read_u8().ok_or_else(Error::malformed_packet)?);
        let flags = reader.read_u16_le().ok_or_else(Error::malformed_packet)?;
        let decimals = reader.read_u8().ok_or_else(Error::malformed_packet)?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    /// Check if the column is unsigned.
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is NOT NULL.
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }
}

/// Decode one text-protocol value.
///
/// The text protocol transmits everything as strings; numeric columns
/// are parsed according to the descriptor's type, and anything that
/// fails to parse falls back to text verbatim.
pub fn decode_text_value(field_type: FieldType, data: &[u8], is_unsigned: bool) -> Value {
    let text = String::from_utf8_lossy(data);

    match field_type {
        FieldType::Tiny => {
            if is_unsigned {
                text.parse::<u8>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::TinyInt(v as i8),
                )
            } else {
                text.parse::<i8>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::TinyInt)
            }
        }
        FieldType::Short | FieldType::Year => {
            if is_unsigned {
                text.parse::<u16>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::SmallInt(v as i16),
                )
            } else {
                text.parse::<i16>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::SmallInt)
            }
        }
        FieldType::Long | FieldType::Int24 => {
            if is_unsigned {
                text.parse::<u32>()
                    .map_or_else(|_| Value::Text(text.into_owned()), |v| Value::Int(v as i32))
            } else {
                text.parse::<i32>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::Int)
            }
        }
        FieldType::LongLong => {
            if is_unsigned {
                text.parse::<u64>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::BigInt(v as i64),
                )
            } else {
                text.parse::<i64>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::BigInt)
            }
        }
        FieldType::Float => text
            .parse::<f32>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Float),
        FieldType::Double => text
            .parse::<f64>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Double),

        // Decimals stay textual to preserve precision.
        FieldType::Decimal | FieldType::NewDecimal => Value::Text(text.into_owned()),

        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Geometry
        | FieldType::Bit => Value::Bytes(data.to_vec()),

        FieldType::Json => serde_json::from_str(&text)
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Json),

        FieldType::Null => Value::Null,

        // Strings, dates and times stay textual.
        _ => Value::Text(text.into_owned()),
    }
}

/// Decode a text-protocol row against its descriptor list.
///
/// Each value is a length-encoded string; 0xFB marks NULL.
pub fn decode_text_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());

    for col in columns {
        if reader.peek() == Some(0xFB) {
            reader.skip(1);
            values.push(Value::Null);
        } else {
            let data = reader
                .read_lenenc_bytes()
                .ok_or_else(Error::malformed_packet)?;
            values.push(decode_text_value(col.column_type, data, col.is_unsigned()));
        }
    }

    Ok(values)
}

/// Decode a binary-protocol row against its descriptor list.
///
/// Layout: 0x00 header, NULL bitmap of `(columns + 7 + 2) / 8` bytes
/// (bit positions offset by two reserved bits), then the non-NULL
/// values in column order.
pub fn decode_binary_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    if reader.read_u8() != Some(0x00) {
        return Err(Error::malformed_packet());
    }

    let bitmap_len = (columns.len() + 7 + 2) / 8;
    let bitmap = reader
        .read_bytes(bitmap_len)
        .ok_or_else(Error::malformed_packet)?
        .to_vec();

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        values.push(decode_binary_value(&mut reader, col.column_type)?);
    }

    Ok(values)
}

/// Decode one binary-protocol value, consuming its bytes from the row.
fn decode_binary_value(reader: &mut PacketReader<'_>, field_type: FieldType) -> Result<Value> {
    let truncated = Error::malformed_packet;

    let value = match field_type {
        FieldType::Tiny => Value::TinyInt(reader.read_u8().ok_or_else(truncated)? as i8),
        FieldType::Short | FieldType::Year => {
            Value::SmallInt(reader.read_u16_le().ok_or_else(truncated)? as i16)
        }
        FieldType::Long | FieldType::Int24 => {
            Value::Int(reader.read_u32_le().ok_or_else(truncated)? as i32)
        }
        FieldType::LongLong => Value::BigInt(reader.read_u64_le().ok_or_else(truncated)? as i64),
        FieldType::Float => {
            let bytes = reader.read_bytes(4).ok_or_else(truncated)?;
            Value::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        FieldType::Double => {
            let bytes = reader.read_bytes(8).ok_or_else(truncated)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Value::Double(f64::from_le_bytes(buf))
        }
        FieldType::Null => Value::Null,

        FieldType::Date | FieldType::NewDate | FieldType::Timestamp | FieldType::DateTime => {
            let len = reader.read_u8().ok_or_else(truncated)? as usize;
            let data = reader.read_bytes(len).ok_or_else(truncated)?;
            Value::Text(decode_binary_datetime(data))
        }
        FieldType::Time => {
            let len = reader.read_u8().ok_or_else(truncated)? as usize;
            let data = reader.read_bytes(len).ok_or_else(truncated)?;
            Value::Text(decode_binary_time(data))
        }

        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Geometry
        | FieldType::Bit => {
            let data = reader.read_lenenc_bytes().ok_or_else(truncated)?;
            Value::Bytes(data.to_vec())
        }

        FieldType::Json => {
            let data = reader.read_lenenc_bytes().ok_or_else(truncated)?;
            let text = String::from_utf8_lossy(data);
            serde_json::from_str(&text)
                .map_or_else(|_| Value::Bytes(data.to_vec()), Value::Json)
        }

        // Decimals, strings, enums and sets are length-encoded text.
        _ => {
            let data = reader.read_lenenc_bytes().ok_or_else(truncated)?;
            Value::Text(String::from_utf8_lossy(data).into_owned())
        }
    };

    Ok(value)
}

/// Render the binary DATE/DATETIME/TIMESTAMP component encoding as an
/// ISO string. A zero-length body means the zero date.
fn decode_binary_datetime(data: &[u8]) -> String {
    match data.len() {
        len if len >= 7 => {
            let year = u16::from_le_bytes([data[0], data[1]]);
            let (month, day, hour, minute, second) = (data[2], data[3], data[4], data[5], data[6]);
            if len >= 11 {
                let micros = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            }
        }
        len if len >= 4 => {
            let year = u16::from_le_bytes([data[0], data[1]]);
            format!("{year:04}-{:02}-{:02}", data[2], data[3])
        }
        _ => "0000-00-00".to_string(),
    }
}

/// Render the binary TIME component encoding as a string.
fn decode_binary_time(data: &[u8]) -> String {
    if data.len() < 8 {
        return "00:00:00".to_string();
    }
    let sign = if data[0] != 0 { "-" } else { "" };
    let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let hours = days * 24 + u32::from(data[5]);
    format!("{sign}{hours:02}:{:02}:{:02}", data[6], data[7])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, column_type: FieldType, flags: u16) -> ColumnDef {
        ColumnDef {
            catalog: "def".to_string(),
            schema: "test".to_string(),
            table: "t".to_string(),
            org_table: "t".to_string(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset: 33,
            column_length: 11,
            column_type,
            flags,
            decimals: 0,
        }
    }

    fn lenenc_str(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_column_def_parse() {
        let mut payload = Vec::new();
        for part in ["def", "test", "t", "t", "id", "id"] {
            payload.extend_from_slice(&lenenc_str(part));
        }
        payload.push(0x0C); // fixed-tail length
        payload.extend_from_slice(&33u16.to_le_bytes());
        payload.extend_from_slice(&11u32.to_le_bytes());
        payload.push(FieldType::Long as u8);
        payload.extend_from_slice(&column_flags::NOT_NULL.to_le_bytes());
        payload.push(0);

        let def = ColumnDef::parse(&payload).unwrap();
        assert_eq!(def.name, "id");
        assert_eq!(def.column_type, FieldType::Long);
        assert!(def.is_not_null());
        assert!(!def.is_unsigned());
    }

    #[test]
    fn test_column_def_truncated() {
        let payload = lenenc_str("def");
        assert!(ColumnDef::parse(&payload).is_err());
    }

    #[test]
    fn test_decode_text_values() {
        assert_eq!(
            decode_text_value(FieldType::Long, b"-42", false),
            Value::Int(-42)
        );
        assert_eq!(
            decode_text_value(FieldType::LongLong, b"14716013", false),
            Value::BigInt(14_716_013)
        );
        assert_eq!(
            decode_text_value(FieldType::Double, b"1.5", false),
            Value::Double(1.5)
        );
        assert_eq!(
            decode_text_value(FieldType::VarString, b"gtid", false),
            Value::Text("gtid".to_string())
        );
        assert_eq!(
            decode_text_value(FieldType::Blob, &[1, 2, 3], false),
            Value::Bytes(vec![1, 2, 3])
        );
        // Unparseable numerics fall back to text.
        assert_eq!(
            decode_text_value(FieldType::Long, b"abc", false),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn test_decode_text_row_with_null() {
        let columns = vec![
            column("a", FieldType::Long, 0),
            column("b", FieldType::VarString, 0),
        ];
        let mut payload = lenenc_str("7");
        payload.push(0xFB); // NULL
        let values = decode_text_row(&payload, &columns).unwrap();
        assert_eq!(values, vec![Value::Int(7), Value::Null]);
    }

    #[test]
    fn test_decode_text_row_truncated() {
        let columns = vec![
            column("a", FieldType::Long, 0),
            column("b", FieldType::Long, 0),
        ];
        let payload = lenenc_str("7");
        assert!(decode_text_row(&payload, &columns).is_err());
    }

    #[test]
    fn test_decode_binary_row() {
        let columns = vec![
            column("a", FieldType::Long, 0),
            column("b", FieldType::VarString, 0),
            column("c", FieldType::LongLong, 0),
        ];

        // Header, bitmap (column "c" NULL: bit 4 of byte 0), values.
        let mut payload = vec![0x00, 0b0001_0000];
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&lenenc_str("pos"));

        let values = decode_binary_row(&payload, &columns).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Int(7),
                Value::Text("pos".to_string()),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_decode_binary_row_bad_header() {
        let columns = vec![column("a", FieldType::Long, 0)];
        assert!(decode_binary_row(&[0x01, 0x00, 0, 0, 0, 0], &columns).is_err());
    }

    #[test]
    fn test_decode_binary_datetime_lengths() {
        assert_eq!(decode_binary_datetime(&[]), "0000-00-00");
        let date = [0xE2, 0x07, 8, 6]; // 2018-08-06
        assert_eq!(decode_binary_datetime(&date), "2018-08-06");
        let datetime = [0xE2, 0x07, 8, 6, 12, 30, 15];
        assert_eq!(decode_binary_datetime(&datetime), "2018-08-06 12:30:15");
    }
}
