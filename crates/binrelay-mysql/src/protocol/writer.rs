//! MySQL packet payload writing and outer framing.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// A growable buffer for building packet payloads.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Create a writer with a small default capacity.
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    /// Create a writer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Current payload length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrow the payload built so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer, returning the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a little-endian u16.
    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u32.
    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a NUL-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write zero padding.
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Frame the payload into one or more wire packets.
    pub fn build_packet(&self, sequence_id: u8) -> Vec<u8> {
        build_frames(&self.buffer, sequence_id)
    }
}

/// Frame a payload into wire packets starting at `sequence_id`.
///
/// Payloads of 16MB - 1 bytes or more are split; a payload that is an
/// exact multiple of the maximum is terminated with an empty packet so
/// the reader knows the sequence ended.
pub fn build_frames(payload: &[u8], mut sequence_id: u8) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + PacketHeader::SIZE);

    if payload.len() < MAX_PACKET_SIZE {
        let header = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id,
        };
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(payload);
        return framed;
    }

    let mut offset = 0;
    while offset < payload.len() {
        let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: chunk_len as u32,
            sequence_id,
        };
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(&payload[offset..offset + chunk_len]);
        offset += chunk_len;
        sequence_id = sequence_id.wrapping_add(1);

        if chunk_len == MAX_PACKET_SIZE && offset == payload.len() {
            let header = PacketHeader {
                payload_length: 0,
                sequence_id,
            };
            framed.extend_from_slice(&header.to_bytes());
        }
    }

    framed
}
