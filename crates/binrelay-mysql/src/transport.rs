//! Packet transport: outer framing over a byte stream.
//!
//! The transport owns the per-connection sequence counter. Reads return
//! one fully reassembled logical packet (continuation packets for
//! payloads at the 16MB boundary are stitched back together); writes
//! frame the payload and advance the counter. Command dispatch resets
//! the counter to zero before each new request/response epoch.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use binrelay_core::error::{ConnectionError, ConnectionErrorKind};
use binrelay_core::{Error, Result};

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, writer};

/// A transport carrying logical MySQL packets.
///
/// Implementations own the rolling sequence counter; `reset_sequence`
/// starts a new request/response epoch.
pub trait PacketTransport {
    /// Read one fully reassembled logical packet payload.
    fn read_packet(&mut self) -> Result<Vec<u8>>;

    /// Frame and send one payload.
    fn write_packet(&mut self, payload: &[u8]) -> Result<()>;

    /// Reset the sequence counter to zero for a new command epoch.
    fn reset_sequence(&mut self);
}

/// Blocking TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    sequence_id: u8,
}

impl TcpTransport {
    /// Dial the server. The timeout bounds only the connect itself;
    /// reads and writes block indefinitely unless a deadline is set via
    /// [`TcpTransport::set_io_timeout`].
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self> {
        let stream = match timeout {
            Some(timeout) => {
                let addr = addr.parse().map_err(|e| {
                    Error::Config(format!("invalid socket address {addr}: {e}"))
                })?;
                TcpStream::connect_timeout(&addr, timeout)
            }
            None => TcpStream::connect(addr),
        }
        .map_err(|e| dial_error(addr, e))?;

        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            sequence_id: 0,
        })
    }

    /// Apply a read/write deadline to the underlying socket.
    ///
    /// `None` restores unbounded blocking.
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Best-effort teardown of the socket.
    pub fn shutdown(&self) {
        self.stream.shutdown(Shutdown::Both).ok();
    }

    fn read_frame(&mut self) -> Result<(Vec<u8>, u32)> {
        let mut header_buf = [0u8; PacketHeader::SIZE];
        self.stream
            .read_exact(&mut header_buf)
            .map_err(|e| stream_error("failed to read packet header", e))?;

        let header = PacketHeader::from_bytes(&header_buf);
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            self.stream
                .read_exact(&mut payload)
                .map_err(|e| stream_error("failed to read packet payload", e))?;
        }
        Ok((payload, header.payload_length))
    }
}

impl PacketTransport for TcpTransport {
    fn read_packet(&mut self) -> Result<Vec<u8>> {
        let (mut payload, mut frame_len) = self.read_frame()?;

        // A maximal frame means the payload continues in the next packet.
        while frame_len as usize == MAX_PACKET_SIZE {
            let (continuation, len) = self.read_frame()?;
            payload.extend_from_slice(&continuation);
            frame_len = len;
        }

        Ok(payload)
    }

    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let framed = writer::build_frames(payload, self.sequence_id);
        let frames = payload.len() / MAX_PACKET_SIZE + 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            self.sequence_id = self.sequence_id.wrapping_add(frames as u8);
        }

        self.stream
            .write_all(&framed)
            .map_err(|e| stream_error("failed to write packet", e))?;
        self.stream
            .flush()
            .map_err(|e| stream_error("failed to flush stream", e))?;
        Ok(())
    }

    fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }
}

fn dial_error(addr: &str, err: std::io::Error) -> Error {
    let kind = if err.kind() == std::io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("failed to connect to {addr}: {err}"),
        source: Some(Box::new(err)),
    })
}

fn stream_error(context: &str, err: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{context}: {err}"),
        source: Some(Box::new(err)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_refused_maps_to_refused_kind() {
        // Port 1 on localhost is essentially never listening.
        let err = TcpTransport::connect("127.0.0.1:1", Some(Duration::from_millis(200)))
            .expect_err("connect should fail");
        match err {
            Error::Connection(e) => assert!(matches!(
                e.kind,
                ConnectionErrorKind::Refused | ConnectionErrorKind::Connect
            )),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_addr_is_config_error() {
        let err = TcpTransport::connect("not-an-addr", Some(Duration::from_millis(10)))
            .expect_err("connect should fail");
        assert!(matches!(err, Error::Config(_)));
    }
}
