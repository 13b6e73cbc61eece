//! Framed TCP transport for the bridge protocol.
//!
//! One controller connection, strictly sequential request/response. Reads are
//! done under a short timeout so the server loop can interleave GUI event
//! pumping between frames while the controller is idle.

use plugbridge::protocol::{RequestHeader, ResponseHeader, Status, REQUEST_HEADER_SIZE};
use plugbridge::{BridgeError, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Upper bound on a single request payload. The largest real payload is
/// `LoadPlugin` at just over 1 KiB; anything near this limit is a corrupted
/// or hostile stream.
const MAX_PAYLOAD: usize = 1 << 20;

/// What one poll of the connection produced.
pub enum Frame {
    /// A complete request, header validated.
    Request {
        header: RequestHeader,
        payload: Vec<u8>,
    },
    /// The read timed out before any bytes arrived.
    Idle,
    /// The controller closed the connection.
    Closed,
}

pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Wrap an accepted stream. The read timeout is the GUI pump interval.
    pub fn new(stream: TcpStream, poll_interval: Duration) -> Result<Self> {
        stream.set_read_timeout(Some(poll_interval))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Read the next frame. A validation failure here (bad magic, bad
    /// version, oversized payload) is fatal: the caller must drop the
    /// connection without writing a response.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header_buf = [0u8; REQUEST_HEADER_SIZE];

        // First byte decides between idle and an in-flight request. Once any
        // header bytes have arrived, keep reading past timeouts.
        match self.stream.read(&mut header_buf) {
            Ok(0) => return Ok(Frame::Closed),
            Ok(n) => self.read_remaining(&mut header_buf[n..])?,
            Err(e) if is_timeout(&e) => return Ok(Frame::Idle),
            Err(e) => return Err(e.into()),
        }

        let header = RequestHeader::from_bytes(&header_buf)?;
        if header.payload_size as usize > MAX_PAYLOAD {
            return Err(BridgeError::ProtocolError(format!(
                "payload of {} bytes exceeds limit",
                header.payload_size
            )));
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        self.read_remaining(&mut payload)?;
        Ok(Frame::Request { header, payload })
    }

    /// `read_exact` that tolerates the poll timeout mid-frame. EOF inside a
    /// frame is an error, unlike EOF between frames.
    fn read_remaining(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.stream.read(buf) {
                Ok(0) => {
                    return Err(BridgeError::ProtocolError(
                        "connection closed mid-frame".to_string(),
                    ))
                }
                Ok(n) => buf = &mut buf[n..],
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn write_response(&mut self, status: Status, payload: &[u8]) -> Result<()> {
        let header = ResponseHeader::new(status, payload.len() as u32);
        self.stream.write_all(&header.to_bytes())?;
        if !payload.is_empty() {
            self.stream.write_all(payload)?;
        }
        self.stream.flush()?;
        Ok(())
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
