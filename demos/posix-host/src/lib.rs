// SPDX-License-Identifier: BSD-3-Clause

//! Host glue for running `modbus-core` over a real TCP socket. This is
//! the "one external collaborator" the engine leaves to its caller: a
//! concrete [`modbus_core::transport::Transport`] backed by
//! [`std::net::TcpStream`], plus the small amount of host-side plumbing
//! (non-blocking mode, a millisecond clock) that a bare-metal build
//! would get from its HAL instead.

use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use modbus_core::transport::{Transport, TransportError};

/// Modbus TCP's conventional well-known port (§4.11).
pub const DEFAULT_TCP_PORT: u16 = 502;

/// A [`Transport`] over a non-blocking [`TcpStream`], with `now_ms`
/// measured from the point the connection was wrapped.
pub struct TcpTransport {
    stream: TcpStream,
    start: Instant,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, start: Instant::now() })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        match self.stream.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => {
                log::warn!("tcp send failed: {e}");
                Err(TransportError)
            }
        }
    }

    fn recv(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(out) {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => {
                log::warn!("tcp recv failed: {e}");
                Err(TransportError)
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

fn would_block(e: &std::io::Error) -> bool {
    matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::Interrupted)
}
