// SPDX-License-Identifier: BSD-3-Clause

//! Abstract, non-blocking transport contract consumed by the client and
//! server FSMs (§4.7, §6). Concrete UART/TCP/stream-buffer drivers are
//! external collaborators (spec.md §1) and never live in this crate.

/// An I/O failure reported by a concrete transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransportError;

/// The contract every transport driver (serial, TCP, FreeRTOS stream
/// buffer, ...) must satisfy. Every method is non-blocking: a return of `Ok(0)`
/// from `send`/`recv` means "would block", not an error.
pub trait Transport {
    /// Writes as much of `bytes` as the transport can accept right now.
    /// A partial write is legitimate; the caller retries the remainder on
    /// the next `poll`.
    fn send(&mut self, bytes: &[u8]) -> core::result::Result<usize, TransportError>;

    /// Reads into `out`, returning the number of bytes read. `Ok(0)` means
    /// would-block, not end-of-stream (this engine never assumes a stream
    /// has an end).
    fn recv(&mut self, out: &mut [u8]) -> core::result::Result<usize, TransportError>;

    /// Monotonic milliseconds. Framing timing and transaction deadlines are
    /// measured against this; it must never go backwards.
    fn now_ms(&self) -> u64;

    /// Optional cooperative yield, for friendliness under a cooperative
    /// scheduler. The default implementation does nothing.
    fn yield_now(&mut self) {}
}
