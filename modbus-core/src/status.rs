// SPDX-License-Identifier: BSD-3-Clause

//! Unified result type shared by every layer of the engine.
//!
//! A single tagged value carries success, a library-level [`ErrorKind`], or a
//! Modbus protocol [`ExceptionCode`]. Keeping these on one enum means a
//! client transaction or a server dispatch step never needs more than one
//! `match` to decide what happened, and the diagnostics histograms (§4.15)
//! can bucket every outcome through the same dense index.

use core::fmt;

/// Library-level error, as opposed to a Modbus protocol exception.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller passed a bad argument (bad quantity, bad address range, ...).
    InvalidArgument,
    /// No response arrived within the transaction's deadline.
    Timeout,
    /// The transport's `send`/`recv` returned an error.
    TransportIo,
    /// CRC (RTU), LRC (ASCII), or general framing corruption.
    Framing,
    /// A received PDU could not be parsed, or failed structural validation.
    InvalidRequest,
    /// The transaction or request was cancelled before completion.
    Cancelled,
    /// A pool or queue was exhausted.
    NoResources,
    /// Anything else; kept for forward compatibility.
    Other,
}

impl ErrorKind {
    /// Short, allocation-free name, for logging and diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportIo => "transport-io",
            ErrorKind::Framing => "framing",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoResources => "no-resources",
            ErrorKind::Other => "other",
        }
    }

    /// Dense index into the error-slot histogram (§3, §4.15).
    pub const fn slot_index(self) -> usize {
        match self {
            ErrorKind::InvalidArgument => 0,
            ErrorKind::Timeout => 1,
            ErrorKind::TransportIo => 2,
            ErrorKind::Framing => 3,
            ErrorKind::InvalidRequest => 4,
            ErrorKind::Cancelled => 5,
            ErrorKind::NoResources => 6,
            ErrorKind::Other => 7,
        }
    }

    /// Number of distinct slots `slot_index` can return; sizes the histogram.
    pub const SLOT_COUNT: usize = 8;
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Modbus protocol exception code, as returned in an exception response
/// (function byte with the high bit set, followed by this code).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailure,
}

impl ExceptionCode {
    /// Wire value of the exception code byte.
    pub const fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::NegativeAcknowledge => 0x07,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailure => 0x0B,
        }
    }

    /// Parses an exception code byte as received on the wire. Unknown codes
    /// collapse to `None`; callers that need a catch-all bucket should fold
    /// that into `ErrorKind::Other` rather than guessing a code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::ServerDeviceBusy),
            0x07 => Some(ExceptionCode::NegativeAcknowledge),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetFailure),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "illegal-function",
            ExceptionCode::IllegalDataAddress => "illegal-data-address",
            ExceptionCode::IllegalDataValue => "illegal-data-value",
            ExceptionCode::ServerDeviceFailure => "server-device-failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server-device-busy",
            ExceptionCode::NegativeAcknowledge => "negative-acknowledge",
            ExceptionCode::MemoryParityError => "memory-parity-error",
            ExceptionCode::GatewayPathUnavailable => "gateway-path-unavailable",
            ExceptionCode::GatewayTargetFailure => "gateway-target-failure",
        }
    }

    pub const fn slot_index(self) -> usize {
        match self {
            ExceptionCode::IllegalFunction => 0,
            ExceptionCode::IllegalDataAddress => 1,
            ExceptionCode::IllegalDataValue => 2,
            ExceptionCode::ServerDeviceFailure => 3,
            ExceptionCode::Acknowledge => 4,
            ExceptionCode::ServerDeviceBusy => 5,
            ExceptionCode::NegativeAcknowledge => 6,
            ExceptionCode::MemoryParityError => 7,
            ExceptionCode::GatewayPathUnavailable => 8,
            ExceptionCode::GatewayTargetFailure => 9,
        }
    }

    pub const SLOT_COUNT: usize = 10;
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The unified status returned by every client transaction and carried
/// through the server dispatch pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(ErrorKind),
    Exception(ExceptionCode),
}

impl Status {
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    pub const fn is_exception(self) -> bool {
        matches!(self, Status::Exception(_))
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Status::Error(_))
    }

    /// Allocation-free name suitable for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error(e) => e.name(),
            Status::Exception(e) => e.name(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ErrorKind> for Status {
    fn from(e: ErrorKind) -> Self {
        Status::Error(e)
    }
}

impl From<ExceptionCode> for Status {
    fn from(e: ExceptionCode) -> Self {
        Status::Exception(e)
    }
}

/// Convenience alias used throughout the engine: `Ok(T)` on success, an
/// [`ErrorKind`] on library failure. Modbus exceptions are not `Err` here —
/// they are valid protocol-level *responses* and are represented in the
/// return type of the functions that can produce them (see `pdu` and
/// `server`), not forced through this alias.
pub type Result<T> = core::result::Result<T, ErrorKind>;

#[cfg(feature = "std")]
impl std::error::Error for ErrorKind {}
