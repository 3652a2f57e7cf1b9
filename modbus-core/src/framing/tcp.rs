// SPDX-License-Identifier: BSD-3-Clause

//! TCP framing: the MBAP header (§4.11, §6).
//!
//! `transaction_id(2) | protocol_id(2)=0 | length(2) | unit_id(1) | pdu...`.
//! `length` counts everything after itself (unit id + PDU), not the whole
//! ADU. Unlike RTU/ASCII there is no CRC/LRC trailer and no silent-gap
//! timing — TCP delivers a reliable byte stream, and the length field alone
//! delimits frames.

use crate::framing::DecodedFrame;
use crate::pdu::PDU_MAX;
use crate::ring::Ring;
use crate::status::ErrorKind;

pub const HEADER_LEN: usize = 7;

/// A parsed MBAP header, with `length` as received on the wire (unit id +
/// PDU byte count, per §4.11).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub length: u16,
}

/// Encodes the 7-byte MBAP header into `out[..7]`.
pub fn build_header(out: &mut [u8], transaction_id: u16, unit_id: u8, pdu_len: usize) -> core::result::Result<(), ErrorKind> {
    if out.len() < HEADER_LEN {
        return Err(ErrorKind::InvalidArgument);
    }
    let length = 1 + pdu_len;
    if length > 1 + PDU_MAX || length > u16::MAX as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    out[0..2].copy_from_slice(&transaction_id.to_be_bytes());
    out[2..4].copy_from_slice(&0u16.to_be_bytes());
    out[4..6].copy_from_slice(&(length as u16).to_be_bytes());
    out[6] = unit_id;
    Ok(())
}

/// Builds a full ADU (`header | pdu`) into `out`, returning its length.
pub fn build_frame(out: &mut [u8], transaction_id: u16, unit_id: u8, pdu: &[u8]) -> core::result::Result<usize, ErrorKind> {
    if out.len() < HEADER_LEN + pdu.len() {
        return Err(ErrorKind::InvalidArgument);
    }
    build_header(out, transaction_id, unit_id, pdu.len())?;
    out[HEADER_LEN..HEADER_LEN + pdu.len()].copy_from_slice(pdu);
    Ok(HEADER_LEN + pdu.len())
}

/// Parses and validates a 7-byte MBAP header (§8: "invalid bounds
/// rejected" — `protocol_id != 0`, `length < 2`, or `length > 1 + PDU_MAX`
/// are all rejected here rather than left for the caller to notice).
pub fn parse_header(bytes: &[u8]) -> core::result::Result<MbapHeader, ErrorKind> {
    if bytes.len() < HEADER_LEN {
        return Err(ErrorKind::InvalidRequest);
    }
    let transaction_id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let protocol_id = u16::from_be_bytes([bytes[2], bytes[3]]);
    let length = u16::from_be_bytes([bytes[4], bytes[5]]);
    let unit_id = bytes[6];
    if protocol_id != 0 {
        return Err(ErrorKind::Framing);
    }
    if (length as usize) < 2 || (length as usize) > 1 + PDU_MAX {
        return Err(ErrorKind::Framing);
    }
    Ok(MbapHeader { transaction_id, unit_id, length })
}

/// TCP link framing state: buffers bytes until a whole ADU (header + the
/// `length`-declared PDU) has arrived, then hands it back as a
/// [`DecodedFrame`] alongside its transaction id.
pub struct TcpFraming<'s> {
    rx: Ring<'s>,
    pub framing_errors: u64,
}

/// A decoded TCP frame, carrying the transaction id the client/server FSM
/// needs for correlation (unlike RTU/ASCII, which rely on strict ordering).
#[derive(Copy, Clone, Debug)]
pub struct TcpFrame<'a> {
    pub transaction_id: u16,
    pub decoded: DecodedFrame<'a>,
}

impl<'s> TcpFraming<'s> {
    pub fn new(rx_storage: &'s mut [u8]) -> core::result::Result<Self, ErrorKind> {
        let rx = Ring::new(rx_storage).map_err(|_| ErrorKind::InvalidArgument)?;
        Ok(Self { rx, framing_errors: 0 })
    }

    pub fn ingest(&mut self, bytes: &[u8]) {
        self.rx.write(bytes);
    }

    pub fn rx_free(&self) -> usize {
        self.rx.free()
    }

    /// Attempts to pull one complete ADU out of the RX ring. Returns
    /// `Ok(None)` if fewer bytes than a full frame have arrived yet, `Err`
    /// if the header at the front of the stream is malformed (a TCP stream
    /// cannot resync the way RTU can — a bad header desyncs the whole
    /// connection and the caller is expected to drop it).
    pub fn try_take_frame<'a>(&mut self, scratch: &'a mut [u8]) -> core::result::Result<Option<TcpFrame<'a>>, ErrorKind> {
        if self.rx.size() < HEADER_LEN {
            return Ok(None);
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        {
            let segs = self.rx.peek_segments(0, HEADER_LEN);
            segs.copyout(&mut header_bytes);
        }
        let header = match parse_header(&header_bytes) {
            Ok(h) => h,
            Err(e) => {
                self.framing_errors += 1;
                return Err(e);
            }
        };
        let total_len = HEADER_LEN + (header.length as usize - 1);
        if self.rx.size() < total_len {
            return Ok(None);
        }
        if scratch.len() < total_len {
            return Err(ErrorKind::InvalidArgument);
        }
        let n = self.rx.read(&mut scratch[..total_len]);
        debug_assert_eq!(n, total_len);
        let pdu = &scratch[HEADER_LEN..total_len];
        Ok(Some(TcpFrame {
            transaction_id: header.transaction_id,
            decoded: DecodedFrame { unit_id: header.unit_id, pdu },
        }))
    }
}
