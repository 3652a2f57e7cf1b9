// SPDX-License-Identifier: BSD-3-Clause

//! ASCII framing: `:` + hex(unit | function | payload | LRC) + CR LF
//! (§4.10, §6).
//!
//! Unlike RTU, frame boundaries are explicit (the leading colon, the
//! trailing CR LF) rather than inferred from silence, so no T1.5/T3.5
//! timing applies here. The one timing knob is an inter-character timeout:
//! if a line is left incomplete for longer than that, the partial line is
//! discarded as a framing error rather than held forever.

use crate::framing::DecodedFrame;
use crate::ring::Ring;
use crate::status::ErrorKind;

/// Longest ASCII line content (between `:` and CR), in bytes: two hex
/// characters per binary byte, for unit + PDU + LRC.
pub const LINE_MAX: usize = 2 * (1 + crate::pdu::PDU_MAX + 1);

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_nibble(hi)? << 4) | hex_nibble(lo)?)
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn lrc(bytes: &[u8]) -> u8 {
    let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Encodes `unit | function | payload` as `:HEXHEXHEX...LRC\r\n` into `out`.
pub fn build_frame(out: &mut [u8], unit: u8, function: u8, payload: &[u8]) -> core::result::Result<usize, ErrorKind> {
    let binary_len = 2 + payload.len();
    let total = 1 + binary_len * 2 + 2 + 2; // ':' + hex(binary+lrc) + CRLF
    if out.len() < total {
        return Err(ErrorKind::InvalidArgument);
    }
    out[0] = b':';
    let mut pos = 1;
    let mut write_hex = |out: &mut [u8], pos: &mut usize, byte: u8| {
        out[*pos] = HEX_DIGITS[(byte >> 4) as usize];
        out[*pos + 1] = HEX_DIGITS[(byte & 0x0F) as usize];
        *pos += 2;
    };
    write_hex(out, &mut pos, unit);
    write_hex(out, &mut pos, function);
    for &b in payload {
        write_hex(out, &mut pos, b);
    }
    let mut body = [0u8; 2];
    body[0] = unit;
    body[1] = function;
    let checksum = {
        let mut sum = unit.wrapping_add(function);
        for &b in payload {
            sum = sum.wrapping_add(b);
        }
        (!sum).wrapping_add(1)
    };
    write_hex(out, &mut pos, checksum);
    out[pos] = b'\r';
    out[pos + 1] = b'\n';
    Ok(pos + 2)
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum LineState {
    WaitStart,
    InLine,
    SawCr,
}

/// The ASCII link's framing state: accumulates one line at a time out of
/// the RX ring, validates its LRC, and reports framing errors for
/// malformed or abandoned lines.
pub struct AsciiFraming<'s> {
    rx: Ring<'s>,
    line_buf: &'s mut [u8],
    line_len: usize,
    state: LineState,
    last_byte_ms: u64,
    have_activity: bool,
    inter_char_timeout_ms: u64,
    pub framing_errors: u64,
}

/// Outcome of one [`AsciiFraming::try_take_frame`] attempt.
pub enum TakeResult<'a> {
    /// No complete line is available yet.
    NotReady,
    /// A validly-checksummed frame is ready for dispatch.
    Frame(DecodedFrame<'a>),
    /// A line completed but failed hex decoding or LRC validation, or a
    /// partial line was abandoned after the inter-character timeout.
    Garbage,
}

impl<'s> AsciiFraming<'s> {
    pub fn new(rx_storage: &'s mut [u8], line_buf: &'s mut [u8], inter_char_timeout_ms: u64) -> core::result::Result<Self, ErrorKind> {
        let rx = Ring::new(rx_storage).map_err(|_| ErrorKind::InvalidArgument)?;
        Ok(Self {
            rx,
            line_buf,
            line_len: 0,
            state: LineState::WaitStart,
            last_byte_ms: 0,
            have_activity: false,
            inter_char_timeout_ms,
            framing_errors: 0,
        })
    }

    pub fn ingest(&mut self, bytes: &[u8], now_ms: u64) {
        if bytes.is_empty() {
            return;
        }
        self.rx.write(bytes);
        self.last_byte_ms = now_ms;
        self.have_activity = true;
    }

    fn timed_out(&self, now_ms: u64) -> bool {
        self.state != LineState::WaitStart && self.have_activity && now_ms.saturating_sub(self.last_byte_ms) > self.inter_char_timeout_ms
    }

    fn reset_line(&mut self) {
        self.line_len = 0;
        self.state = LineState::WaitStart;
    }

    fn decode_line<'a>(&self, scratch: &'a mut [u8]) -> Option<DecodedFrame<'a>> {
        if self.line_len < 6 || self.line_len % 2 != 0 {
            return None;
        }
        let binary_len = self.line_len / 2;
        if binary_len > scratch.len() {
            return None;
        }
        for i in 0..binary_len {
            scratch[i] = hex_byte(self.line_buf[2 * i], self.line_buf[2 * i + 1])?;
        }
        let body = &scratch[..binary_len - 1];
        let received_lrc = scratch[binary_len - 1];
        if lrc(body) != received_lrc {
            return None;
        }
        Some(DecodedFrame { unit_id: scratch[0], pdu: &scratch[1..binary_len - 1] })
    }

    /// Attempts to pull one complete, validated line out of the RX ring.
    pub fn try_take_frame<'a>(&mut self, scratch: &'a mut [u8], now_ms: u64) -> TakeResult<'a> {
        if self.timed_out(now_ms) {
            self.reset_line();
            self.framing_errors += 1;
            return TakeResult::Garbage;
        }
        while let Some(byte) = self.rx.pop() {
            match self.state {
                LineState::WaitStart => {
                    if byte == b':' {
                        self.line_len = 0;
                        self.state = LineState::InLine;
                    }
                }
                LineState::InLine => {
                    if byte == b'\r' {
                        self.state = LineState::SawCr;
                    } else if self.line_len < self.line_buf.len() {
                        self.line_buf[self.line_len] = byte;
                        self.line_len += 1;
                    } else {
                        // Line too long to be any valid frame; give up on it.
                        self.reset_line();
                        self.framing_errors += 1;
                        return TakeResult::Garbage;
                    }
                }
                LineState::SawCr => {
                    let completed_len = self.line_len;
                    self.reset_line();
                    if byte != b'\n' {
                        self.framing_errors += 1;
                        return TakeResult::Garbage;
                    }
                    self.line_len = completed_len;
                    return match self.decode_line(scratch) {
                        Some(frame) => {
                            // Safety net: decode_line borrows `scratch` with the
                            // lifetime callers expect; line_len reset below does
                            // not affect the already-built view.
                            self.line_len = 0;
                            TakeResult::Frame(frame)
                        }
                        None => {
                            self.framing_errors += 1;
                            TakeResult::Garbage
                        }
                    };
                }
            }
        }
        TakeResult::NotReady
    }
}
