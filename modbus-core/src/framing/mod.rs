// SPDX-License-Identifier: BSD-3-Clause

//! Transport framing state machines (§4.9-§4.11, §6): RTU (binary + CRC +
//! silent-gap timing), ASCII (hex + LRC + CR LF), and TCP (MBAP header).
//! Each framing layer turns a byte stream into complete ADUs and back; the
//! PDU codec in [`crate::pdu`] never sees framing bytes.

pub mod ascii;
pub mod rtu;
pub mod tcp;

use crate::pdu::PDU_MAX;

/// Largest ADU any framing layer needs to buffer: unit id + PDU, with RTU's
/// two CRC bytes being the widest trailer.
pub const ADU_MAX: usize = 1 + PDU_MAX + 2;

/// A frame decoded by a framing layer, ready for the client/server FSM.
#[derive(Copy, Clone, Debug)]
pub struct DecodedFrame<'a> {
    pub unit_id: u8,
    pub pdu: &'a [u8],
}

/// Which framing state machine a link is configured to use (§6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramingKind {
    Rtu,
    Ascii,
    Tcp,
}
