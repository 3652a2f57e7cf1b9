// SPDX-License-Identifier: BSD-3-Clause

//! Exception frame encode/decode (§4.8, §6): `(function | 0x80, code)`.

use crate::pdu::fc;
use crate::status::{ErrorKind, ExceptionCode};

/// Encodes an exception response for `function` into `out`. Returns the
/// number of bytes written (always 2).
pub fn build(out: &mut [u8], function: u8, code: ExceptionCode) -> core::result::Result<usize, ErrorKind> {
    super::need(out.len(), 2)?;
    out[0] = function | fc::EXCEPTION_BIT;
    out[1] = code.code();
    Ok(2)
}

/// Decodes an exception response. `payload` is the function byte plus
/// whatever follows (i.e. the whole PDU); returns the exception code if the
/// exception bit is set and the code is recognized.
pub fn parse(pdu: &[u8]) -> core::result::Result<(u8, ExceptionCode), ErrorKind> {
    if pdu.len() < 2 {
        return Err(ErrorKind::InvalidRequest);
    }
    let function = pdu[0];
    if function & fc::EXCEPTION_BIT == 0 {
        return Err(ErrorKind::InvalidRequest);
    }
    let code = ExceptionCode::from_code(pdu[1]).ok_or(ErrorKind::InvalidRequest)?;
    Ok((function & !fc::EXCEPTION_BIT, code))
}
