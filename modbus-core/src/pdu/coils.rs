// SPDX-License-Identifier: BSD-3-Clause

//! FC01/02/05/0F — coil and discrete-input function codes (§4.8, §6).

use crate::pdu::{bytes_for_bits, check_address_range, fc, get_u16, need, put_u16, BitsView};
use crate::status::ErrorKind;

pub const MAX_READ_QUANTITY: u16 = 2000;
pub const MAX_WRITE_QUANTITY: u16 = 1968;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

fn check_read_quantity(quantity: u16) -> core::result::Result<(), ErrorKind> {
    if quantity == 0 || quantity > MAX_READ_QUANTITY {
        Err(ErrorKind::InvalidArgument)
    } else {
        Ok(())
    }
}

// ---- FC01 Read Coils / FC02 Read Discrete Inputs ----

pub fn build_read_request(out: &mut [u8], function: u8, address: u16, quantity: u16) -> core::result::Result<usize, ErrorKind> {
    check_read_quantity(quantity)?;
    check_address_range(address, quantity)?;
    need(out.len(), 5)?;
    out[0] = function;
    put_u16(out, 1, address);
    put_u16(out, 3, quantity);
    Ok(5)
}

pub fn parse_read_request(pdu: &[u8], expected_function: u8) -> core::result::Result<(u16, u16), ErrorKind> {
    if pdu.len() != 5 || pdu[0] != expected_function {
        return Err(ErrorKind::InvalidRequest);
    }
    let address = get_u16(pdu, 1);
    let quantity = get_u16(pdu, 3);
    check_read_quantity(quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    check_address_range(address, quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    Ok((address, quantity))
}

pub fn build_read_response(out: &mut [u8], function: u8, bits: BitsView<'_>) -> core::result::Result<usize, ErrorKind> {
    let count = bits.count();
    check_read_quantity(count)?;
    let byte_count = bytes_for_bits(count) as usize;
    need(out.len(), 2 + byte_count)?;
    out[0] = function;
    out[1] = byte_count as u8;
    // BitsView already stores packed bytes; copy them straight through.
    out[2..2 + byte_count].copy_from_slice(&bits.raw()[..byte_count]);
    Ok(2 + byte_count)
}

pub fn parse_read_response(pdu: &[u8], expected_function: u8) -> core::result::Result<BitsView<'_>, ErrorKind> {
    if pdu.len() < 2 || pdu[0] != expected_function {
        return Err(ErrorKind::InvalidRequest);
    }
    let byte_count = pdu[1] as usize;
    if pdu.len() != 2 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    // The wire format doesn't carry the exact bit count, only the rounded-up
    // byte count; callers that need the precise count must track the
    // quantity they asked for and truncate accordingly.
    Ok(BitsView::new(&pdu[2..2 + byte_count], (byte_count * 8) as u16))
}

// ---- FC05 Write Single Coil ----

pub fn build_write_single_request(out: &mut [u8], address: u16, value: bool) -> core::result::Result<usize, ErrorKind> {
    need(out.len(), 5)?;
    out[0] = fc::WRITE_SINGLE_COIL;
    put_u16(out, 1, address);
    put_u16(out, 3, if value { COIL_ON } else { COIL_OFF });
    Ok(5)
}

pub fn parse_write_single_request(pdu: &[u8]) -> core::result::Result<(u16, bool), ErrorKind> {
    if pdu.len() != 5 || pdu[0] != fc::WRITE_SINGLE_COIL {
        return Err(ErrorKind::InvalidRequest);
    }
    let address = get_u16(pdu, 1);
    let raw = get_u16(pdu, 3);
    match raw {
        COIL_ON => Ok((address, true)),
        COIL_OFF => Ok((address, false)),
        _ => Err(ErrorKind::InvalidRequest),
    }
}

pub fn build_write_single_response(out: &mut [u8], address: u16, value: bool) -> core::result::Result<usize, ErrorKind> {
    build_write_single_request(out, address, value)
}

pub fn parse_write_single_response(pdu: &[u8]) -> core::result::Result<(u16, bool), ErrorKind> {
    parse_write_single_request(pdu)
}

// ---- FC0F Write Multiple Coils ----

pub struct WriteMultipleRequest<'a> {
    pub address: u16,
    pub quantity: u16,
    pub bits: BitsView<'a>,
}

pub fn build_write_multiple_request(out: &mut [u8], address: u16, bits: BitsView<'_>) -> core::result::Result<usize, ErrorKind> {
    let count = bits.count();
    if count == 0 || count > MAX_WRITE_QUANTITY {
        return Err(ErrorKind::InvalidArgument);
    }
    check_address_range(address, count)?;
    let byte_count = bytes_for_bits(count) as usize;
    need(out.len(), 6 + byte_count)?;
    out[0] = fc::WRITE_MULTIPLE_COILS;
    put_u16(out, 1, address);
    put_u16(out, 3, count);
    out[5] = byte_count as u8;
    out[6..6 + byte_count].copy_from_slice(&bits.raw()[..byte_count]);
    Ok(6 + byte_count)
}

pub fn parse_write_multiple_request(pdu: &[u8]) -> core::result::Result<WriteMultipleRequest<'_>, ErrorKind> {
    if pdu.len() < 6 || pdu[0] != fc::WRITE_MULTIPLE_COILS {
        return Err(ErrorKind::InvalidRequest);
    }
    let address = get_u16(pdu, 1);
    let quantity = get_u16(pdu, 3);
    let byte_count = pdu[5] as usize;
    if quantity == 0 || quantity > MAX_WRITE_QUANTITY || byte_count != bytes_for_bits(quantity) as usize {
        return Err(ErrorKind::InvalidRequest);
    }
    if pdu.len() != 6 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    check_address_range(address, quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    Ok(WriteMultipleRequest {
        address,
        quantity,
        bits: BitsView::new(&pdu[6..6 + byte_count], quantity),
    })
}

pub fn build_write_multiple_response(out: &mut [u8], address: u16, quantity: u16) -> core::result::Result<usize, ErrorKind> {
    need(out.len(), 5)?;
    out[0] = fc::WRITE_MULTIPLE_COILS;
    put_u16(out, 1, address);
    put_u16(out, 3, quantity);
    Ok(5)
}

pub fn parse_write_multiple_response(pdu: &[u8]) -> core::result::Result<(u16, u16), ErrorKind> {
    if pdu.len() != 5 || pdu[0] != fc::WRITE_MULTIPLE_COILS {
        return Err(ErrorKind::InvalidRequest);
    }
    Ok((get_u16(pdu, 1), get_u16(pdu, 3)))
}
