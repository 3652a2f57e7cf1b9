// SPDX-License-Identifier: BSD-3-Clause

//! FC03/04/06/10/17 — register read/write function codes (§4.8, §6).

use crate::pdu::{check_address_range, fc, get_u16, need, put_u16, RegistersView};
use crate::status::ErrorKind;

pub const MAX_READ_QUANTITY: u16 = 125;
pub const MAX_WRITE_QUANTITY: u16 = 123;
pub const MAX_RW_READ_QUANTITY: u16 = 125;
pub const MAX_RW_WRITE_QUANTITY: u16 = 121;

fn check_read_quantity(quantity: u16, max: u16) -> core::result::Result<(), ErrorKind> {
    if quantity == 0 || quantity > max {
        Err(ErrorKind::InvalidArgument)
    } else {
        Ok(())
    }
}

// ---- FC03 Read Holding Registers / FC04 Read Input Registers ----
// Shared shape; `function` selects 0x03 or 0x04 on the wire.

pub fn build_read_request(out: &mut [u8], function: u8, address: u16, quantity: u16) -> core::result::Result<usize, ErrorKind> {
    check_read_quantity(quantity, MAX_READ_QUANTITY)?;
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
    check_read_quantity(quantity, MAX_READ_QUANTITY).map_err(|_| ErrorKind::InvalidRequest)?;
    check_address_range(address, quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    Ok((address, quantity))
}

pub fn build_read_response(out: &mut [u8], function: u8, values: &[u16]) -> core::result::Result<usize, ErrorKind> {
    let count = values.len();
    if count == 0 || count > MAX_READ_QUANTITY as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    let byte_count = count * 2;
    need(out.len(), 2 + byte_count)?;
    out[0] = function;
    out[1] = byte_count as u8;
    for (i, &v) in values.iter().enumerate() {
        put_u16(out, 2 + i * 2, v);
    }
    Ok(2 + byte_count)
}

pub fn parse_read_response(pdu: &[u8], expected_function: u8) -> core::result::Result<RegistersView<'_>, ErrorKind> {
    if pdu.len() < 2 || pdu[0] != expected_function {
        return Err(ErrorKind::InvalidRequest);
    }
    let byte_count = pdu[1] as usize;
    if byte_count % 2 != 0 || pdu.len() != 2 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    Ok(RegistersView::new(&pdu[2..2 + byte_count], (byte_count / 2) as u16))
}

// ---- FC06 Write Single Register ----

pub fn build_write_single_request(out: &mut [u8], address: u16, value: u16) -> core::result::Result<usize, ErrorKind> {
    need(out.len(), 5)?;
    out[0] = fc::WRITE_SINGLE_REGISTER;
    put_u16(out, 1, address);
    put_u16(out, 3, value);
    Ok(5)
}

pub fn parse_write_single_request(pdu: &[u8]) -> core::result::Result<(u16, u16), ErrorKind> {
    if pdu.len() != 5 || pdu[0] != fc::WRITE_SINGLE_REGISTER {
        return Err(ErrorKind::InvalidRequest);
    }
    Ok((get_u16(pdu, 1), get_u16(pdu, 3)))
}

/// FC06's response echoes the request verbatim.
pub fn build_write_single_response(out: &mut [u8], address: u16, value: u16) -> core::result::Result<usize, ErrorKind> {
    build_write_single_request(out, address, value)
}

pub fn parse_write_single_response(pdu: &[u8]) -> core::result::Result<(u16, u16), ErrorKind> {
    parse_write_single_request(pdu)
}

// ---- FC10 Write Multiple Registers ----

pub fn build_write_multiple_request(out: &mut [u8], address: u16, values: &[u16]) -> core::result::Result<usize, ErrorKind> {
    let count = values.len();
    if count == 0 || count > MAX_WRITE_QUANTITY as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    check_address_range(address, count as u16)?;
    let byte_count = count * 2;
    need(out.len(), 6 + byte_count)?;
    out[0] = fc::WRITE_MULTIPLE_REGISTERS;
    put_u16(out, 1, address);
    put_u16(out, 3, count as u16);
    out[5] = byte_count as u8;
    for (i, &v) in values.iter().enumerate() {
        put_u16(out, 6 + i * 2, v);
    }
    Ok(6 + byte_count)
}

pub struct WriteMultipleRequest<'a> {
    pub address: u16,
    pub quantity: u16,
    pub values: RegistersView<'a>,
}

pub fn parse_write_multiple_request(pdu: &[u8]) -> core::result::Result<WriteMultipleRequest<'_>, ErrorKind> {
    if pdu.len() < 6 || pdu[0] != fc::WRITE_MULTIPLE_REGISTERS {
        return Err(ErrorKind::InvalidRequest);
    }
    let address = get_u16(pdu, 1);
    let quantity = get_u16(pdu, 3);
    let byte_count = pdu[5] as usize;
    if quantity == 0 || quantity > MAX_WRITE_QUANTITY || byte_count != (quantity as usize) * 2 {
        return Err(ErrorKind::InvalidRequest);
    }
    if pdu.len() != 6 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    check_address_range(address, quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    Ok(WriteMultipleRequest {
        address,
        quantity,
        values: RegistersView::new(&pdu[6..6 + byte_count], quantity),
    })
}

pub fn build_write_multiple_response(out: &mut [u8], address: u16, quantity: u16) -> core::result::Result<usize, ErrorKind> {
    need(out.len(), 5)?;
    out[0] = fc::WRITE_MULTIPLE_REGISTERS;
    put_u16(out, 1, address);
    put_u16(out, 3, quantity);
    Ok(5)
}

pub fn parse_write_multiple_response(pdu: &[u8]) -> core::result::Result<(u16, u16), ErrorKind> {
    if pdu.len() != 5 || pdu[0] != fc::WRITE_MULTIPLE_REGISTERS {
        return Err(ErrorKind::InvalidRequest);
    }
    Ok((get_u16(pdu, 1), get_u16(pdu, 3)))
}

// ---- FC17 Read/Write Multiple Registers ----

pub struct ReadWriteRequest<'a> {
    pub read_address: u16,
    pub read_quantity: u16,
    pub write_address: u16,
    pub write_quantity: u16,
    pub write_values: RegistersView<'a>,
}

pub fn build_read_write_request(
    out: &mut [u8],
    read_address: u16,
    read_quantity: u16,
    write_address: u16,
    write_values: &[u16],
) -> core::result::Result<usize, ErrorKind> {
    check_read_quantity(read_quantity, MAX_RW_READ_QUANTITY)?;
    check_address_range(read_address, read_quantity)?;
    let write_quantity = write_values.len();
    if write_quantity == 0 || write_quantity > MAX_RW_WRITE_QUANTITY as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    check_address_range(write_address, write_quantity as u16)?;
    let byte_count = write_quantity * 2;
    need(out.len(), 10 + byte_count)?;
    out[0] = fc::READ_WRITE_MULTIPLE_REGISTERS;
    put_u16(out, 1, read_address);
    put_u16(out, 3, read_quantity);
    put_u16(out, 5, write_address);
    put_u16(out, 7, write_quantity as u16);
    out[9] = byte_count as u8;
    for (i, &v) in write_values.iter().enumerate() {
        put_u16(out, 10 + i * 2, v);
    }
    Ok(10 + byte_count)
}

pub fn parse_read_write_request(pdu: &[u8]) -> core::result::Result<ReadWriteRequest<'_>, ErrorKind> {
    if pdu.len() < 10 || pdu[0] != fc::READ_WRITE_MULTIPLE_REGISTERS {
        return Err(ErrorKind::InvalidRequest);
    }
    let read_address = get_u16(pdu, 1);
    let read_quantity = get_u16(pdu, 3);
    let write_address = get_u16(pdu, 5);
    let write_quantity = get_u16(pdu, 7);
    let byte_count = pdu[9] as usize;
    check_read_quantity(read_quantity, MAX_RW_READ_QUANTITY).map_err(|_| ErrorKind::InvalidRequest)?;
    if write_quantity == 0 || write_quantity > MAX_RW_WRITE_QUANTITY || byte_count != (write_quantity as usize) * 2 {
        return Err(ErrorKind::InvalidRequest);
    }
    if pdu.len() != 10 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    check_address_range(read_address, read_quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    check_address_range(write_address, write_quantity).map_err(|_| ErrorKind::InvalidRequest)?;
    Ok(ReadWriteRequest {
        read_address,
        read_quantity,
        write_address,
        write_quantity,
        write_values: RegistersView::new(&pdu[10..10 + byte_count], write_quantity),
    })
}

pub fn build_read_write_response(out: &mut [u8], read_values: &[u16]) -> core::result::Result<usize, ErrorKind> {
    let count = read_values.len();
    if count == 0 || count > MAX_RW_READ_QUANTITY as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    let byte_count = count * 2;
    need(out.len(), 2 + byte_count)?;
    out[0] = fc::READ_WRITE_MULTIPLE_REGISTERS;
    out[1] = byte_count as u8;
    for (i, &v) in read_values.iter().enumerate() {
        put_u16(out, 2 + i * 2, v);
    }
    Ok(2 + byte_count)
}

pub fn parse_read_write_response(pdu: &[u8]) -> core::result::Result<RegistersView<'_>, ErrorKind> {
    if pdu.len() < 2 || pdu[0] != fc::READ_WRITE_MULTIPLE_REGISTERS {
        return Err(ErrorKind::InvalidRequest);
    }
    let byte_count = pdu[1] as usize;
    if byte_count % 2 != 0 || pdu.len() != 2 + byte_count {
        return Err(ErrorKind::InvalidRequest);
    }
    Ok(RegistersView::new(&pdu[2..2 + byte_count], (byte_count / 2) as u16))
}
