// SPDX-License-Identifier: BSD-3-Clause

//! Round-trip and bounds properties for the PDU codec (§8).

use modbus_core::ErrorKind;
use proptest::prelude::*;

proptest! {
    #[test]
    fn fc03_read_request_round_trips(address in 0u16..=0xFFFFu16, quantity in 1u16..=125u16) {
        prop_assume!((address as u32) + (quantity as u32) <= 0x10000);
        use modbus_core::pdu::{fc, registers};

        let mut buf = [0u8; 5];
        let n = registers::build_read_request(&mut buf, fc::READ_HOLDING_REGISTERS, address, quantity).unwrap();
        let (a, q) = registers::parse_read_request(&buf[..n], fc::READ_HOLDING_REGISTERS).unwrap();
        prop_assert_eq!(a, address);
        prop_assert_eq!(q, quantity);
    }

    #[test]
    fn fc03_read_response_round_trips(values in prop::collection::vec(any::<u16>(), 1..=125)) {
        use modbus_core::pdu::{fc, registers};

        let mut buf = [0u8; 256];
        let n = registers::build_read_response(&mut buf, fc::READ_HOLDING_REGISTERS, &values).unwrap();
        let view = registers::parse_read_response(&buf[..n], fc::READ_HOLDING_REGISTERS).unwrap();
        prop_assert_eq!(view.count() as usize, values.len());
        for (i, &expected) in values.iter().enumerate() {
            prop_assert_eq!(view.get(i as u16), Some(expected));
        }
    }

    #[test]
    fn fc01_read_coils_round_trips(address in 0u16..=0xFFFFu16, quantity in 1u16..=2000u16) {
        prop_assume!((address as u32) + (quantity as u32) <= 0x10000);
        use modbus_core::pdu::{coils, fc};

        let mut buf = [0u8; 5];
        let n = coils::build_read_request(&mut buf, fc::READ_COILS, address, quantity).unwrap();
        let (a, q) = coils::parse_read_request(&buf[..n], fc::READ_COILS).unwrap();
        prop_assert_eq!(a, address);
        prop_assert_eq!(q, quantity);
    }

    #[test]
    fn fc06_write_single_register_round_trips(address: u16, value: u16) {
        use modbus_core::pdu::registers;

        let mut buf = [0u8; 5];
        let n = registers::build_write_single_request(&mut buf, address, value).unwrap();
        let (a, v) = registers::parse_write_single_request(&buf[..n]).unwrap();
        prop_assert_eq!(a, address);
        prop_assert_eq!(v, value);
    }

    #[test]
    fn fc05_write_single_coil_round_trips(address: u16, value: bool) {
        use modbus_core::pdu::coils;

        let mut buf = [0u8; 5];
        let n = coils::build_write_single_request(&mut buf, address, value).unwrap();
        let (a, v) = coils::parse_write_single_request(&buf[..n]).unwrap();
        prop_assert_eq!(a, address);
        prop_assert_eq!(v, value);
    }
}

#[test]
fn read_request_rejects_zero_quantity() {
    use modbus_core::pdu::{fc, registers};
    let mut buf = [0u8; 5];
    assert_eq!(registers::build_read_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0, 0), Err(ErrorKind::InvalidArgument));
}

#[test]
fn read_request_rejects_quantity_above_the_fc_maximum() {
    use modbus_core::pdu::{fc, registers};
    let mut buf = [0u8; 5];
    assert_eq!(
        registers::build_read_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0, registers::MAX_READ_QUANTITY + 1),
        Err(ErrorKind::InvalidArgument)
    );
}

#[test]
fn read_request_rejects_address_plus_quantity_overflowing_the_address_space() {
    use modbus_core::pdu::{fc, registers};
    let mut buf = [0u8; 5];
    assert_eq!(
        registers::build_read_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0xFFFF, 2),
        Err(ErrorKind::InvalidArgument)
    );
}

#[test]
fn crc16_matches_the_canonical_example() {
    use modbus_core::framing::rtu::crc16;
    let crc = crc16(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
    assert_eq!(crc.to_le_bytes(), [0x87, 0x76]);
}
