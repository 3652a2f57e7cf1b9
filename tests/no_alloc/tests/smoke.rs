// SPDX-License-Identifier: BSD-3-Clause

//! Proves a full client/server exchange over TCP and RTU framing with
//! every byte of storage coming from the stack: `modbus-core` is pulled
//! in here without its `std` feature, so this whole file only links
//! against the crate's genuinely `#![no_std]` build. The test binary
//! itself still has the host standard library available (`cargo test`
//! needs it for the harness), but nothing in the exchange below reaches
//! for `Box`, `Vec`, or any other heap-backed type.

use core::cell::{Cell, RefCell};

use heapless::Deque;
use modbus_core::client::{Client, LinkFraming, Priority};
use modbus_core::config::Config;
use modbus_core::diag::{Diagnostics, NullSink};
use modbus_core::framing::rtu::{RtuFraming, Timing};
use modbus_core::framing::tcp::TcpFraming;
use modbus_core::pdu::{fc, registers};
use modbus_core::pool::Pool;
use modbus_core::server::{CoilRegion, PendingRequest, RegisterRegion, Server};
use modbus_core::spsc::SpscQueue;
use modbus_core::status::{ErrorKind, ExceptionCode, Status};
use modbus_core::transport::{Transport, TransportError};

const WIRE_CAP: usize = 128;

struct LoopbackEnd<'a> {
    inbox: &'a RefCell<Deque<u8, WIRE_CAP>>,
    outbox: &'a RefCell<Deque<u8, WIRE_CAP>>,
    now: &'a Cell<u64>,
}

impl<'a> Transport for LoopbackEnd<'a> {
    fn send(&mut self, bytes: &[u8]) -> core::result::Result<usize, TransportError> {
        let mut outbox = self.outbox.borrow_mut();
        let mut n = 0;
        for &b in bytes {
            if outbox.push_back(b).is_err() {
                break;
            }
            n += 1;
        }
        Ok(n)
    }

    fn recv(&mut self, out: &mut [u8]) -> core::result::Result<usize, TransportError> {
        let mut inbox = self.inbox.borrow_mut();
        let mut n = 0;
        for slot in out.iter_mut() {
            match inbox.pop_front() {
                Some(b) => {
                    *slot = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

macro_rules! tcp_pair_fixture {
    ($client:ident, $server:ident, $holding:ident) => {
        tcp_pair_fixture!($client, $server, $holding, [0u16; 4]);
    };
    ($client:ident, $server:ident, $holding:ident, $initial:expr) => {
        let now = Cell::new(0u64);
        let c_to_s: RefCell<Deque<u8, WIRE_CAP>> = RefCell::new(Deque::new());
        let s_to_c: RefCell<Deque<u8, WIRE_CAP>> = RefCell::new(Deque::new());
        let client_end = LoopbackEnd { inbox: &s_to_c, outbox: &c_to_s, now: &now };
        let server_end = LoopbackEnd { inbox: &c_to_s, outbox: &s_to_c, now: &now };

        let mut client_slots: [Option<modbus_core::client::Transaction>; 4] = [(); 4].map(|_| None);
        let mut client_free_next = [0usize; 4];
        let client_pool = Pool::new(&mut client_slots, &mut client_free_next).unwrap();
        let mut client_high: [Option<usize>; 4] = [None; 4];
        let mut client_normal: [Option<usize>; 4] = [None; 4];
        let client_high_queue = SpscQueue::new(&mut client_high).unwrap();
        let client_normal_queue = SpscQueue::new(&mut client_normal).unwrap();
        let mut client_rx = [0u8; 256];
        let client_framing = LinkFraming::Tcp(TcpFraming::new(&mut client_rx).unwrap());
        let mut client_fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
        let mut client_err_hist = [0u64; ErrorKind::SLOT_COUNT];
        let mut client_exc_hist = [0u64; ExceptionCode::SLOT_COUNT];
        let mut client_trace: [Option<modbus_core::diag::TraceEvent>; 8] = [None; 8];
        let client_diag = Diagnostics::<NullSink>::new(&mut client_fc_hist, &mut client_err_hist, &mut client_exc_hist, &mut client_trace);
        let mut $client = Client::new(Config::full(), client_end, client_pool, client_high_queue, client_normal_queue, client_framing, client_diag);

        let mut $holding = $initial;
        let holding_region = RegisterRegion::direct(0, false, &mut $holding);
        let mut holding_regions = [holding_region];
        let mut coil_regions: [CoilRegion; 0] = [];
        let mut discrete_regions: [CoilRegion; 0] = [];
        let mut input_regions: [RegisterRegion; 0] = [];

        let mut server_slots: [Option<PendingRequest>; 4] = [(); 4].map(|_| None);
        let mut server_free_next = [0usize; 4];
        let server_pool = Pool::new(&mut server_slots, &mut server_free_next).unwrap();
        let mut server_high: [Option<usize>; 4] = [None; 4];
        let mut server_normal: [Option<usize>; 4] = [None; 4];
        let server_high_queue = SpscQueue::new(&mut server_high).unwrap();
        let server_normal_queue = SpscQueue::new(&mut server_normal).unwrap();
        let mut server_rx = [0u8; 256];
        let server_framing = LinkFraming::Tcp(TcpFraming::new(&mut server_rx).unwrap());
        let mut server_fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
        let mut server_err_hist = [0u64; ErrorKind::SLOT_COUNT];
        let mut server_exc_hist = [0u64; ExceptionCode::SLOT_COUNT];
        let mut server_trace: [Option<modbus_core::diag::TraceEvent>; 8] = [None; 8];
        let server_diag = Diagnostics::<NullSink>::new(&mut server_fc_hist, &mut server_err_hist, &mut server_exc_hist, &mut server_trace);
        let mut $server = Server::new(
            Config::full(),
            server_end,
            0x11,
            &mut coil_regions,
            &mut discrete_regions,
            &mut holding_regions,
            &mut input_regions,
            server_pool,
            server_high_queue,
            server_normal_queue,
            server_framing,
            server_diag,
        );
    };
}

#[test]
fn fc03_read_holding_registers_round_trips_with_no_heap_allocation() {
    tcp_pair_fixture!(client, server, holding, [0u16, 0xBEEF, 0, 0]);

    let mut req = [0u8; 5];
    let n = registers::build_read_request(&mut req, fc::READ_HOLDING_REGISTERS, 1, 1).unwrap();
    let handle = client.submit(0x11, &req[..n], Priority::Normal, 0).unwrap();

    client.poll(0).unwrap();
    server.poll(0).unwrap();
    client.poll(1).unwrap();

    let mut out = [0u8; 16];
    let (status, len) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    let view = registers::parse_read_response(&out[..len], fc::READ_HOLDING_REGISTERS).unwrap();
    assert_eq!(view.get(0), Some(0xBEEF));
}

#[test]
fn fc06_write_then_fc03_read_back_round_trips_with_no_heap_allocation() {
    tcp_pair_fixture!(client, server, holding);

    let mut write_req = [0u8; 5];
    let wn = registers::build_write_single_request(&mut write_req, 0, 0x4242).unwrap();
    let write_handle = client.submit(0x11, &write_req[..wn], Priority::Normal, 0).unwrap();
    client.poll(0).unwrap();
    server.poll(0).unwrap();
    client.poll(1).unwrap();
    let mut out = [0u8; 16];
    let (status, _) = client.take_response(write_handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);

    let mut read_req = [0u8; 5];
    let rn = registers::build_read_request(&mut read_req, fc::READ_HOLDING_REGISTERS, 0, 1).unwrap();
    let read_handle = client.submit(0x11, &read_req[..rn], Priority::Normal, 2).unwrap();
    client.poll(2).unwrap();
    server.poll(2).unwrap();
    client.poll(3).unwrap();
    let (status, len) = client.take_response(read_handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    let view = registers::parse_read_response(&out[..len], fc::READ_HOLDING_REGISTERS).unwrap();
    assert_eq!(view.get(0), Some(0x4242));
}

#[test]
fn rtu_request_round_trips_with_no_heap_allocation() {
    let now = Cell::new(0u64);
    let c_to_s: RefCell<Deque<u8, WIRE_CAP>> = RefCell::new(Deque::new());
    let s_to_c: RefCell<Deque<u8, WIRE_CAP>> = RefCell::new(Deque::new());
    let client_end = LoopbackEnd { inbox: &s_to_c, outbox: &c_to_s, now: &now };
    let server_end = LoopbackEnd { inbox: &c_to_s, outbox: &s_to_c, now: &now };

    let timing = Timing { t1_5_ms: 1, t3_5_ms: 2 };

    let mut client_slots: [Option<modbus_core::client::Transaction>; 4] = [(); 4].map(|_| None);
    let mut client_free_next = [0usize; 4];
    let client_pool = Pool::new(&mut client_slots, &mut client_free_next).unwrap();
    let mut client_high: [Option<usize>; 4] = [None; 4];
    let mut client_normal: [Option<usize>; 4] = [None; 4];
    let client_high_queue = SpscQueue::new(&mut client_high).unwrap();
    let client_normal_queue = SpscQueue::new(&mut client_normal).unwrap();
    let mut client_rx = [0u8; 64];
    let mut client_dedup: [Option<(u8, u8, u32, u64)>; 4] = [None; 4];
    let client_framing = LinkFraming::Rtu(RtuFraming::new(&mut client_rx, &mut client_dedup, timing, 1000).unwrap());
    let mut client_fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
    let mut client_err_hist = [0u64; ErrorKind::SLOT_COUNT];
    let mut client_exc_hist = [0u64; ExceptionCode::SLOT_COUNT];
    let mut client_trace: [Option<modbus_core::diag::TraceEvent>; 8] = [None; 8];
    let client_diag = Diagnostics::<NullSink>::new(&mut client_fc_hist, &mut client_err_hist, &mut client_exc_hist, &mut client_trace);
    let mut client_config = Config::tiny();
    client_config.retry.max_attempts = 1;
    let mut client = Client::new(client_config, client_end, client_pool, client_high_queue, client_normal_queue, client_framing, client_diag);

    let mut holding = [0u16; 4];
    holding[0] = 7;
    let holding_region = RegisterRegion::direct(0, false, &mut holding);
    let mut holding_regions = [holding_region];
    let mut coil_regions: [CoilRegion; 0] = [];
    let mut discrete_regions: [CoilRegion; 0] = [];
    let mut input_regions: [RegisterRegion; 0] = [];

    let mut server_slots: [Option<PendingRequest>; 4] = [(); 4].map(|_| None);
    let mut server_free_next = [0usize; 4];
    let server_pool = Pool::new(&mut server_slots, &mut server_free_next).unwrap();
    let mut server_high: [Option<usize>; 4] = [None; 4];
    let mut server_normal: [Option<usize>; 4] = [None; 4];
    let server_high_queue = SpscQueue::new(&mut server_high).unwrap();
    let server_normal_queue = SpscQueue::new(&mut server_normal).unwrap();
    let mut server_rx = [0u8; 64];
    let mut server_dedup: [Option<(u8, u8, u32, u64)>; 4] = [None; 4];
    let server_framing = LinkFraming::Rtu(RtuFraming::new(&mut server_rx, &mut server_dedup, timing, 1000).unwrap());
    let mut server_fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
    let mut server_err_hist = [0u64; ErrorKind::SLOT_COUNT];
    let mut server_exc_hist = [0u64; ExceptionCode::SLOT_COUNT];
    let mut server_trace: [Option<modbus_core::diag::TraceEvent>; 8] = [None; 8];
    let server_diag = Diagnostics::<NullSink>::new(&mut server_fc_hist, &mut server_err_hist, &mut server_exc_hist, &mut server_trace);
    let mut server_config = Config::tiny();
    server_config.retry.max_attempts = 1;
    let mut server = Server::new(
        server_config,
        server_end,
        0x11,
        &mut coil_regions,
        &mut discrete_regions,
        &mut holding_regions,
        &mut input_regions,
        server_pool,
        server_high_queue,
        server_normal_queue,
        server_framing,
        server_diag,
    );

    let mut req = [0u8; 5];
    let n = registers::build_read_request(&mut req, fc::READ_HOLDING_REGISTERS, 0, 1).unwrap();
    let handle = client.submit(0x11, &req[..n], Priority::Normal, now.get()).unwrap();
    client.poll(now.get()).unwrap();

    server.poll(now.get()).unwrap();
    now.set(now.get() + 3);
    server.poll(now.get()).unwrap();
    client.poll(now.get()).unwrap();
    now.set(now.get() + 3);
    client.poll(now.get()).unwrap();

    let mut out = [0u8; 16];
    let (status, len) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    let view = registers::parse_read_response(&out[..len], fc::READ_HOLDING_REGISTERS).unwrap();
    assert_eq!(view.get(0), Some(7));
}
