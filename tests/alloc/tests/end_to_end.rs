// SPDX-License-Identifier: BSD-3-Clause

//! End-to-end client/server scenarios over a loopback transport (§8).
//!
//! `modbus-core` never ships a transport of its own (§1's "one external
//! collaborator"); `LoopbackEnd` below is the same kind of glue a host
//! integration would provide, just backed by two `VecDeque`s instead of a
//! socket.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use modbus_core::client::{Client, LinkFraming as ClientLinkFraming, Priority, Transaction};
use modbus_core::config::Config;
use modbus_core::diag::{Diagnostics, NullSink, TraceEvent};
use modbus_core::framing::rtu::{RtuFraming, Timing};
use modbus_core::framing::tcp::TcpFraming;
use modbus_core::pdu::{fc, registers};
use modbus_core::pool::Pool;
use modbus_core::server::{CoilRegion, PendingRequest, RegisterRegion, Server};
use modbus_core::spsc::SpscQueue;
use modbus_core::status::{ErrorKind, ExceptionCode, Status};
use modbus_core::transport::{Transport, TransportError};

#[derive(Clone)]
struct LoopbackEnd {
    inbox: Rc<RefCell<VecDeque<u8>>>,
    outbox: Rc<RefCell<VecDeque<u8>>>,
    now: Rc<Cell<u64>>,
}

fn loopback_pair(now: Rc<Cell<u64>>) -> (LoopbackEnd, LoopbackEnd) {
    let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
    (
        LoopbackEnd { inbox: b_to_a.clone(), outbox: a_to_b.clone(), now: now.clone() },
        LoopbackEnd { inbox: a_to_b, outbox: b_to_a, now },
    )
}

impl Transport for LoopbackEnd {
    fn send(&mut self, bytes: &[u8]) -> core::result::Result<usize, TransportError> {
        self.outbox.borrow_mut().extend(bytes.iter().copied());
        Ok(bytes.len())
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

fn leak_diag() -> Diagnostics<'static, NullSink> {
    let fc_hist = Box::leak(Box::new([0u64; modbus_core::diag::FC_SLOT_COUNT]));
    let err_hist = Box::leak(Box::new([0u64; ErrorKind::SLOT_COUNT]));
    let exc_hist = Box::leak(Box::new([0u64; ExceptionCode::SLOT_COUNT]));
    let trace_ring: &'static mut [Option<TraceEvent>] = Box::leak(vec![None; 16].into_boxed_slice());
    Diagnostics::new(fc_hist, err_hist, exc_hist, trace_ring)
}

fn build_tcp_client(transport: LoopbackEnd, config: Config<'static>) -> Client<'static, LoopbackEnd> {
    let pool_slots: &'static mut [Option<Transaction>; 8] = Box::leak(Box::new([(); 8].map(|_| None)));
    let free_next: &'static mut [usize; 8] = Box::leak(Box::new([0usize; 8]));
    let pool = Pool::new(pool_slots, free_next).unwrap();
    let high_storage: &'static mut [Option<usize>; 8] = Box::leak(Box::new([None; 8]));
    let normal_storage: &'static mut [Option<usize>; 8] = Box::leak(Box::new([None; 8]));
    let high_queue = SpscQueue::new(high_storage).unwrap();
    let normal_queue = SpscQueue::new(normal_storage).unwrap();
    let rx_storage: &'static mut [u8] = Box::leak(vec![0u8; 256].into_boxed_slice());
    let framing = ClientLinkFraming::Tcp(TcpFraming::new(rx_storage).unwrap());
    Client::new(config, transport, pool, high_queue, normal_queue, framing, leak_diag())
}

fn build_tcp_server(transport: LoopbackEnd, unit_id: u8, holding: &'static mut [u16]) -> Server<'static, LoopbackEnd> {
    let holding_regions: &'static mut [RegisterRegion<'static>] = Box::leak(Box::new([RegisterRegion::direct(0, false, holding)]));
    let coil_regions: &'static mut [CoilRegion<'static>] = Box::leak(Box::new([]));
    let discrete_regions: &'static mut [CoilRegion<'static>] = Box::leak(Box::new([]));
    let input_regions: &'static mut [RegisterRegion<'static>] = Box::leak(Box::new([]));

    let pool_slots: &'static mut [Option<PendingRequest>; 8] = Box::leak(Box::new([(); 8].map(|_| None)));
    let free_next: &'static mut [usize; 8] = Box::leak(Box::new([0usize; 8]));
    let pool = Pool::new(pool_slots, free_next).unwrap();
    let high_storage: &'static mut [Option<usize>; 8] = Box::leak(Box::new([None; 8]));
    let normal_storage: &'static mut [Option<usize>; 8] = Box::leak(Box::new([None; 8]));
    let high_queue = SpscQueue::new(high_storage).unwrap();
    let normal_queue = SpscQueue::new(normal_storage).unwrap();
    let rx_storage: &'static mut [u8] = Box::leak(vec![0u8; 256].into_boxed_slice());
    let framing = ClientLinkFraming::Tcp(TcpFraming::new(rx_storage).unwrap());

    Server::new(
        Config::full(),
        transport,
        unit_id,
        coil_regions,
        discrete_regions,
        holding_regions,
        input_regions,
        pool,
        high_queue,
        normal_queue,
        framing,
        leak_diag(),
    )
}

fn leaked_registers(n: usize) -> &'static mut [u16] {
    Box::leak(vec![0u16; n].into_boxed_slice())
}

#[test]
fn fc03_read_holding_registers_over_tcp() {
    let now = Rc::new(Cell::new(0u64));
    let (client_end, server_end) = loopback_pair(now.clone());
    let mut client = build_tcp_client(client_end, Config::full());
    let holding = leaked_registers(4);
    holding[2] = 0xCAFE;
    let mut server = build_tcp_server(server_end, 0x11, holding);

    let mut req = [0u8; 5];
    let n = registers::build_read_request(&mut req, fc::READ_HOLDING_REGISTERS, 2, 1).unwrap();
    let handle = client.submit(0x11, &req[..n], Priority::Normal, now.get()).unwrap();

    client.poll(now.get()).unwrap();
    server.poll(now.get()).unwrap();
    now.set(now.get() + 1);
    client.poll(now.get()).unwrap();

    let mut out = [0u8; 16];
    let (status, len) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    let view = registers::parse_read_response(&out[..len], fc::READ_HOLDING_REGISTERS).unwrap();
    assert_eq!(view.get(0), Some(0xCAFE));
}

#[test]
fn fc06_write_single_register_then_fc03_reads_the_new_value() {
    let now = Rc::new(Cell::new(0u64));
    let (client_end, server_end) = loopback_pair(now.clone());
    let mut client = build_tcp_client(client_end, Config::full());
    let holding = leaked_registers(4);
    let mut server = build_tcp_server(server_end, 0x11, holding);

    let mut write_req = [0u8; 5];
    let wn = registers::build_write_single_request(&mut write_req, 1, 0x1234).unwrap();
    let write_handle = client.submit(0x11, &write_req[..wn], Priority::Normal, now.get()).unwrap();
    client.poll(now.get()).unwrap();
    server.poll(now.get()).unwrap();
    now.set(now.get() + 1);
    client.poll(now.get()).unwrap();
    let mut out = [0u8; 16];
    let (status, _) = client.take_response(write_handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);

    let mut read_req = [0u8; 5];
    let rn = registers::build_read_request(&mut read_req, fc::READ_HOLDING_REGISTERS, 1, 1).unwrap();
    let read_handle = client.submit(0x11, &read_req[..rn], Priority::Normal, now.get()).unwrap();
    client.poll(now.get()).unwrap();
    server.poll(now.get()).unwrap();
    now.set(now.get() + 1);
    client.poll(now.get()).unwrap();
    let (status, len) = client.take_response(read_handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    let view = registers::parse_read_response(&out[..len], fc::READ_HOLDING_REGISTERS).unwrap();
    assert_eq!(view.get(0), Some(0x1234));
}

#[test]
fn unmapped_address_comes_back_as_an_illegal_data_address_exception() {
    let now = Rc::new(Cell::new(0u64));
    let (client_end, server_end) = loopback_pair(now.clone());
    let mut client = build_tcp_client(client_end, Config::full());
    let holding = leaked_registers(4);
    let mut server = build_tcp_server(server_end, 0x11, holding);

    let mut req = [0u8; 5];
    let n = registers::build_read_request(&mut req, fc::READ_HOLDING_REGISTERS, 100, 1).unwrap();
    let handle = client.submit(0x11, &req[..n], Priority::Normal, now.get()).unwrap();
    client.poll(now.get()).unwrap();
    server.poll(now.get()).unwrap();
    now.set(now.get() + 1);
    client.poll(now.get()).unwrap();

    let mut out = [0u8; 16];
    let (status, _) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Exception(ExceptionCode::IllegalDataAddress));
}

#[test]
fn broadcast_write_reaches_the_server_with_no_response_expected() {
    let now = Rc::new(Cell::new(0u64));
    let (client_end, server_end) = loopback_pair(now.clone());
    let mut client = build_tcp_client(client_end, Config::full());
    let holding = leaked_registers(4);
    let mut server = build_tcp_server(server_end, 0x11, holding);

    let mut write_req = [0u8; 5];
    let n = registers::build_write_single_request(&mut write_req, 0, 0x2222).unwrap();
    let handle = client.submit(0, &write_req[..n], Priority::Normal, now.get()).unwrap();

    client.poll(now.get()).unwrap();
    server.poll(now.get()).unwrap();
    now.set(now.get() + 1);
    client.poll(now.get()).unwrap();

    assert_eq!(holding[0], 0x2222);
    assert_eq!(server.diagnostics().counters.requests_sent, 0);

    let mut out = [0u8; 16];
    let (status, len) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(len, 0);
}

#[test]
fn rtu_link_recovers_from_leading_line_noise() {
    let now = Rc::new(Cell::new(0u64));
    let (client_end, server_end) = loopback_pair(now.clone());
    let mut noise_injector = client_end.clone();

    let timing = Timing { t1_5_ms: 1, t3_5_ms: 2 };

    let pool_slots: &'static mut [Option<Transaction>; 4] = Box::leak(Box::new([(); 4].map(|_| None)));
    let free_next: &'static mut [usize; 4] = Box::leak(Box::new([0usize; 4]));
    let pool = Pool::new(pool_slots, free_next).unwrap();
    let high_storage: &'static mut [Option<usize>; 4] = Box::leak(Box::new([None; 4]));
    let normal_storage: &'static mut [Option<usize>; 4] = Box::leak(Box::new([None; 4]));
    let high_queue = SpscQueue::new(high_storage).unwrap();
    let normal_queue = SpscQueue::new(normal_storage).unwrap();
    let client_rx: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
    let client_dedup: &'static mut [Option<(u8, u8, u32, u64)>; 4] = Box::leak(Box::new([None; 4]));
    let client_framing = ClientLinkFraming::Rtu(RtuFraming::new(client_rx, client_dedup, timing, 1000).unwrap());
    let mut client_config = Config::tiny();
    client_config.retry.max_attempts = 1;
    let mut client = Client::new(client_config, client_end, pool, high_queue, normal_queue, client_framing, leak_diag());

    let holding = leaked_registers(4);
    let holding_regions: &'static mut [RegisterRegion<'static>] = Box::leak(Box::new([RegisterRegion::direct(0, false, holding)]));
    let coil_regions: &'static mut [CoilRegion<'static>] = Box::leak(Box::new([]));
    let discrete_regions: &'static mut [CoilRegion<'static>] = Box::leak(Box::new([]));
    let input_regions: &'static mut [RegisterRegion<'static>] = Box::leak(Box::new([]));
    let srv_pool_slots: &'static mut [Option<PendingRequest>; 4] = Box::leak(Box::new([(); 4].map(|_| None)));
    let srv_free_next: &'static mut [usize; 4] = Box::leak(Box::new([0usize; 4]));
    let srv_pool = Pool::new(srv_pool_slots, srv_free_next).unwrap();
    let srv_high_storage: &'static mut [Option<usize>; 4] = Box::leak(Box::new([None; 4]));
    let srv_normal_storage: &'static mut [Option<usize>; 4] = Box::leak(Box::new([None; 4]));
    let srv_high_queue = SpscQueue::new(srv_high_storage).unwrap();
    let srv_normal_queue = SpscQueue::new(srv_normal_storage).unwrap();
    let server_rx: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
    let server_dedup: &'static mut [Option<(u8, u8, u32, u64)>; 4] = Box::leak(Box::new([None; 4]));
    let server_framing = ClientLinkFraming::Rtu(RtuFraming::new(server_rx, server_dedup, timing, 1000).unwrap());
    let mut server_config = Config::tiny();
    server_config.retry.max_attempts = 1;
    let mut server = Server::new(
        server_config,
        server_end,
        0x11,
        coil_regions,
        discrete_regions,
        holding_regions,
        input_regions,
        srv_pool,
        srv_high_queue,
        srv_normal_queue,
        server_framing,
        leak_diag(),
    );

    // Leading noise ahead of the client's request bytes, the way a shared
    // RS-485 bus would deliver a reflected fragment of someone else's
    // traffic just before this request.
    noise_injector.send(&[0x00, 0xFF, 0x00]).unwrap();

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
    let (status, _) = client.take_response(handle, &mut out).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
}
