// SPDX-License-Identifier: BSD-3-Clause

//! Non-blocking server (slave) request dispatch engine (§4.13).
//!
//! A [`Server`] owns the four Modbus data tables (coils, discrete inputs,
//! holding registers, input registers) as caller-owned [`Region`] slices,
//! a request pool with the same dual-priority-queue shape [`crate::client`]
//! uses, one link-framing instance, and a [`Transport`]. `poll()` drains
//! inbound frames into the pool, dispatches the next queued request through
//! the fixed pipeline in §4.13, and drives the (possibly partial) response
//! write.
//!
//! Only one response is ever in flight: a half-duplex RTU/ASCII link can't
//! usefully pipeline replies anyway, and keeping TCP to the same rule keeps
//! response ordering trivially correct without a second queue.

use crate::config::Config;
use crate::diag::{Diagnostics, EventSink, NullSink};
use crate::framing::ascii;
use crate::framing::rtu;
use crate::framing::tcp;
use crate::framing::{FramingKind, ADU_MAX};
use crate::fsm::{Fsm, Table, Transition};
use crate::pdu::{coils, exception, fc, registers, PDU_MAX};
use crate::pool::Pool;
use crate::spsc::SpscQueue;
use crate::status::{ErrorKind, ExceptionCode, Status};
use crate::transport::Transport;
use log::{debug, warn};

pub use crate::client::LinkFraming;

/// A `u16`-addressed register table entry: either direct caller-owned
/// storage, or a callback pair for values that live outside a flat array
/// (memory-mapped peripherals, derived values, ...).
pub struct RegisterRegion<'s> {
    start: u16,
    count: u16,
    read_only: bool,
    storage: RegisterStorage<'s>,
}

enum RegisterStorage<'s> {
    Direct(&'s mut [u16]),
    Callback {
        read: &'s mut dyn FnMut(u16, &mut [u16]) -> bool,
        write: Option<&'s mut dyn FnMut(u16, &[u16]) -> bool>,
    },
}

impl<'s> RegisterRegion<'s> {
    /// A region backed directly by `storage`, `storage.len()` values wide.
    pub fn direct(start: u16, read_only: bool, storage: &'s mut [u16]) -> Self {
        let count = storage.len() as u16;
        Self { start, count, read_only, storage: RegisterStorage::Direct(storage) }
    }

    /// A region backed by callbacks. `write` is `None` for a read-only
    /// region regardless of the `read_only` flag, since there is nothing to
    /// reject a write against.
    pub fn callback(
        start: u16,
        count: u16,
        read_only: bool,
        read: &'s mut dyn FnMut(u16, &mut [u16]) -> bool,
        write: Option<&'s mut dyn FnMut(u16, &[u16]) -> bool>,
    ) -> Self {
        Self { start, count, read_only, storage: RegisterStorage::Callback { read, write } }
    }

    fn covers(&self, address: u16, count: u16) -> bool {
        let end = match (address as u32).checked_add(count as u32) {
            Some(e) => e,
            None => return false,
        };
        address >= self.start && end <= (self.start as u32) + (self.count as u32)
    }

    fn read(&mut self, address: u16, out: &mut [u16]) -> bool {
        let offset = (address - self.start) as usize;
        match &mut self.storage {
            RegisterStorage::Direct(values) => {
                out.copy_from_slice(&values[offset..offset + out.len()]);
                true
            }
            RegisterStorage::Callback { read, .. } => read(address, out),
        }
    }

    /// `None` if the region is read-only or has no write callback; `Some(true/false)`
    /// otherwise, reflecting whether the underlying write succeeded.
    fn write(&mut self, address: u16, values: &[u16]) -> Option<bool> {
        if self.read_only {
            return None;
        }
        let offset = (address - self.start) as usize;
        match &mut self.storage {
            RegisterStorage::Direct(storage) => {
                storage[offset..offset + values.len()].copy_from_slice(values);
                Some(true)
            }
            RegisterStorage::Callback { write: Some(write), .. } => Some(write(address, values)),
            RegisterStorage::Callback { write: None, .. } => None,
        }
    }
}

/// A bit-addressed coil/discrete-input table entry.
pub struct CoilRegion<'s> {
    start: u16,
    count: u16,
    read_only: bool,
    storage: CoilStorage<'s>,
}

enum CoilStorage<'s> {
    /// Packed LSB-first within each byte, same layout as [`crate::pdu::BitsView`].
    Direct(&'s mut [u8]),
    Callback {
        read: &'s mut dyn FnMut(u16, &mut [bool]) -> bool,
        write: Option<&'s mut dyn FnMut(u16, &[bool]) -> bool>,
    },
}

fn get_bit(bytes: &[u8], index: u16) -> bool {
    bytes[(index / 8) as usize] & (1 << (index % 8)) != 0
}

fn set_bit(bytes: &mut [u8], index: u16, value: bool) {
    let byte = &mut bytes[(index / 8) as usize];
    let mask = 1 << (index % 8);
    if value {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

impl<'s> CoilRegion<'s> {
    pub fn direct(start: u16, count: u16, read_only: bool, storage: &'s mut [u8]) -> Self {
        Self { start, count, read_only, storage: CoilStorage::Direct(storage) }
    }

    pub fn callback(
        start: u16,
        count: u16,
        read_only: bool,
        read: &'s mut dyn FnMut(u16, &mut [bool]) -> bool,
        write: Option<&'s mut dyn FnMut(u16, &[bool]) -> bool>,
    ) -> Self {
        Self { start, count, read_only, storage: CoilStorage::Callback { read, write } }
    }

    fn covers(&self, address: u16, count: u16) -> bool {
        let end = match (address as u32).checked_add(count as u32) {
            Some(e) => e,
            None => return false,
        };
        address >= self.start && end <= (self.start as u32) + (self.count as u32)
    }

    fn read(&mut self, address: u16, out: &mut [bool]) -> bool {
        let offset = address - self.start;
        match &mut self.storage {
            CoilStorage::Direct(bytes) => {
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = get_bit(bytes, offset + i as u16);
                }
                true
            }
            CoilStorage::Callback { read, .. } => read(address, out),
        }
    }

    fn write(&mut self, address: u16, values: &[bool]) -> Option<bool> {
        if self.read_only {
            return None;
        }
        let offset = address - self.start;
        match &mut self.storage {
            CoilStorage::Direct(bytes) => {
                for (i, &v) in values.iter().enumerate() {
                    set_bit(bytes, offset + i as u16, v);
                }
                Some(true)
            }
            CoilStorage::Callback { write: Some(write), .. } => Some(write(address, values)),
            CoilStorage::Callback { write: None, .. } => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReqState {
    Queued,
    Processing,
    Done,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReqEvent {
    Dequeued,
    Processed,
}

const REQ_TABLE: Table<'static, ReqState, ReqEvent> = Table::new(&[
    Transition { from: ReqState::Queued, event: ReqEvent::Dequeued, to: ReqState::Processing },
    Transition { from: ReqState::Processing, event: ReqEvent::Processed, to: ReqState::Done },
]);

/// One pool slot's worth of in-flight request state. Opaque: the only
/// reason this is `pub` rather than crate-private is so a caller can name
/// it to declare `Pool` backing storage (`[Option<PendingRequest>; N]`);
/// every field stays private and every mutation goes through [`Server`].
pub struct PendingRequest {
    fsm: Fsm<ReqState>,
    unit_id: u8,
    broadcast: bool,
    transaction_id: u16,
    pdu: [u8; PDU_MAX],
    pdu_len: usize,
    received_ms: u64,
}

impl PendingRequest {
    fn blank() -> Self {
        Self {
            fsm: Fsm::new(ReqState::Queued),
            unit_id: 0,
            broadcast: false,
            transaction_id: 0,
            pdu: [0u8; PDU_MAX],
            pdu_len: 0,
            received_ms: 0,
        }
    }
}

/// A non-blocking Modbus server over caller-owned data tables and framing.
pub struct Server<'s, T: Transport, S: EventSink = NullSink> {
    config: Config<'s>,
    transport: T,
    unit_id: u8,
    coils: &'s mut [CoilRegion<'s>],
    discrete_inputs: &'s mut [CoilRegion<'s>],
    holding_registers: &'s mut [RegisterRegion<'s>],
    input_registers: &'s mut [RegisterRegion<'s>],
    pool: Pool<'s, PendingRequest>,
    high_queue: SpscQueue<'s, usize>,
    normal_queue: SpscQueue<'s, usize>,
    framing: LinkFraming<'s>,
    pending_tx: [u8; ADU_MAX],
    pending_tx_len: usize,
    pending_tx_sent: usize,
    dropped_requests: u64,
    ignored_requests: u64,
    response_scratch: [u8; PDU_MAX],
    diag: Diagnostics<'s, S>,
}

impl<'s, T: Transport, S: EventSink> Server<'s, T, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config<'s>,
        transport: T,
        unit_id: u8,
        coils: &'s mut [CoilRegion<'s>],
        discrete_inputs: &'s mut [CoilRegion<'s>],
        holding_registers: &'s mut [RegisterRegion<'s>],
        input_registers: &'s mut [RegisterRegion<'s>],
        pool: Pool<'s, PendingRequest>,
        high_queue: SpscQueue<'s, usize>,
        normal_queue: SpscQueue<'s, usize>,
        framing: LinkFraming<'s>,
        diag: Diagnostics<'s, S>,
    ) -> Self {
        Self {
            config,
            transport,
            unit_id,
            coils,
            discrete_inputs,
            holding_registers,
            input_registers,
            pool,
            high_queue,
            normal_queue,
            framing,
            pending_tx: [0u8; ADU_MAX],
            pending_tx_len: 0,
            pending_tx_sent: 0,
            dropped_requests: 0,
            ignored_requests: 0,
            response_scratch: [0u8; PDU_MAX],
            diag,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics<'s, S> {
        &self.diag
    }

    pub fn dropped_requests(&self) -> u64 {
        self.dropped_requests
    }

    /// Drives the engine: finish any partially-sent response, receive and
    /// enqueue inbound frames, and dispatch the next queued request.
    pub fn poll(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        self.flush_pending_tx()?;
        self.receive(now_ms)?;
        if self.pending_tx_len == 0 {
            self.dispatch_next(now_ms)?;
        }
        Ok(())
    }

    fn receive(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        let mut buf = [0u8; 128];
        loop {
            let n = self.transport.recv(&mut buf).map_err(|_| ErrorKind::TransportIo)?;
            if n == 0 {
                break;
            }
            match &mut self.framing {
                LinkFraming::Rtu(f) => f.ingest(&buf[..n], now_ms),
                LinkFraming::Ascii(f) => f.ingest(&buf[..n], now_ms),
                LinkFraming::Tcp(f) => f.ingest(&buf[..n]),
            }
            if n < buf.len() {
                break;
            }
        }
        self.drain_frames(now_ms)
    }

    fn drain_frames(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        let mut scratch = [0u8; ADU_MAX];
        loop {
            let (unit_id, transaction_id, pdu_len) = match &mut self.framing {
                LinkFraming::Rtu(f) => match f.try_take_frame(&mut scratch, now_ms) {
                    rtu::TakeResult::Frame(frame) => (frame.unit_id, 0u16, frame.pdu.len()),
                    rtu::TakeResult::Duplicate => {
                        debug!("dropped duplicate RTU frame");
                        self.diag.record_duplicate();
                        continue;
                    }
                    rtu::TakeResult::Garbage => continue,
                    rtu::TakeResult::NotReady => return Ok(()),
                },
                LinkFraming::Ascii(f) => match f.try_take_frame(&mut scratch, now_ms) {
                    ascii::TakeResult::Frame(frame) => (frame.unit_id, 0u16, frame.pdu.len()),
                    ascii::TakeResult::Garbage => continue,
                    ascii::TakeResult::NotReady => return Ok(()),
                },
                LinkFraming::Tcp(f) => match f.try_take_frame(&mut scratch) {
                    Ok(Some(frame)) => (frame.decoded.unit_id, frame.transaction_id, frame.decoded.pdu.len()),
                    Ok(None) => return Ok(()),
                    Err(_) => {
                        warn!("TCP framing error while decoding inbound stream");
                        self.diag.counters.framing_errors += 1;
                        return Err(ErrorKind::Framing);
                    }
                },
            };
            self.enqueue_request(unit_id, transaction_id, &scratch[..pdu_len], now_ms);
        }
    }

    fn enqueue_request(&mut self, unit_id: u8, transaction_id: u16, pdu: &[u8], now_ms: u64) {
        if pdu.is_empty() {
            return;
        }
        let broadcast = unit_id == 0;
        let mut req = PendingRequest::blank();
        req.unit_id = unit_id;
        req.broadcast = broadcast;
        req.transaction_id = transaction_id;
        req.pdu[..pdu.len()].copy_from_slice(pdu);
        req.pdu_len = pdu.len();
        req.received_ms = now_ms;

        let idx = match self.pool.acquire(req) {
            Some(idx) => idx,
            None => {
                warn!("request pool exhausted, dropping inbound request");
                self.dropped_requests += 1;
                return;
            }
        };
        // Broadcasts never block waiting for a reply, so they drain ahead of
        // requests that will eventually need a response sent back.
        let queue = if broadcast { &mut self.high_queue } else { &mut self.normal_queue };
        if !queue.enqueue(idx) {
            let _ = self.pool.release(idx);
            warn!("priority queue full, dropping inbound request");
            self.dropped_requests += 1;
        }
    }

    fn dispatch_next(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        let idx = match self.high_queue.dequeue().or_else(|| self.normal_queue.dequeue()) {
            Some(idx) => idx,
            None => return Ok(()),
        };

        // Copy the request PDU out before calling into `handle_pdu` (which
        // needs `&mut self` for region lookups and response scratch), since
        // that can't overlap with a borrow still rooted in `self.pool`.
        let mut pdu_buf = [0u8; PDU_MAX];
        let (unit_id, broadcast, transaction_id, pdu_len, received_ms, ignored) = {
            let req = match self.pool.get_mut(idx) {
                Some(req) => req,
                None => return Ok(()),
            };
            req.fsm.apply(&REQ_TABLE, ReqEvent::Dequeued);
            let ignored = req.unit_id != self.unit_id && req.unit_id != 0;
            if !ignored {
                pdu_buf[..req.pdu_len].copy_from_slice(&req.pdu[..req.pdu_len]);
            }
            (req.unit_id, req.broadcast, req.transaction_id, req.pdu_len, req.received_ms, ignored)
        };

        if let Some(req) = self.pool.get_mut(idx) {
            req.fsm.apply(&REQ_TABLE, ReqEvent::Processed);
        }
        let _ = self.pool.release(idx);

        if ignored {
            debug!("ignoring request addressed to foreign unit id {unit_id}");
            self.ignored_requests += 1;
            return Ok(());
        }

        let function = pdu_buf[0];
        let response = self.handle_pdu(&pdu_buf[..pdu_len]);

        // An over-budget handler still gets its response emitted; the
        // timeout is only ever a diagnostics counter on this side of the
        // link.
        let elapsed_ms = now_ms.saturating_sub(received_ms);
        if elapsed_ms > self.config.timeout_for(function) {
            self.diag.counters.timeouts += 1;
        }

        let status = match &response {
            Ok(_) => Status::Ok,
            Err(code) => Status::Exception(*code),
        };
        self.diag.record(now_ms, function, status);

        if broadcast {
            return Ok(());
        }

        let mut pdu_out = [0u8; PDU_MAX];
        let out_len = match response {
            Ok(n) => {
                pdu_out[..n].copy_from_slice(&self.response_scratch[..n]);
                n
            }
            Err(code) => exception::build(&mut pdu_out, function, code).unwrap_or(0),
        };
        self.stage_response(unit_id, transaction_id, &pdu_out[..out_len])
    }

    fn handle_pdu(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let function = pdu[0];
        match function {
            fc::READ_COILS => self.handle_read_coils(pdu, fc::READ_COILS, true),
            fc::READ_DISCRETE_INPUTS => self.handle_read_coils(pdu, fc::READ_DISCRETE_INPUTS, false),
            fc::READ_HOLDING_REGISTERS => self.handle_read_registers(pdu, fc::READ_HOLDING_REGISTERS, true),
            fc::READ_INPUT_REGISTERS => self.handle_read_registers(pdu, fc::READ_INPUT_REGISTERS, false),
            fc::WRITE_SINGLE_COIL => self.handle_write_single_coil(pdu),
            fc::WRITE_SINGLE_REGISTER => self.handle_write_single_register(pdu),
            fc::WRITE_MULTIPLE_COILS => self.handle_write_multiple_coils(pdu),
            fc::WRITE_MULTIPLE_REGISTERS => self.handle_write_multiple_registers(pdu),
            fc::READ_WRITE_MULTIPLE_REGISTERS => self.handle_read_write_registers(pdu),
            _ => {
                debug!("unsupported function code {function:#04x}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn find_coil_region(&mut self, table: bool, address: u16, count: u16) -> Option<&mut CoilRegion<'s>> {
        let regions: &mut [CoilRegion<'s>] = if table { &mut *self.coils } else { &mut *self.discrete_inputs };
        regions.iter_mut().find(|r| r.covers(address, count))
    }

    fn find_register_region(&mut self, table: bool, address: u16, count: u16) -> Option<&mut RegisterRegion<'s>> {
        let regions: &mut [RegisterRegion<'s>] = if table { &mut *self.holding_registers } else { &mut *self.input_registers };
        regions.iter_mut().find(|r| r.covers(address, count))
    }

    fn handle_read_coils(&mut self, pdu: &[u8], function: u8, primary: bool) -> core::result::Result<usize, ExceptionCode> {
        let (address, quantity) = coils::parse_read_request(pdu, function).map_err(|_| ExceptionCode::IllegalDataValue)?;
        let mut bits = [false; coils::MAX_READ_QUANTITY as usize];
        {
            let region = self.find_coil_region(primary, address, quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            if !region.read(address, &mut bits[..quantity as usize]) {
                return Err(ExceptionCode::ServerDeviceFailure);
            }
        }
        let bit_iter = bits[..quantity as usize].iter().copied();
        let mut packed = [0u8; 256];
        let byte_count = crate::pdu::pack_bits(&mut packed, bit_iter);
        let view = crate::pdu::BitsView::new(&packed[..byte_count], quantity);
        let n = coils::build_read_response(&mut self.response_scratch, function, view).map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        Ok(n)
    }

    fn handle_read_registers(&mut self, pdu: &[u8], function: u8, holding: bool) -> core::result::Result<usize, ExceptionCode> {
        let (address, quantity) = registers::parse_read_request(pdu, function).map_err(|_| ExceptionCode::IllegalDataValue)?;
        let mut values = [0u16; registers::MAX_READ_QUANTITY as usize];
        {
            let region = self.find_register_region(holding, address, quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            if !region.read(address, &mut values[..quantity as usize]) {
                return Err(ExceptionCode::ServerDeviceFailure);
            }
        }
        let n = registers::build_read_response(&mut self.response_scratch, function, &values[..quantity as usize])
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        Ok(n)
    }

    fn handle_write_single_coil(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let (address, value) = coils::parse_write_single_request(pdu).map_err(|_| ExceptionCode::IllegalDataValue)?;
        {
            let region = self.find_coil_region(true, address, 1).ok_or(ExceptionCode::IllegalDataAddress)?;
            match region.write(address, &[value]) {
                Some(true) => {}
                Some(false) => return Err(ExceptionCode::ServerDeviceFailure),
                None => return Err(ExceptionCode::IllegalDataValue),
            }
        }
        coils::build_write_single_response(&mut self.response_scratch, address, value).map_err(|_| ExceptionCode::ServerDeviceFailure)
    }

    fn handle_write_single_register(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let (address, value) = registers::parse_write_single_request(pdu).map_err(|_| ExceptionCode::IllegalDataValue)?;
        {
            let region = self.find_register_region(true, address, 1).ok_or(ExceptionCode::IllegalDataAddress)?;
            match region.write(address, &[value]) {
                Some(true) => {}
                Some(false) => return Err(ExceptionCode::ServerDeviceFailure),
                None => return Err(ExceptionCode::IllegalDataValue),
            }
        }
        registers::build_write_single_response(&mut self.response_scratch, address, value).map_err(|_| ExceptionCode::ServerDeviceFailure)
    }

    fn handle_write_multiple_coils(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let parsed = coils::parse_write_multiple_request(pdu).map_err(|_| ExceptionCode::IllegalDataValue)?;
        let mut values = [false; coils::MAX_WRITE_QUANTITY as usize];
        for i in 0..parsed.quantity {
            values[i as usize] = parsed.bits.get(i).unwrap_or(false);
        }
        let (address, quantity) = (parsed.address, parsed.quantity);
        {
            let region = self.find_coil_region(true, address, quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            match region.write(address, &values[..quantity as usize]) {
                Some(true) => {}
                Some(false) => return Err(ExceptionCode::ServerDeviceFailure),
                None => return Err(ExceptionCode::IllegalDataValue),
            }
        }
        coils::build_write_multiple_response(&mut self.response_scratch, address, quantity).map_err(|_| ExceptionCode::ServerDeviceFailure)
    }

    fn handle_write_multiple_registers(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let parsed = registers::parse_write_multiple_request(pdu).map_err(|_| ExceptionCode::IllegalDataValue)?;
        let mut values = [0u16; registers::MAX_WRITE_QUANTITY as usize];
        for i in 0..parsed.quantity {
            values[i as usize] = parsed.values.get(i).unwrap_or(0);
        }
        let (address, quantity) = (parsed.address, parsed.quantity);
        {
            let region = self.find_register_region(true, address, quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            match region.write(address, &values[..quantity as usize]) {
                Some(true) => {}
                Some(false) => return Err(ExceptionCode::ServerDeviceFailure),
                None => return Err(ExceptionCode::IllegalDataValue),
            }
        }
        registers::build_write_multiple_response(&mut self.response_scratch, address, quantity).map_err(|_| ExceptionCode::ServerDeviceFailure)
    }

    fn handle_read_write_registers(&mut self, pdu: &[u8]) -> core::result::Result<usize, ExceptionCode> {
        let parsed = registers::parse_read_write_request(pdu).map_err(|_| ExceptionCode::IllegalDataValue)?;
        let mut write_values = [0u16; registers::MAX_RW_WRITE_QUANTITY as usize];
        for i in 0..parsed.write_quantity {
            write_values[i as usize] = parsed.write_values.get(i).unwrap_or(0);
        }
        let (read_address, read_quantity, write_address, write_quantity) =
            (parsed.read_address, parsed.read_quantity, parsed.write_address, parsed.write_quantity);

        {
            let region = self.find_register_region(true, write_address, write_quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            match region.write(write_address, &write_values[..write_quantity as usize]) {
                Some(true) => {}
                Some(false) => return Err(ExceptionCode::ServerDeviceFailure),
                None => return Err(ExceptionCode::IllegalDataValue),
            }
        }
        let mut read_values = [0u16; registers::MAX_RW_READ_QUANTITY as usize];
        {
            let region = self.find_register_region(true, read_address, read_quantity).ok_or(ExceptionCode::IllegalDataAddress)?;
            if !region.read(read_address, &mut read_values[..read_quantity as usize]) {
                return Err(ExceptionCode::ServerDeviceFailure);
            }
        }
        registers::build_read_write_response(&mut self.response_scratch, &read_values[..read_quantity as usize])
            .map_err(|_| ExceptionCode::ServerDeviceFailure)
    }

    fn stage_response(&mut self, unit_id: u8, transaction_id: u16, pdu: &[u8]) -> core::result::Result<(), ErrorKind> {
        let n = match self.config.framing {
            FramingKind::Rtu => rtu::build_frame(&mut self.pending_tx, unit_id, pdu[0], &pdu[1..])?,
            FramingKind::Ascii => ascii::build_frame(&mut self.pending_tx, unit_id, pdu[0], &pdu[1..])?,
            FramingKind::Tcp => tcp::build_frame(&mut self.pending_tx, transaction_id, unit_id, pdu)?,
        };
        self.pending_tx_len = n;
        self.pending_tx_sent = 0;
        self.flush_pending_tx()
    }

    fn flush_pending_tx(&mut self) -> core::result::Result<(), ErrorKind> {
        if self.pending_tx_len == 0 {
            return Ok(());
        }
        let remaining = &self.pending_tx[self.pending_tx_sent..self.pending_tx_len];
        match self.transport.send(remaining) {
            Ok(sent) => {
                self.pending_tx_sent += sent;
                if self.pending_tx_sent >= self.pending_tx_len {
                    self.pending_tx_len = 0;
                    self.pending_tx_sent = 0;
                    self.diag.record_sent();
                }
                Ok(())
            }
            Err(_) => Err(ErrorKind::TransportIo),
        }
    }
}
