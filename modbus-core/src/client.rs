// SPDX-License-Identifier: BSD-3-Clause

//! Non-blocking client (master) transaction engine (§4.12).
//!
//! One [`Client`] owns a fixed pool of [`Transaction`] slots, two priority
//! submission queues, one link-framing instance, and a [`Transport`].
//! `poll()` drives everything: drain inbound bytes, match responses to
//! transactions, retry-or-timeout transactions past their deadline, and
//! send the next queued request once the link is free. Nothing here
//! blocks; an ISR-adjacent caller wants [`crate::isr`] instead.
//!
//! A submitted transaction is identified by a [`TransactionHandle`]
//! carrying a generation counter alongside its pool index, so a handle
//! from a completed-and-recycled slot is detected as stale (`ErrorKind::
//! Other`) rather than silently reading someone else's in-flight request.
//! This is separate from a "poison transaction" (§4.12), a control entry
//! submitted via [`Client::submit_poison`] that leapfrogs ordinary queued
//! work and drains it with a cancelled status.

use crate::config::Config;
use crate::diag::{Diagnostics, EventSink, NullSink};
use crate::framing::ascii::{self, AsciiFraming};
use crate::framing::rtu::{self, RtuFraming};
use crate::framing::tcp::{self, TcpFraming};
use crate::framing::{FramingKind, ADU_MAX};
use crate::fsm::{Fsm, Table, Transition};
use crate::pdu::{fc, PDU_MAX};
use crate::pool::Pool;
use crate::spsc::SpscQueue;
use crate::status::{ErrorKind, Status};
use crate::transport::Transport;
use log::{debug, trace, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TxnState {
    Pending,
    AwaitingResponse,
    Done,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TxnEvent {
    Sent,
    SentNoResponse,
    ResponseMatched,
    Retry,
    TimedOut,
    Cancel,
    PoisonCompleted,
}

const TXN_TABLE: Table<'static, TxnState, TxnEvent> = Table::new(&[
    Transition { from: TxnState::Pending, event: TxnEvent::Sent, to: TxnState::AwaitingResponse },
    Transition { from: TxnState::Pending, event: TxnEvent::SentNoResponse, to: TxnState::Done },
    Transition { from: TxnState::AwaitingResponse, event: TxnEvent::ResponseMatched, to: TxnState::Done },
    Transition { from: TxnState::AwaitingResponse, event: TxnEvent::Retry, to: TxnState::Pending },
    Transition { from: TxnState::AwaitingResponse, event: TxnEvent::TimedOut, to: TxnState::Done },
    Transition { from: TxnState::Pending, event: TxnEvent::Cancel, to: TxnState::Done },
    Transition { from: TxnState::AwaitingResponse, event: TxnEvent::Cancel, to: TxnState::Done },
    Transition { from: TxnState::Pending, event: TxnEvent::PoisonCompleted, to: TxnState::Done },
]);

/// A handle to a submitted transaction, valid only as long as the
/// generation it was issued with still matches the slot's current one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    index: usize,
    generation: u32,
}

/// One pool slot's worth of transaction state. Opaque: the only reason
/// this is `pub` rather than crate-private is so a caller can name it to
/// declare `Pool` backing storage (`[Option<Transaction>; N]`); every field
/// stays private and every mutation goes through [`Client`].
pub struct Transaction {
    fsm: Fsm<TxnState>,
    generation: u32,
    unit_id: u8,
    function: u8,
    priority: Priority,
    transaction_id: u16,
    request: [u8; PDU_MAX],
    request_len: usize,
    response: [u8; PDU_MAX],
    response_len: usize,
    attempt: u8,
    deadline_ms: u64,
    not_before_ms: u64,
    queued: bool,
    status: Option<Status>,
    is_poison: bool,
}

impl Transaction {
    fn blank(generation: u32) -> Self {
        Self {
            fsm: Fsm::new(TxnState::Pending),
            generation,
            unit_id: 0,
            function: 0,
            priority: Priority::Normal,
            transaction_id: 0,
            request: [0u8; PDU_MAX],
            request_len: 0,
            response: [0u8; PDU_MAX],
            response_len: 0,
            attempt: 0,
            deadline_ms: 0,
            not_before_ms: 0,
            queued: true,
            status: None,
            is_poison: false,
        }
    }
}

/// The link-specific framing receiver, selected by [`Config::framing`].
pub enum LinkFraming<'s> {
    Rtu(RtuFraming<'s>),
    Ascii(AsciiFraming<'s>),
    Tcp(TcpFraming<'s>),
}

pub struct Client<'s, T: Transport, S: EventSink = NullSink> {
    config: Config<'s>,
    transport: T,
    pool: Pool<'s, Transaction>,
    high_queue: SpscQueue<'s, usize>,
    normal_queue: SpscQueue<'s, usize>,
    framing: LinkFraming<'s>,
    next_transaction_id: u16,
    next_generation: u32,
    awaiting_count: usize,
    diag: Diagnostics<'s, S>,
}

impl<'s, T: Transport, S: EventSink> Client<'s, T, S> {
    pub fn new(
        config: Config<'s>,
        transport: T,
        pool: Pool<'s, Transaction>,
        high_queue: SpscQueue<'s, usize>,
        normal_queue: SpscQueue<'s, usize>,
        framing: LinkFraming<'s>,
        diag: Diagnostics<'s, S>,
    ) -> Self {
        Self {
            config,
            transport,
            pool,
            high_queue,
            normal_queue,
            framing,
            next_transaction_id: 0,
            next_generation: 1,
            awaiting_count: 0,
            diag,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics<'s, S> {
        &self.diag
    }

    /// Submits `pdu` (function byte + payload, as produced by
    /// [`crate::pdu`]'s builders) addressed to `unit_id`. Rejects a
    /// broadcast (`unit_id == 0`) FC17 request, since a broadcast
    /// read/write request has no meaningful read response to wait for.
    pub fn submit(&mut self, unit_id: u8, pdu: &[u8], priority: Priority, now_ms: u64) -> core::result::Result<TransactionHandle, ErrorKind> {
        if pdu.is_empty() || pdu.len() > PDU_MAX {
            return Err(ErrorKind::InvalidArgument);
        }
        let function = pdu[0];
        if unit_id == 0 && function == fc::READ_WRITE_MULTIPLE_REGISTERS {
            return Err(ErrorKind::InvalidRequest);
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);

        let mut txn = Transaction::blank(generation);
        txn.unit_id = unit_id;
        txn.function = function;
        txn.priority = priority;
        txn.transaction_id = transaction_id;
        txn.request[..pdu.len()].copy_from_slice(pdu);
        txn.request_len = pdu.len();

        let idx = self.pool.acquire(txn).ok_or(ErrorKind::NoResources)?;
        let queue = match priority {
            Priority::High => &mut self.high_queue,
            Priority::Normal => &mut self.normal_queue,
        };
        if !queue.enqueue(idx) {
            let _ = self.pool.release(idx);
            return Err(ErrorKind::NoResources);
        }
        Ok(TransactionHandle { index: idx, generation })
    }

    /// Submits a poison transaction (§4.12): a sentinel that leapfrogs every
    /// normal- and high-priority entry (but not other already-queued
    /// poisons). The next `poll` drains every other pending or in-flight
    /// transaction with a cancelled status, completes this one with `ok`,
    /// and returns the engine to idle. Multiple poisons submitted before
    /// the next poll drain in pool-slot order, which matches submission
    /// order unless a slot has been recycled in between.
    pub fn submit_poison(&mut self, now_ms: u64) -> core::result::Result<TransactionHandle, ErrorKind> {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);

        let mut txn = Transaction::blank(generation);
        txn.is_poison = true;
        txn.not_before_ms = now_ms;
        txn.queued = false;

        let idx = self.pool.acquire(txn).ok_or(ErrorKind::NoResources)?;
        Ok(TransactionHandle { index: idx, generation })
    }

    /// Cancels a transaction that hasn't completed yet. A transaction that
    /// already completed (response, timeout, or a prior cancel) is left
    /// alone; call [`Self::take_response`] to reclaim its slot instead.
    pub fn cancel(&mut self, handle: TransactionHandle) -> core::result::Result<(), ErrorKind> {
        let txn = self.get_txn_mut(handle)?;
        if txn.fsm.apply(&TXN_TABLE, TxnEvent::Cancel).is_some() {
            txn.status = Some(Status::Error(ErrorKind::Cancelled));
        }
        Ok(())
    }

    /// Returns the completed outcome of `handle`, copying the response PDU
    /// into `out` and releasing the slot back to the pool. `Ok(None)` means
    /// still in flight; call again on a later `poll`.
    pub fn take_response(&mut self, handle: TransactionHandle, out: &mut [u8]) -> core::result::Result<Option<(Status, usize)>, ErrorKind> {
        let result = {
            let txn = self.get_txn_mut(handle)?;
            if txn.fsm.state() != TxnState::Done {
                return Ok(None);
            }
            let n = txn.response_len.min(out.len());
            out[..n].copy_from_slice(&txn.response[..n]);
            (txn.status.unwrap_or(Status::Error(ErrorKind::Other)), n)
        };
        let _ = self.pool.release(handle.index);
        Ok(Some(result))
    }

    fn get_txn_mut(&mut self, handle: TransactionHandle) -> core::result::Result<&mut Transaction, ErrorKind> {
        let txn = self.pool.get_mut(handle.index).ok_or(ErrorKind::InvalidArgument)?;
        if txn.generation != handle.generation {
            return Err(ErrorKind::Other);
        }
        Ok(txn)
    }

    /// Drives the engine: receive and match inbound frames, expire or
    /// retry overdue transactions, and send the next queued request if the
    /// link is free.
    pub fn poll(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        self.receive(now_ms)?;
        self.handle_timeouts(now_ms);
        self.requeue_ready_retries(now_ms);
        self.try_send_next(now_ms)?;
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
            match &mut self.framing {
                LinkFraming::Rtu(f) => match f.try_take_frame(&mut scratch, now_ms) {
                    rtu::TakeResult::Frame(frame) => {
                        let unit_id = frame.unit_id;
                        let pdu_len = frame.pdu.len();
                        scratch.copy_within(0..0, 0); // no-op, keeps `frame`'s borrow scope obvious
                        let _ = (unit_id, pdu_len);
                        break self.dispatch_decoded(now_ms, frame.unit_id, frame.pdu, None);
                    }
                    rtu::TakeResult::Duplicate => {
                        debug!("dropped duplicate RTU frame");
                        self.diag.record_duplicate();
                        continue;
                    }
                    rtu::TakeResult::Garbage => continue,
                    rtu::TakeResult::NotReady => break Ok(()),
                },
                LinkFraming::Ascii(f) => match f.try_take_frame(&mut scratch, now_ms) {
                    ascii::TakeResult::Frame(frame) => break self.dispatch_decoded(now_ms, frame.unit_id, frame.pdu, None),
                    ascii::TakeResult::Garbage => continue,
                    ascii::TakeResult::NotReady => break Ok(()),
                },
                LinkFraming::Tcp(f) => match f.try_take_frame(&mut scratch) {
                    Ok(Some(frame)) => {
                        break self.dispatch_decoded(now_ms, frame.decoded.unit_id, frame.decoded.pdu, Some(frame.transaction_id));
                    }
                    Ok(None) => break Ok(()),
                    Err(_) => {
                        warn!("TCP framing error while decoding inbound stream");
                        self.diag.counters.framing_errors += 1;
                        break Err(ErrorKind::Framing);
                    }
                },
            }
        }
    }

    fn dispatch_decoded(&mut self, now_ms: u64, unit_id: u8, pdu: &[u8], transaction_id: Option<u16>) -> core::result::Result<(), ErrorKind> {
        if pdu.is_empty() {
            return Ok(());
        }
        let idx = match transaction_id {
            Some(tid) => self.find_awaiting_by_transaction_id(tid),
            None => self.find_awaiting_by_address(unit_id, pdu[0] & !fc::EXCEPTION_BIT),
        };
        let idx = match idx {
            Some(i) => i,
            None => {
                // A TCP response is addressed by transaction id alone, so a
                // mismatch here can only mean a stale or foreign reply and is
                // always a protocol error. RTU/ASCII frames are matched by
                // unit id and function code and can legitimately be an
                // unsolicited frame from a device we aren't waiting on.
                if transaction_id.is_some() {
                    warn!("TCP response transaction id did not match any outstanding request");
                    self.diag.record_protocol_error();
                }
                return Ok(());
            }
        };

        let is_exception = pdu[0] & fc::EXCEPTION_BIT != 0;
        let status = if is_exception {
            match crate::pdu::exception::parse(pdu) {
                Ok((_, code)) => Status::Exception(code),
                Err(e) => Status::Error(e),
            }
        } else {
            Status::Ok
        };
        let base_function = pdu[0] & !fc::EXCEPTION_BIT;

        if let Some(txn) = self.pool.get_mut(idx) {
            let n = pdu.len().min(PDU_MAX);
            txn.response[..n].copy_from_slice(&pdu[..n]);
            txn.response_len = n;
            txn.status = Some(status);
            txn.fsm.apply(&TXN_TABLE, TxnEvent::ResponseMatched);
        }
        self.awaiting_count = self.awaiting_count.saturating_sub(1);
        self.diag.record(now_ms, base_function, status);
        Ok(())
    }

    fn find_awaiting_by_transaction_id(&self, transaction_id: u16) -> Option<usize> {
        for i in 0..self.pool.capacity() {
            if let Some(txn) = self.pool.get(i) {
                if txn.fsm.state() == TxnState::AwaitingResponse && txn.transaction_id == transaction_id {
                    return Some(i);
                }
            }
        }
        None
    }

    fn find_awaiting_by_address(&self, unit_id: u8, base_function: u8) -> Option<usize> {
        for i in 0..self.pool.capacity() {
            if let Some(txn) = self.pool.get(i) {
                if txn.fsm.state() == TxnState::AwaitingResponse && txn.unit_id == unit_id && (txn.function & !fc::EXCEPTION_BIT) == base_function {
                    return Some(i);
                }
            }
        }
        None
    }

    fn handle_timeouts(&mut self, now_ms: u64) {
        for i in 0..self.pool.capacity() {
            let mut retried = false;
            let mut timed_out_function = None;
            if let Some(txn) = self.pool.get_mut(i) {
                if txn.fsm.state() != TxnState::AwaitingResponse || now_ms < txn.deadline_ms {
                    continue;
                }
                if txn.attempt + 1 < self.config.retry.max_attempts {
                    let backoff = self.config.retry.backoff_for_attempt(txn.attempt) as u64;
                    txn.attempt += 1;
                    txn.fsm.apply(&TXN_TABLE, TxnEvent::Retry);
                    txn.not_before_ms = now_ms + backoff;
                    txn.queued = false;
                    retried = true;
                } else {
                    txn.fsm.apply(&TXN_TABLE, TxnEvent::TimedOut);
                    txn.status = Some(Status::Error(ErrorKind::Timeout));
                    txn.response_len = 0;
                    timed_out_function = Some(txn.function);
                }
            } else {
                continue;
            }
            self.awaiting_count = self.awaiting_count.saturating_sub(1);
            if retried {
                self.diag.record_retry();
            } else if let Some(function) = timed_out_function {
                self.diag.record(now_ms, function, Status::Error(ErrorKind::Timeout));
            }
        }
    }

    /// Re-enqueues transactions whose retry backoff has elapsed.
    fn requeue_ready_retries(&mut self, now_ms: u64) {
        for i in 0..self.pool.capacity() {
            let (ready, priority) = match self.pool.get(i) {
                Some(txn) if !txn.is_poison && txn.fsm.state() == TxnState::Pending && !txn.queued && now_ms >= txn.not_before_ms => {
                    (true, txn.priority)
                }
                _ => (false, Priority::Normal),
            };
            if !ready {
                continue;
            }
            let queue = match priority {
                Priority::High => &mut self.high_queue,
                Priority::Normal => &mut self.normal_queue,
            };
            if queue.enqueue(i) {
                if let Some(txn) = self.pool.get_mut(i) {
                    txn.queued = true;
                }
            }
        }
    }

    fn link_ready_to_send(&self, now_ms: u64) -> bool {
        match &self.framing {
            LinkFraming::Rtu(f) => self.awaiting_count == 0 && f.boundary_elapsed(now_ms),
            LinkFraming::Ascii(_) => self.awaiting_count == 0,
            LinkFraming::Tcp(_) => self.awaiting_count < self.config.max_in_flight,
        }
    }

    fn build_wire_frame(&self, out: &mut [u8], unit_id: u8, transaction_id: u16, pdu: &[u8]) -> core::result::Result<usize, ErrorKind> {
        match self.config.framing {
            FramingKind::Rtu => rtu::build_frame(out, unit_id, pdu[0], &pdu[1..]),
            FramingKind::Ascii => ascii::build_frame(out, unit_id, pdu[0], &pdu[1..]),
            FramingKind::Tcp => tcp::build_frame(out, transaction_id, unit_id, pdu),
        }
    }

    /// Finds a poison transaction still awaiting its turn. Poisons bypass
    /// the priority queues entirely (§4.12), so they're located by scanning
    /// the pool rather than dequeuing, the same technique every other
    /// pool-wide lookup in this module already uses.
    fn find_pending_poison(&self) -> Option<usize> {
        for i in 0..self.pool.capacity() {
            if let Some(txn) = self.pool.get(i) {
                if txn.is_poison && txn.fsm.state() == TxnState::Pending {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Cancels every other pending or in-flight transaction, completes the
    /// poison transaction at `poison_idx` with `ok`, and returns the engine
    /// to idle. Other queued poisons are left untouched so they drain in
    /// their own turn.
    fn drain_on_poison(&mut self, poison_idx: usize) {
        for i in 0..self.pool.capacity() {
            if i == poison_idx {
                continue;
            }
            if let Some(txn) = self.pool.get_mut(i) {
                if txn.is_poison {
                    continue;
                }
                let state = txn.fsm.state();
                if state == TxnState::Pending || state == TxnState::AwaitingResponse {
                    if txn.fsm.apply(&TXN_TABLE, TxnEvent::Cancel).is_some() {
                        txn.status = Some(Status::Error(ErrorKind::Cancelled));
                    }
                }
            }
        }
        while self.high_queue.dequeue().is_some() {}
        while self.normal_queue.dequeue().is_some() {}
        self.awaiting_count = 0;
        if let Some(txn) = self.pool.get_mut(poison_idx) {
            txn.fsm.apply(&TXN_TABLE, TxnEvent::PoisonCompleted);
            txn.status = Some(Status::Ok);
        }
        self.diag.record_poison_trigger();
        debug!("poison transaction drained pending work and returned the engine to idle");
    }

    fn try_send_next(&mut self, now_ms: u64) -> core::result::Result<(), ErrorKind> {
        if let Some(poison_idx) = self.find_pending_poison() {
            self.drain_on_poison(poison_idx);
            return Ok(());
        }
        if !self.link_ready_to_send(now_ms) {
            return Ok(());
        }
        let idx = match self.high_queue.dequeue().or_else(|| self.normal_queue.dequeue()) {
            Some(idx) => idx,
            None => return Ok(()),
        };
        if let Some(txn) = self.pool.get_mut(idx) {
            txn.queued = false;
        }

        let mut frame = [0u8; ADU_MAX];
        let (unit_id, transaction_id, n) = {
            let txn = self.pool.get(idx).ok_or(ErrorKind::Other)?;
            let n = self.build_wire_frame(&mut frame, txn.unit_id, txn.transaction_id, &txn.request[..txn.request_len])?;
            (txn.unit_id, txn.transaction_id, n)
        };
        let _ = (unit_id, transaction_id);

        match self.transport.send(&frame[..n]) {
            Ok(sent) if sent == n => {
                let (function, broadcast) = self.pool.get(idx).map(|t| (t.function, t.unit_id == 0)).unwrap_or((0, false));
                self.diag.record_sent();
                if broadcast {
                    // A broadcast/no-response request has no reply to wait
                    // for (§4.12): it completes immediately after send.
                    if let Some(txn) = self.pool.get_mut(idx) {
                        txn.fsm.apply(&TXN_TABLE, TxnEvent::SentNoResponse);
                        txn.status = Some(Status::Ok);
                        txn.response_len = 0;
                    }
                    trace!("broadcast request completed without awaiting a response");
                } else {
                    let timeout = self.config.timeout_for(function);
                    if let Some(txn) = self.pool.get_mut(idx) {
                        txn.fsm.apply(&TXN_TABLE, TxnEvent::Sent);
                        txn.deadline_ms = now_ms + timeout;
                    }
                    self.awaiting_count += 1;
                }
                Ok(())
            }
            Ok(_) => {
                // Partial or zero-byte write: leave it Pending and retry the
                // whole frame next poll, at the back of its priority queue.
                let priority = self.pool.get(idx).map(|t| t.priority).unwrap_or(Priority::Normal);
                let queue = match priority {
                    Priority::High => &mut self.high_queue,
                    Priority::Normal => &mut self.normal_queue,
                };
                if queue.enqueue(idx) {
                    if let Some(txn) = self.pool.get_mut(idx) {
                        txn.queued = true;
                    }
                }
                Ok(())
            }
            Err(_) => Err(ErrorKind::TransportIo),
        }
    }
}
