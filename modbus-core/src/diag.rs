// SPDX-License-Identifier: BSD-3-Clause

//! Diagnostics (§4.15): running counters, a per-function-code histogram, a
//! per-outcome (error/exception) histogram, an optional event callback, and
//! a small ring of recent trace events for post-mortem inspection. All
//! storage is caller-owned, same as every other layer in this engine.

use crate::pdu::fc;
use crate::status::{ErrorKind, ExceptionCode, Status};

/// Dense function-code histogram slot count; §4.8's table tops out at
/// `0x17`, rounded up for headroom without reaching for a map.
pub const FC_SLOT_COUNT: usize = 0x18;

fn fc_slot(function: u8) -> usize {
    let base = function & !fc::EXCEPTION_BIT;
    (base as usize).min(FC_SLOT_COUNT - 1)
}

/// Monotonic counters that don't need a histogram's bucketing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub exceptions: u64,
    pub framing_errors: u64,
    pub duplicates_dropped: u64,
    /// Inbound frames that decoded cleanly but could not be correlated to
    /// any outstanding transaction (e.g. a TCP response whose MBAP
    /// transaction id matches nothing in flight).
    pub protocol_errors: u64,
    pub poison_triggers: u64,
}

/// One entry in the trace ring: what happened, to which function code,
/// when.
#[derive(Copy, Clone, Debug)]
pub struct TraceEvent {
    pub now_ms: u64,
    pub function: u8,
    pub status: Status,
}

/// Receives a [`TraceEvent`] as it happens, in addition to the histograms
/// and trace ring. An external collaborator (spec.md §1) — a concrete sink
/// might forward to a host logger, an in-memory test collector, or
/// nothing at all.
pub trait EventSink {
    fn on_event(&mut self, event: TraceEvent);
}

/// The default sink when a caller doesn't wire one up.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _event: TraceEvent) {}
}

/// Hex-dumps `bytes` into `out` as space-separated uppercase pairs,
/// returning the number of characters written. Used for trace-level wire
/// logging (§4.15); callers gate this behind a verbosity check since it's
/// not free even when no log sink is listening.
pub fn hex_trace(out: &mut [u8], bytes: &[u8]) -> usize {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut pos = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if pos + 2 > out.len() {
            break;
        }
        if i > 0 {
            if pos + 1 > out.len() {
                break;
            }
            out[pos] = b' ';
            pos += 1;
            if pos + 2 > out.len() {
                break;
            }
        }
        out[pos] = DIGITS[(b >> 4) as usize];
        out[pos + 1] = DIGITS[(b & 0x0F) as usize];
        pos += 2;
    }
    pos
}

/// The full diagnostics surface for one client or server instance.
pub struct Diagnostics<'s, S: EventSink = NullSink> {
    pub counters: Counters,
    fc_histogram: &'s mut [u64; FC_SLOT_COUNT],
    error_histogram: &'s mut [u64; ErrorKind::SLOT_COUNT],
    exception_histogram: &'s mut [u64; ExceptionCode::SLOT_COUNT],
    trace_ring: &'s mut [Option<TraceEvent>],
    trace_next: usize,
    sink: S,
}

impl<'s> Diagnostics<'s, NullSink> {
    pub fn new(
        fc_histogram: &'s mut [u64; FC_SLOT_COUNT],
        error_histogram: &'s mut [u64; ErrorKind::SLOT_COUNT],
        exception_histogram: &'s mut [u64; ExceptionCode::SLOT_COUNT],
        trace_ring: &'s mut [Option<TraceEvent>],
    ) -> Self {
        Self::with_sink(fc_histogram, error_histogram, exception_histogram, trace_ring, NullSink)
    }
}

impl<'s, S: EventSink> Diagnostics<'s, S> {
    pub fn with_sink(
        fc_histogram: &'s mut [u64; FC_SLOT_COUNT],
        error_histogram: &'s mut [u64; ErrorKind::SLOT_COUNT],
        exception_histogram: &'s mut [u64; ExceptionCode::SLOT_COUNT],
        trace_ring: &'s mut [Option<TraceEvent>],
        sink: S,
    ) -> Self {
        fc_histogram.fill(0);
        error_histogram.fill(0);
        exception_histogram.fill(0);
        for slot in trace_ring.iter_mut() {
            *slot = None;
        }
        Self {
            counters: Counters::default(),
            fc_histogram,
            error_histogram,
            exception_histogram,
            trace_ring,
            trace_next: 0,
            sink,
        }
    }

    pub fn fc_count(&self, function: u8) -> u64 {
        self.fc_histogram[fc_slot(function)]
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_histogram[kind.slot_index()]
    }

    pub fn exception_count(&self, code: ExceptionCode) -> u64 {
        self.exception_histogram[code.slot_index()]
    }

    fn push_trace(&mut self, event: TraceEvent) {
        if !self.trace_ring.is_empty() {
            let depth = self.trace_ring.len();
            self.trace_ring[self.trace_next] = Some(event);
            self.trace_next = (self.trace_next + 1) % depth;
        }
        self.sink.on_event(event);
    }

    /// Records one completed request/response cycle: bumps the function
    /// histogram, the relevant counters and outcome histogram, and appends
    /// a trace event.
    pub fn record(&mut self, now_ms: u64, function: u8, status: Status) {
        self.fc_histogram[fc_slot(function)] += 1;
        match status {
            Status::Ok => self.counters.responses_received += 1,
            Status::Error(kind) => {
                self.error_histogram[kind.slot_index()] += 1;
                match kind {
                    ErrorKind::Timeout => self.counters.timeouts += 1,
                    ErrorKind::Framing => self.counters.framing_errors += 1,
                    _ => {}
                }
            }
            Status::Exception(code) => {
                self.exception_histogram[code.slot_index()] += 1;
                self.counters.exceptions += 1;
            }
        }
        self.push_trace(TraceEvent { now_ms, function, status });
    }

    pub fn record_duplicate(&mut self) {
        self.counters.duplicates_dropped += 1;
    }

    pub fn record_retry(&mut self) {
        self.counters.retries += 1;
    }

    pub fn record_sent(&mut self) {
        self.counters.requests_sent += 1;
    }

    pub fn record_protocol_error(&mut self) {
        self.counters.protocol_errors += 1;
    }

    pub fn record_poison_trigger(&mut self) {
        self.counters.poison_triggers += 1;
    }

    /// A read-only view over however many trace events are currently
    /// populated, oldest first as stored (not reordered by recency).
    pub fn trace_ring(&self) -> &[Option<TraceEvent>] {
        self.trace_ring
    }
}
