// SPDX-License-Identifier: BSD-3-Clause

//! ISR-safe fast path (§4.14).
//!
//! An interrupt handler can feed received bytes straight into this module
//! and, for the simplest request/response shapes, hand a reply to the
//! peripheral without ever waking the thread-level `poll()` loop. Every
//! entry point here is built from the same primitives the rest of the
//! engine uses ([`crate::ring::Ring`], `core::sync::atomic`), so the cost
//! of the fast path is the same handful of atomic loads/stores as anywhere
//! else in this crate, not a separate locking scheme.
//!
//! As with [`crate::ring::Ring`], the single-producer/single-consumer
//! contract here is the caller's responsibility: `on_rx_chunk_from_isr`,
//! `try_tx_from_isr`, `get_tx_buffer_from_isr`, and `tx_complete_from_isr`
//! are the ISR side; everything else is the thread side. A caller mixing
//! the two from genuinely concurrent contexts (as opposed to an ISR that
//! preempts and returns) must bracket the thread-side calls with the
//! relevant interrupt masked, the same way any other MCU driver protects a
//! byte ring shared with its ISR.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::ring::{NotPowerOfTwo, Ring};

/// Tracks whether the calling context is currently inside an interrupt
/// handler. Caller-owned so nested contexts, or one per core, don't share
/// state implicitly.
///
/// This module never determines on its own whether it is running inside an
/// interrupt: [`IsrContext::in_isr`] always reflects whatever
/// [`IsrContext::enter`]/[`IsrContext::exit`] the caller's ISR entry/exit
/// glue last set. A target with a cheap way to ask the hardware directly
/// (reading `IPSR` on Cortex-M, for instance) can wire that through the
/// same two calls instead of hand-maintaining the flag.
#[derive(Debug, Default)]
pub struct IsrContext {
    flag: AtomicBool,
}

impl IsrContext {
    pub const fn new() -> Self {
        Self { flag: AtomicBool::new(false) }
    }

    pub fn in_isr(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Call from the top of an ISR, before touching any state shared with
    /// the thread side.
    pub fn enter(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Call at the bottom of an ISR, after the last access to shared state.
    pub fn exit(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Panics if `ctx` reports an ISR context. A debug guard for call sites
/// (the full `poll()`, `client::submit`, ...) that assume thread-level
/// execution and are not meant to run from an interrupt handler.
pub fn assert_not_isr(ctx: &IsrContext) {
    assert!(!ctx.in_isr(), "called from an interrupt context");
}

/// A snapshot of [`TurnaroundStats`], cheap to copy out for logging or a
/// diagnostics dump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TurnaroundSnapshot {
    pub min_us: Option<u32>,
    pub max_us: Option<u32>,
    pub avg_us: Option<u32>,
    pub fast_path_hits: u64,
    pub thread_mediated_hits: u64,
    pub queue_full_events: u64,
    pub isr_overruns: u64,
}

/// RX-to-TX turnaround statistics (§4.14): confirms the fast path is
/// actually being taken and measures field latency without allocating.
/// Counters are plain atomics rather than a mutex since a sample can be
/// recorded from either the ISR or the thread side.
#[derive(Debug, Default)]
pub struct TurnaroundStats {
    min_us: AtomicUsize,
    max_us: AtomicUsize,
    sum_us: AtomicUsize,
    samples: AtomicUsize,
    fast_path_hits: AtomicUsize,
    thread_mediated_hits: AtomicUsize,
    queue_full_events: AtomicUsize,
    isr_overruns: AtomicUsize,
}

impl TurnaroundStats {
    pub const fn new() -> Self {
        Self {
            min_us: AtomicUsize::new(usize::MAX),
            max_us: AtomicUsize::new(0),
            sum_us: AtomicUsize::new(0),
            samples: AtomicUsize::new(0),
            fast_path_hits: AtomicUsize::new(0),
            thread_mediated_hits: AtomicUsize::new(0),
            queue_full_events: AtomicUsize::new(0),
            isr_overruns: AtomicUsize::new(0),
        }
    }

    fn record(&self, turnaround_us: u32, fast_path: bool) {
        let t = turnaround_us as usize;
        self.min_us.fetch_min(t, Ordering::Relaxed);
        self.max_us.fetch_max(t, Ordering::Relaxed);
        self.sum_us.fetch_add(t, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        if fast_path {
            self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.thread_mediated_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_queue_full(&self) {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_overrun(&self) {
        self.isr_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TurnaroundSnapshot {
        let samples = self.samples.load(Ordering::Relaxed);
        let min = self.min_us.load(Ordering::Relaxed);
        TurnaroundSnapshot {
            min_us: if samples == 0 { None } else { Some(min as u32) },
            max_us: if samples == 0 { None } else { Some(self.max_us.load(Ordering::Relaxed) as u32) },
            avg_us: if samples == 0 { None } else { Some((self.sum_us.load(Ordering::Relaxed) / samples) as u32) },
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed) as u64,
            thread_mediated_hits: self.thread_mediated_hits.load(Ordering::Relaxed) as u64,
            queue_full_events: self.queue_full_events.load(Ordering::Relaxed) as u64,
            isr_overruns: self.isr_overruns.load(Ordering::Relaxed) as u64,
        }
    }
}

/// The RX/TX fast path itself: an RX [`Ring`] fed directly from interrupt
/// context, and a single caller-owned TX scratch buffer used only when a
/// reply can be built and handed to the peripheral without leaving the
/// ISR. `tx` holds at most one outstanding frame at a time, same as the
/// single-response-in-flight rule the thread-level [`crate::server::Server`]
/// follows.
pub struct FastPath<'s> {
    rx: Ring<'s>,
    tx: &'s mut [u8],
    tx_len: usize,
    tx_busy: bool,
    rx_arrived_us: Option<u32>,
    stats: TurnaroundStats,
}

impl<'s> FastPath<'s> {
    /// `rx_storage.len()` must be a power of two, same as [`Ring::new`].
    pub fn new(rx_storage: &'s mut [u8], tx_storage: &'s mut [u8]) -> core::result::Result<Self, NotPowerOfTwo> {
        Ok(Self {
            rx: Ring::new(rx_storage)?,
            tx: tx_storage,
            tx_len: 0,
            tx_busy: false,
            rx_arrived_us: None,
            stats: TurnaroundStats::new(),
        })
    }

    pub fn stats(&self) -> &TurnaroundStats {
        &self.stats
    }

    /// Pushes newly-received bytes into the RX ring. Returns the number of
    /// bytes actually accepted; fewer than `bytes.len()` means the ring was
    /// full and the remainder was dropped, counted as an overrun.
    ///
    /// ISR side only.
    pub fn on_rx_chunk_from_isr(&mut self, bytes: &[u8], now_us: u32) -> usize {
        if self.rx_arrived_us.is_none() {
            self.rx_arrived_us = Some(now_us);
        }
        let written = self.rx.write(bytes);
        if written < bytes.len() {
            self.stats.record_overrun();
        }
        written
    }

    /// Attempts to hand `pdu` to the peripheral immediately, bypassing
    /// `poll()` entirely. Fails (and counts a queue-full event) if a
    /// previous response is still outstanding or `pdu` doesn't fit the TX
    /// scratch buffer.
    ///
    /// ISR side only.
    pub fn try_tx_from_isr(&mut self, pdu: &[u8], now_us: u32) -> bool {
        if self.tx_busy || pdu.len() > self.tx.len() {
            self.stats.record_queue_full();
            return false;
        }
        self.tx[..pdu.len()].copy_from_slice(pdu);
        self.tx_len = pdu.len();
        self.tx_busy = true;
        self.complete_tx(now_us, true);
        true
    }

    /// Hands back the raw TX scratch buffer for in-place fill (for example
    /// by a DMA-backed driver that writes the frame itself), or `None` if a
    /// response is already outstanding.
    ///
    /// ISR side only. Pair with [`FastPath::tx_complete_from_isr`].
    pub fn get_tx_buffer_from_isr(&mut self) -> Option<&mut [u8]> {
        if self.tx_busy {
            return None;
        }
        self.tx_busy = true;
        Some(self.tx)
    }

    /// Marks a buffer obtained from [`FastPath::get_tx_buffer_from_isr`] as
    /// filled and handed to the peripheral, recording its length and
    /// turnaround.
    ///
    /// ISR side only.
    pub fn tx_complete_from_isr(&mut self, len: usize, now_us: u32) {
        self.tx_len = len.min(self.tx.len());
        self.complete_tx(now_us, true);
    }

    fn complete_tx(&mut self, now_us: u32, fast_path: bool) {
        if let Some(arrived) = self.rx_arrived_us.take() {
            self.stats.record(now_us.wrapping_sub(arrived), fast_path);
        }
    }

    /// Thread-side drain of whatever the ISR has queued into the RX ring.
    /// Returns the number of bytes copied into `out`.
    pub fn drain_rx(&mut self, out: &mut [u8]) -> usize {
        self.rx.read(out)
    }

    pub fn rx_is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Thread-side counterpart to the ISR TX path: takes and clears the
    /// pending response, if any, recording its turnaround as
    /// thread-mediated rather than fast-path.
    pub fn take_tx(&mut self, now_us: u32) -> Option<&[u8]> {
        if !self.tx_busy {
            return None;
        }
        self.tx_busy = false;
        self.complete_tx(now_us, false);
        Some(&self.tx[..self.tx_len])
    }
}
