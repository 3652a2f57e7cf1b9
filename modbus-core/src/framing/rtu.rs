// SPDX-License-Identifier: BSD-3-Clause

//! RTU framing: binary ADU + CRC-16 + silent-gap timing (§4.9, §6).
//!
//! `unit | function | payload | crc_lo | crc_hi`, CRC polynomial `0xA001`,
//! initial value `0xFFFF`, byte-wise LSB-first, transmitted low byte first.
//!
//! Timing note (§9 Open Question): `transport.now_ms()` (§4.7) is
//! millisecond-resolution, but T1.5/T3.5 at higher baud rates are
//! sub-millisecond. This implementation clamps both thresholds to a minimum
//! of 1 ms of observed silence — on platforms whose clock cannot resolve
//! the literal 750 µs/1750 µs values, that is the best available
//! approximation, and is why the decoder only attempts a parse once an
//! entire millisecond of silence has elapsed rather than the literal
//! fractional-millisecond boundary.

use crate::framing::DecodedFrame;
use crate::ring::Ring;
use crate::status::ErrorKind;

/// Modbus CRC-16 (polynomial `0xA001`, initial value `0xFFFF`).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn crc_ok(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let body = &frame[..frame.len() - 2];
    let expected = crc16(body);
    let actual = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    expected == actual
}

/// Encodes `unit | function | payload | crc_lo | crc_hi` into `out`.
pub fn build_frame(out: &mut [u8], unit: u8, function: u8, payload: &[u8]) -> core::result::Result<usize, ErrorKind> {
    let total = 2 + payload.len() + 2;
    if out.len() < total {
        return Err(ErrorKind::InvalidArgument);
    }
    out[0] = unit;
    out[1] = function;
    out[2..2 + payload.len()].copy_from_slice(payload);
    let crc = crc16(&out[..2 + payload.len()]);
    let crc_bytes = crc.to_le_bytes();
    out[2 + payload.len()] = crc_bytes[0];
    out[2 + payload.len() + 1] = crc_bytes[1];
    Ok(total)
}

/// T1.5/T3.5 derived from baud, per §4.9.
#[derive(Copy, Clone, Debug)]
pub struct Timing {
    pub t1_5_ms: u64,
    pub t3_5_ms: u64,
}

impl Timing {
    /// `t1_5_multiplier`/`t3_5_multiplier` scale the computed thresholds
    /// (tenths of a percent, e.g. `1000` = 1.0x); they exist because the
    /// exact tuning is platform-sensitive (§9).
    pub fn for_baud(baud: u32, t1_5_multiplier_permille: u32, t3_5_multiplier_permille: u32) -> Self {
        let (t1_5_us, t3_5_us) = if baud <= 19_200 && baud > 0 {
            let char_us = 11_000_000u64 / baud as u64;
            (char_us * 3 / 2, char_us * 7 / 2)
        } else {
            (750u64, 1750u64)
        };
        let t1_5_us = t1_5_us * t1_5_multiplier_permille as u64 / 1000;
        let t3_5_us = t3_5_us * t3_5_multiplier_permille as u64 / 1000;
        Self {
            t1_5_ms: ms_ceil_clamped(t1_5_us),
            t3_5_ms: ms_ceil_clamped(t3_5_us),
        }
    }
}

fn ms_ceil_clamped(us: u64) -> u64 {
    let ms = (us + 999) / 1000;
    if ms == 0 {
        1
    } else {
        ms
    }
}

/// A small fixed-depth ring of recently-accepted `(unit, function, hash)`
/// tuples, used to drop reflected duplicate frames on noisy half-duplex
/// buses (§4.9). Depth is a tunable, not a hardcoded constant (§9).
pub struct DuplicateFilter<'s> {
    entries: &'s mut [Option<(u8, u8, u32, u64)>],
    next: usize,
    window_ms: u64,
    pub duplicates_found: u64,
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl<'s> DuplicateFilter<'s> {
    pub fn new(entries: &'s mut [Option<(u8, u8, u32, u64)>], window_ms: u64) -> Self {
        for e in entries.iter_mut() {
            *e = None;
        }
        Self { entries, next: 0, window_ms, duplicates_found: 0 }
    }

    /// Checks `(unit, function, payload)` against the recent-frame window;
    /// if it is not a duplicate, records it and returns `false` (not a
    /// duplicate). If it is, increments `duplicates_found` and returns
    /// `true` without re-recording it (the timestamp of the *first*
    /// sighting anchors the window).
    pub fn check_and_record(&mut self, unit: u8, function: u8, payload: &[u8], now_ms: u64) -> bool {
        let hash = fnv1a(payload);
        for e in self.entries.iter().flatten() {
            let (u, f, h, ts) = *e;
            if u == unit && f == function && h == hash && now_ms.saturating_sub(ts) <= self.window_ms {
                self.duplicates_found += 1;
                return true;
            }
        }
        let depth = self.entries.len();
        self.entries[self.next] = Some((unit, function, hash, now_ms));
        self.next = (self.next + 1) % depth;
        false
    }
}

/// The RTU link's shared receive/transmit timing state: byte accumulation,
/// silent-gap detection, CRC validation, resync, and duplicate filtering.
pub struct RtuFraming<'s> {
    rx: Ring<'s>,
    timing: Timing,
    last_activity_ms: u64,
    have_activity: bool,
    pub frames_recovered: u64,
    pub framing_errors: u64,
    dedup: DuplicateFilter<'s>,
}

/// Outcome of one [`RtuFraming::try_take_frame`] attempt.
pub enum TakeResult<'a> {
    /// Not enough silence has elapsed yet, or no bytes are queued.
    NotReady,
    /// A frame was accepted and is ready for dispatch.
    Frame(DecodedFrame<'a>),
    /// A frame was accepted but is a duplicate of one seen within the
    /// configured window; already dropped, not delivered upstream.
    Duplicate,
    /// The buffered bytes did not form a valid frame at any offset; they
    /// have been discarded.
    Garbage,
}

impl<'s> RtuFraming<'s> {
    pub fn new(rx_storage: &'s mut [u8], dedup_storage: &'s mut [Option<(u8, u8, u32, u64)>], timing: Timing, dedup_window_ms: u64) -> core::result::Result<Self, ErrorKind> {
        let rx = Ring::new(rx_storage).map_err(|_| ErrorKind::InvalidArgument)?;
        Ok(Self {
            rx,
            timing,
            last_activity_ms: 0,
            have_activity: false,
            frames_recovered: 0,
            framing_errors: 0,
            dedup: DuplicateFilter::new(dedup_storage, dedup_window_ms),
        })
    }

    /// Feeds bytes just read from the transport into the RX accumulator,
    /// refreshing the silence clock.
    pub fn ingest(&mut self, bytes: &[u8], now_ms: u64) {
        if bytes.is_empty() {
            return;
        }
        self.rx.write(bytes);
        self.last_activity_ms = now_ms;
        self.have_activity = true;
    }

    fn quiet_ms(&self, now_ms: u64) -> u64 {
        if !self.have_activity {
            return u64::MAX;
        }
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// `true` once T3.5 has elapsed since the last received byte — the
    /// RTU frame boundary, and also this engine's gate for transmitting
    /// (half-duplex turnaround; §4.9 "Emission").
    pub fn boundary_elapsed(&self, now_ms: u64) -> bool {
        self.quiet_ms(now_ms) >= self.timing.t3_5_ms
    }

    /// Attempts to parse a complete frame out of the RX ring. Only makes
    /// sense to call once [`Self::boundary_elapsed`] is true; the caller
    /// (the framing-agnostic client/server polling loop) is expected to
    /// check that first.
    pub fn try_take_frame<'a>(&mut self, scratch: &'a mut [u8], now_ms: u64) -> TakeResult<'a> {
        let avail = self.rx.size();
        if avail == 0 {
            return TakeResult::NotReady;
        }
        if !self.boundary_elapsed(now_ms) {
            return TakeResult::NotReady;
        }
        let n = avail.min(scratch.len());
        let consumed = self.rx.read(&mut scratch[..n]);
        debug_assert_eq!(consumed, n);

        if n >= 4 {
            for start in 0..=(n - 4) {
                if crc_ok(&scratch[start..n]) {
                    if start > 0 {
                        self.frames_recovered += 1;
                    }
                    let unit = scratch[start];
                    let function = scratch[start + 1];
                    let payload_end = n - 2;
                    // Re-borrow immutably at the final offsets to hand back
                    // a view with the right lifetime.
                    let dup = self.dedup.check_and_record(unit, function, &scratch[start + 2..payload_end], now_ms);
                    return if dup {
                        TakeResult::Duplicate
                    } else {
                        TakeResult::Frame(DecodedFrame { unit_id: unit, pdu: &scratch[start + 1..payload_end] })
                    };
                }
            }
        }
        self.framing_errors += 1;
        TakeResult::Garbage
    }

    pub fn rx_free(&self) -> usize {
        self.rx.free()
    }
}
