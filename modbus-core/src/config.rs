// SPDX-License-Identifier: BSD-3-Clause

//! Engine-wide configuration (§6): every tunable the framing, client,
//! server, and diagnostics layers read. [`Config::tiny`] and
//! [`Config::full`] bracket the deeply-embedded and full-featured-host ends
//! of the range this engine targets; most callers start from one of those
//! and override individual fields.

use crate::framing::FramingKind;

/// Retry/backoff policy for a client transaction that times out (§4.12).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total send attempts, including the first; `0` and `1` both mean "no
    /// retries".
    pub max_attempts: u8,
    pub backoff_initial_ms: u32,
    pub backoff_max_ms: u32,
}

impl RetryConfig {
    /// Exponential backoff (doubling), clamped to `backoff_max_ms`.
    /// `attempt` is 0-based (the delay before the *second* attempt is
    /// `backoff_for_attempt(0)`).
    pub const fn backoff_for_attempt(&self, attempt: u8) -> u32 {
        let mut ms = self.backoff_initial_ms;
        let mut i = 0;
        while i < attempt {
            if ms >= self.backoff_max_ms {
                return self.backoff_max_ms;
            }
            ms = if ms > self.backoff_max_ms / 2 { self.backoff_max_ms } else { ms * 2 };
            i += 1;
        }
        if ms > self.backoff_max_ms {
            self.backoff_max_ms
        } else {
            ms
        }
    }
}

/// RTU link tunables (§4.9, §9).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RtuConfig {
    pub baud: u32,
    /// Scales the computed T1.5 threshold; `1000` = 1.0x (§9).
    pub t1_5_multiplier_permille: u32,
    /// Scales the computed T3.5 threshold; `1000` = 1.0x (§9).
    pub t3_5_multiplier_permille: u32,
    /// Depth of the recent-frame window used to drop reflected duplicates
    /// on half-duplex buses; exposed rather than hardcoded (§9).
    pub dup_filter_depth: usize,
    pub dup_filter_window_ms: u64,
}

/// ASCII link tunables (§4.10).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AsciiConfig {
    pub inter_char_timeout_ms: u64,
}

/// A per-function-code timeout override; function codes not listed fall
/// back to [`Config::default_timeout_ms`] (§4.12).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FcTimeout {
    pub function: u8,
    pub timeout_ms: u64,
}

/// Top-level engine configuration. Carries a lifetime because per-FC
/// timeout overrides are a caller-owned slice rather than an allocated
/// map.
#[derive(Copy, Clone, Debug)]
pub struct Config<'a> {
    pub framing: FramingKind,
    pub rtu: RtuConfig,
    pub ascii: AsciiConfig,
    pub retry: RetryConfig,
    /// Deadline for a transaction with no more specific [`FcTimeout`] entry.
    pub default_timeout_ms: u64,
    pub per_fc_timeouts: &'a [FcTimeout],
    /// If `true`, a high-priority submission preempts the head of the
    /// normal-priority queue on the next `poll` rather than waiting for it
    /// to drain naturally (§4.12).
    pub high_priority_preempts: bool,
    /// Depth of the client's transaction pool / pending-request queue and
    /// the server's in-flight-request queue, shared across both since both
    /// bound the same conceptual resource (§4.5).
    pub max_in_flight: usize,
}

impl<'a> Config<'a> {
    /// Looks up the effective timeout for `function`, falling back to
    /// [`Self::default_timeout_ms`].
    pub fn timeout_for(&self, function: u8) -> u64 {
        self.per_fc_timeouts
            .iter()
            .find(|t| t.function == function)
            .map(|t| t.timeout_ms)
            .unwrap_or(self.default_timeout_ms)
    }

    /// A minimal-footprint preset: RTU at 9600 baud, one in-flight
    /// transaction, no retries, conservative timeouts — the shape a
    /// deeply-embedded single-master link needs and nothing more.
    pub const fn tiny() -> Self {
        Self {
            framing: FramingKind::Rtu,
            rtu: RtuConfig {
                baud: 9600,
                t1_5_multiplier_permille: 1000,
                t3_5_multiplier_permille: 1000,
                dup_filter_depth: 2,
                dup_filter_window_ms: 500,
            },
            ascii: AsciiConfig { inter_char_timeout_ms: 1000 },
            retry: RetryConfig { max_attempts: 1, backoff_initial_ms: 50, backoff_max_ms: 200 },
            default_timeout_ms: 1000,
            per_fc_timeouts: &[],
            high_priority_preempts: false,
            max_in_flight: 1,
        }
    }

    /// A full-featured host preset: TCP framing, several in-flight
    /// transactions, retries with backoff, and priority preemption.
    pub const fn full() -> Self {
        Self {
            framing: FramingKind::Tcp,
            rtu: RtuConfig {
                baud: 19200,
                t1_5_multiplier_permille: 1000,
                t3_5_multiplier_permille: 1000,
                dup_filter_depth: 4,
                dup_filter_window_ms: 1000,
            },
            ascii: AsciiConfig { inter_char_timeout_ms: 1000 },
            retry: RetryConfig { max_attempts: 3, backoff_initial_ms: 100, backoff_max_ms: 2000 },
            default_timeout_ms: 3000,
            per_fc_timeouts: &[],
            high_priority_preempts: true,
            max_in_flight: 16,
        }
    }
}
