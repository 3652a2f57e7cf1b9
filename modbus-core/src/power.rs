// SPDX-License-Identifier: BSD-3-Clause

//! Power/idle integration (§4.16): lets a caller running a cooperative
//! scheduler or a low-power loop know how long it can safely sleep before
//! this engine next needs `poll()` called again, and gives it a place to
//! hook an idle callback.

/// The engine's view of "how long until I next need attention", computed
/// from whichever of the client's transaction deadlines, the server's
/// response deadlines, or a framing layer's silence-gap boundary is
/// soonest. `None` means no pending deadline is known.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NextEvent {
    at_ms: Option<u64>,
}

impl NextEvent {
    pub const fn none() -> Self {
        Self { at_ms: None }
    }

    pub const fn at(at_ms: u64) -> Self {
        Self { at_ms: Some(at_ms) }
    }

    /// Combines two deadlines, keeping the sooner (ignoring `None`s).
    pub fn earliest(self, other: Self) -> Self {
        match (self.at_ms, other.at_ms) {
            (Some(a), Some(b)) => Self::at(a.min(b)),
            (Some(a), None) => Self::at(a),
            (None, Some(b)) => Self::at(b),
            (None, None) => Self::none(),
        }
    }

    /// Milliseconds from `now_ms` until this deadline: `0` if already due
    /// or past, `None` if there is no pending deadline at all.
    pub fn time_until(self, now_ms: u64) -> Option<u64> {
        self.at_ms.map(|at| at.saturating_sub(now_ms))
    }
}

/// Receives one callback per `poll` when nothing was immediately
/// actionable. An external collaborator (spec.md §1) — a concrete hook on
/// a microcontroller might drop into a WFI/sleep mode for up to
/// `budget_ms`; on a host, it might simply be unused.
pub trait IdleHook {
    fn on_idle(&mut self, budget_ms: Option<u64>);
}

/// The default hook when a caller doesn't wire one up.
pub struct NullIdleHook;

impl IdleHook for NullIdleHook {
    fn on_idle(&mut self, _budget_ms: Option<u64>) {}
}
