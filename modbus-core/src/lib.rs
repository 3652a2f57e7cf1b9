// SPDX-License-Identifier: BSD-3-Clause

//! A portable Modbus protocol engine core (§1): PDU codec, RTU/ASCII/TCP
//! framing, non-blocking client and server state machines, lock-free
//! queues, and an ISR-safe fast path, all built on caller-owned memory so
//! the same crate runs on a deeply-embedded microcontroller with no
//! allocator and on a POSIX/Windows host behind a thread-driven loop.
//!
//! Every layer follows the same rule: nothing here calls into an
//! allocator, a mutex, a clock, or a byte stream directly. Storage is
//! passed in by the caller (stack arrays, `static` link sections,
//! `heapless` collections); time and I/O are reached only through the
//! [`transport::Transport`] trait. What runs the event loop — an RTOS
//! task, a bare `for(;;)`, or a host thread polling a socket — is this
//! crate's one external collaborator.
#![cfg_attr(not(feature = "std"), no_std)]

pub mod client;
pub mod config;
pub mod diag;
pub mod framing;
pub mod fsm;
pub mod iovec;
pub mod isr;
pub mod mpsc;
pub mod pdu;
pub mod pool;
pub mod power;
pub mod ring;
pub mod server;
pub mod spsc;
pub mod status;
pub mod transport;

pub use client::{Client, LinkFraming, Priority, TransactionHandle};
pub use config::Config;
pub use diag::Diagnostics;
pub use isr::{FastPath, IsrContext};
pub use pdu::PDU_MAX;
pub use server::Server;
pub use status::{ErrorKind, ExceptionCode, Status};
pub use transport::Transport;
