//! # Kernel synchronization primitives
//!
//! - [`SpinLock`]: test-and-test-and-set lock with an RAII guard, used for
//!   the frame allocator, range pools and per-process heap state.
//! - [`IrqGuard`]: masks interrupts on the executing processor for its
//!   lifetime and restores the previous state on drop. The actual `cli`/`sti`
//!   is supplied by an [`InterruptControl`] implementation so the guard can be
//!   exercised on the host.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
