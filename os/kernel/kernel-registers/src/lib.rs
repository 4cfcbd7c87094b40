//! # Typed `X86_64` Registers
//!
//! The registers the tasking-memory code touches, modelled with
//! [`bitfield_struct`]:
//!
//! - [`Cr2`](cr2::Cr2): faulting linear address of the last page fault.
//! - [`Cr3`](cr3::Cr3): physical base of the active PML4.
//! - [`Cr4`](cr4::Cr4): only consulted for `OSFXSR`.
//! - [`Rflags`](rflags::Rflags): interrupt-enable flag.
//!
//! Privileged access is behind the `asm` feature and only compiled for
//! `x86_64` targets.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr2;
pub mod cr3;
pub mod cr4;
pub mod rflags;
pub mod instructions;

pub use cr2::Cr2;
pub use cr3::Cr3;
pub use cr4::Cr4;
pub use rflags::Rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
