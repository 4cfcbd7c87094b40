//! # Kernel Configuration
//!
//! This crate is the single source of truth for the memory-layout constants
//! shared by the paging, allocation and tasking-memory crates.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Process-private half          │ PML4[0..256]
//!                       │   (image, heap, stacks, TLS)    │
//! USERSPACE_END         ├─────────────────────────────────┤ 0x0000_8000_0000_0000
//!                       │   Non-canonical hole            │
//! KERNEL_SPACE_START    ├─────────────────────────────────┤ 0xffff_8000_0000_0000
//!                       │   Kernel-shared half            │ PML4[256..512]
//!                       │   (HHDM, kernel stacks, image)  │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! The upper half of every process's PML4 is copied **by reference** from the
//! kernel's table when the process is created, so kernel mappings made below
//! those shared entries are visible in every address space.
//!
//! All constants are `const` and validated with compile-time assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
