//! # Kernel Memory Allocation
//!
//! Reference implementations of the collaborators the tasking-memory code is
//! written against:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Virtual Range Pools (range_pool)         │
//! │    • kernel stacks, user stacks, TLS blocks         │
//! │    • first-fit over page-granular reservations      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ mapped through kernel-vmem with
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper (phys_mapper)          │
//! │    • HHDM (Higher Half Direct Mapping)              │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator (frame_alloc)    │
//! │    • 4 KiB frames, bitmap tracking, no heap         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Both allocators take `&self` and lock internally with
//! [`kernel_sync::SpinLock`], so they can be shared between processors.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_mapper;
pub mod range_pool;

pub use frame_alloc::BitmapFrameAlloc;
pub use phys_mapper::HhdmPhysMapper;
pub use range_pool::{AddressRangePool, RangePoolError};
