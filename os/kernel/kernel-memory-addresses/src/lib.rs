//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses, page bases and page ranges used
//! by the paging and tasking-memory code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Page-table translated memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Physical RAM (page frames). |
//! | [`VirtualRange`] | A half-open, page-aligned range `[start, end)` of virtual pages. |
//!
//! Page sizes are marker types implementing [`PageSize`]; [`Size4K`] is the
//! only granularity the tasking code maps.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0070_1800);
//! let page = va.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0x0070_1000);
//!
//! let range = VirtualRange::from_pages(VirtualAddress::new(0x0070_0000), 4);
//! assert_eq!(range.end().as_u64(), 0x0070_4000);
//! assert!(range.contains(va));
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u64` and `Copy`.
//! - Alignment math is `const fn`; arithmetic that can leave the address
//!   space is offered in `checked_*` form.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;
mod virtual_range;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;
pub use virtual_range::{PageIter, VirtualRange};

/// Number of `S`-sized pages needed to hold `bytes` bytes (rounded up).
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// assert_eq!(pages_for::<Size4K>(0), 0);
/// assert_eq!(pages_for::<Size4K>(1), 1);
/// assert_eq!(pages_for::<Size4K>(4096), 1);
/// assert_eq!(pages_for::<Size4K>(5000), 2);
/// ```
#[inline]
#[must_use]
pub const fn pages_for<S: PageSize>(bytes: u64) -> u64 {
    bytes.div_ceil(S::SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_offset_4k() {
        let va = VirtualAddress::new(0x1234_5678_9ABC_DEF0);
        assert_eq!(va.page::<Size4K>().base().as_u64(), 0x1234_5678_9ABC_D000);
        assert_eq!(va.offset::<Size4K>(), 0xEF0);
    }

    #[test]
    fn alignment_helpers() {
        let va = VirtualAddress::new(0x12345);
        assert_eq!(va.align_down::<Size4K>().as_u64(), 0x12000);
        assert_eq!(va.align_up::<Size4K>().as_u64(), 0x13000);
        assert!(!va.is_aligned::<Size4K>());
        assert!(va.align_down::<Size4K>().is_aligned::<Size4K>());
    }

    #[test]
    fn pages_needed_rounds_up() {
        assert_eq!(pages_for::<Size4K>(4097), 2);
        assert_eq!(pages_for::<Size4K>(8192), 2);
    }
}
