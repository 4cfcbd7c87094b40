//! # Virtual Memory Support
//!
//! x86-64 4-level paging primitives used by the tasking-memory code.
//!
//! ## What you get
//! - [`PageTableEntry`] with flag presets for kernel and user tables and pages.
//! - [`PageTable`] and the bounds-checked [`PageTableView`].
//! - [`AddressSpace`]: map, unmap and query single 4 KiB pages under one PML4.
//! - [`teardown`]: depth-first release of a process's private half.
//! - The collaborator traits [`FrameAlloc`] and [`PhysMapper`].
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! Each 48-bit virtual address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses these fields as **indices** into four levels of page tables,
//! each level containing 512 (2⁹) entries of 8 bytes each.
//!
//! ### Leaf vs. non-leaf entries
//!
//! - A **PTE** is always a leaf (maps 4 KiB).
//! - A **PDE** with `PS=1` is a leaf (maps 2 MiB).
//! - A **PDPTE** with `PS=1` is a leaf (maps 1 GiB).
//! - Everything else points to the next lower table.
//!
//! ### Shared kernel half
//!
//! PML4 indices `256..512` are copied by reference into every address space
//! (see [`AddressSpace::share_kernel_half`]), so the tables below them are
//! owned by the kernel and must never be freed with a process.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod entry;
mod error;
mod table;
pub mod teardown;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::address_space::AddressSpace;
pub use crate::entry::PageTableEntry;
pub use crate::error::MapError;
pub use crate::table::{Level, PageTable, PageTableView, split_indices};
pub use crate::teardown::TeardownStats;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames.
///
/// Shared between processors, so both operations take `&self`; implementations
/// synchronize internally. Returned frames **must** be 4 KiB aligned. The
/// allocator does not zero frames.
pub trait FrameAlloc {
    /// Allocate one frame, `None` on exhaustion.
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame previously handed out by [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, frame: PhysicalPage<Size4K>);

    /// Return `count` physically contiguous frames starting at `first`,
    /// e.g. the backing of a large-page leaf.
    fn free_contiguous(&self, first: PhysicalPage<Size4K>, count: u64) {
        for n in 0..count {
            self.free_4k(PhysicalPage::from_number(first.number() + n));
        }
    }
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (identity map or a higher-half direct map).
///
/// The tasking code never dereferences user virtual addresses directly: it
/// resolves them to frames and goes through this mapper, so page contents can
/// be written without the target space being active.
pub trait PhysMapper {
    /// Convert a *physical* address to a mutable reference in the current address space.
    ///
    /// # Safety
    /// - `pa` must be mapped writable for the whole of `T`.
    /// - The mapping must remain valid for `'a`.
    /// - `T` must match the bytes at `pa` and no other reference may alias them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the page table stored in `frame`.
    ///
    /// # Safety
    /// `frame` must hold a page table not otherwise borrowed for `'a`.
    #[inline]
    unsafe fn table<'a>(&self, frame: PhysicalPage<Size4K>) -> PageTableView<'a> {
        PageTableView::new(unsafe { self.phys_to_mut::<PageTable>(frame.base()) })
    }

    /// Borrow the bytes of `frame`.
    ///
    /// # Safety
    /// `frame` must not be otherwise borrowed for `'a`.
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: PhysicalPage<Size4K>) -> &'a mut [u8; 4096] {
        unsafe { self.phys_to_mut::<[u8; 4096]>(frame.base()) }
    }
}

/// Allocate a frame and clear it through `mapper`.
pub fn alloc_zeroed<A: FrameAlloc + ?Sized, M: PhysMapper>(
    alloc: &A,
    mapper: &M,
) -> Option<PhysicalPage<Size4K>> {
    let frame = alloc.alloc_4k()?;
    // Safety: a freshly allocated frame has no other users.
    unsafe { mapper.frame_bytes(frame) }.fill(0);
    Some(frame)
}
