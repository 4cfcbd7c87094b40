//! # Private-Half Teardown
//!
//! Depth-first, free-on-the-way-up release of everything a process owns
//! below its PML4:
//!
//! - zero entries are skipped without decoding,
//! - leaves (PTEs, and PDEs/PDPTEs with `PS=1`) free their data frames,
//! - intermediate tables are freed after their subtree and the parent entry
//!   is cleared,
//! - PML4 indices `256..512` are the shared kernel half and never visited.
//!
//! The PML4 frame itself is left to the caller.

use crate::{FrameAlloc, Level, PhysMapper};
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_HALF_FIRST_ENTRY};
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Frames returned to the allocator by a teardown.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct TeardownStats {
    /// 4 KiB frames that backed mapped memory. A 2 MiB leaf counts 512.
    pub data_frames: u64,
    /// Page-table frames (PDPT, PD, PT) below the root.
    pub table_frames: u64,
}

impl TeardownStats {
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.data_frames + self.table_frames
    }
}

/// Release PML4 entries `0..256` of `root` and everything below them.
///
/// # Safety
/// `root` must be a PML4 whose private half is owned exclusively by the
/// caller and not active on any processor.
pub unsafe fn release_private_half<M, A>(
    mapper: &M,
    alloc: &A,
    root: PhysicalPage<Size4K>,
) -> TeardownStats
where
    M: PhysMapper,
    A: FrameAlloc + ?Sized,
{
    let mut stats = TeardownStats::default();
    unsafe {
        release_table(
            mapper,
            alloc,
            root,
            Level::Pml4,
            KERNEL_HALF_FIRST_ENTRY,
            &mut stats,
        );
    }
    log::trace!(
        target: "tasking",
        "released private half of {root}: {} data, {} table frames",
        stats.data_frames,
        stats.table_frames
    );
    stats
}

unsafe fn release_table<M, A>(
    mapper: &M,
    alloc: &A,
    table: PhysicalPage<Size4K>,
    level: Level,
    end: usize,
    stats: &mut TeardownStats,
) where
    M: PhysMapper,
    A: FrameAlloc + ?Sized,
{
    let mut view = unsafe { mapper.table(table) };
    for index in 0..end {
        let Some(entry) = view.entry(index) else {
            break;
        };
        if entry.is_unused() {
            continue;
        }
        if entry.present() {
            if level.is_leaf(entry) {
                let frames = level.frames_per_leaf();
                alloc.free_contiguous(entry.frame(), frames);
                stats.data_frames += frames;
            } else if let Some(child_level) = level.next() {
                unsafe {
                    release_table(
                        mapper,
                        alloc,
                        entry.frame(),
                        child_level,
                        ENTRIES_PER_TABLE,
                        stats,
                    );
                }
                alloc.free_4k(entry.frame());
                stats.table_frames += 1;
            }
        }
        view.clear(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingAlloc, TestPhys};
    use crate::{AddressSpace, PageTableEntry, alloc_zeroed};
    use kernel_memory_addresses::VirtualAddress;

    fn map_user(space: &AddressSpace<'_, TestPhys>, alloc: &CountingAlloc, va: u64) {
        let frame = alloc.alloc_4k().unwrap();
        space
            .map_one(
                alloc,
                VirtualAddress::new(va),
                frame,
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            )
            .unwrap();
    }

    #[test]
    fn frees_every_private_frame_exactly_once() {
        let phys = TestPhys::with_frames(128);
        let alloc = CountingAlloc::new(1..128);
        let root = alloc_zeroed(&alloc, &phys).unwrap();
        let space = AddressSpace::from_root(&phys, root);

        map_user(&space, &alloc, 0x40_0000);
        map_user(&space, &alloc, 0x40_1000);
        map_user(&space, &alloc, 0x5F_F000);
        map_user(&space, &alloc, 0x0000_6000_0000_0000);

        let stats = unsafe { release_private_half(&phys, &alloc, root) };
        assert_eq!(stats.data_frames, 4);
        // Two PDPT, two PD, two PT: the stack-pool address lives in another PML4 slot.
        assert_eq!(stats.table_frames, 6);
        assert_eq!(alloc.outstanding(), 1, "only the root remains");
        assert!(unsafe { phys.table(root) }.used_indices(0..512).next().is_none());
    }

    #[test]
    fn kernel_half_is_untouched() {
        let phys = TestPhys::with_frames(32);
        let alloc = CountingAlloc::new(1..32);
        let root = alloc_zeroed(&alloc, &phys).unwrap();
        let shared = PageTableEntry::KERNEL_TABLE.with_frame(PhysicalPage::from_number(31));
        unsafe { phys.table(root) }.replace(511, shared);

        let stats = unsafe { release_private_half(&phys, &alloc, root) };
        assert_eq!(stats, TeardownStats::default());
        assert_eq!(unsafe { phys.table(root) }.entry(511), Some(shared));
    }

    #[test]
    fn large_pd_leaf_frees_its_frames() {
        let phys = TestPhys::with_frames(16);
        // Frames 1..8 for tables, 512..1024 stand in for one 2 MiB page.
        let alloc = CountingAlloc::new(1..8);
        let root = alloc_zeroed(&alloc, &phys).unwrap();
        let space = AddressSpace::from_root(&phys, root);
        map_user(&space, &alloc, 0x40_0000);

        let large = CountingAlloc::new(512..1024);
        for _ in 0..512 {
            large.alloc_4k().unwrap();
        }

        let pdpt = unsafe { phys.table(root) }.entry(0).unwrap().frame();
        let pd = unsafe { phys.table(pdpt) }.entry(0).unwrap().frame();
        unsafe { phys.table(pd) }.replace(
            1,
            PageTableEntry::USER_DATA
                .with_large_page(true)
                .with_frame(PhysicalPage::from_number(512)),
        );

        struct Split<'a>(&'a CountingAlloc, &'a CountingAlloc);
        impl FrameAlloc for Split<'_> {
            fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
                self.0.alloc_4k()
            }
            fn free_4k(&self, frame: PhysicalPage<Size4K>) {
                if frame.number() >= 512 {
                    self.1.free_4k(frame);
                } else {
                    self.0.free_4k(frame);
                }
            }
        }

        let stats = unsafe { release_private_half(&phys, &Split(&alloc, &large), root) };
        assert_eq!(stats.data_frames, 1 + 512);
        assert_eq!(stats.table_frames, 3);
        assert_eq!(large.outstanding(), 0);
        assert_eq!(alloc.outstanding(), 1);
    }
}
