//! # Address Space (x86-64, PML4-rooted)
//!
//! Strongly-typed helpers to manipulate a **single** virtual address space,
//! the tree rooted at one PML4 frame. The space does not need to be active:
//! every table is reached through the [`PhysMapper`].
//!
//! ## Design
//!
//! - Missing intermediate tables are allocated zeroed and linked with the
//!   caller's table flags. Leaf flags come from the mapping call.
//! - Existing intermediate entries are widened (`RW`, `US`) when a mapping
//!   needs more permission than the table currently grants.
//! - No TLB maintenance is done here. Callers that change the **active**
//!   space must `invlpg` the affected page.
//! - `&self` methods hand out short-lived table views; callers serialize
//!   concurrent mutation of the same space.

use crate::{FrameAlloc, Level, MapError, PageTableEntry, PageTableView, PhysMapper, alloc_zeroed};
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_HALF_FIRST_ENTRY};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Physical frame of the PML4.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    fn view(&self, frame: PhysicalPage<Size4K>) -> PageTableView<'_> {
        // Safety: `frame` is a table of this space; views never outlive one step.
        unsafe { self.mapper.table(frame) }
    }

    /// Copy every present PML4 entry with index `>= 256` from `source`.
    ///
    /// The referenced PDPTs are shared, not duplicated.
    pub fn share_kernel_half(&self, source: PhysicalPage<Size4K>) {
        let shared: [PageTableEntry; ENTRIES_PER_TABLE - KERNEL_HALF_FIRST_ENTRY] = {
            let src = self.view(source);
            core::array::from_fn(|i| {
                src.entry(KERNEL_HALF_FIRST_ENTRY + i)
                    .filter(|e| e.present())
                    .unwrap_or_default()
            })
        };
        let mut dst = self.view(self.root);
        for (i, e) in shared.into_iter().enumerate() {
            dst.replace(KERNEL_HALF_FIRST_ENTRY + i, e);
        }
    }

    /// Follow (or create) the table behind `table[index]`.
    fn descend<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        table: PhysicalPage<Size4K>,
        level: Level,
        index: usize,
        table_flags: PageTableEntry,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        let mut view = self.view(table);
        let entry = view.entry(index).unwrap_or_default();

        if !entry.present() {
            let child = alloc_zeroed(alloc, self.mapper)
                .ok_or_else(|| MapError::OutOfMemory(level.next().unwrap_or(level)))?;
            view.replace(index, table_flags.with_frame(child));
            return Ok(child);
        }

        if level.is_leaf(entry) {
            return Err(MapError::AlreadyMapped);
        }

        let widened = entry
            .with_writable(entry.writable() || table_flags.writable())
            .with_user_access(entry.user_access() || table_flags.user_access());
        if widened != entry {
            view.replace(index, widened);
        }
        Ok(entry.frame())
    }

    /// Make sure PML4 entry `index` references a table, allocating an empty
    /// PDPT if it does not.
    ///
    /// Used to pre-populate the kernel half before it is shared, so mappings
    /// added below it later are visible in every space.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the PDPT could not be allocated.
    pub fn ensure_top_level<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        index: usize,
        table_flags: PageTableEntry,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        debug_assert!(index < ENTRIES_PER_TABLE, "PML4 index {index} out of range");
        self.descend(alloc, self.root, Level::Pml4, index, table_flags)
    }

    /// Map the 4 KiB page at `va` to `frame`.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if an intermediate table could not be
    ///   allocated. Tables created before the failure stay linked (empty).
    /// - [`MapError::AlreadyMapped`] if the slot is taken.
    pub fn map_one<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        frame: PhysicalPage<Size4K>,
        table_flags: PageTableEntry,
        page_flags: PageTableEntry,
    ) -> Result<(), MapError> {
        debug_assert!(va.is_aligned::<Size4K>(), "unaligned {va:?}");

        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            table = self.descend(alloc, table, level, level.index_of(va), table_flags)?;
        }

        let mut pt = self.view(table);
        let i1 = Level::Pt.index_of(va);
        if pt.entry(i1).is_some_and(|e| e.present()) {
            return Err(MapError::AlreadyMapped);
        }
        pt.replace(i1, page_flags.with_present(true).with_frame(frame));
        Ok(())
    }

    /// Walk to the PT entry of `va` without allocating.
    ///
    /// Returns the PT frame and index, or `None` if an intermediate table is
    /// missing or a large page covers `va`.
    fn find_pte(&self, va: VirtualAddress) -> Option<(PhysicalPage<Size4K>, usize)> {
        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            let e = self.view(table).entry(level.index_of(va))?;
            if !e.present() || level.is_leaf(e) {
                return None;
            }
            table = e.frame();
        }
        Some((table, Level::Pt.index_of(va)))
    }

    /// Clear the 4 KiB mapping at `va` and return the frame it pointed to.
    ///
    /// The frame is **not** freed and empty intermediate tables are kept.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if no 4 KiB page is mapped at `va`.
    pub fn unmap_one(&self, va: VirtualAddress) -> Result<PhysicalPage<Size4K>, MapError> {
        let (pt, i1) = self.find_pte(va).ok_or(MapError::NotMapped)?;
        let mut view = self.view(pt);
        match view.entry(i1) {
            Some(e) if e.present() => {
                view.clear(i1);
                Ok(e.frame())
            }
            _ => Err(MapError::NotMapped),
        }
    }

    /// The leaf entry mapping the 4 KiB page at `va`, if any.
    #[must_use]
    pub fn leaf_4k(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let (pt, i1) = self.find_pte(va)?;
        self.view(pt).entry(i1).filter(|e| e.present())
    }

    /// Translate `va` to a physical address if mapped.
    ///
    /// Handles 1 GiB and 2 MiB leaves by adding the in-page offset.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let mut table = self.root;
        for level in Level::ALL {
            let e = self.view(table).entry(level.index_of(va))?;
            if !e.present() {
                return None;
            }
            if level.is_leaf(e) {
                let in_page = va.as_u64() & ((1u64 << level.shift()) - 1);
                return Some(e.physical_address() + in_page);
            }
            table = e.frame();
        }
        None
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.query(va).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingAlloc, TestPhys};

    fn fresh(phys: &TestPhys, alloc: &CountingAlloc) -> PhysicalPage<Size4K> {
        alloc_zeroed(alloc, phys).unwrap()
    }

    fn map_kernel(
        space: &AddressSpace<'_, TestPhys>,
        alloc: &CountingAlloc,
        va: u64,
        frame: u64,
    ) -> Result<(), MapError> {
        space.map_one(
            alloc,
            VirtualAddress::new(va),
            PhysicalPage::from_number(frame),
            PageTableEntry::KERNEL_TABLE,
            PageTableEntry::KERNEL_DATA,
        )
    }

    #[test]
    fn map_one_4k_creates_tables_and_leaf() {
        let phys = TestPhys::with_frames(64);
        let alloc = CountingAlloc::new(1..64);
        let root = fresh(&phys, &alloc);
        let space = AddressSpace::from_root(&phys, root);

        let va = VirtualAddress::new(0x0000_0000_0070_3000);
        let frame = PhysicalPage::from_number(40);
        space
            .map_one(
                &alloc,
                va,
                frame,
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            )
            .unwrap();

        // PML4 + PDPT + PD + PT
        assert_eq!(alloc.outstanding(), 4);
        let leaf = space.leaf_4k(va).unwrap();
        assert_eq!(leaf.frame(), frame);
        assert!(leaf.user_access() && leaf.no_execute());
        assert_eq!(
            space.query(va + 0x123),
            Some(PhysicalAddress::new(40 * 4096 + 0x123))
        );
    }

    #[test]
    fn second_map_reuses_tables_and_rejects_duplicates() {
        let phys = TestPhys::with_frames(64);
        let alloc = CountingAlloc::new(1..64);
        let space = AddressSpace::from_root(&phys, fresh(&phys, &alloc));

        map_kernel(&space, &alloc, 0x40_0000, 50).unwrap();
        let before = alloc.outstanding();
        map_kernel(&space, &alloc, 0x40_1000, 51).unwrap();
        assert_eq!(alloc.outstanding(), before);

        assert_eq!(
            map_kernel(&space, &alloc, 0x40_0000, 52),
            Err(MapError::AlreadyMapped)
        );
    }

    #[test]
    fn user_mapping_widens_kernel_tables() {
        let phys = TestPhys::with_frames(64);
        let alloc = CountingAlloc::new(1..64);
        let root = fresh(&phys, &alloc);
        let space = AddressSpace::from_root(&phys, root);
        let va = VirtualAddress::new(0x40_0000);

        map_kernel(&space, &alloc, 0x40_0000, 50).unwrap();
        space
            .map_one(
                &alloc,
                va + 4096,
                PhysicalPage::from_number(51),
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            )
            .unwrap();

        let pml4e = unsafe { phys.table(root) }.entry(0).unwrap();
        assert!(pml4e.user_access());
    }

    #[test]
    fn unmap_returns_frame_and_leaves_tables() {
        let phys = TestPhys::with_frames(64);
        let alloc = CountingAlloc::new(1..64);
        let space = AddressSpace::from_root(&phys, fresh(&phys, &alloc));
        let va = VirtualAddress::new(0x7000_0000);
        let frame = PhysicalPage::from_number(33);

        space
            .map_one(
                &alloc,
                va,
                frame,
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            )
            .unwrap();
        assert_eq!(space.unmap_one(va), Ok(frame));
        assert!(!space.is_mapped(va));
        assert_eq!(space.unmap_one(va), Err(MapError::NotMapped));
        assert_eq!(
            space.unmap_one(VirtualAddress::new(0x1_0000_0000)),
            Err(MapError::NotMapped)
        );
    }

    #[test]
    fn oom_reports_level() {
        let phys = TestPhys::with_frames(8);
        // Root plus one table: the PD cannot be allocated.
        let alloc = CountingAlloc::new(1..3);
        let space = AddressSpace::from_root(&phys, fresh(&phys, &alloc));
        assert_eq!(
            map_kernel(&space, &alloc, 0x40_0000, 7),
            Err(MapError::OutOfMemory(Level::Pd))
        );
    }

    #[test]
    fn query_handles_2m_leaf() {
        let phys = TestPhys::with_frames(16);
        let alloc = CountingAlloc::new(1..16);
        let root = fresh(&phys, &alloc);
        let space = AddressSpace::from_root(&phys, root);
        let va = VirtualAddress::new(0x20_0000);

        // Link PML4 → PDPT → PD by mapping a neighbour, then plant a 2 MiB leaf.
        map_kernel(&space, &alloc, 0x40_0000, 9).unwrap();
        let pdpt = unsafe { phys.table(root) }.entry(0).unwrap().frame();
        let pd = unsafe { phys.table(pdpt) }.entry(0).unwrap().frame();
        unsafe { phys.table(pd) }.replace(
            1,
            PageTableEntry::KERNEL_DATA
                .with_large_page(true)
                .with_frame(PhysicalPage::from_number(0x400)),
        );

        assert_eq!(
            space.query(va + 0x1234),
            Some(PhysicalAddress::new(0x40_0000 + 0x1234))
        );
        assert!(space.leaf_4k(va).is_none());
        assert_eq!(
            map_kernel(&space, &alloc, 0x20_0000, 10),
            Err(MapError::AlreadyMapped)
        );
    }

    #[test]
    fn share_kernel_half_copies_upper_entries_only() {
        let phys = TestPhys::with_frames(16);
        let alloc = CountingAlloc::new(1..16);
        let kernel = fresh(&phys, &alloc);
        let shared = PageTableEntry::KERNEL_TABLE.with_frame(PhysicalPage::from_number(12));
        unsafe { phys.table(kernel) }.replace(3, shared);
        unsafe { phys.table(kernel) }.replace(300, shared);

        let child = fresh(&phys, &alloc);
        AddressSpace::from_root(&phys, child).share_kernel_half(kernel);

        let view = unsafe { phys.table(child) };
        assert!(view.entry(3).unwrap().is_unused());
        assert_eq!(view.entry(300), Some(shared));
        assert_eq!(view.used_indices(0..512).count(), 1);
    }

    #[test]
    fn ensure_top_level_is_idempotent() {
        let phys = TestPhys::with_frames(16);
        let alloc = CountingAlloc::new(1..16);
        let root = fresh(&phys, &alloc);
        let space = AddressSpace::from_root(&phys, root);

        let pdpt = space
            .ensure_top_level(&alloc, 510, PageTableEntry::KERNEL_TABLE)
            .unwrap();
        let again = space
            .ensure_top_level(&alloc, 510, PageTableEntry::KERNEL_TABLE)
            .unwrap();
        assert_eq!(pdpt, again);
        assert_eq!(alloc.outstanding(), 2);
        assert_eq!(unsafe { phys.table(root) }.entry(510).unwrap().frame(), pdpt);
    }
}
