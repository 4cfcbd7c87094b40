//! # Page Tables and Levels

use crate::PageTableEntry;
use core::fmt;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::VirtualAddress;

/// One of the four x86-64 paging levels.
///
/// ```text
///  PML4  →  PDPT  →  PD  →  PT  →  4 KiB page
///                     │
///                     └──(PS=1)──→ 2 MiB page
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// L4, VA bits `[47:39]`.
    Pml4,
    /// L3, VA bits `[38:30]`.
    Pdpt,
    /// L2, VA bits `[29:21]`.
    Pd,
    /// L1, VA bits `[20:12]`.
    Pt,
}

impl Level {
    /// Levels in walk order.
    pub const ALL: [Self; 4] = [Self::Pml4, Self::Pdpt, Self::Pd, Self::Pt];

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    /// Index of `va` in a table of this level, in `0..512`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1FF) as usize
    }

    /// The level an entry of this level points to, `None` for PT.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Whether `entry` at this level maps memory instead of pointing at a table.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self, entry: PageTableEntry) -> bool {
        match self {
            Self::Pml4 => false,
            Self::Pdpt | Self::Pd => entry.large_page(),
            Self::Pt => true,
        }
    }

    /// Number of 4 KiB frames covered by a leaf at this level.
    #[inline]
    #[must_use]
    pub const fn frames_per_leaf(self) -> u64 {
        1 << (self.shift() - 12)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        })
    }
}

/// Split `va` into its four table indices (L4, L3, L2, L1).
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (usize, usize, usize, usize) {
    (
        Level::Pml4.index_of(va),
        Level::Pdpt.index_of(va),
        Level::Pd.index_of(va),
        Level::Pt.index_of(va),
    )
}

/// A 4 KiB-aligned array of 512 entries; the in-memory form of every level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    #[cfg(test)]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::new(); ENTRIES_PER_TABLE],
        }
    }
}

/// Bounds-checked access to one mapped [`PageTable`].
///
/// Every accessor takes a plain `usize` and returns `None` for indices
/// `>= 512` instead of indexing out of the frame.
pub struct PageTableView<'a> {
    table: &'a mut PageTable,
}

impl<'a> PageTableView<'a> {
    #[inline]
    pub const fn new(table: &'a mut PageTable) -> Self {
        Self { table }
    }

    /// Entry at `index`, `None` if out of range.
    #[inline]
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<PageTableEntry> {
        self.table.entries.get(index).copied()
    }

    /// Overwrite the entry at `index`, returning the previous value.
    /// `None` (and no write) if out of range.
    #[inline]
    pub fn replace(&mut self, index: usize, entry: PageTableEntry) -> Option<PageTableEntry> {
        self.table
            .entries
            .get_mut(index)
            .map(|slot| core::mem::replace(slot, entry))
    }

    /// Zero the entry at `index`.
    #[inline]
    pub fn clear(&mut self, index: usize) -> Option<PageTableEntry> {
        self.replace(index, PageTableEntry::new())
    }

    /// Indices of all non-zero entries in `range`.
    pub fn used_indices(
        &self,
        range: core::ops::Range<usize>,
    ) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        let end = range.end.min(ENTRIES_PER_TABLE);
        let start = range.start.min(end);
        self.table.entries[start..end]
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_unused())
            .map(move |(i, e)| (start + i, *e))
    }
}
