//! # Page Table Entry
//!
//! One 64-bit entry layout shared by all four levels. The meaning of `PS`
//! depends on the level, see [`Level`](crate::Level).

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Raw x86-64 page table entry (PML4E, PDPTE, PDE or PTE).
///
/// ### Bit layout
///
/// | Bits  | Name  | Meaning |
/// |-------|-------|---------|
/// | 0     | `P`   | Valid entry if set |
/// | 1     | `RW`  | Writable if set |
/// | 2     | `US`  | User-mode accessible if set |
/// | 3     | `PWT` | Write-through caching |
/// | 4     | `PCD` | Disable caching |
/// | 5     | `A`   | Accessed |
/// | 6     | `D`   | Dirty (leaf only) |
/// | 7     | `PS`  | Large page in PDPTE/PDE; PAT in a PTE |
/// | 8     | `G`   | Global (leaf only) |
/// | 9–11  |       | OS available |
/// | 12–51 |       | Physical frame bits [51:12] |
/// | 52–62 |       | OS available / protection key |
/// | 63    | `NX`  | Execute disable |
///
/// Non-leaf entries use the same layout; the permissions along a walk are
/// intersected, so a user mapping needs `US` on every level.
///
/// ```rust
/// # use kernel_vmem::PageTableEntry;
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_number(0x42);
/// let e = PageTableEntry::USER_DATA.with_frame(frame);
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.frame(), frame);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a PDPTE or PDE a set bit makes the entry a 1 GiB or 2 MiB leaf.
    /// Must be clear in a PML4E.
    pub large_page: bool,

    /// Global (G, bit 8). Survives CR3 reloads when CR4.PGE is set.
    pub global_translation: bool,

    #[bits(3)]
    pub os_available_low: u8,

    /// Physical frame number, bits [51:12].
    #[bits(40)]
    frame_number: u64,

    #[bits(11)]
    pub os_available_high: u16,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Flags for intermediate tables covering kernel memory.
    pub const KERNEL_TABLE: Self = Self::new().with_present(true).with_writable(true);

    /// Flags for intermediate tables covering user memory.
    pub const USER_TABLE: Self = Self::KERNEL_TABLE.with_user_access(true);

    /// Leaf flags for kernel data pages (stacks, TLS, heap).
    pub const KERNEL_DATA: Self = Self::new()
        .with_present(true)
        .with_writable(true)
        .with_no_execute(true);

    /// Leaf flags for user data pages.
    pub const USER_DATA: Self = Self::KERNEL_DATA.with_user_access(true);

    /// Whether all 64 bits are zero. Zero entries are skipped without decoding.
    #[inline]
    #[must_use]
    pub const fn is_unused(self) -> bool {
        self.into_bits() == 0
    }

    /// The 4 KiB frame this entry references.
    ///
    /// For a large leaf this is the first frame of the large page.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base()
    }

    /// Same flags, pointing at `frame`.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage<Size4K>) -> Self {
        self.with_frame_number(frame.number())
    }

    /// Drop every bit except the permission and caching flags.
    ///
    /// Useful to compare an installed entry against one of the presets.
    #[inline]
    #[must_use]
    pub const fn permissions(self) -> Self {
        Self::new()
            .with_present(self.present())
            .with_writable(self.writable())
            .with_user_access(self.user_access())
            .with_write_through(self.write_through())
            .with_cache_disabled(self.cache_disabled())
            .with_no_execute(self.no_execute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_bits() {
        let frame = PhysicalPage::<Size4K>::containing_address(PhysicalAddress::new(0x000F_FFFF_F000));
        let e = PageTableEntry::KERNEL_TABLE.with_frame(frame);
        assert_eq!(e.frame(), frame);
        assert_eq!(e.into_bits() & 0xFFF, 0b11);
    }

    #[test]
    fn presets() {
        assert!(!PageTableEntry::KERNEL_TABLE.user_access());
        assert!(PageTableEntry::USER_TABLE.user_access());
        assert!(PageTableEntry::USER_DATA.no_execute());
        assert_eq!(PageTableEntry::USER_DATA.into_bits(), (1 << 63) | 0b111);
    }

    #[test]
    fn permissions_ignore_hardware_bits() {
        let e = PageTableEntry::USER_DATA
            .with_frame(PhysicalPage::from_number(7))
            .with_accessed(true)
            .with_dirty(true);
        assert_eq!(e.permissions(), PageTableEntry::USER_DATA);
    }

    #[test]
    fn zero_is_unused() {
        assert!(PageTableEntry::new().is_unused());
        assert!(!PageTableEntry::new().with_accessed(true).is_unused());
    }
}
