use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the physical frame of the PML4 table and cache-control flags for
/// PML4 walks. Assumes CR4.PCIDE = 0.
///
/// ```rust
/// # use kernel_registers::Cr3;
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::containing_address(PhysicalAddress::new(0x0012_3000));
/// let cr3 = Cr3::from_pml4(frame);
/// assert_eq!(cr3.pml4(), frame);
/// assert_eq!(cr3.into_bits(), 0x0012_3000);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    #[bits(3)]
    __: u8,

    /// Bit 3: PWT: Page-level Write-Through for PML4 accesses.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for PML4 accesses.
    pub pcd: bool,

    #[bits(7)]
    __: u8,

    /// Bits 12–51: PML4 frame number.
    #[bits(40)]
    pml4_frame: u64,

    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value selecting `pml4` with write-back caching.
    #[inline]
    #[must_use]
    pub const fn from_pml4(pml4: PhysicalPage<Size4K>) -> Self {
        Self::new().with_pml4_frame(pml4.number())
    }

    /// The PML4 frame this value points at.
    #[inline]
    #[must_use]
    pub const fn pml4(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.pml4_frame())
    }

    #[inline]
    #[must_use]
    pub const fn pml4_phys(&self) -> PhysicalAddress {
        self.pml4().base()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr3 {
    /// Loads a new root; flushes all non-global TLB entries.
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_do_not_leak_into_frame() {
        let frame = PhysicalPage::<Size4K>::from_number(0xABCDE);
        let cr3 = Cr3::from_pml4(frame).with_pwt(true).with_pcd(true);
        assert_eq!(cr3.pml4(), frame);
        assert_eq!(cr3.into_bits() & 0xFFF, 0b1_1000);
    }
}
