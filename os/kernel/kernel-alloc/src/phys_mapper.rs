//! # HHDM-based PhysMapper for Kernel Virtual Memory
//!
//! With a higher-half direct map, every physical address `pa` is visible at
//! `HHDM_BASE + pa` in every address space (the HHDM lives in the shared
//! kernel half). Page tables, stack frames and TLS frames of a process can
//! therefore be written without switching to that process.

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// The HHDM must be present and cover the referenced physical range.
#[derive(Debug, Copy, Clone)]
pub struct HhdmPhysMapper {
    base: VirtualAddress,
}

impl HhdmPhysMapper {
    /// Mapper for the kernel's HHDM at [`HHDM_BASE`].
    pub const KERNEL: Self = Self::with_base(VirtualAddress::new(HHDM_BASE));

    /// Mapper for a direct map placed at `base`.
    #[must_use]
    pub const fn with_base(base: VirtualAddress) -> Self {
        Self { base }
    }

    /// Virtual address at which `pa` is visible.
    #[must_use]
    pub const fn virtual_address(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u64() + pa.as_u64())
    }
}

impl Default for HhdmPhysMapper {
    fn default() -> Self {
        Self::KERNEL
    }
}

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.virtual_address(pa).as_u64() as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}
