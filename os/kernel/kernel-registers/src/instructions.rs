//! Privileged single instructions without a register model.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry covering `va` on the executing processor.
///
/// # Safety
/// Ring 0 only.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

/// `cli`: mask maskable interrupts on the executing processor.
///
/// # Safety
/// Ring 0 only.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn cli() {
    unsafe { core::arch::asm!("cli", options(nostack, preserves_flags)) }
}

/// `sti`: unmask maskable interrupts on the executing processor.
///
/// # Safety
/// Ring 0 only.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn sti() {
    unsafe { core::arch::asm!("sti", options(nostack, preserves_flags)) }
}
