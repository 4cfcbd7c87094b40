use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// CR4: Control Register 4 (x86-64).
///
/// Only the bits relevant to extended FPU state are named; the kernel never
/// writes this register from the tasking code.
#[bitfield(u64, order = Lsb)]
pub struct Cr4 {
    #[bits(9)]
    __: u16,

    /// Bit 9: OSFXSR: OS supports FXSAVE/FXRSTOR (SSE state).
    pub osfxsr: bool,

    /// Bit 10: OSXMMEXCPT: OS supports unmasked SIMD FP exceptions.
    pub osxmmexcpt: bool,

    #[bits(7)]
    __: u8,

    /// Bit 18: OSXSAVE: OS uses XSAVE/XRSTOR and XCR0.
    pub osxsave: bool,

    #[bits(45)]
    __: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}
