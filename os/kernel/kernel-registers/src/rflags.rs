use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// RFLAGS, reduced to what interrupt masking needs.
#[bitfield(u64, order = Lsb)]
pub struct Rflags {
    #[bits(9)]
    __: u16,

    /// Bit 9: IF: maskable hardware interrupts are delivered.
    pub if_interrupt_enable: bool,

    #[bits(54)]
    __: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Rflags {
    unsafe fn load_unsafe() -> Self {
        let r: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags));
        }
        Self::from_bits(r)
    }
}
