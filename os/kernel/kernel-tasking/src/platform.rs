//! # Processor Platform
//!
//! Everything the tasking-memory code needs from the executing processor,
//! behind one trait so the logic runs unchanged against simulated hardware.

use crate::{FpuState, PageSpace};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::InterruptControl;

/// The processor executing the current code path.
///
/// Implementations are per-processor objects; none of the methods may be
/// called for a different processor than the one executing.
pub trait Processor: InterruptControl {
    /// Logical processor index.
    fn id(&self) -> u32;

    /// The address space loaded in CR3.
    fn active_space(&self) -> PageSpace;

    /// Load `space` into CR3.
    ///
    /// # Safety
    /// `space` must map the executing code, its stack and the kernel half.
    unsafe fn load_space(&self, space: PageSpace);

    /// Linear address of the most recent page fault (CR2).
    fn fault_address(&self) -> VirtualAddress;

    /// Drop the TLB entry for `va` on this processor.
    fn invalidate_page(&self, va: VirtualAddress);

    /// Whether `FXSAVE`/`FXRSTOR` state is in use.
    fn sse_supported(&self) -> bool;

    /// FPU image captured right after processor initialization.
    fn initial_fpu_state(&self) -> &FpuState;
}

#[cfg(target_arch = "x86_64")]
pub use x86::X86Processor;

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::Processor;
    use crate::{FpuState, PageSpace};
    use kernel_memory_addresses::VirtualAddress;
    use kernel_registers::instructions::{cli, invlpg, sti};
    use kernel_registers::{Cr2, Cr3, Cr4, LoadRegisterUnsafe, Rflags, StoreRegisterUnsafe};
    use kernel_sync::InterruptControl;

    /// Ring-0 `x86_64` implementation over the typed control registers.
    pub struct X86Processor {
        id: u32,
        initial_fpu: FpuState,
    }

    impl X86Processor {
        /// Describe the executing processor, snapshotting its FPU state with
        /// `FXSAVE` if SSE is enabled.
        ///
        /// # Safety
        /// Ring 0, and must be constructed on the processor it describes.
        #[must_use]
        pub unsafe fn new(id: u32) -> Self {
            let mut initial_fpu = FpuState::ZERO;
            if unsafe { Cr4::load_unsafe() }.osfxsr() {
                unsafe {
                    core::arch::asm!(
                        "fxsave64 [{}]",
                        in(reg) initial_fpu.0.as_mut_ptr(),
                        options(nostack, preserves_flags)
                    );
                }
            }
            Self { id, initial_fpu }
        }
    }

    impl InterruptControl for X86Processor {
        fn interrupts_enabled(&self) -> bool {
            unsafe { Rflags::load_unsafe() }.if_interrupt_enable()
        }

        fn disable_interrupts(&self) {
            unsafe { cli() }
        }

        fn enable_interrupts(&self) {
            unsafe { sti() }
        }
    }

    impl Processor for X86Processor {
        fn id(&self) -> u32 {
            self.id
        }

        fn active_space(&self) -> PageSpace {
            PageSpace::from_root(unsafe { Cr3::load_unsafe() }.pml4())
        }

        unsafe fn load_space(&self, space: PageSpace) {
            unsafe { Cr3::from_pml4(space.root()).store_unsafe() }
        }

        fn fault_address(&self) -> VirtualAddress {
            unsafe { Cr2::load_unsafe() }.fault_address()
        }

        fn invalidate_page(&self, va: VirtualAddress) {
            unsafe { invlpg(va) }
        }

        fn sse_supported(&self) -> bool {
            unsafe { Cr4::load_unsafe() }.osfxsr()
        }

        fn initial_fpu_state(&self) -> &FpuState {
            &self.initial_fpu
        }
    }
}
