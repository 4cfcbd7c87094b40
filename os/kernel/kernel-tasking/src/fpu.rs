//! Per-thread SSE/x87 register image.

use crate::{ExecutionContext, Processor, Thread};
use alloc::boxed::Box;
use kernel_info::memory::{FPU_STATE_ALIGNMENT, FPU_STATE_SIZE};

/// `FXSAVE` area: 512 bytes, 16-byte aligned.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct FpuState(pub [u8; FPU_STATE_SIZE]);

const _: () = assert!(align_of::<FpuState>() == FPU_STATE_ALIGNMENT);

impl FpuState {
    pub const ZERO: Self = Self([0; FPU_STATE_SIZE]);
}

impl Default for FpuState {
    fn default() -> Self {
        Self::ZERO
    }
}

impl core::fmt::Debug for FpuState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // FCW and MXCSR are the interesting bits.
        let fcw = u16::from_le_bytes([self.0[0], self.0[1]]);
        let mxcsr = u32::from_le_bytes([self.0[24], self.0[25], self.0[26], self.0[27]]);
        write!(f, "FpuState {{ fcw: {fcw:#06x}, mxcsr: {mxcsr:#010x}, .. }}")
    }
}

/// Give `thread` its FPU image if the processor has SSE.
///
/// A secondary thread inherits the main thread's image; the main thread (or
/// a thread whose main thread has none) starts from the processor's initial
/// state.
pub fn initialize_fpu<P: Processor + ?Sized>(
    ctx: &ExecutionContext<'_, P>,
    thread: &Thread,
    main: Option<&Thread>,
) {
    if !ctx.processor().sse_supported() {
        return;
    }

    let inherited = main
        .filter(|m| m.id() != thread.id())
        .and_then(|m| m.memory().fpu.as_deref().cloned());
    let state = inherited.unwrap_or_else(|| ctx.processor().initial_fpu_state().clone());
    thread.memory().fpu = Some(Box::new(state));
}

pub fn destroy_fpu(thread: &Thread) {
    thread.memory().fpu = None;
}
